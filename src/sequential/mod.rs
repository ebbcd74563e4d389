mod layer;
mod network;

pub use layer::{Activation, Flatten, Layer, LayerRecord, Standardize};
pub use network::{
    FeatureShape, LayerConfig, Sequential, SequentialConfig, SequentialRecord, WeightInit,
};

use burn::prelude::*;

/// An image classifier producing raw class scores.
pub trait Classifier<B: Backend> {
    /// # Shapes
    ///   - Input [batch, height, width, channels]
    ///   - Output [batch, num_classes]
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

impl<B: Backend> Classifier<B> for Sequential<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}
