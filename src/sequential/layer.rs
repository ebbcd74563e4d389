use burn::nn::conv::Conv2d;
use burn::nn::pool::MaxPool2d;
use burn::nn::{Dropout, Linear, Relu};
use burn::prelude::*;

/// Flattens `[batch, channels, height, width]` into `[batch, channels * height * width]`.
#[derive(Module, Clone, Debug, Default)]
pub struct Flatten;

impl Flatten {
    pub fn new() -> Self {
        Self
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, height, width] = x.dims();
        x.reshape([batch, channels * height * width])
    }
}

/// Per-image standardization: each image is shifted to zero mean and scaled to unit variance.
///
/// The standard deviation is lower-bounded by `1 / sqrt(channels * height * width)`,
/// so uniform images do not divide by zero.
#[derive(Module, Clone, Debug, Default)]
pub struct Standardize;

impl Standardize {
    pub fn new() -> Self {
        Self
    }

    /// # Shapes
    /// - input: `[batch, channels, height, width]`
    /// - output: `[batch, channels, height, width]`
    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, channels, height, width] = x.dims();
        let n = channels * height * width;
        let flat = x.reshape([batch, n]);

        let mean = flat.clone().mean_dim(1);
        let centered = flat - mean;
        let var = centered.clone().powf_scalar(2.0).mean_dim(1);
        let min_std = 1.0 / (n as f64).sqrt();
        let std = var.sqrt().clamp_min(min_std);

        (centered / std).reshape([batch, channels, height, width])
    }
}

/// A single layer of a [`Sequential`](super::Sequential) network.
#[derive(Module, Debug)]
pub enum Layer<B: Backend> {
    Conv2d(Conv2d<B>),
    MaxPool2d(MaxPool2d),
    Dense(Linear<B>),
    Relu(Relu),
    Dropout(Dropout),
    Flatten(Flatten),
    Standardize(Standardize),
}

/// Intermediate value flowing between layers.
#[derive(Debug, Clone)]
pub enum Activation<B: Backend> {
    /// `[batch, channels, height, width]`
    Spatial(Tensor<B, 4>),
    /// `[batch, features]`
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Layer<B> {
    /// Panics if the layer is applied on an activation of the wrong rank;
    /// [`SequentialConfig::validate`](super::SequentialConfig::validate) rules that out.
    pub fn forward(&self, x: Activation<B>) -> Activation<B> {
        use Activation::*;
        match (self, x) {
            (Layer::Conv2d(conv), Spatial(x)) => Spatial(conv.forward(x)),
            (Layer::MaxPool2d(pool), Spatial(x)) => Spatial(pool.forward(x)),
            (Layer::Standardize(s), Spatial(x)) => Spatial(s.forward(x)),
            (Layer::Flatten(flatten), Spatial(x)) => Flat(flatten.forward(x)),
            (Layer::Dense(linear), Flat(x)) => Flat(linear.forward(x)),
            (Layer::Relu(relu), Spatial(x)) => Spatial(relu.forward(x)),
            (Layer::Relu(relu), Flat(x)) => Flat(relu.forward(x)),
            (Layer::Dropout(dropout), Spatial(x)) => Spatial(dropout.forward(x)),
            (Layer::Dropout(dropout), Flat(x)) => Flat(dropout.forward(x)),
            (layer, x) => panic!(
                "layer {} cannot be applied on a {} activation",
                layer.kind(),
                match x {
                    Spatial(_) => "spatial",
                    Flat(_) => "flat",
                }
            ),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "conv2d",
            Layer::MaxPool2d(_) => "max_pool2d",
            Layer::Dense(_) => "dense",
            Layer::Relu(_) => "relu",
            Layer::Dropout(_) => "dropout",
            Layer::Flatten(_) => "flatten",
            Layer::Standardize(_) => "standardize",
        }
    }

    /// Kind of the layer a saved record belongs to, named as in [`Self::kind`].
    pub fn record_kind(record: &LayerRecord<B>) -> &'static str {
        match record {
            LayerRecord::Conv2d(_) => "conv2d",
            LayerRecord::MaxPool2d(_) => "max_pool2d",
            LayerRecord::Dense(_) => "dense",
            LayerRecord::Relu(_) => "relu",
            LayerRecord::Dropout(_) => "dropout",
            LayerRecord::Flatten(_) => "flatten",
            LayerRecord::Standardize(_) => "standardize",
        }
    }

    /// Shapes of the trainable parameters, weights first.
    pub fn param_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = vec![];
        match self {
            Layer::Conv2d(conv) => {
                shapes.push(conv.weight.dims().to_vec());
                if let Some(bias) = &conv.bias {
                    shapes.push(bias.dims().to_vec());
                }
            }
            Layer::Dense(linear) => {
                shapes.push(linear.weight.dims().to_vec());
                if let Some(bias) = &linear.bias {
                    shapes.push(bias.dims().to_vec());
                }
            }
            Layer::MaxPool2d(_)
            | Layer::Relu(_)
            | Layer::Dropout(_)
            | Layer::Flatten(_)
            | Layer::Standardize(_) => {}
        }
        shapes
    }
}
