use crate::cifar10::{CHANNELS, HEIGHT, NUM_CLASSES, WIDTH};
use crate::sequential::{LayerConfig, Sequential, SequentialConfig};
use burn::prelude::*;

/// Two conv/pool stages followed by two hidden dense layers.
///
/// Images enter as raw pixels in [0, 255] and are standardized per image by the first layer,
/// so adversarial perturbations can be computed in pixel space.
pub fn cifar10_architecture() -> SequentialConfig {
    let pool = LayerConfig::MaxPool2d {
        pool_size: 3,
        stride: Some(2),
        padding: 1,
    };
    SequentialConfig::new(
        [HEIGHT, WIDTH, CHANNELS],
        vec![
            LayerConfig::Standardize,
            LayerConfig::conv_strided(64, 5, 1, 2),
            LayerConfig::Relu,
            pool.clone(),
            LayerConfig::conv_strided(64, 5, 1, 2),
            LayerConfig::Relu,
            pool,
            LayerConfig::Flatten,
            LayerConfig::dense(384),
            LayerConfig::Relu,
            LayerConfig::dense(192),
            LayerConfig::Relu,
            LayerConfig::dense(NUM_CLASSES),
        ],
    )
}

/// `weight_decay * ½‖W‖²` summed over the hidden dense layers.
pub fn weight_decay_penalty<B: Backend>(
    model: &Sequential<B>,
    weight_decay: f64,
) -> Option<Tensor<B, 1>> {
    if weight_decay == 0.0 {
        return None;
    }
    model
        .hidden_dense_l2()
        .map(|l2| l2.mul_scalar(weight_decay))
}
