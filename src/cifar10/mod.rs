//! CIFAR-10 ensemble adversarial training.

pub mod dataset;
pub mod model;
pub mod train;

pub use dataset::{Cifar10EnsembleDataset, EnsembleBatch, EnsembleBatcher, EnsembleItem};
pub use model::{cifar10_architecture, weight_decay_penalty};
pub use train::{EnsAdvConfig, EnsAdvLoss, TrainSummary, ensadv_loss, reset_train_dir, train_ensadv};

pub const HEIGHT: usize = 32;
pub const WIDTH: usize = 32;
pub const CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 10;
/// Size of the training split.
pub const NUM_EXAMPLES_PER_EPOCH_FOR_TRAIN: usize = 50_000;
