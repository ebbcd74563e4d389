//! MNIST classifiers: architectures, data and persistence.

mod architecture;
pub mod augment;
pub mod dataset;
mod persist;
pub mod train;

pub use architecture::{MnistArchitecture, model_mnist};
pub use augment::{Flow, ImageDataGenerator, ImageDataGeneratorConfig, data_gen_mnist};
pub use dataset::{
    Labels, MnistBatch, MnistBatcher, MnistData, MnistDataset, MnistItem, data_mnist,
    default_data_dir,
};
pub use persist::{DEFAULT_FALLBACK_TYPE, architecture_path, load_model, save_model};
pub use train::{MnistTrainingConfig, evaluate, train_mnist};

pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLS: usize = 28;
pub const NUM_CHANNELS: usize = 1;
pub const NUM_CLASSES: usize = 10;
