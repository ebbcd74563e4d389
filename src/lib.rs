//! Convolutional classifiers for MNIST and ensemble adversarial training for CIFAR-10,
//! on top of [burn].

pub mod adversarial;
pub mod cifar10;
pub mod error;
pub mod mnist;
pub mod schedule;
pub mod sequential;
pub mod session;
pub mod utils;

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::adversarial::*;
    pub use crate::error::{Error, Result};
    pub use crate::schedule::LrSchedule;
    pub use crate::sequential::*;
    pub use crate::session::*;
}
