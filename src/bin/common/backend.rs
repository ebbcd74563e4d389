//! Backend of the binaries, selected with exactly one `dev-*` feature.
//!
//! Training needs gradients, so the binaries run on [`TrainAutoBackend`]; the
//! inference half of `mnist --eval` uses its inner [`TrainBackend`].

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Pixel and weight precision. Images stay in `[0, 255]` (CIFAR-10) or `[0, 1]` (MNIST).
pub type Element = f32;

#[cfg(feature = "dev-ndarray")]
mod selected {
    pub type TrainBackend = burn::backend::NdArray<super::Element, i32>;
    pub const BACKEND_NAME: &str = "ndarray";
}
#[cfg(any(feature = "dev-tch-cpu", feature = "dev-tch-gpu"))]
mod selected {
    pub type TrainBackend = burn::backend::libtorch::LibTorch<super::Element, i32>;
    #[cfg(feature = "dev-tch-cpu")]
    pub const BACKEND_NAME: &str = "libtorch (cpu)";
    #[cfg(feature = "dev-tch-gpu")]
    pub const BACKEND_NAME: &str = "libtorch (gpu)";
}
#[cfg(any(feature = "dev-wgpu", feature = "dev-metal", feature = "dev-vulkan"))]
mod selected {
    pub type TrainBackend = burn::backend::wgpu::Wgpu<super::Element, i32>;
    pub const BACKEND_NAME: &str = "wgpu";
}
#[cfg(feature = "dev-cuda")]
mod selected {
    pub type TrainBackend = burn::backend::Cuda<super::Element, i32>;
    pub const BACKEND_NAME: &str = "cuda";
}
#[cfg(feature = "dev-rocm")]
mod selected {
    pub type TrainBackend = burn::backend::Rocm<super::Element, i32>;
    pub const BACKEND_NAME: &str = "rocm";
}
#[cfg(not(feature = "_dev-has-backend"))]
mod selected {
    std::compile_error!(
        "No dev backend selected. Enable one of the dev-* features of burn-ensadv/Cargo.toml."
    );

    // keeps the rest of the crate type-checking
    pub type TrainBackend = burn::backend::NdArray<super::Element, i32>;
    pub const BACKEND_NAME: &str = "none";
}

pub use selected::{BACKEND_NAME, TrainBackend};
pub type TrainAutoBackend = burn::backend::Autodiff<TrainBackend>;

/// Device the models and the data loaders are placed on.
pub trait TrainDevice: Backend {
    fn train_device() -> <Self as Backend>::Device {
        Default::default()
    }
}

#[cfg(not(feature = "dev-tch-gpu"))]
impl TrainDevice for TrainBackend {}
#[cfg(all(feature = "dev-tch-gpu", not(target_os = "macos")))]
impl TrainDevice for TrainBackend {
    fn train_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Cuda(0)
    }
}
#[cfg(all(feature = "dev-tch-gpu", target_os = "macos"))]
impl TrainDevice for TrainBackend {
    fn train_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Mps
    }
}

impl TrainDevice for TrainAutoBackend {
    fn train_device() -> <Self as Backend>::Device {
        <<Self as AutodiffBackend>::InnerBackend as TrainDevice>::train_device()
    }
}
