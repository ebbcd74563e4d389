use crate::error::{Error, Result};
use crate::mnist::model_mnist;
use crate::sequential::{Sequential, SequentialConfig};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use std::path::{Path, PathBuf};

pub type BytesRecorderTy = NamedMpkBytesRecorder<FullPrecisionSettings>;

/// Variant built by [`load_model`] when no architecture file can be read.
pub const DEFAULT_FALLBACK_TYPE: usize = 1;

/// `<path>.json`
pub fn architecture_path(path: &Path) -> PathBuf {
    let mut json = path.as_os_str().to_owned();
    json.push(".json");
    json.into()
}

/// Writes the architecture to `<path>.json` and the weights to `<path>`.
pub fn save_model<B: Backend>(
    config: &SequentialConfig,
    model: &Sequential<B>,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let json = architecture_path(path);
    config.save(&json).map_err(|e| Error::io(&json, e))?;

    let bytes = Recorder::<B>::record(&BytesRecorderTy::new(), model.clone().into_record(), ())?;
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))?;
    tracing::info!("Saved model to {path:?}");
    Ok(())
}

/// Loads the weights at `path` into the architecture described by `<path>.json`.
///
/// If `<path>.json` cannot be read, for any reason, the architecture of variant
/// `model_type` is used instead (see [`model_mnist`]). An architecture file that
/// was read but does not parse is an error, and so are weights that do not fit
/// the architecture, by layer layout ([`Error::ArchitectureMismatch`]) or by
/// parameter shapes ([`Error::ShapeMismatch`]).
pub fn load_model<B: Backend>(
    path: &Path,
    model_type: usize,
    device: &B::Device,
) -> Result<(SequentialConfig, Sequential<B>)> {
    let json = architecture_path(path);
    let config = match std::fs::read(&json) {
        Ok(bytes) => {
            let config = SequentialConfig::load_binary(&bytes)?;
            tracing::info!("Loaded using json");
            config
        }
        Err(err) => {
            tracing::info!("Cannot read {json:?} ({err}), using model type {model_type}");
            model_mnist(model_type)
        }
    };
    config.validate()?;

    let model = config.init::<B>(device);
    let expected = model.param_shapes();

    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let record = Recorder::<B>::load(&BytesRecorderTy::new(), bytes, device)?;
    model.check_record(&record)?;
    let model = model.load_record(record);

    let found = model.param_shapes();
    if found != expected {
        return Err(Error::ShapeMismatch { expected, found });
    }
    Ok((config, model))
}
