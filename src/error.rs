use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to record or load weights: {0}")]
    Recorder(String),

    #[error("invalid data file {path:?}: {reason}")]
    InvalidData { path: PathBuf, reason: String },

    /// The label of an adversarial record differs from the clean record at the same index.
    #[error(
        "adversarial variant {variant} is not aligned with the clean images: \
         record {index} has label {found}, expected {expected}"
    )]
    Misaligned {
        variant: &'static str,
        index: usize,
        expected: u8,
        found: u8,
    },

    /// The saved weights have a different sequence of layers than the architecture.
    #[error("weights with layers {found:?} do not match the architecture (expected {expected:?})")]
    ArchitectureMismatch {
        expected: Vec<&'static str>,
        found: Vec<&'static str>,
    },

    #[error("weights of shape {found:?} do not match the architecture (expected {expected:?})")]
    ShapeMismatch {
        expected: Vec<Vec<usize>>,
        found: Vec<Vec<usize>>,
    },

    #[error("NaN loss during training at step {step}")]
    NanLoss { step: usize },

    #[error("dataset at {0:?} contains no records")]
    EmptyDataset(PathBuf),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<burn::record::RecorderError> for Error {
    fn from(err: burn::record::RecorderError) -> Self {
        Error::Recorder(format!("{err:?}"))
    }
}

impl From<burn::config::ConfigError> for Error {
    fn from(err: burn::config::ConfigError) -> Self {
        Error::Config(format!("{err:?}"))
    }
}
