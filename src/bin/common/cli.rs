use burn::prelude::*;
use burn_ensadv::cifar10::EnsAdvConfig;
use burn_ensadv::mnist::{DEFAULT_FALLBACK_TYPE, MnistArchitecture, MnistTrainingConfig};
use std::path::PathBuf;

/// Installs the fmt subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}

fn finish(pargs: pico_args::Arguments) -> Result<(), pico_args::Error> {
    // It's up to the caller what to do with the remaining arguments.
    let remaining = pargs.finish();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(pico_args::Error::ArgumentParsingFailed {
            cause: format!("unused arguments: {remaining:?}"),
        })
    }
}

pub const ENSADV_HELP: &str = "\
CIFAR-10 ensemble adversarial training

Trains a CIFAR-10 classifier on clean images plus, at each step, one adversarial batch
drawn at random among: FGSM examples of the current model, and the precomputed
\"wide\" and \"tutorial\" adversarial images. The precomputed \"thin\" images are held out.

USAGE:
    cifar10_train_ensadv [OPTIONS]

The train directory is wiped at start, unless --resume is given.

FLAGS:
    -h, --help                  Show this help message and exit
        --log-device-placement  Log the device used for training
        --resume                Continue from the newest checkpoint of the train directory

OPTIONS:
        --train-dir <PATH>      Directory where to write checkpoints [default: /tmp/cifar10_train]
        --data-dir <PATH>       Directory holding cifar-10-batches-bin and the cifar-10-adv-* directories
                                [default: /tmp/cifar10_data]
        --max-steps <N>         Number of batches to run [default: 1000000]
        --log-frequency <N>     How often to log results to the console [default: 10]
        --epsilon <F>           Strength of adversarial examples, in pixel units [default: 8.0]
        --batch-size <N>        Number of images per batch [default: 128]
        --seed <N>              Seed of the backend, the shuffling and the adversarial draw [default: 0]
    -c, --training-config <PATH>
                                Load the training configuration from this file; the options above still win
";

#[derive(Debug, Clone, PartialEq)]
pub struct EnsAdvArgs {
    pub train_dir: PathBuf,
    pub data_dir: PathBuf,
    pub training_config: Option<PathBuf>,
    pub max_steps: Option<usize>,
    pub log_frequency: Option<usize>,
    pub epsilon: Option<f64>,
    pub batch_size: Option<usize>,
    pub seed: Option<u64>,
    pub log_device_placement: bool,
    pub resume: bool,
}

impl EnsAdvArgs {
    pub fn parse() -> Result<Self, pico_args::Error> {
        let mut pargs = pico_args::Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{}", ENSADV_HELP);
            std::process::exit(0);
        }
        Self::from_args(pargs)
    }

    pub fn from_args(mut pargs: pico_args::Arguments) -> Result<Self, pico_args::Error> {
        let args = EnsAdvArgs {
            train_dir: pargs
                .opt_value_from_os_str("--train-dir", parse_path)?
                .unwrap_or_else(|| "/tmp/cifar10_train".into()),
            data_dir: pargs
                .opt_value_from_os_str("--data-dir", parse_path)?
                .unwrap_or_else(|| "/tmp/cifar10_data".into()),
            training_config: pargs
                .opt_value_from_os_str(["-c", "--training-config"], parse_path)?,
            max_steps: pargs.opt_value_from_str("--max-steps")?,
            log_frequency: pargs.opt_value_from_str("--log-frequency")?,
            epsilon: pargs.opt_value_from_str("--epsilon")?,
            batch_size: pargs.opt_value_from_str("--batch-size")?,
            seed: pargs.opt_value_from_str("--seed")?,
            // must parse flags after values
            log_device_placement: pargs.contains("--log-device-placement"),
            resume: pargs.contains("--resume"),
        };
        finish(pargs)?;
        Ok(args)
    }

    /// The configuration file (or the defaults), overridden by the command line.
    pub fn config(&self) -> burn_ensadv::Result<EnsAdvConfig> {
        let mut config = match &self.training_config {
            Some(path) => {
                tracing::info!("Loading training config from {path:?}");
                EnsAdvConfig::load(path)?
            }
            None => EnsAdvConfig::new(),
        };
        if let Some(max_steps) = self.max_steps {
            config.max_steps = max_steps;
        }
        if let Some(log_frequency) = self.log_frequency {
            config.log_frequency = log_frequency;
        }
        if let Some(epsilon) = self.epsilon {
            config.epsilon = epsilon;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.log_device_placement |= self.log_device_placement;
        config.resume |= self.resume;
        Ok(config)
    }
}

pub const MNIST_HELP: &str = "\
MNIST classifiers

Trains and/or evaluates one of the six MNIST architectures (A to F).
The model is saved as <model-path>.json (architecture) and <model-path> (weights).

USAGE:
    mnist [OPTIONS]

When neither --train nor --eval is given, the program prints the architecture and exits.

FLAGS:
    -h, --help                  Show this help message and exit
    -t, --train                 Train a new model and save it
    -e, --eval                  Evaluate the saved model, on clean and on FGSM images

OPTIONS:
    -m, --model-type <TYPE>     Architecture, A..F or 0..5 [default: A]
                                Evaluation falls back to it when <model-path>.json cannot be read
                                [default: B]
    -d, --data-dir <PATH>       Directory holding train/ and test/ IDX files
                                [default: ~/.cache/burn-dataset/mnist]
    -p, --model-path <PATH>     Where to save or load the model [default: /tmp/mnist/model<TYPE>]
        --epochs <N>            Training epochs [default: 6]
        --batch-size <N>        Batch size [default: 64]
        --lr <F>                Adam learning rate [default: 0.001]
        --epsilon <F>           FGSM strength for evaluation, brightness in [0, 1] [default: 0.3]
        --seed <N>              Seed [default: 0]
";

#[derive(Debug, Clone, PartialEq)]
pub struct MnistArgs {
    pub model_type: Option<MnistArchitecture>,
    pub data_dir: Option<PathBuf>,
    pub model_path: PathBuf,
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub lr: Option<f64>,
    pub epsilon: f64,
    pub seed: Option<u64>,
    pub train: bool,
    pub eval: bool,
}

impl MnistArgs {
    pub fn parse() -> Result<Self, pico_args::Error> {
        let mut pargs = pico_args::Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{}", MNIST_HELP);
            std::process::exit(0);
        }
        Self::from_args(pargs)
    }

    pub fn from_args(mut pargs: pico_args::Arguments) -> Result<Self, pico_args::Error> {
        let model_type: Option<MnistArchitecture> =
            pargs.opt_value_from_str(["-m", "--model-type"])?;
        let trained = model_type.unwrap_or(MnistArchitecture::A);
        let args = MnistArgs {
            model_type,
            data_dir: pargs.opt_value_from_os_str(["-d", "--data-dir"], parse_path)?,
            model_path: pargs
                .opt_value_from_os_str(["-p", "--model-path"], parse_path)?
                .unwrap_or_else(|| format!("/tmp/mnist/model{trained}").into()),
            epochs: pargs.opt_value_from_str("--epochs")?,
            batch_size: pargs.opt_value_from_str("--batch-size")?,
            lr: pargs.opt_value_from_str("--lr")?,
            epsilon: pargs.opt_value_from_str("--epsilon")?.unwrap_or(0.3),
            seed: pargs.opt_value_from_str("--seed")?,
            // must parse flags after values
            train: pargs.contains(["-t", "--train"]),
            eval: pargs.contains(["-e", "--eval"]),
        };
        finish(pargs)?;
        Ok(args)
    }

    /// Architecture to train.
    pub fn architecture(&self) -> MnistArchitecture {
        self.model_type.unwrap_or(MnistArchitecture::A)
    }

    /// Variant loaded when the architecture file of a saved model cannot be read.
    pub fn fallback_type(&self) -> usize {
        self.model_type
            .map(|arch| arch.index())
            .unwrap_or(DEFAULT_FALLBACK_TYPE)
    }

    pub fn training_config(&self) -> MnistTrainingConfig {
        let mut config = MnistTrainingConfig::new();
        if let Some(epochs) = self.epochs {
            config.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(lr) = self.lr {
            config.lr = lr;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config
    }
}
