use crate::adversarial::{AdvSelector, FgsmConfig, fgsm, select_adversarial};
use crate::cifar10::dataset::{Cifar10EnsembleDataset, EnsembleBatch, EnsembleBatcher};
use crate::cifar10::{NUM_EXAMPLES_PER_EPOCH_FOR_TRAIN, cifar10_architecture, weight_decay_penalty};
use crate::error::{Error, Result};
use crate::schedule::LrSchedule;
use crate::sequential::Sequential;
use crate::session::{Checkpointer, LoggerHook, MonitoredSession, NanGuard, StepOutput, StopAtStep};
use crate::utils::{ClassificationMetrics, cross_entropy};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::optim::SgdConfig;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::train::ClassificationOutput;
use std::path::Path;
use std::sync::Arc;

pub const TRAINING_CONFIG_NAME: &str = "training_config.json";

#[derive(Config, Debug)]
pub struct EnsAdvConfig {
    #[config(default = 128)]
    pub batch_size: usize,
    /// Number of batches to run.
    #[config(default = 1000000)]
    pub max_steps: usize,
    /// How often, in steps, to log the loss and throughput.
    #[config(default = 10)]
    pub log_frequency: usize,
    /// Strength of the dynamic adversarial examples, in pixel units.
    #[config(default = 8.0)]
    pub epsilon: f64,
    #[config(default = 0)]
    pub seed: u64,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = 0.1)]
    pub initial_lr: f64,
    #[config(default = 0.1)]
    pub lr_decay_factor: f64,
    #[config(default = 350.0)]
    pub epochs_per_decay: f64,
    /// Scale of the L2 penalty on the hidden dense weights.
    #[config(default = 0.004)]
    pub weight_decay: f64,
    #[config(default = "Some(600)")]
    pub save_secs: Option<u64>,
    #[config(default = "None")]
    pub save_steps: Option<usize>,
    #[config(default = 5)]
    pub keep_checkpoints: usize,
    /// Continue from the newest checkpoint of the train directory instead of wiping it.
    #[config(default = false)]
    pub resume: bool,
    #[config(default = false)]
    pub log_device_placement: bool,
}

impl EnsAdvConfig {
    /// Staircase decay, `epochs_per_decay` epochs per decay.
    pub fn lr_schedule(&self) -> LrSchedule {
        let batches_per_epoch = NUM_EXAMPLES_PER_EPOCH_FOR_TRAIN / self.batch_size.max(1);
        let decay_steps = (batches_per_epoch as f64 * self.epochs_per_decay) as usize;
        LrSchedule::Staircase {
            initial: self.initial_lr,
            decay_factor: self.lr_decay_factor,
            decay_steps,
        }
    }

    pub fn fgsm(&self) -> FgsmConfig {
        FgsmConfig::new(self.epsilon)
            .with_clip_min(0.0)
            .with_clip_max(255.0)
    }
}

/// Losses of one ensemble adversarial training step.
pub struct EnsAdvLoss<B: Backend> {
    /// `clean + adversarial + weight decay`
    pub total: Tensor<B, 1>,
    pub clean: Tensor<B, 1>,
    pub adversarial: Tensor<B, 1>,
    /// # Shape
    /// [batch_size, num_classes]
    pub clean_logits: Tensor<B, 2>,
}

/// Equally weighted sum of the clean and adversarial cross-entropies,
/// plus the weight decay of the hidden dense layers.
pub fn ensadv_loss<B: Backend>(
    model: &Sequential<B>,
    images: Tensor<B, 4>,
    adv_images: Tensor<B, 4>,
    labels: Tensor<B, 1, Int>,
    weight_decay: f64,
) -> EnsAdvLoss<B> {
    let clean_logits = model.forward(images);
    let clean = cross_entropy(clean_logits.clone(), labels.clone());
    let adv_logits = model.forward(adv_images);
    let adversarial = cross_entropy(adv_logits, labels);

    let mut total = clean.clone() + adversarial.clone();
    if let Some(penalty) = weight_decay_penalty(model, weight_decay) {
        total = total + penalty;
    }
    EnsAdvLoss {
        total,
        clean,
        adversarial,
        clean_logits,
    }
}

/// Deletes the directory if it exists and creates it empty.
pub fn reset_train_dir(train_dir: &Path) -> Result<()> {
    if train_dir.exists() {
        std::fs::remove_dir_all(train_dir).map_err(|e| Error::io(train_dir, e))?;
    }
    std::fs::create_dir_all(train_dir).map_err(|e| Error::io(train_dir, e))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub global_step: usize,
    pub last_loss: Option<f32>,
}

/// Trains the CIFAR-10 network on clean images and, at each step, one randomly chosen
/// adversarial batch: generated from the current model, or precomputed ("wide" or "tutorial").
///
/// Stops after `max_steps` steps, or fails with [`Error::NanLoss`] on a NaN loss.
pub fn train_ensadv<B: AutodiffBackend>(
    config: &EnsAdvConfig,
    data_dir: &Path,
    train_dir: &Path,
    device: B::Device,
) -> Result<TrainSummary> {
    B::seed(&device, config.seed);
    if config.log_device_placement {
        tracing::info!("Training on device {device:?}");
    }

    if config.resume {
        std::fs::create_dir_all(train_dir).map_err(|e| Error::io(train_dir, e))?;
    } else {
        reset_train_dir(train_dir)?;
    }
    let config_path = train_dir.join(TRAINING_CONFIG_NAME);
    config
        .save(&config_path)
        .map_err(|e| Error::io(&config_path, e))?;

    let dataset = Cifar10EnsembleDataset::train(data_dir, config.seed)?;
    let num_items = dataset.len();
    let dataloader: Arc<dyn DataLoader<B, EnsembleBatch<B>>> =
        DataLoaderBuilder::new(EnsembleBatcher::default())
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .set_device(device.clone())
            .build(dataset);
    let batches_per_epoch = num_items.div_ceil(config.batch_size.max(1));
    let mut metrics = ClassificationMetrics::<B>::new(
        num_items,
        config.max_steps.div_ceil(batches_per_epoch),
        None,
    );

    let model: Sequential<B> = cifar10_architecture().init(&device);
    let optim = SgdConfig::new().init::<B, Sequential<B>>();
    let checkpointer = Checkpointer::new(train_dir)
        .with_save_secs(config.save_secs)
        .with_save_steps(config.save_steps)
        .with_keep(config.keep_checkpoints);

    let mut session = MonitoredSession::new(model, optim, config.lr_schedule())
        .with_hook(StopAtStep::new(config.max_steps))
        .with_hook(NanGuard)
        .with_hook(LoggerHook::new(config.log_frequency))
        .with_checkpointer(checkpointer);
    if config.resume {
        session = session.restore(&device)?;
    }

    let fgsm_config = config.fgsm();
    let mut selector = AdvSelector::new(config.seed);

    tracing::info!("Starting training...");
    let mut epoch = 0;
    while session.global_step() < config.max_steps && !session.should_stop() {
        epoch += 1;
        metrics.start_epoch(epoch);
        let mut batches = 0;
        for batch in dataloader.iter() {
            batches += 1;
            let EnsembleBatch {
                images,
                thin: _held_out,
                wide,
                tutorial,
                labels,
            } = batch;
            let source = selector.next_source();
            tracing::debug!("step {}: adversarial source {source:?}", session.global_step());

            session.run(|model| {
                let [batch_size, ..] = images.dims();
                let adv_images = select_adversarial(
                    source,
                    || fgsm(model, images.clone(), &fgsm_config),
                    wide,
                    tutorial,
                );
                let loss = ensadv_loss(
                    model,
                    images,
                    adv_images,
                    labels.clone(),
                    config.weight_decay,
                );
                let output = ClassificationOutput::new(loss.total, loss.clean_logits, labels);
                let precision = metrics.update(&output);
                StepOutput {
                    loss: output.loss,
                    batch_size,
                    precision: Some(precision),
                }
            })?;

            if session.should_stop() {
                break;
            }
        }
        if batches == 0 {
            return Err(Error::EmptyDataset(data_dir.into()));
        }
        tracing::info!(
            "Epoch {epoch}, Avg Loss {:.4}, Avg Acc {:.2}%",
            metrics.running_loss(),
            100.0 * metrics.running_accuracy()
        );
    }

    let global_step = session.global_step();
    let last_loss = session.last_loss();
    session.close()?;
    tracing::info!("Training finished after {global_step} steps");
    Ok(TrainSummary {
        global_step,
        last_loss,
    })
}
