use crate::adversarial::{FgsmConfig, fgsm};
use crate::error::Result;
use crate::mnist::augment::{ImageDataGeneratorConfig, data_gen_mnist};
use crate::schedule::LrSchedule;
use crate::sequential::{Sequential, SequentialConfig};
use crate::session::{LoggerHook, MonitoredSession, NanGuard, StepOutput};
use crate::utils::{ClassificationMetrics, cross_entropy};
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::train::ClassificationOutput;

#[derive(Config, Debug)]
pub struct MnistTrainingConfig {
    #[config(default = 6)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 100)]
    pub log_frequency: usize,
    #[config(default = 0)]
    pub seed: u64,
}

/// Trains a fresh model of `architecture` on the training split, batches drawn from
/// [`data_gen_mnist`].
///
/// # Shapes
///   - x_train: [n, 28, 28, 1]
///   - y_train: [n]
pub fn train_mnist<B: AutodiffBackend>(
    config: &MnistTrainingConfig,
    architecture: &SequentialConfig,
    x_train: Tensor<B, 4>,
    y_train: Tensor<B, 1, Int>,
    device: &B::Device,
) -> Result<Sequential<B>> {
    B::seed(device, config.seed);
    architecture.validate()?;

    let datagen = data_gen_mnist(&x_train);
    let model: Sequential<B> = architecture.init(device);
    let optim = AdamConfig::new().init::<B, Sequential<B>>();
    let mut session = MonitoredSession::new(model, optim, LrSchedule::Constant(config.lr))
        .with_hook(NanGuard)
        .with_hook(LoggerHook::new(config.log_frequency));

    let [num_items, ..] = x_train.dims();
    let mut metrics =
        ClassificationMetrics::<B>::new(num_items, config.num_epochs, Some(config.lr));

    tracing::info!("Starting training...");
    for epoch in 0..config.num_epochs {
        metrics.start_epoch(epoch + 1);
        let flow = datagen.flow(
            x_train.clone(),
            y_train.clone(),
            config.batch_size,
            true,
            config.seed.wrapping_add(epoch as u64),
        );
        for (images, labels) in flow {
            session.run(|model| {
                let logits = model.forward(images);
                let [batch_size, _] = logits.dims();
                let loss = cross_entropy(logits.clone(), labels.clone());
                let output = ClassificationOutput::new(loss, logits, labels);
                let precision = metrics.update(&output);
                StepOutput {
                    loss: output.loss,
                    batch_size,
                    precision: Some(precision),
                }
            })?;
        }
        tracing::info!(
            "Epoch {}/{}, Avg Loss {:.4}, Avg Acc {:.2}%",
            epoch + 1,
            config.num_epochs,
            metrics.running_loss(),
            100.0 * metrics.running_accuracy()
        );
    }
    session.close()
}

/// Accuracy of the model, on the clean images or on their FGSM perturbation.
///
/// The perturbation is computed with the autodiff model, dropout disabled;
/// predictions use the inference model.
pub fn evaluate<B: AutodiffBackend>(
    model: &Sequential<B>,
    images: Tensor<B, 4>,
    labels: Tensor<B, 1, Int>,
    batch_size: usize,
    attack: Option<&FgsmConfig>,
) -> f32 {
    let valid = model.valid();
    let attacker = attack.map(|config| (model.without_dropout(), config));
    let [num_items, ..] = images.dims();
    let mut metrics = ClassificationMetrics::<B::InnerBackend>::new(num_items, 1, None);

    let flow = ImageDataGeneratorConfig::new()
        .init()
        .flow(images, labels, batch_size, false, 0);
    for (images, labels) in flow {
        let images = match &attacker {
            Some((attacker, config)) => fgsm(attacker, images, config),
            None => images,
        };
        let logits = valid.forward(images.inner());
        let labels = labels.inner();
        let loss = cross_entropy(logits.clone(), labels.clone());
        metrics.update(&ClassificationOutput::new(loss, logits, labels));
    }
    if metrics.items_processed() == 0 {
        return 0.0;
    }
    metrics.running_accuracy()
}
