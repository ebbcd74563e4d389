use anyhow::{Context, bail};
use burn::tensor::backend::AutodiffBackend;
use burn_ensadv::adversarial::FgsmConfig;
use burn_ensadv::mnist::{
    data_mnist, default_data_dir, evaluate, load_model, save_model, train_mnist,
};

#[path = "common/mod.rs"]
pub mod common;

use common::backend::{BACKEND_NAME, TrainAutoBackend, TrainDevice};
use common::cli::{MnistArgs, init_tracing};

pub fn launch<AutoB: AutodiffBackend + TrainDevice>(args: &MnistArgs) -> anyhow::Result<()> {
    let architecture = args.architecture().config();
    println!("Model {}: {architecture}", args.architecture());
    if !args.train && !args.eval {
        return Ok(());
    }

    let device = AutoB::train_device();
    let data_dir = match args.data_dir.clone().or_else(default_data_dir) {
        Some(dir) => dir,
        None => bail!("no --data-dir given and no home directory to default to"),
    };
    let data = data_mnist::<AutoB>(&data_dir, false, &device)
        .with_context(|| format!("failed to load MNIST from {data_dir:?}"))?;

    if args.train {
        let config = args.training_config();
        let model = train_mnist(
            &config,
            &architecture,
            data.x_train.clone(),
            data.y_train.classes(),
            &device,
        )?;
        save_model(&architecture, &model, &args.model_path)
            .with_context(|| format!("failed to save the model to {:?}", args.model_path))?;
    }

    if args.eval {
        let (_config, model) =
            load_model::<AutoB>(&args.model_path, args.fallback_type(), &device)
                .with_context(|| format!("failed to load the model from {:?}", args.model_path))?;
        let batch_size = args.training_config().batch_size;
        let attack = FgsmConfig::new(args.epsilon)
            .with_clip_min(0.0)
            .with_clip_max(1.0);

        let clean = evaluate(
            &model,
            data.x_test.clone(),
            data.y_test.classes(),
            batch_size,
            None,
        );
        tracing::info!("Test accuracy: {:.2}%", 100.0 * clean);
        let adversarial = evaluate(
            &model,
            data.x_test,
            data.y_test.classes(),
            batch_size,
            Some(&attack),
        );
        tracing::info!(
            "Test accuracy on FGSM examples (epsilon {}): {:.2}%",
            args.epsilon,
            100.0 * adversarial
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Backend: {BACKEND_NAME}");
    let args = MnistArgs::parse()?;
    launch::<TrainAutoBackend>(&args)
}
