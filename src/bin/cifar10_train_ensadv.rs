use anyhow::Context;
use burn::tensor::backend::AutodiffBackend;
use burn_ensadv::cifar10::train_ensadv;

#[path = "common/mod.rs"]
pub mod common;

use common::backend::{BACKEND_NAME, TrainAutoBackend, TrainDevice};
use common::cli::{EnsAdvArgs, init_tracing};

pub fn launch<AutoB: AutodiffBackend + TrainDevice>(args: &EnsAdvArgs) -> anyhow::Result<()> {
    let config = args.config().context("invalid training configuration")?;
    let device = AutoB::train_device();

    let summary = train_ensadv::<AutoB>(&config, &args.data_dir, &args.train_dir, device)
        .with_context(|| format!("training into {:?} failed", args.train_dir))?;
    tracing::info!(
        "Done: {} steps, last loss {:?}",
        summary.global_step,
        summary.last_loss
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Backend: {BACKEND_NAME}");
    let args = EnsAdvArgs::parse()?;
    launch::<TrainAutoBackend>(&args)
}
