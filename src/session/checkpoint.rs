use crate::error::{Error, Result};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{FileRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub type RecorderTy = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Name of the file listing the saved steps, oldest first.
pub const CHECKPOINT_INDEX: &str = "checkpoint";
pub const MODEL_PREFIX: &str = "model";
pub const OPTIM_PREFIX: &str = "optim";

/// Periodically saves the model and optimizer state into a directory,
/// keeping only the newest checkpoints.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
    save_every: Option<Duration>,
    save_steps: Option<usize>,
    keep: usize,
    last_save: Instant,
    last_saved_step: Option<usize>,
}

impl Checkpointer {
    /// Saves every 600 seconds, keeping the 5 newest checkpoints.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            save_every: Some(Duration::from_secs(600)),
            save_steps: None,
            keep: 5,
            last_save: Instant::now(),
            last_saved_step: None,
        }
    }

    pub fn with_save_secs(mut self, secs: Option<u64>) -> Self {
        self.save_every = secs.map(Duration::from_secs);
        self
    }

    pub fn with_save_steps(mut self, steps: Option<usize>) -> Self {
        self.save_steps = steps.filter(|s| *s > 0);
        self
    }

    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    /// Path of the model record of `step`, without the file extension.
    pub fn model_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("{MODEL_PREFIX}-{step}"))
    }

    /// Path of the optimizer record of `step`, without the file extension.
    pub fn optim_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("{OPTIM_PREFIX}-{step}"))
    }

    /// Whether a checkpoint is due after `global_step` steps were applied.
    pub fn is_due(&self, global_step: usize) -> bool {
        if self.last_saved_step == Some(global_step) {
            return false;
        }
        let by_steps = self
            .save_steps
            .is_some_and(|steps| global_step % steps == 0);
        let by_time = self
            .save_every
            .is_some_and(|every| self.last_save.elapsed() >= every);
        by_steps || by_time
    }

    /// Whether `global_step` still lacks a checkpoint.
    pub fn is_due_final(&self, global_step: usize) -> bool {
        self.last_saved_step != Some(global_step)
    }

    /// Steps listed in the index file, oldest first.
    pub fn saved_steps(&self) -> Result<Vec<usize>> {
        let path = self.dir.join(CHECKPOINT_INDEX);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(Error::io(path, e)),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.trim().parse().map_err(|_| Error::InvalidData {
                    path: path.clone(),
                    reason: format!("{line:?} is not a step number"),
                })
            })
            .collect()
    }

    pub fn latest_step(&self) -> Result<Option<usize>> {
        Ok(self.saved_steps()?.last().copied())
    }

    /// Records the model and optimizer of `global_step`, then drops the oldest checkpoints.
    pub fn save<B, M, O>(&mut self, global_step: usize, model: &M, optim: &O) -> Result<()>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let recorder = RecorderTy::new();
        model
            .clone()
            .save_file(self.model_path(global_step), &recorder)?;
        Recorder::<B>::record(&recorder, optim.to_record(), self.optim_path(global_step))?;

        let mut steps = self.saved_steps()?;
        steps.retain(|s| *s != global_step);
        steps.push(global_step);
        let removed = steps.len().saturating_sub(self.keep);
        for step in steps.drain(..removed) {
            self.remove::<B>(step)?;
        }
        let index = steps
            .iter()
            .map(|s| format!("{s}\n"))
            .collect::<String>();
        let index_path = self.dir.join(CHECKPOINT_INDEX);
        std::fs::write(&index_path, index).map_err(|e| Error::io(index_path, e))?;

        tracing::info!("Saved checkpoint for step {global_step} into {:?}", self.dir);
        self.last_save = Instant::now();
        self.last_saved_step = Some(global_step);
        Ok(())
    }

    fn remove<B: Backend>(&self, step: usize) -> Result<()> {
        let ext = <RecorderTy as FileRecorder<B>>::file_extension();
        for path in [self.model_path(step), self.optim_path(step)] {
            let mut file = path.into_os_string();
            file.push(".");
            file.push(ext);
            let file = PathBuf::from(file);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(file, e)),
            }
        }
        Ok(())
    }

    /// Loads the newest checkpoint, if any, returning its step.
    pub fn restore<B, M, O>(
        &mut self,
        model: M,
        optim: O,
        device: &B::Device,
    ) -> Result<(M, O, Option<usize>)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let Some(step) = self.latest_step()? else {
            return Ok((model, optim, None));
        };
        tracing::info!("Restoring checkpoint of step {step} from {:?}", self.dir);
        let recorder = RecorderTy::new();
        let model = model.load_file(self.model_path(step), &recorder, device)?;
        let record = Recorder::<B>::load(&recorder, self.optim_path(step), device)?;
        let optim = optim.load_record(record);
        self.last_saved_step = Some(step);
        Ok((model, optim, Some(step)))
    }
}
