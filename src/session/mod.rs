//! A training loop driver owning the model, the optimizer and the global step.
//!
//! Each [`MonitoredSession::run`] builds the loss of one batch, lets the [`SessionHook`]s
//! observe it, applies the optimizer step and saves a checkpoint when one is due.

mod checkpoint;
mod hooks;

pub use checkpoint::{CHECKPOINT_INDEX, Checkpointer, MODEL_PREFIX, OPTIM_PREFIX, RecorderTy};
pub use hooks::{HookAction, LoggerHook, LoggerReport, NanGuard, RunValues, SessionHook, StopAtStep};

use crate::error::Result;
use crate::schedule::LrSchedule;
use crate::utils::scalar;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// What a training step hands back to the session.
pub struct StepOutput<B: Backend> {
    /// Loss to minimize.
    ///
    /// # Shape
    /// [1]
    pub loss: Tensor<B, 1>,
    pub batch_size: usize,
    /// Accuracy on the clean batch.
    pub precision: Option<f32>,
}

/// Drives optimization steps until a hook requests a stop or fails.
pub struct MonitoredSession<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    model: M,
    optim: O,
    lr_schedule: LrSchedule,
    hooks: Vec<Box<dyn SessionHook>>,
    checkpointer: Option<Checkpointer>,
    global_step: usize,
    last_loss: Option<f32>,
    begun: bool,
    stop_requested: bool,
    _backend: core::marker::PhantomData<B>,
}

impl<B, M, O> MonitoredSession<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    pub fn new(model: M, optim: O, lr_schedule: LrSchedule) -> Self {
        Self {
            model,
            optim,
            lr_schedule,
            hooks: vec![],
            checkpointer: None,
            global_step: 0,
            last_loss: None,
            begun: false,
            stop_requested: false,
            _backend: core::marker::PhantomData,
        }
    }

    /// Hooks are called in insertion order.
    pub fn with_hook(mut self, hook: impl SessionHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Continues from the newest checkpoint of the checkpointer's directory, if any.
    pub fn restore(mut self, device: &B::Device) -> Result<Self> {
        let Some(mut checkpointer) = self.checkpointer.take() else {
            return Ok(self);
        };
        let (model, optim, step) = checkpointer.restore::<B, M, O>(self.model, self.optim, device)?;
        self.model = model;
        self.optim = optim;
        if let Some(step) = step {
            self.global_step = step;
        }
        self.checkpointer = Some(checkpointer);
        Ok(self)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Number of optimizer steps applied so far.
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.last_loss
    }

    pub fn should_stop(&self) -> bool {
        self.stop_requested
    }

    /// Runs one training step.
    ///
    /// `step` builds the loss from the current model. If a hook fails, the error is returned
    /// and the optimizer step is not applied.
    pub fn run(&mut self, step: impl FnOnce(&M) -> StepOutput<B>) -> Result<()> {
        if !self.begun {
            self.hooks.iter_mut().for_each(|hook| hook.begin());
            self.begun = true;
        }
        self.hooks.iter_mut().for_each(|hook| hook.before_run());

        let StepOutput {
            loss,
            batch_size,
            precision,
        } = step(&self.model);

        let values = RunValues {
            global_step: self.global_step,
            loss: scalar(loss.clone().detach()),
            batch_size,
            precision,
        };
        self.last_loss = Some(values.loss);

        let mut stop = false;
        for hook in self.hooks.iter_mut() {
            if hook.after_run(&values)? == HookAction::RequestStop {
                stop = true;
            }
        }

        let lr = self.lr_schedule.lr(self.global_step);
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optim.step(lr, self.model.clone(), grads);
        self.global_step += 1;

        if let Some(checkpointer) = self.checkpointer.as_mut()
            && checkpointer.is_due(self.global_step)
        {
            checkpointer.save::<B, M, O>(self.global_step, &self.model, &self.optim)?;
        }

        self.stop_requested |= stop;
        Ok(())
    }

    /// Saves a final checkpoint and returns the trained model.
    pub fn close(mut self) -> Result<M> {
        if let Some(checkpointer) = self.checkpointer.as_mut()
            && self.global_step > 0
            && checkpointer.is_due_final(self.global_step)
        {
            checkpointer.save::<B, M, O>(self.global_step, &self.model, &self.optim)?;
        }
        Ok(self.model)
    }
}
