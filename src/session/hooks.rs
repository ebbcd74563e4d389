use crate::error::{Error, Result};
use std::fmt;
use std::time::Instant;

/// Values observed by the hooks after each step.
#[derive(Debug, Clone, PartialEq)]
pub struct RunValues {
    /// Global step of the run, before the optimizer applied it.
    pub global_step: usize,
    /// Total training loss of the step.
    pub loss: f32,
    /// Number of examples in the step's batch.
    pub batch_size: usize,
    /// Accuracy on the clean batch, if the step measured it.
    pub precision: Option<f32>,
}

/// What the session should do once the current step is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    RequestStop,
}

/// Observer of a [`MonitoredSession`](super::MonitoredSession).
///
/// `after_run` is called after the forward pass and before the optimizer step.
/// Returning an error aborts the session without applying the step.
pub trait SessionHook {
    /// Called once, before the first step.
    fn begin(&mut self) {}

    fn before_run(&mut self) {}

    fn after_run(&mut self, values: &RunValues) -> Result<HookAction>;
}

/// Requests a stop once `last_step` steps have been applied.
#[derive(Debug, Clone)]
pub struct StopAtStep {
    pub last_step: usize,
}

impl StopAtStep {
    pub fn new(last_step: usize) -> Self {
        Self { last_step }
    }
}

impl SessionHook for StopAtStep {
    fn after_run(&mut self, values: &RunValues) -> Result<HookAction> {
        if values.global_step + 1 >= self.last_step {
            Ok(HookAction::RequestStop)
        } else {
            Ok(HookAction::Continue)
        }
    }
}

/// Fails the session on a NaN loss.
#[derive(Debug, Clone, Default)]
pub struct NanGuard;

impl SessionHook for NanGuard {
    fn after_run(&mut self, values: &RunValues) -> Result<HookAction> {
        if values.loss.is_nan() {
            tracing::error!("Model diverged with loss = NaN at step {}", values.global_step);
            return Err(Error::NanLoss {
                step: values.global_step,
            });
        }
        Ok(HookAction::Continue)
    }
}

/// One periodic loss and throughput line.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerReport {
    pub step: usize,
    pub loss: f32,
    pub examples_per_sec: f64,
    pub sec_per_batch: f64,
}

impl fmt::Display for LoggerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {}, loss = {:.2} ({:.1} examples/sec; {:.3} sec/batch)",
            self.step, self.loss, self.examples_per_sec, self.sec_per_batch
        )
    }
}

/// Logs the loss and the throughput every `log_frequency` steps.
///
/// The hook counts steps on its own, starting at 0 for the first run of the session,
/// and measures wall-clock time between two reports.
#[derive(Debug, Clone)]
pub struct LoggerHook {
    log_frequency: usize,
    step: i64,
    start_time: Instant,
    last_report: Option<LoggerReport>,
}

impl LoggerHook {
    pub fn new(log_frequency: usize) -> Self {
        Self {
            log_frequency: log_frequency.max(1),
            step: -1,
            start_time: Instant::now(),
            last_report: None,
        }
    }

    pub fn last_report(&self) -> Option<&LoggerReport> {
        self.last_report.as_ref()
    }
}

impl SessionHook for LoggerHook {
    fn begin(&mut self) {
        self.step = -1;
        self.start_time = Instant::now();
    }

    fn before_run(&mut self) {
        self.step += 1;
    }

    fn after_run(&mut self, values: &RunValues) -> Result<HookAction> {
        // before_run was skipped
        let Ok(step) = usize::try_from(self.step) else {
            return Ok(HookAction::Continue);
        };
        if step % self.log_frequency != 0 {
            return Ok(HookAction::Continue);
        }

        let now = Instant::now();
        let duration = now
            .duration_since(self.start_time)
            .as_secs_f64()
            .max(f64::EPSILON);
        self.start_time = now;

        let report = LoggerReport {
            step,
            loss: values.loss,
            examples_per_sec: (self.log_frequency * values.batch_size) as f64 / duration,
            sec_per_batch: duration / self.log_frequency as f64,
        };
        tracing::info!(precision = values.precision, "{report}");
        self.last_report = Some(report);
        Ok(HookAction::Continue)
    }
}
