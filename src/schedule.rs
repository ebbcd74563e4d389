/// Learning rate as a function of the global step.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LrSchedule {
    Constant(f64),
    /// Decays by `decay_factor` every `decay_steps` steps, in discrete jumps.
    ///
    /// Example: initial = 0.1, decay_factor = 0.1, decay_steps = 100:
    /// (0..100 → 0.1), (100..200 → 0.01), (200..300 → 0.001), ...
    Staircase {
        initial: f64,
        decay_factor: f64,
        decay_steps: usize,
    },
}

impl Default for LrSchedule {
    fn default() -> Self {
        LrSchedule::Constant(1e-3)
    }
}

impl LrSchedule {
    pub fn lr(&self, global_step: usize) -> f64 {
        match self {
            LrSchedule::Constant(lr) => *lr,
            LrSchedule::Staircase {
                initial,
                decay_factor,
                decay_steps,
            } => {
                let decays = global_step / (*decay_steps).max(1);
                initial * decay_factor.powi(decays.min(i32::MAX as usize) as i32)
            }
        }
    }
}
