//! Adversarial examples for adversarial training.
//!
//! - [`fgsm`] builds a dynamic adversarial batch from the current model (fast gradient sign method).
//! - [`AdvSource`] and [`select_adversarial`] pick, for each training step, which adversarial
//!   batch enters the loss: the dynamic one or one of the precomputed variants.

use crate::cifar10::{CHANNELS, HEIGHT, WIDTH};
use crate::sequential::Classifier;
use crate::utils::{cross_entropy, predictions};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Configuration of a single-step sign-gradient attack.
#[derive(Config, Debug)]
pub struct FgsmConfig {
    /// Perturbation applied to each pixel, in pixel units.
    pub epsilon: f64,
    /// Lowest valid pixel value.
    #[config(default = 0.0)]
    pub clip_min: f64,
    /// Highest valid pixel value.
    #[config(default = 255.0)]
    pub clip_max: f64,
}

impl FgsmConfig {
    /// Moves each pixel by `epsilon` in the direction of the gradient sign, then clips.
    ///
    /// A zero gradient leaves the pixel in place.
    pub fn perturb<B: Backend, const D: usize>(
        &self,
        images: Tensor<B, D>,
        grads: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let perturbation = grads.sign().mul_scalar(self.epsilon);
        (images + perturbation).clamp(self.clip_min, self.clip_max)
    }
}

/// Fast gradient sign method.
///
/// The loss is taken against the model's own predictions rather than the true labels,
/// so the attack does not leak the labels. The returned images are detached: no gradient
/// flows back through the perturbation.
///
/// This runs its own forward and backward pass, so it must be called before building
/// the graph of the training loss.
///
/// # Shapes
///   - images: [batch, height, width, channels]
///   - output: [batch, height, width, channels]
pub fn fgsm<B, M>(model: &M, images: Tensor<B, 4>, config: &FgsmConfig) -> Tensor<B, 4>
where
    B: AutodiffBackend,
    M: Classifier<B>,
{
    let images = images.detach().require_grad();
    let logits = model.logits(images.clone());
    let noleak_labels = predictions(logits.clone().detach());
    let noleak_loss = cross_entropy(logits, noleak_labels);

    let grads = noleak_loss.backward();
    let clean = images.clone().inner();
    let input_grads = images
        .grad(&grads)
        .unwrap_or_else(|| clean.zeros_like());

    Tensor::from_inner(config.perturb(clean, input_grads))
}

/// Number of adversarial sources the per-step draw chooses from.
pub const NUM_ADV_SOURCES: u32 = 3;

/// Which adversarial batch enters the loss for a training step.
///
/// The precomputed "thin" variant is never selected: it is held out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvSource {
    /// Generated from the current model with [`fgsm`].
    Dynamic,
    /// Precomputed "wide" adversarial images.
    Wide,
    /// Precomputed "tutorial" adversarial images.
    Tutorial,
    /// All-NaN batch, for draws outside the source range.
    /// Training on it produces a NaN loss, which stops the session.
    Poison,
}

impl AdvSource {
    pub fn from_draw(draw: u32) -> Self {
        match draw {
            0 => AdvSource::Dynamic,
            1 => AdvSource::Wide,
            2 => AdvSource::Tutorial,
            _ => AdvSource::Poison,
        }
    }
}

/// Per-step uniform draw over `0..NUM_ADV_SOURCES`.
#[derive(Debug, Clone)]
pub struct AdvSelector {
    rng: StdRng,
}

impl AdvSelector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn draw(&mut self) -> u32 {
        self.rng.gen_range(0..NUM_ADV_SOURCES)
    }

    pub fn next_source(&mut self) -> AdvSource {
        AdvSource::from_draw(self.draw())
    }
}

/// A CIFAR-10 shaped batch filled with NaN.
///
/// # Shapes
///   - output: [batch_size, 32, 32, 3]
pub fn poison<B: Backend>(batch_size: usize, device: &B::Device) -> Tensor<B, 4> {
    Tensor::full([batch_size, HEIGHT, WIDTH, CHANNELS], f32::NAN, device)
}

/// Returns the adversarial batch of `source`.
///
/// `dynamic` is only evaluated when the dynamic source is selected.
pub fn select_adversarial<B: Backend>(
    source: AdvSource,
    dynamic: impl FnOnce() -> Tensor<B, 4>,
    wide: Tensor<B, 4>,
    tutorial: Tensor<B, 4>,
) -> Tensor<B, 4> {
    match source {
        AdvSource::Dynamic => dynamic(),
        AdvSource::Wide => wide,
        AdvSource::Tutorial => tutorial,
        AdvSource::Poison => {
            let [batch_size, ..] = wide.dims();
            poison(batch_size, &wide.device())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn draw_maps_to_source() {
        assert_eq!(AdvSource::Dynamic, AdvSource::from_draw(0));
        assert_eq!(AdvSource::Wide, AdvSource::from_draw(1));
        assert_eq!(AdvSource::Tutorial, AdvSource::from_draw(2));
        assert_eq!(AdvSource::Poison, AdvSource::from_draw(3));
        assert_eq!(AdvSource::Poison, AdvSource::from_draw(u32::MAX));
    }

    #[test]
    fn selector_never_poisons() {
        let mut selector = AdvSelector::new(7);
        let mut seen = [false; NUM_ADV_SOURCES as usize];
        for _ in 0..1000 {
            let draw = selector.draw();
            assert!(draw < NUM_ADV_SOURCES);
            seen[draw as usize] = true;
        }
        assert_eq!([true; 3], seen);
    }

    #[test]
    fn selector_is_seeded() {
        let a: Vec<_> = {
            let mut s = AdvSelector::new(3);
            (0..32).map(|_| s.draw()).collect()
        };
        let b: Vec<_> = {
            let mut s = AdvSelector::new(3);
            (0..32).map(|_| s.draw()).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn perturb_moves_by_epsilon_and_clips() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 1>::from_floats([0.0, 100.0, 250.0, 40.0], &device);
        let grads = Tensor::<TestBackend, 1>::from_floats([-1.0, 0.5, 3.0, 0.0], &device);
        let adv = FgsmConfig::new(8.0).perturb(images, grads);
        let adv: Vec<f32> = adv.into_data().to_vec().unwrap();
        assert_eq!(vec![0.0, 108.0, 255.0, 40.0], adv);
    }
}
