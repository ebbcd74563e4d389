use crate::mnist::{IMAGE_COLS, IMAGE_ROWS, NUM_CHANNELS, NUM_CLASSES};
use crate::sequential::{LayerConfig, SequentialConfig};
use std::fmt;
use std::str::FromStr;

/// The six MNIST classifier variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MnistArchitecture {
    /// Two 5x5 convolutions, one hidden dense layer.
    A,
    /// Input dropout and three strided convolutions, no hidden dense layer.
    B,
    /// Two 3x3 convolutions, one hidden dense layer.
    C,
    /// Four hidden dense layers of 300 units with dropout.
    D,
    /// Two hidden dense layers of 100 units.
    E,
    /// Two conv/pool stages, one hidden dense layer of 1024 units.
    F,
}

impl MnistArchitecture {
    pub const ALL: [MnistArchitecture; 6] = [Self::A, Self::B, Self::C, Self::D, Self::E, Self::F];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Returns the architecture description, taking `[28, 28, 1]` images to 10 raw class scores.
    pub fn config(&self) -> SequentialConfig {
        use LayerConfig::*;
        let layers = match self {
            Self::A => vec![
                LayerConfig::conv(64, 5),
                Relu,
                LayerConfig::conv(64, 5),
                Relu,
                LayerConfig::dropout(0.25),
                Flatten,
                LayerConfig::dense(128),
                Relu,
                LayerConfig::dropout(0.5),
                LayerConfig::dense(NUM_CLASSES),
            ],
            Self::B => vec![
                LayerConfig::dropout(0.2),
                // "same" padding: 28 -> 14
                LayerConfig::conv_strided(64, 8, 2, 3),
                Relu,
                LayerConfig::conv_strided(128, 6, 2, 0),
                Relu,
                LayerConfig::conv(128, 5),
                Relu,
                LayerConfig::dropout(0.5),
                Flatten,
                LayerConfig::dense(NUM_CLASSES),
            ],
            Self::C => vec![
                LayerConfig::conv(128, 3),
                Relu,
                LayerConfig::conv(64, 3),
                Relu,
                LayerConfig::dropout(0.25),
                Flatten,
                LayerConfig::dense(128),
                Relu,
                LayerConfig::dropout(0.5),
                LayerConfig::dense(NUM_CLASSES),
            ],
            Self::D => {
                let mut layers = vec![Flatten];
                for _ in 0..4 {
                    layers.extend([LayerConfig::dense_he(300), Relu, LayerConfig::dropout(0.5)]);
                }
                layers.push(LayerConfig::dense(NUM_CLASSES));
                layers
            }
            Self::E => vec![
                Flatten,
                LayerConfig::dense(100),
                Relu,
                LayerConfig::dense(100),
                Relu,
                LayerConfig::dense(NUM_CLASSES),
            ],
            Self::F => vec![
                LayerConfig::conv(32, 3),
                Relu,
                LayerConfig::max_pool(2),
                LayerConfig::conv(64, 3),
                Relu,
                LayerConfig::max_pool(2),
                Flatten,
                LayerConfig::dense(1024),
                Relu,
                LayerConfig::dense(NUM_CLASSES),
            ],
        };
        SequentialConfig::new([IMAGE_ROWS, IMAGE_COLS, NUM_CHANNELS], layers)
    }
}

impl fmt::Display for MnistArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl FromStr for MnistArchitecture {
    type Err = String;

    /// Accepts a letter (`A`..`F`, any case) or an index (`0`..`5`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(index) = s.parse::<usize>() {
            return Self::from_index(index)
                .ok_or_else(|| format!("model type index {index} is not in 0..=5"));
        }
        Self::ALL
            .into_iter()
            .find(|arch| arch.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown model type {s:?}, expected A..F or 0..5"))
    }
}

/// Architecture of variant `index` (0 = A, ..., 5 = F).
///
/// Panics if `index` is out of range.
pub fn model_mnist(index: usize) -> SequentialConfig {
    match MnistArchitecture::from_index(index) {
        Some(arch) => arch.config(),
        None => panic!("MNIST model type {index} is out of range 0..=5"),
    }
}
