use crate::cifar10::{CHANNELS, HEIGHT, WIDTH};
use crate::error::{Error, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::transform::{Mapper, MapperDataset};
use burn::data::dataset::{Dataset, InMemDataset};
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const IMAGE_BYTES: usize = HEIGHT * WIDTH * CHANNELS;
/// One label byte followed by the image, channel-first.
pub const RECORD_BYTES: usize = 1 + IMAGE_BYTES;

pub const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];

/// Directory of the clean images, under the data directory.
pub const CLEAN_DIR: &str = "cifar-10-batches-bin";
/// Directories of the precomputed adversarial variants, under the data directory.
/// Each mirrors [`CLEAN_DIR`]: same file names, same record layout, same record order.
pub const THIN_DIR: &str = "cifar-10-adv-thin";
pub const WIDE_DIR: &str = "cifar-10-adv-wide";
pub const TUTORIAL_DIR: &str = "cifar-10-adv-tutorial";

/// A CIFAR-10 image with its label.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Cifar10Record {
    pub label: u8,
    /// Channel-last image bytes.
    ///
    /// # Shape
    /// [HEIGHT * WIDTH * CHANNELS]
    pub image: Vec<u8>,
}

/// Reads a CIFAR-10 binary batch file.
pub fn read_records(path: &Path) -> Result<Vec<Cifar10Record>> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    if bytes.len() % RECORD_BYTES != 0 {
        return Err(Error::InvalidData {
            path: path.into(),
            reason: format!(
                "{} bytes is not a whole number of {RECORD_BYTES}-byte records",
                bytes.len()
            ),
        });
    }
    Ok(bytes
        .chunks_exact(RECORD_BYTES)
        .map(|record| Cifar10Record {
            label: record[0],
            image: chw_to_hwc(&record[1..]),
        })
        .collect())
}

/// Writes records in the CIFAR-10 binary layout.
pub fn write_records(path: &Path, records: &[Cifar10Record]) -> Result<()> {
    let mut bytes = Vec::with_capacity(records.len() * RECORD_BYTES);
    for record in records {
        bytes.push(record.label);
        bytes.extend(hwc_to_chw(&record.image));
    }
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

fn chw_to_hwc(chw: &[u8]) -> Vec<u8> {
    debug_assert_eq!(chw.len(), IMAGE_BYTES);
    let mut hwc = vec![0u8; IMAGE_BYTES];
    for c in 0..CHANNELS {
        for p in 0..HEIGHT * WIDTH {
            hwc[p * CHANNELS + c] = chw[c * HEIGHT * WIDTH + p];
        }
    }
    hwc
}

fn hwc_to_chw(hwc: &[u8]) -> Vec<u8> {
    debug_assert_eq!(hwc.len(), IMAGE_BYTES);
    let mut chw = vec![0u8; IMAGE_BYTES];
    for c in 0..CHANNELS {
        for p in 0..HEIGHT * WIDTH {
            chw[c * HEIGHT * WIDTH + p] = hwc[p * CHANNELS + c];
        }
    }
    chw
}

/// A clean image and its three precomputed adversarial variants.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EnsembleItem {
    pub label: u8,
    /// Channel-last bytes, for all four images.
    pub image: Vec<u8>,
    pub thin: Vec<u8>,
    pub wide: Vec<u8>,
    pub tutorial: Vec<u8>,
}

/// Horizontally flips every image of an item with probability `prob`.
///
/// The same decision applies to the clean image and its variants, so they stay aligned.
/// Decisions are drawn from a seeded generator, in the order items are mapped: they
/// repeat across runs when the loader maps items in a fixed order (a single worker).
#[derive(Debug)]
pub struct RandomFlip {
    pub prob: f64,
    rng: Mutex<StdRng>,
}

impl RandomFlip {
    pub fn new(prob: f64, seed: u64) -> Self {
        Self {
            prob,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn flip(image: &[u8]) -> Vec<u8> {
        let mut flipped = Vec::with_capacity(image.len());
        for row in image.chunks_exact(WIDTH * CHANNELS) {
            for pixel in row.chunks_exact(CHANNELS).rev() {
                flipped.extend_from_slice(pixel);
            }
        }
        flipped
    }
}

impl Mapper<EnsembleItem, EnsembleItem> for RandomFlip {
    fn map(&self, item: &EnsembleItem) -> EnsembleItem {
        let flip = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_bool(self.prob);
        if !flip {
            return item.clone();
        }
        EnsembleItem {
            label: item.label,
            image: Self::flip(&item.image),
            thin: Self::flip(&item.thin),
            wide: Self::flip(&item.wide),
            tutorial: Self::flip(&item.tutorial),
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<EnsembleItem>, RandomFlip, EnsembleItem>;

/// CIFAR-10 images aligned index-for-index with their thin, wide and tutorial adversarial variants.
pub struct Cifar10EnsembleDataset {
    dataset: MappedDataset,
}

impl Dataset<EnsembleItem> for Cifar10EnsembleDataset {
    fn get(&self, index: usize) -> Option<EnsembleItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl Cifar10EnsembleDataset {
    /// Training split, with random horizontal flips seeded by `seed`.
    pub fn train(data_dir: &Path, seed: u64) -> Result<Self> {
        Self::new(data_dir, &TRAIN_FILES, RandomFlip::new(0.5, seed))
    }

    pub fn new(data_dir: &Path, files: &[&str], flip: RandomFlip) -> Result<Self> {
        let items = Self::read_items(data_dir, files)?;
        if items.is_empty() {
            return Err(Error::EmptyDataset(data_dir.join(CLEAN_DIR)));
        }
        tracing::info!(
            "Loaded {} CIFAR-10 ensemble items from {data_dir:?}",
            items.len()
        );
        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, flip);
        Ok(Self { dataset })
    }

    /// Reads and aligns every file of the split.
    pub fn read_items(data_dir: &Path, files: &[&str]) -> Result<Vec<EnsembleItem>> {
        let mut items = vec![];
        for file in files {
            let path = |dir: &str| -> PathBuf { data_dir.join(dir).join(file) };
            let clean = read_records(&path(CLEAN_DIR))?;
            let thin = Self::read_variant(&path(THIN_DIR), "thin", &clean)?;
            let wide = Self::read_variant(&path(WIDE_DIR), "wide", &clean)?;
            let tutorial = Self::read_variant(&path(TUTORIAL_DIR), "tutorial", &clean)?;

            items.extend(
                clean
                    .into_iter()
                    .zip(thin)
                    .zip(wide)
                    .zip(tutorial)
                    .map(|(((clean, thin), wide), tutorial)| EnsembleItem {
                        label: clean.label,
                        image: clean.image,
                        thin: thin.image,
                        wide: wide.image,
                        tutorial: tutorial.image,
                    }),
            );
        }
        Ok(items)
    }

    fn read_variant(
        path: &Path,
        variant: &'static str,
        clean: &[Cifar10Record],
    ) -> Result<Vec<Cifar10Record>> {
        let records = read_records(path)?;
        if records.len() != clean.len() {
            return Err(Error::InvalidData {
                path: path.into(),
                reason: format!(
                    "{} records for {} clean records",
                    records.len(),
                    clean.len()
                ),
            });
        }
        if let Some((index, (adv, clean))) = records
            .iter()
            .zip(clean)
            .enumerate()
            .find(|(_, (adv, clean))| adv.label != clean.label)
        {
            return Err(Error::Misaligned {
                variant,
                index,
                expected: clean.label,
                found: adv.label,
            });
        }
        Ok(records)
    }
}

#[derive(Clone, Default)]
pub struct EnsembleBatcher {}

#[derive(Clone, Debug)]
pub struct EnsembleBatch<B: Backend> {
    /// Clean images, pixel values in [0, 255].
    ///
    /// # Shape
    /// [batch_size, HEIGHT, WIDTH, CHANNELS]
    pub images: Tensor<B, 4>,
    /// Held out from adversarial selection.
    pub thin: Tensor<B, 4>,
    pub wide: Tensor<B, 4>,
    pub tutorial: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, EnsembleItem, EnsembleBatch<B>> for EnsembleBatcher {
    fn batch(&self, items: Vec<EnsembleItem>, device: &B::Device) -> EnsembleBatch<B> {
        let batch_size = items.len();
        let stack = |image: fn(&EnsembleItem) -> &[u8]| -> Tensor<B, 4> {
            let values: Vec<f32> = items
                .iter()
                .flat_map(|item| image(item).iter().map(|v| f32::from(*v)))
                .collect();
            let data = TensorData::new(values, [batch_size, HEIGHT, WIDTH, CHANNELS]);
            Tensor::from_data(data.convert::<B::FloatElem>(), device)
        };

        let images = stack(|item| &item.image);
        let thin = stack(|item| &item.thin);
        let wide = stack(|item| &item.wide);
        let tutorial = stack(|item| &item.tutorial);

        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let labels = Tensor::from_data(
            TensorData::new(labels, [batch_size]).convert::<B::IntElem>(),
            device,
        );

        EnsembleBatch {
            images,
            thin,
            wide,
            tutorial,
            labels,
        }
    }
}
