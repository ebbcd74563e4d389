use crate::error::{Error, Result};
use crate::mnist::{IMAGE_COLS, IMAGE_ROWS, NUM_CHANNELS, NUM_CLASSES};
use crate::utils;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::transform::{Mapper, MapperDataset};
use burn::data::dataset::{Dataset, InMemDataset};
use burn::prelude::*;
use flate2::read::GzDecoder;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// `~/.cache/burn-dataset/mnist`, where the split directories `train` and `test` are looked up.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cache").join("burn-dataset").join("mnist"))
}

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Image as a flat array of brightness values in [0, 1].
    ///
    /// # Shape
    /// [IMAGE_ROWS * IMAGE_COLS * NUM_CHANNELS]
    pub image: Vec<f32>,

    /// Label of the image, in between 0 and 9.
    pub label: u8,
}

#[derive(Deserialize, Debug, Clone)]
struct MnistItemRaw {
    pub image_bytes: Vec<u8>,
    pub label: u8,
}

struct BytesToImage;

impl Mapper<MnistItemRaw, MnistItem> for BytesToImage {
    /// Rescales the brightness bytes into [0, 1].
    fn map(&self, item: &MnistItemRaw) -> MnistItem {
        debug_assert_eq!(item.image_bytes.len(), IMAGE_ROWS * IMAGE_COLS);

        let image = item
            .image_bytes
            .iter()
            .map(|brightness| {
                let value: f32 = (*brightness).as_();
                value / 255.0
            })
            .collect();

        MnistItem {
            image,
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

/// One split of MNIST, read from IDX files (raw or gzipped).
pub struct MnistDataset {
    dataset: MappedDataset,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    /// Reads `<data_dir>/train`.
    pub fn train(data_dir: &Path) -> Result<Self> {
        Self::new(&data_dir.join("train"), TRAIN_IMAGES, TRAIN_LABELS)
    }

    /// Reads `<data_dir>/test`.
    pub fn test(data_dir: &Path) -> Result<Self> {
        Self::new(&data_dir.join("test"), TEST_IMAGES, TEST_LABELS)
    }

    fn new(split_dir: &Path, images: &str, labels: &str) -> Result<Self> {
        let images = read_idx_images(&find_file(split_dir, images)?)?;
        let labels_path = find_file(split_dir, labels)?;
        let labels = read_idx_labels(&labels_path)?;
        if images.len() != labels.len() {
            return Err(Error::InvalidData {
                path: labels_path,
                reason: format!("{} labels for {} images", labels.len(), images.len()),
            });
        }
        if let Some(label) = labels.iter().find(|l| **l as usize >= NUM_CLASSES) {
            return Err(Error::InvalidData {
                path: labels_path,
                reason: format!("label {label} is not a digit"),
            });
        }

        let items: Vec<_> = images
            .into_iter()
            .zip(labels)
            .map(|(image_bytes, label)| MnistItemRaw { image_bytes, label })
            .collect();

        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, BytesToImage);
        Ok(Self { dataset })
    }
}

/// `<dir>/<name>`, or `<dir>/<name>.gz` if only the compressed file exists.
fn find_file(dir: &Path, name: &str) -> Result<PathBuf> {
    let raw = dir.join(name);
    if raw.exists() {
        return Ok(raw);
    }
    let gz = dir.join(format!("{name}.gz"));
    if gz.exists() {
        return Ok(gz);
    }
    Err(Error::io(
        raw,
        std::io::Error::new(std::io::ErrorKind::NotFound, "no such file, compressed or not"),
    ))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut decoded = vec![];
        GzDecoder::new(&bytes[..])
            .read_to_end(&mut decoded)
            .map_err(|e| Error::io(path, e))?;
        Ok(decoded)
    } else {
        Ok(bytes)
    }
}

fn be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

/// Reads an IDX image file. Each image is a vector of `IMAGE_ROWS * IMAGE_COLS` bytes.
pub fn read_idx_images(path: &Path) -> Result<Vec<Vec<u8>>> {
    let bytes = read_bytes(path)?;
    let invalid = |reason: String| Error::InvalidData {
        path: path.into(),
        reason,
    };

    // 16-byte header: magic, count, rows, cols
    let header = (0..4)
        .map(|i| be_u32(&bytes, 4 * i))
        .collect::<Option<Vec<u32>>>()
        .ok_or_else(|| invalid("truncated header".into()))?;
    let [magic, count, rows, cols] = [header[0], header[1], header[2], header[3]];
    if magic != IMAGES_MAGIC {
        return Err(invalid(format!("bad image magic number {magic:#010x}")));
    }
    if (rows as usize, cols as usize) != (IMAGE_ROWS, IMAGE_COLS) {
        return Err(invalid(format!("images are {rows}x{cols}")));
    }

    let image_size = IMAGE_ROWS * IMAGE_COLS;
    let body = &bytes[16..];
    if body.len() < count as usize * image_size {
        return Err(invalid(format!(
            "{count} images announced, {} bytes of pixels",
            body.len()
        )));
    }
    Ok(body
        .chunks_exact(image_size)
        .take(count as usize)
        .map(<[u8]>::to_vec)
        .collect())
}

/// Reads an IDX label file.
pub fn read_idx_labels(path: &Path) -> Result<Vec<u8>> {
    let bytes = read_bytes(path)?;
    let invalid = |reason: String| Error::InvalidData {
        path: path.into(),
        reason,
    };

    // 8-byte header: magic, count
    let (Some(magic), Some(count)) = (be_u32(&bytes, 0), be_u32(&bytes, 4)) else {
        return Err(invalid("truncated header".into()));
    };
    if magic != LABELS_MAGIC {
        return Err(invalid(format!("bad label magic number {magic:#010x}")));
    }
    let body = &bytes[8..];
    if body.len() < count as usize {
        return Err(invalid(format!(
            "{count} labels announced, {} bytes of labels",
            body.len()
        )));
    }
    Ok(body[..count as usize].to_vec())
}

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Brightness in [0, 1].
    ///
    /// # Shape
    /// [batch_size, IMAGE_ROWS, IMAGE_COLS, NUM_CHANNELS]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let batch_size = items.len();
        let (images, labels): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.label as i64))
            .unzip();
        let images = TensorData::new(
            images.concat(),
            [batch_size, IMAGE_ROWS, IMAGE_COLS, NUM_CHANNELS],
        );
        let targets = TensorData::new(labels, [batch_size]);

        MnistBatch {
            images: Tensor::from_data(images.convert::<B::FloatElem>(), device),
            targets: Tensor::from_data(targets.convert::<B::IntElem>(), device),
        }
    }
}

/// Labels of a split, either as class indices or one-hot rows.
#[derive(Clone, Debug)]
pub enum Labels<B: Backend> {
    /// # Shape
    /// [n, NUM_CLASSES]
    OneHot(Tensor<B, 2>),
    /// # Shape
    /// [n]
    Classes(Tensor<B, 1, Int>),
}

impl<B: Backend> Labels<B> {
    /// Class indices, decoding one-hot rows if needed.
    pub fn classes(&self) -> Tensor<B, 1, Int> {
        match self {
            Labels::Classes(classes) => classes.clone(),
            Labels::OneHot(one_hot) => {
                let [n, _] = one_hot.dims();
                one_hot.clone().argmax(1).reshape([n])
            }
        }
    }
}

/// Both splits of MNIST, as whole tensors.
#[derive(Clone, Debug)]
pub struct MnistData<B: Backend> {
    /// # Shape
    /// [60000, 28, 28, 1]
    pub x_train: Tensor<B, 4>,
    pub y_train: Labels<B>,
    /// # Shape
    /// [10000, 28, 28, 1]
    pub x_test: Tensor<B, 4>,
    pub y_test: Labels<B>,
}

/// Loads both splits from `data_dir`, with pixels in [0, 1].
///
/// Labels are one-hot encoded if `one_hot` is set, class indices otherwise.
pub fn data_mnist<B: Backend>(
    data_dir: &Path,
    one_hot: bool,
    device: &B::Device,
) -> Result<MnistData<B>> {
    let load = |dataset: MnistDataset| -> (Tensor<B, 4>, Labels<B>) {
        let items = dataset.iter().collect::<Vec<_>>();
        let n = items.len();
        let labels_host: Vec<u8> = items.iter().map(|item| item.label).collect();
        let batch: MnistBatch<B> = MnistBatcher::default().batch(items, device);
        let labels = if one_hot {
            let data = TensorData::new(utils::one_hot(&labels_host, NUM_CLASSES), [n, NUM_CLASSES]);
            Labels::OneHot(Tensor::from_data(data.convert::<B::FloatElem>(), device))
        } else {
            Labels::Classes(batch.targets)
        };
        (batch.images, labels)
    };

    let (x_train, y_train) = load(MnistDataset::train(data_dir)?);
    let (x_test, y_test) = load(MnistDataset::test(data_dir)?);

    tracing::info!("X_train shape: {:?}", x_train.dims());
    tracing::info!("{} train samples", x_train.dims()[0]);
    tracing::info!("{} test samples", x_test.dims()[0]);
    tracing::info!("Loaded MNIST test data.");

    Ok(MnistData {
        x_train,
        y_train,
        x_test,
        y_test,
    })
}
