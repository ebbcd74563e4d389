use burn::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const STD_EPS: f32 = 1e-6;

#[derive(Config, Debug)]
pub struct ImageDataGeneratorConfig {
    /// Subtract the per-channel dataset mean.
    #[config(default = false)]
    pub featurewise_center: bool,
    /// Divide by the per-channel dataset standard deviation.
    #[config(default = false)]
    pub featurewise_std_normalization: bool,
}

/// Batches images after an optional featurewise normalization.
///
/// With the default configuration, batches are yielded unchanged.
#[derive(Debug, Clone)]
pub struct ImageDataGenerator {
    pub config: ImageDataGeneratorConfig,
    /// Per-channel statistics, set by [`Self::fit`].
    pub mean: Option<Vec<f32>>,
    pub std: Option<Vec<f32>>,
}

impl ImageDataGeneratorConfig {
    pub fn init(&self) -> ImageDataGenerator {
        ImageDataGenerator {
            config: self.clone(),
            mean: None,
            std: None,
        }
    }
}

impl ImageDataGenerator {
    /// Computes the per-channel mean and standard deviation of the dataset.
    ///
    /// # Shapes
    ///   - images: [n, height, width, channels]
    pub fn fit<B: Backend>(&mut self, images: &Tensor<B, 4>) {
        let [n, height, width, channels] = images.dims();
        let pixels = images.clone().reshape([n * height * width, channels]);
        let (var, mean) = pixels.var_mean_bias(0);
        let to_vec = |t: Tensor<B, 2>| -> Vec<f32> {
            t.into_data().iter::<f32>().collect()
        };
        self.mean = Some(to_vec(mean));
        self.std = Some(to_vec(var.sqrt()));
    }

    /// Applies the configured normalization.
    ///
    /// Panics if a normalization is configured but the generator was not fitted.
    pub fn standardize<B: Backend>(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [.., channels] = images.dims();
        let device = images.device();
        let per_channel = |values: &[f32]| -> Tensor<B, 4> {
            let data = TensorData::new(values.to_vec(), [channels]);
            Tensor::<B, 1>::from_data(data.convert::<B::FloatElem>(), &device)
                .reshape([1, 1, 1, channels])
        };

        let mut images = images;
        if self.config.featurewise_center {
            let mean = self
                .mean
                .as_ref()
                .expect("featurewise_center requires fitting the generator first");
            images = images - per_channel(mean);
        }
        if self.config.featurewise_std_normalization {
            let std = self
                .std
                .as_ref()
                .expect("featurewise_std_normalization requires fitting the generator first");
            images = images / per_channel(std).add_scalar(STD_EPS);
        }
        images
    }

    /// One pass over the data in batches of `batch_size`; the last batch may be smaller.
    pub fn flow<B: Backend>(
        &self,
        images: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Flow<B> {
        let [n, ..] = images.dims();
        assert_eq!([n], labels.dims(), "one label per image");
        let mut order: Vec<usize> = (0..n).collect();
        if shuffle {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        Flow {
            generator: self.clone(),
            images,
            labels,
            order,
            batch_size: batch_size.max(1),
            position: 0,
        }
    }
}

/// Iterator over `(images, labels)` batches of an [`ImageDataGenerator`].
pub struct Flow<B: Backend> {
    generator: ImageDataGenerator,
    images: Tensor<B, 4>,
    labels: Tensor<B, 1, Int>,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl<B: Backend> Iterator for Flow<B> {
    type Item = (Tensor<B, 4>, Tensor<B, 1, Int>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let indices: Vec<i64> = self.order[self.position..end]
            .iter()
            .map(|i| *i as i64)
            .collect();
        self.position = end;

        let device = self.images.device();
        let len = indices.len();
        let indices = Tensor::<B, 1, Int>::from_data(
            TensorData::new(indices, [len]).convert::<B::IntElem>(),
            &device,
        );
        let images = self.images.clone().select(0, indices.clone());
        let labels = self.labels.clone().select(0, indices);
        Some((self.generator.standardize(images), labels))
    }
}

/// A default generator fitted to the training images.
pub fn data_gen_mnist<B: Backend>(x_train: &Tensor<B, 4>) -> ImageDataGenerator {
    let mut datagen = ImageDataGeneratorConfig::new().init();
    datagen.fit(x_train);
    datagen
}
