use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::train::ClassificationOutput;
use burn::train::metric::{AccuracyMetric, Adaptor, LossMetric, Metric, MetricMetadata, Numeric};

/// Mean cross-entropy between raw class scores and class indices.
///
/// # Shapes
/// - logits: `[batch_size, num_classes]`
/// - targets: `[batch_size]`
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, targets)
}

/// Index of the highest score of each row.
///
/// # Shapes
/// - logits: `[batch_size, num_classes]`
/// - output: `[batch_size]`
pub fn predictions<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    let [batch_size, _num_classes] = logits.dims();
    logits.argmax(1).reshape([batch_size])
}

/// Running loss and accuracy of a classifier over the batches seen since [`Self::clear`].
pub struct ClassificationMetrics<B: Backend> {
    loss: LossMetric<B>,
    accuracy: AccuracyMetric<B>,
    meta: MetricMetadata,
}

impl<B: Backend> ClassificationMetrics<B> {
    pub fn new(items_total: usize, epoch_total: usize, lr: Option<f64>) -> Self {
        Self {
            loss: LossMetric::new(),
            accuracy: AccuracyMetric::new(),
            meta: MetricMetadata {
                progress: burn::data::dataloader::Progress::new(0, items_total),
                epoch: 1,
                epoch_total,
                iteration: 0,
                lr,
            },
        }
    }

    /// Starts a new epoch and clears the running values.
    pub fn start_epoch(&mut self, epoch: usize) {
        self.meta.epoch = epoch;
        self.meta.progress.items_processed = 0;
        self.loss.clear();
        self.accuracy.clear();
    }

    /// Records one batch and returns its accuracy, in `[0, 1]`.
    pub fn update(&mut self, output: &ClassificationOutput<B>) -> f32 {
        let [batch_size, _num_classes] = output.output.dims();
        self.meta.iteration += 1;
        self.meta.progress.items_processed += batch_size;

        self.accuracy.update(&output.adapt(), &self.meta);
        self.loss.update(&output.adapt(), &self.meta);
        (self.accuracy.value().current() / 100.0) as f32
    }

    /// Accuracy over every recorded item, in `[0, 1]`.
    pub fn running_accuracy(&self) -> f32 {
        (self.accuracy.running_value().current() / 100.0) as f32
    }

    pub fn running_loss(&self) -> f32 {
        self.loss.running_value().current() as f32
    }

    pub fn items_processed(&self) -> usize {
        self.meta.progress.items_processed
    }
}

/// Reads a single-element tensor back to the host.
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

pub fn contains_nan<B: Backend, const D: usize>(t: &Tensor<B, D>) -> bool {
    t.clone()
        .into_data()
        .iter::<f32>()
        .any(|value| value.is_nan())
}

/// Host-side one-hot encoding, as a flat row-major `[labels.len(), num_classes]` buffer.
pub fn one_hot(labels: &[u8], num_classes: usize) -> Vec<f32> {
    let mut encoded = vec![0f32; labels.len() * num_classes];
    for (row, label) in labels.iter().enumerate() {
        let label = *label as usize;
        assert!(label < num_classes, "label {label} out of {num_classes} classes");
        encoded[row * num_classes + label] = 1.0;
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn output(hits: &[bool]) -> ClassificationOutput<TestBackend> {
        let device = Default::default();
        let n = hits.len();
        let logits: Vec<f32> = hits.iter().flat_map(|_| [0.1, 0.9]).collect();
        let targets: Vec<i64> = hits.iter().map(|hit| *hit as i64).collect();
        let logits = Tensor::<TestBackend, 2>::from_data(TensorData::new(logits, [n, 2]), &device);
        let targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(targets, [n]), &device);
        let loss = cross_entropy(logits.clone(), targets.clone());
        ClassificationOutput::new(loss, logits, targets)
    }

    #[test]
    fn metrics_track_batch_and_running_accuracy() {
        let mut metrics = ClassificationMetrics::<TestBackend>::new(6, 1, None);
        assert!((metrics.update(&output(&[true, true, true, false])) - 0.75).abs() < 1e-6);
        assert!((metrics.update(&output(&[false, false])) - 0.0).abs() < 1e-6);
        assert!((metrics.running_accuracy() - 0.5).abs() < 1e-6);
        assert_eq!(6, metrics.items_processed());
        assert!(metrics.running_loss() > 0.0);

        metrics.start_epoch(2);
        assert_eq!(0, metrics.items_processed());
        assert!((metrics.update(&output(&[true])) - 1.0).abs() < 1e-6);
        assert!((metrics.running_accuracy() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn one_hot_rows() {
        assert_eq!(
            vec![0., 1., 0., 1., 0., 0., 0., 0., 1.],
            one_hot(&[1, 0, 2], 3)
        );
    }

    #[test]
    fn nan_detection() {
        let device = Default::default();
        let clean = Tensor::<TestBackend, 2>::ones([2, 2], &device);
        assert!(!contains_nan(&clean));
        let dirty = Tensor::<TestBackend, 2>::full([2, 2], f32::NAN, &device);
        assert!(contains_nan(&dirty));
    }
}
