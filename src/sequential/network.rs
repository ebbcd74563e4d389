use crate::error::{Error, Result};
use crate::sequential::layer::{Activation, Flatten, Layer, Standardize};
use burn::module::{Content, DisplaySettings, ModuleDisplay};
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::MaxPool2dConfig;
use burn::nn::{DropoutConfig, Initializer, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::*;

/// Weight initialization of a [`LayerConfig::Conv2d`] or [`LayerConfig::Dense`] layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum WeightInit {
    /// Glorot (Xavier) uniform.
    #[default]
    GlorotUniform,
    /// He (Kaiming) normal, scaled for relu activations.
    HeNormal,
}

impl WeightInit {
    pub fn initializer(&self) -> Initializer {
        match self {
            WeightInit::GlorotUniform => Initializer::XavierUniform { gain: 1.0 },
            WeightInit::HeNormal => Initializer::KaimingNormal {
                gain: core::f64::consts::SQRT_2,
                fan_out_only: false,
            },
        }
    }
}

/// Architecture description of a single layer.
///
/// This is what gets written to the `.json` architecture file of a saved model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LayerConfig {
    /// 2D convolution over `[channels, height, width]` with square kernels.
    Conv2d {
        filters: usize,
        kernel_size: usize,
        #[serde(default = "one")]
        stride: usize,
        /// Symmetric zero padding. `0` is "valid" padding.
        #[serde(default)]
        padding: usize,
        #[serde(default)]
        init: WeightInit,
    },
    /// Max pooling with a square window.
    MaxPool2d {
        pool_size: usize,
        /// Defaults to `pool_size`.
        #[serde(default)]
        stride: Option<usize>,
        #[serde(default)]
        padding: usize,
    },
    /// Fully connected layer over flat features.
    Dense {
        units: usize,
        #[serde(default)]
        init: WeightInit,
    },
    Relu,
    Dropout {
        prob: f64,
    },
    Flatten,
    Standardize,
}

fn one() -> usize {
    1
}

impl LayerConfig {
    pub fn conv(filters: usize, kernel_size: usize) -> Self {
        LayerConfig::Conv2d {
            filters,
            kernel_size,
            stride: 1,
            padding: 0,
            init: WeightInit::default(),
        }
    }

    pub fn conv_strided(filters: usize, kernel_size: usize, stride: usize, padding: usize) -> Self {
        LayerConfig::Conv2d {
            filters,
            kernel_size,
            stride,
            padding,
            init: WeightInit::default(),
        }
    }

    pub fn max_pool(pool_size: usize) -> Self {
        LayerConfig::MaxPool2d {
            pool_size,
            stride: None,
            padding: 0,
        }
    }

    pub fn dense(units: usize) -> Self {
        LayerConfig::Dense {
            units,
            init: WeightInit::default(),
        }
    }

    pub fn dense_he(units: usize) -> Self {
        LayerConfig::Dense {
            units,
            init: WeightInit::HeNormal,
        }
    }

    pub fn dropout(prob: f64) -> Self {
        LayerConfig::Dropout { prob }
    }
}

/// Shape of an activation, excluding the batch dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
    /// channels, height, width
    Spatial([usize; 3]),
    Flat(usize),
}

impl FeatureShape {
    fn through(self, layer: &LayerConfig, index: usize) -> Result<FeatureShape> {
        let invalid = |reason: String| Err(Error::Config(format!("layer {index}: {reason}")));
        match (layer, self) {
            (
                LayerConfig::Conv2d {
                    filters,
                    kernel_size,
                    stride,
                    padding,
                    ..
                },
                FeatureShape::Spatial([_channels, height, width]),
            ) => {
                let [height, width] = match (
                    window_output(height, *kernel_size, *stride, *padding),
                    window_output(width, *kernel_size, *stride, *padding),
                ) {
                    (Some(h), Some(w)) => [h, w],
                    _ => {
                        return invalid(format!(
                            "kernel {kernel_size} (stride {stride}, padding {padding}) \
                             does not fit a {height}x{width} input"
                        ));
                    }
                };
                Ok(FeatureShape::Spatial([*filters, height, width]))
            }
            (
                LayerConfig::MaxPool2d {
                    pool_size,
                    stride,
                    padding,
                },
                FeatureShape::Spatial([channels, height, width]),
            ) => {
                let stride = stride.unwrap_or(*pool_size);
                match (
                    window_output(height, *pool_size, stride, *padding),
                    window_output(width, *pool_size, stride, *padding),
                ) {
                    (Some(h), Some(w)) => Ok(FeatureShape::Spatial([channels, h, w])),
                    _ => invalid(format!(
                        "pool {pool_size} does not fit a {height}x{width} input"
                    )),
                }
            }
            (LayerConfig::Dense { units, .. }, FeatureShape::Flat(_)) => {
                Ok(FeatureShape::Flat(*units))
            }
            (LayerConfig::Flatten, FeatureShape::Spatial([c, h, w])) => {
                Ok(FeatureShape::Flat(c * h * w))
            }
            (LayerConfig::Standardize, shape @ FeatureShape::Spatial(_)) => Ok(shape),
            (LayerConfig::Relu, shape) => Ok(shape),
            (LayerConfig::Dropout { prob }, shape) => {
                if (0.0..1.0).contains(prob) {
                    Ok(shape)
                } else {
                    invalid(format!("dropout probability {prob} is not in [0, 1)"))
                }
            }
            (layer, shape) => invalid(format!("{layer:?} cannot follow a {shape:?} activation")),
        }
    }
}

/// Output length of a sliding window, `None` if the window does not fit.
fn window_output(input: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = input + 2 * padding;
    if kernel == 0 || stride == 0 || kernel > padded {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

/// Architecture description of a feed-forward image classifier.
///
/// Images enter channel-last, `[batch, height, width, channels]`, matching [`Self::input_shape`].
#[derive(Config, Debug)]
pub struct SequentialConfig {
    /// `[height, width, channels]`
    pub input_shape: [usize; 3],
    pub layers: Vec<LayerConfig>,
}

impl PartialEq for SequentialConfig {
    fn eq(&self, other: &Self) -> bool {
        self.input_shape == other.input_shape && self.layers == other.layers
    }
}

impl SequentialConfig {
    /// Checks that every layer fits the output of the previous one,
    /// and that the network ends with flat class scores.
    ///
    /// Returns the number of output scores.
    pub fn validate(&self) -> Result<usize> {
        let [height, width, channels] = self.input_shape;
        let mut shape = FeatureShape::Spatial([channels, height, width]);
        for (index, layer) in self.layers.iter().enumerate() {
            shape = shape.through(layer, index)?;
        }
        match shape {
            FeatureShape::Flat(n) => Ok(n),
            FeatureShape::Spatial(shape) => Err(Error::Config(format!(
                "the network output is spatial ({shape:?}); a flatten and a dense layer are missing"
            ))),
        }
    }

    /// Returns the initialized model.
    ///
    /// Panics if the architecture is invalid; see [`Self::validate`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> Sequential<B> {
        if let Err(err) = self.validate() {
            panic!("{err}");
        }

        let [height, width, channels] = self.input_shape;
        let mut shape = FeatureShape::Spatial([channels, height, width]);
        let mut layers = Vec::with_capacity(self.layers.len());
        for (index, layer_config) in self.layers.iter().enumerate() {
            let layer = match (layer_config, shape) {
                (
                    LayerConfig::Conv2d {
                        filters,
                        kernel_size,
                        stride,
                        padding,
                        init,
                    },
                    FeatureShape::Spatial([in_channels, _, _]),
                ) => Layer::Conv2d(
                    Conv2dConfig::new([in_channels, *filters], [*kernel_size, *kernel_size])
                        .with_stride([*stride, *stride])
                        .with_padding(PaddingConfig2d::Explicit(*padding, *padding))
                        .with_initializer(init.initializer())
                        .init(device),
                ),
                (
                    LayerConfig::MaxPool2d {
                        pool_size,
                        stride,
                        padding,
                    },
                    _,
                ) => {
                    let stride = stride.unwrap_or(*pool_size);
                    Layer::MaxPool2d(
                        MaxPool2dConfig::new([*pool_size, *pool_size])
                            .with_strides([stride, stride])
                            .with_padding(PaddingConfig2d::Explicit(*padding, *padding))
                            .init(),
                    )
                }
                (LayerConfig::Dense { units, init }, FeatureShape::Flat(in_features)) => {
                    Layer::Dense(
                        LinearConfig::new(in_features, *units)
                            .with_initializer(init.initializer())
                            .init(device),
                    )
                }
                (LayerConfig::Relu, _) => Layer::Relu(Relu::new()),
                (LayerConfig::Dropout { prob }, _) => Layer::Dropout(DropoutConfig::new(*prob).init()),
                (LayerConfig::Flatten, _) => Layer::Flatten(Flatten::new()),
                (LayerConfig::Standardize, _) => Layer::Standardize(Standardize::new()),
                (layer, shape) => unreachable!("validated: {layer:?} after {shape:?}"),
            };
            layers.push(layer);
            // validated above
            shape = match shape.through(layer_config, index) {
                Ok(shape) => shape,
                Err(err) => unreachable!("{err}"),
            };
        }

        Sequential {
            layers,
            input_shape: self.input_shape,
        }
    }
}

/// Feed-forward image classifier built from a [`SequentialConfig`].
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct Sequential<B: Backend> {
    pub layers: Vec<Layer<B>>,
    /// `[height, width, channels]`
    pub input_shape: [usize; 3],
}

impl<B: Backend> Sequential<B> {
    /// Returns raw class scores (no softmax).
    ///
    /// # Shapes
    ///   - Input [batch, height, width, channels]
    ///   - Output [batch, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, height, width, channels] = images.dims();
        assert_eq!(
            [height, width, channels],
            self.input_shape,
            "unexpected input image shape"
        );

        // channel-last to channel-first
        let x = images.permute([0, 3, 1, 2]);

        let x = self
            .layers
            .iter()
            .fold(Activation::Spatial(x), |x, layer| layer.forward(x));

        match x {
            Activation::Flat(x) => {
                debug_assert_eq!(batch, x.dims()[0]);
                x
            }
            Activation::Spatial(x) => panic!("network output is spatial: {:?}", x.dims()),
        }
    }

    /// Checks that `record` has the same sequence of layer kinds as this network.
    ///
    /// [`Module::load_record`] panics on a different layout; parameter shapes are not checked here.
    pub fn check_record(&self, record: &SequentialRecord<B>) -> Result<()> {
        let expected: Vec<_> = self.layers.iter().map(Layer::kind).collect();
        let found: Vec<_> = record.layers.iter().map(Layer::record_kind).collect();
        if expected != found {
            return Err(Error::ArchitectureMismatch { expected, found });
        }
        Ok(())
    }

    /// Without dropout, for computing gradients with respect to the input.
    pub fn without_dropout(&self) -> Self {
        let layers = self
            .layers
            .iter()
            .map(|layer| match layer {
                Layer::Dropout(_) => Layer::Dropout(DropoutConfig::new(0.0).init()),
                layer => layer.clone(),
            })
            .collect();
        Sequential {
            layers,
            input_shape: self.input_shape,
        }
    }

    /// Shapes of every trainable parameter, in layer order.
    pub fn param_shapes(&self) -> Vec<Vec<usize>> {
        self.layers.iter().flat_map(Layer::param_shapes).collect()
    }

    /// `½ Σ‖W‖²` over the weights of every dense layer except the output layer.
    pub fn hidden_dense_l2(&self) -> Option<Tensor<B, 1>> {
        let dense: Vec<_> = self
            .layers
            .iter()
            .filter_map(|layer| match layer {
                Layer::Dense(linear) => Some(linear),
                _ => None,
            })
            .collect();
        let (_output, hidden) = dense.split_last()?;
        hidden
            .iter()
            .map(|linear| linear.weight.val().powf_scalar(2.0).sum() / 2.0)
            .reduce(|a, b| a + b)
    }
}

impl<B: Backend> ModuleDisplay for Sequential<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        let kinds: Vec<_> = self.layers.iter().map(Layer::kind).collect();
        content
            .add("input_shape", &format!("{:?}", self.input_shape))
            .add("layers", &kinds.join(" → "))
            .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn small() -> SequentialConfig {
        SequentialConfig::new(
            [8, 8, 1],
            vec![
                LayerConfig::conv(4, 3),
                LayerConfig::Relu,
                LayerConfig::max_pool(2),
                LayerConfig::Flatten,
                LayerConfig::dense(5),
            ],
        )
    }

    #[test]
    fn validate_tracks_shapes() {
        assert_eq!(5, small().validate().unwrap());
    }

    #[test]
    fn validate_rejects_spatial_output() {
        let config = SequentialConfig::new([8, 8, 1], vec![LayerConfig::conv(4, 3)]);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate_rejects_dense_before_flatten() {
        let config = SequentialConfig::new([8, 8, 1], vec![LayerConfig::dense(3)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_kernel() {
        let config = SequentialConfig::new(
            [4, 4, 1],
            vec![LayerConfig::conv(2, 5), LayerConfig::Flatten, LayerConfig::dense(2)],
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn forward_shape() {
        let device = Default::default();
        let model = small().init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::zeros([2, 8, 8, 1], &device);
        assert_eq!([2, 5], model.forward(x).dims());
        assert_eq!(
            vec![vec![1usize, 4, 3, 3], vec![4], vec![36, 5], vec![5]],
            model.param_shapes()
        );
    }

    #[test]
    fn json_description_roundtrip() {
        let config = small();
        let json = format!("{config}");
        let loaded = SequentialConfig::load_binary(json.as_bytes()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn hidden_l2_skips_output_layer() {
        let device = Default::default();
        let single = small().init::<TestBackend>(&device);
        assert!(single.hidden_dense_l2().is_none());

        let two = SequentialConfig::new(
            [2, 2, 1],
            vec![LayerConfig::Flatten, LayerConfig::dense(3), LayerConfig::dense(2)],
        )
        .init::<TestBackend>(&device);
        let Layer::Dense(hidden) = &two.layers[1] else {
            panic!("expected a dense layer")
        };
        let expected: f32 = hidden
            .weight
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap()
            .iter()
            .map(|w| w * w / 2.0)
            .sum();
        let l2 = two.hidden_dense_l2().unwrap().into_scalar();
        assert!((l2 - expected).abs() < 1e-5);
    }

    #[test]
    fn check_record_compares_layer_kinds() {
        let device = Default::default();
        let model = small().init::<TestBackend>(&device);
        assert!(model.check_record(&model.clone().into_record()).is_ok());

        let other = SequentialConfig::new(
            [8, 8, 1],
            vec![LayerConfig::Flatten, LayerConfig::dense(5)],
        )
        .init::<TestBackend>(&device);
        let Err(Error::ArchitectureMismatch { expected, found }) =
            model.check_record(&other.into_record())
        else {
            panic!("expected an architecture mismatch")
        };
        assert_eq!(vec!["conv2d", "relu", "max_pool2d", "flatten", "dense"], expected);
        assert_eq!(vec!["flatten", "dense"], found);
    }

    #[test]
    fn without_dropout_zeroes_dropout_only() {
        let device = Default::default();
        let model = SequentialConfig::new(
            [2, 2, 1],
            vec![LayerConfig::Flatten, LayerConfig::dropout(0.5), LayerConfig::dense(2)],
        )
        .init::<TestBackend>(&device);
        let plain = model.without_dropout();
        let Layer::Dropout(dropout) = &plain.layers[1] else {
            panic!("expected a dropout layer")
        };
        assert_eq!(0.0, dropout.prob);
        assert_eq!(model.param_shapes(), plain.param_shapes());
    }
}
