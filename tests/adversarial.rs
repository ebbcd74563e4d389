use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;
use burn_ensadv::adversarial::{AdvSource, FgsmConfig, fgsm, poison, select_adversarial};
use burn_ensadv::sequential::{LayerConfig, Sequential, SequentialConfig};
use burn_ensadv::utils::contains_nan;

type TestBackend = Autodiff<NdArray<f32>>;

fn model(device: &<TestBackend as Backend>::Device) -> Sequential<TestBackend> {
    SequentialConfig::new(
        [4, 4, 3],
        vec![
            LayerConfig::conv(2, 3),
            LayerConfig::Relu,
            LayerConfig::Flatten,
            LayerConfig::dense(10),
        ],
    )
    .init(device)
}

fn images(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
    let values: Vec<f32> = (0..2 * 4 * 4 * 3).map(|i| (i * 37 % 256) as f32).collect();
    Tensor::from_data(TensorData::new(values, [2, 4, 4, 3]), device)
}

fn host(t: Tensor<TestBackend, 4>) -> Vec<f32> {
    t.into_data().to_vec().unwrap()
}

#[test]
fn zero_epsilon_returns_the_clipped_images() {
    let device = Default::default();
    let model = model(&device);
    let x = images(&device);
    let adv = fgsm(&model, x.clone(), &FgsmConfig::new(0.0));
    assert_eq!(host(x.clamp(0.0, 255.0)), host(adv));
}

#[test]
fn perturbation_is_bounded_and_clipped() {
    let device = Default::default();
    let model = model(&device);
    let x = images(&device);
    let epsilon = 8.0;
    let adv = fgsm(&model, x.clone(), &FgsmConfig::new(epsilon));
    assert_eq!(x.dims(), adv.dims());

    for (clean, adv) in host(x).into_iter().zip(host(adv)) {
        assert!((0.0..=255.0).contains(&adv));
        assert!((adv - clean).abs() <= epsilon as f32 + 1e-4);
    }
}

#[test]
fn adversarial_images_carry_no_gradient() {
    let device = Default::default();
    let model = model(&device);
    let adv = fgsm(&model, images(&device), &FgsmConfig::new(8.0));
    assert!(!adv.is_require_grad());
}

#[test]
fn unit_range_clipping() {
    let device = Default::default();
    let model = SequentialConfig::new(
        [28, 28, 1],
        vec![LayerConfig::Flatten, LayerConfig::dense(10)],
    )
    .init::<TestBackend>(&device);
    let x = Tensor::<TestBackend, 4>::full([1, 28, 28, 1], 0.5, &device);
    let config = FgsmConfig::new(0.9).with_clip_min(0.0).with_clip_max(1.0);
    let adv = host(fgsm(&model, x, &config));
    assert!(adv.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn poison_is_a_full_nan_cifar_batch() {
    let device = Default::default();
    let batch = poison::<NdArray<f32>>(5, &device);
    assert_eq!([5, 32, 32, 3], batch.dims());
    let values: Vec<f32> = batch.into_data().to_vec().unwrap();
    assert!(values.iter().all(|v| v.is_nan()));
}

#[test]
fn selection_follows_the_draw() {
    let device = Default::default();
    let dynamic = Tensor::<NdArray<f32>, 4>::full([2, 32, 32, 3], 1.0, &device);
    let wide = Tensor::<NdArray<f32>, 4>::full([2, 32, 32, 3], 2.0, &device);
    let tutorial = Tensor::<NdArray<f32>, 4>::full([2, 32, 32, 3], 3.0, &device);

    let first = |t: Tensor<NdArray<f32>, 4>| -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    };
    for (draw, expected) in [(0, 1.0), (1, 2.0), (2, 3.0)] {
        let chosen = select_adversarial(
            AdvSource::from_draw(draw),
            || dynamic.clone(),
            wide.clone(),
            tutorial.clone(),
        );
        assert_eq!(expected, first(chosen));
    }

    let poisoned = select_adversarial(
        AdvSource::from_draw(3),
        || panic!("the dynamic batch is not needed"),
        wide,
        tutorial,
    );
    assert_eq!([2, 32, 32, 3], poisoned.dims());
    assert!(contains_nan(&poisoned));
}
