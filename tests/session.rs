use burn::backend::{Autodiff, NdArray};
use burn::optim::SgdConfig;
use burn::prelude::*;
use burn_ensadv::Error;
use burn_ensadv::schedule::LrSchedule;
use burn_ensadv::sequential::{Layer, LayerConfig, Sequential, SequentialConfig};
use burn_ensadv::session::{
    CHECKPOINT_INDEX, Checkpointer, MonitoredSession, NanGuard, StepOutput, StopAtStep,
};
use burn_ensadv::utils::cross_entropy;

type TestBackend = Autodiff<NdArray<f32>>;

fn config() -> SequentialConfig {
    SequentialConfig::new([2, 2, 1], vec![LayerConfig::Flatten, LayerConfig::dense(3)])
}

fn weights(model: &Sequential<TestBackend>) -> Vec<f32> {
    let Layer::Dense(linear) = &model.layers[1] else {
        panic!("expected a dense layer")
    };
    linear.weight.val().into_data().to_vec().unwrap()
}

fn step(value: f32) -> impl FnOnce(&Sequential<TestBackend>) -> StepOutput<TestBackend> {
    move |model| {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::full([2, 2, 2, 1], value, &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 2], &device);
        StepOutput {
            loss: cross_entropy(model.forward(images), labels),
            batch_size: 2,
            precision: None,
        }
    }
}

fn session(
    model: Sequential<TestBackend>,
) -> MonitoredSession<
    TestBackend,
    Sequential<TestBackend>,
    impl burn::optim::Optimizer<Sequential<TestBackend>, TestBackend>,
> {
    let optim = SgdConfig::new().init::<TestBackend, Sequential<TestBackend>>();
    MonitoredSession::new(model, optim, LrSchedule::Constant(0.1))
}

#[test]
fn stops_at_the_last_step() {
    let device = Default::default();
    let mut session = session(config().init(&device)).with_hook(StopAtStep::new(3));
    let mut runs = 0;
    while !session.should_stop() {
        session.run(step(1.0)).unwrap();
        runs += 1;
        assert!(runs <= 3);
    }
    assert_eq!(3, runs);
    assert_eq!(3, session.global_step());
}

#[test]
fn steps_update_the_weights() {
    let device = Default::default();
    let model = config().init(&device);
    let before = weights(&model);
    let mut session = session(model);
    session.run(step(1.0)).unwrap();
    assert_ne!(before, weights(session.model()));
    assert!(session.last_loss().unwrap().is_finite());
}

#[test]
fn nan_loss_fails_before_the_update() {
    let device = Default::default();
    let model = config().init(&device);
    let before = weights(&model);
    let mut session = session(model).with_hook(NanGuard);

    session.run(step(1.0)).unwrap();
    let after_first = weights(session.model());
    assert_ne!(before, after_first);

    let err = session.run(step(f32::NAN)).unwrap_err();
    assert!(matches!(err, Error::NanLoss { step: 1 }));
    assert_eq!(1, session.global_step());
    assert_eq!(after_first, weights(session.model()));
}

#[test]
fn checkpoints_rotate_and_restore() {
    let dir = temp_dir::TempDir::new().unwrap();
    let device = Default::default();
    let checkpointer = || {
        Checkpointer::new(dir.path())
            .with_save_secs(None)
            .with_save_steps(Some(1))
            .with_keep(2)
    };

    let mut training = session(config().init(&device)).with_checkpointer(checkpointer());
    for _ in 0..4 {
        training.run(step(1.0)).unwrap();
    }
    let trained = training.close().unwrap();

    let index = std::fs::read_to_string(dir.child(CHECKPOINT_INDEX)).unwrap();
    assert_eq!("3\n4\n", index);
    for step in [1, 2] {
        assert!(!dir.child(format!("model-{step}.mpk")).exists());
        assert!(!dir.child(format!("optim-{step}.mpk")).exists());
    }
    for step in [3, 4] {
        assert!(dir.child(format!("model-{step}.mpk")).exists());
        assert!(dir.child(format!("optim-{step}.mpk")).exists());
    }

    let restored = session(config().init(&device))
        .with_checkpointer(checkpointer())
        .restore(&device)
        .unwrap();
    assert_eq!(4, restored.global_step());
    assert_eq!(weights(&trained), weights(restored.model()));
}

#[test]
fn restore_without_checkpoint_starts_fresh() {
    let dir = temp_dir::TempDir::new().unwrap();
    let device = Default::default();
    let model = config().init(&device);
    let before = weights(&model);
    let restored = session(model)
        .with_checkpointer(Checkpointer::new(dir.path()))
        .restore(&device)
        .unwrap();
    assert_eq!(0, restored.global_step());
    assert_eq!(before, weights(restored.model()));
}

#[test]
fn close_saves_the_final_step() {
    let dir = temp_dir::TempDir::new().unwrap();
    let device = Default::default();
    let mut training = session(config().init(&device))
        .with_checkpointer(Checkpointer::new(dir.path()).with_save_secs(None));
    training.run(step(1.0)).unwrap();
    training.run(step(1.0)).unwrap();
    training.close().unwrap();

    let index = std::fs::read_to_string(dir.child(CHECKPOINT_INDEX)).unwrap();
    assert_eq!("2\n", index);
}
