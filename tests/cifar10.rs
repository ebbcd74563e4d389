use burn::backend::{Autodiff, NdArray};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use burn_ensadv::Error;
use burn_ensadv::cifar10::dataset::{
    CLEAN_DIR, Cifar10Record, IMAGE_BYTES, RandomFlip, TRAIN_FILES, THIN_DIR, TUTORIAL_DIR,
    WIDE_DIR, read_records, write_records,
};
use burn_ensadv::cifar10::{
    Cifar10EnsembleDataset, EnsAdvConfig, EnsembleBatch, EnsembleBatcher, train_ensadv,
};
use burn_ensadv::session::CHECKPOINT_INDEX;
use std::path::Path;

type TestBackend = Autodiff<NdArray<f32>>;

fn unflipped(data_dir: &Path) -> burn_ensadv::Result<Cifar10EnsembleDataset> {
    Cifar10EnsembleDataset::new(data_dir, &["data_batch_1.bin"], RandomFlip::new(0.0, 0))
}

fn record(label: u8, shade: u8) -> Cifar10Record {
    Cifar10Record {
        label,
        image: (0..IMAGE_BYTES)
            .map(|i| shade.wrapping_add(i as u8))
            .collect(),
    }
}

/// Writes aligned clean and adversarial files; the variants differ by their shade.
fn write_split(data_dir: &Path, files: &[&str], labels: &[u8]) {
    for (dir, shade) in [(CLEAN_DIR, 0), (THIN_DIR, 10), (WIDE_DIR, 20), (TUTORIAL_DIR, 30)] {
        std::fs::create_dir_all(data_dir.join(dir)).unwrap();
        for file in files {
            let records: Vec<_> = labels.iter().map(|l| record(*l, shade)).collect();
            write_records(&data_dir.join(dir).join(file), &records).unwrap();
        }
    }
}

#[test]
fn records_roundtrip_through_the_binary_layout() {
    let dir = temp_dir::TempDir::new().unwrap();
    let path = dir.child("batch.bin");
    let records = vec![record(1, 0), record(9, 100)];
    write_records(&path, &records).unwrap();
    assert_eq!(2 * (1 + IMAGE_BYTES) as u64, std::fs::metadata(&path).unwrap().len());
    assert_eq!(records, read_records(&path).unwrap());
}

#[test]
fn truncated_record_file() {
    let dir = temp_dir::TempDir::new().unwrap();
    let path = dir.child("batch.bin");
    std::fs::write(&path, vec![0u8; IMAGE_BYTES]).unwrap();
    assert!(matches!(read_records(&path), Err(Error::InvalidData { .. })));
}

#[test]
fn ensemble_items_are_aligned() {
    let dir = temp_dir::TempDir::new().unwrap();
    write_split(dir.path(), &["data_batch_1.bin"], &[4, 2, 7]);
    let dataset = unflipped(dir.path()).unwrap();
    assert_eq!(3, dataset.len());

    let item = dataset.get(2).unwrap();
    assert_eq!(7, item.label);
    assert_eq!(record(7, 0).image, item.image);
    assert_eq!(record(7, 10).image, item.thin);
    assert_eq!(record(7, 20).image, item.wide);
    assert_eq!(record(7, 30).image, item.tutorial);

    let device = Default::default();
    let batch: EnsembleBatch<NdArray<f32>> =
        EnsembleBatcher::default().batch(vec![item.clone(), dataset.get(0).unwrap()], &device);
    assert_eq!([2, 32, 32, 3], batch.images.dims());
    assert_eq!([2, 32, 32, 3], batch.tutorial.dims());
    let labels: Vec<i64> = batch.labels.into_data().convert::<i64>().to_vec().unwrap();
    assert_eq!(vec![7, 4], labels);
    let wide: Vec<f32> = batch.wide.into_data().to_vec().unwrap();
    assert_eq!(20.0, wide[0]);
}

#[test]
fn misaligned_variant_is_rejected() {
    let dir = temp_dir::TempDir::new().unwrap();
    write_split(dir.path(), &["data_batch_1.bin"], &[4, 2, 7]);
    let wide = dir.path().join(WIDE_DIR).join("data_batch_1.bin");
    write_records(&wide, &[record(4, 20), record(3, 20), record(7, 20)]).unwrap();

    let err = unflipped(dir.path()).err().unwrap();
    assert!(matches!(
        err,
        Error::Misaligned {
            variant: "wide",
            index: 1,
            expected: 2,
            found: 3
        }
    ));
}

#[test]
fn variant_with_fewer_records_is_rejected() {
    let dir = temp_dir::TempDir::new().unwrap();
    write_split(dir.path(), &["data_batch_1.bin"], &[4, 2]);
    let thin = dir.path().join(THIN_DIR).join("data_batch_1.bin");
    write_records(&thin, &[record(4, 10)]).unwrap();

    let err = unflipped(dir.path()).err().unwrap();
    assert!(matches!(err, Error::InvalidData { .. }));
}

#[test]
fn missing_variant_directory() {
    let dir = temp_dir::TempDir::new().unwrap();
    write_split(dir.path(), &["data_batch_1.bin"], &[1]);
    std::fs::remove_dir_all(dir.path().join(TUTORIAL_DIR)).unwrap();
    let err = unflipped(dir.path()).err().unwrap();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn short_training_run() {
    let data = temp_dir::TempDir::new().unwrap();
    write_split(data.path(), &TRAIN_FILES, &[0, 1]);
    let train = temp_dir::TempDir::new().unwrap();
    let train_dir = train.child("train");
    // left over from a previous run
    std::fs::create_dir_all(&train_dir).unwrap();
    std::fs::write(train_dir.join("stale"), "").unwrap();

    let config = EnsAdvConfig::new()
        .with_batch_size(2)
        .with_max_steps(3)
        .with_log_frequency(1)
        .with_num_workers(1)
        .with_save_secs(None)
        .with_seed(4);
    let summary =
        train_ensadv::<TestBackend>(&config, data.path(), &train_dir, Default::default()).unwrap();

    assert_eq!(3, summary.global_step);
    assert!(summary.last_loss.unwrap().is_finite());
    assert!(!train_dir.join("stale").exists());
    assert!(train_dir.join("training_config.json").exists());
    assert_eq!(
        "3\n",
        std::fs::read_to_string(train_dir.join(CHECKPOINT_INDEX)).unwrap()
    );
}
