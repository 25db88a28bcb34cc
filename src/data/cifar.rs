use std::fs;
use std::path::Path;

use log::{debug, info};

use super::transforms::{ImageTensor, Transform};
use super::{Dataset, Sample};
use crate::error::{Result, TensorError};

const SIDE: usize = 32;
const CHANNELS: usize = 3;
const IMAGE_BYTES: usize = CHANNELS * SIDE * SIDE;
const RECORD_BYTES: usize = 1 + IMAGE_BYTES;

const BATCH_DIR: &str = "cifar-10-batches-bin";
const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILES: [&str; 1] = ["test_batch.bin"];

const DEFAULT_CLASSES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

const DOWNLOAD_HINT: &str =
    "download cifar-10-binary.tar.gz from https://www.cs.toronto.edu/~kriz/cifar.html and extract it into the data root";

/// The CIFAR-10 binary distribution held in memory: 50,000 training or
/// 10,000 test images of 32x32 RGB.
pub struct Cifar10 {
    labels: Vec<u8>,
    pixels: Vec<u8>,
    classes: Vec<String>,
    transform: Box<dyn Transform>,
}

impl Cifar10 {
    /// Reads `root/cifar-10-batches-bin`. Nothing is downloaded; a missing
    /// directory or batch file is a [`TensorError::DatasetNotFound`].
    pub fn new(root: impl AsRef<Path>, train: bool, transform: impl Transform + 'static) -> Result<Self> {
        let dir = root.as_ref().join(BATCH_DIR);
        if !dir.is_dir() {
            return Err(TensorError::DatasetNotFound {
                path: dir,
                hint: DOWNLOAD_HINT.to_string(),
            });
        }

        let files: &[&str] = if train { &TRAIN_FILES } else { &TEST_FILES };
        let mut labels = Vec::new();
        let mut pixels = Vec::new();
        for name in files {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(TensorError::DatasetNotFound {
                    path,
                    hint: DOWNLOAD_HINT.to_string(),
                });
            }
            let bytes = fs::read(&path)?;
            let count = read_records(&path, &bytes, &mut labels, &mut pixels)?;
            debug!("{}: {count} records", path.display());
        }

        let classes = read_classes(&dir.join("batches.meta.txt"))?;
        info!(
            "cifar-10 {} split: {} images from {}",
            if train { "train" } else { "test" },
            labels.len(),
            dir.display()
        );
        Ok(Cifar10 {
            labels,
            pixels,
            classes,
            transform: Box::new(transform),
        })
    }
}

fn malformed(path: &Path, reason: String) -> TensorError {
    TensorError::MalformedDataset {
        path: path.to_path_buf(),
        reason,
    }
}

/// Appends the records of one batch file, each a label byte followed by the
/// red, green and blue planes.
fn read_records(path: &Path, bytes: &[u8], labels: &mut Vec<u8>, pixels: &mut Vec<u8>) -> Result<usize> {
    if bytes.is_empty() || bytes.len() % RECORD_BYTES != 0 {
        return Err(malformed(
            path,
            format!("{} bytes is not a multiple of the {RECORD_BYTES}-byte record", bytes.len()),
        ));
    }
    for record in bytes.chunks_exact(RECORD_BYTES) {
        let label = record[0];
        if label as usize >= DEFAULT_CLASSES.len() {
            return Err(malformed(path, format!("label {label} out of range")));
        }
        labels.push(label);
        pixels.extend_from_slice(&record[1..]);
    }
    Ok(bytes.len() / RECORD_BYTES)
}

fn read_classes(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Ok(DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect());
    }
    let names: Vec<String> = fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if names.len() != DEFAULT_CLASSES.len() {
        return Err(malformed(path, format!("expected 10 class names, found {}", names.len())));
    }
    Ok(names)
}

impl Dataset for Cifar10 {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let Some(&label) = self.labels.get(index) else {
            return Err(TensorError::InvalidArgument(format!(
                "sample {index} out of range for {} images",
                self.labels.len()
            )));
        };
        let start = index * IMAGE_BYTES;
        let image = ImageTensor::from_chw_bytes(&self.pixels[start..start + IMAGE_BYTES], CHANNELS, SIDE, SIDE)?;
        Ok(Sample {
            image: self.transform.apply(image)?,
            label: label as usize,
        })
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transforms::{Compose, ToTensor};

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(fill).take(IMAGE_BYTES));
        bytes
    }

    #[test]
    fn reads_test_split_records() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(BATCH_DIR);
        fs::create_dir_all(&dir).unwrap();
        let mut bytes = record(3, 255);
        bytes.extend(record(9, 0));
        fs::write(dir.join("test_batch.bin"), bytes).unwrap();

        let data = Cifar10::new(root.path(), false, Compose::default().then(ToTensor)).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.classes()[3], "cat");
        let first = data.get(0).unwrap();
        assert_eq!(first.label, 3);
        assert_eq!(first.image.shape(), [3, 32, 32]);
        assert!(first.image.data.iter().all(|v| *v == 1.0));
        assert_eq!(data.get(1).unwrap().label, 9);
        assert!(data.get(2).is_err());
    }

    #[test]
    fn missing_directory_names_the_path() {
        let root = tempfile::tempdir().unwrap();
        match Cifar10::new(root.path(), true, Compose::default()) {
            Err(TensorError::DatasetNotFound { path, .. }) => assert!(path.ends_with(BATCH_DIR)),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn truncated_files_are_malformed() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(BATCH_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("test_batch.bin"), vec![0u8; RECORD_BYTES - 1]).unwrap();
        assert!(matches!(
            Cifar10::new(root.path(), false, Compose::default()),
            Err(TensorError::MalformedDataset { .. })
        ));
    }
}
