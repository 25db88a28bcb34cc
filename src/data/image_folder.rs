use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use log::info;

use super::transforms::{ImageTensor, Transform};
use super::{Dataset, Sample};
use crate::error::{Result, TensorError};

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

/// Sorted names of the subdirectories of `root`; each one is a class.
pub fn class_folders(root: &Path) -> Result<Vec<String>> {
    let mut folder_names = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                folder_names.push(name.to_string());
            }
        }
    }
    folder_names.sort();
    Ok(folder_names)
}

/// Images arranged as `root/<class>/<file>`, decoded on access and resized
/// to a fixed size.
pub struct ImageFolder {
    items: Vec<(PathBuf, usize)>,
    classes: Vec<String>,
    height: usize,
    width: usize,
    transform: Box<dyn Transform>,
}

impl ImageFolder {
    pub fn new(root: impl AsRef<Path>, height: usize, width: usize, transform: impl Transform + 'static) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(TensorError::DatasetNotFound {
                path: root.to_path_buf(),
                hint: "expected one subdirectory of images per class".to_string(),
            });
        }

        let classes = class_folders(root)?;
        let mut items = Vec::new();
        for (class_idx, class) in classes.iter().enumerate() {
            let mut files: Vec<PathBuf> = fs::read_dir(root.join(class))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<_>>()?;
            files.retain(|path| path.is_file() && is_image(path));
            files.sort();
            items.extend(files.into_iter().map(|path| (path, class_idx)));
        }
        info!("{} classes, {} images under {}", classes.len(), items.len(), root.display());

        Ok(ImageFolder {
            items,
            classes,
            height,
            width,
            transform: Box::new(transform),
        })
    }
}

impl Dataset for ImageFolder {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let Some((path, label)) = self.items.get(index) else {
            return Err(TensorError::InvalidArgument(format!(
                "sample {index} out of range for {} images",
                self.items.len()
            )));
        };
        let rgb = image::open(path)?.to_rgb8();
        let resized = image::imageops::resize(&rgb, self.width as u32, self.height as u32, FilterType::Lanczos3);
        let image = ImageTensor::from_hwc_bytes(resized.as_raw(), 3, self.height, self.width)?;
        Ok(Sample {
            image: self.transform.apply(image)?,
            label: *label,
        })
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }
}
