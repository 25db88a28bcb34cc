use crate::error::{Result, TensorError};
use crate::tensor::Precision;

/// A decoded image in channel-major (`CHW`) order. Datasets produce pixel
/// values in `0..=255`; `ToTensor` rescales them.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub data: Vec<Precision>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageTensor {
    /// From bytes already laid out channel by channel, as in the CIFAR-10
    /// binary records.
    pub fn from_chw_bytes(bytes: &[u8], channels: usize, height: usize, width: usize) -> Result<Self> {
        check_len(bytes.len(), channels, height, width)?;
        Ok(ImageTensor {
            data: bytes.iter().map(|&b| b as Precision).collect(),
            channels,
            height,
            width,
        })
    }

    /// From interleaved pixels (`HWC`), as decoded by the `image` crate.
    pub fn from_hwc_bytes(bytes: &[u8], channels: usize, height: usize, width: usize) -> Result<Self> {
        check_len(bytes.len(), channels, height, width)?;
        let plane = height * width;
        let mut data = vec![0.0; channels * plane];
        for (pixel, values) in bytes.chunks_exact(channels).enumerate() {
            for (c, &v) in values.iter().enumerate() {
                data[c * plane + pixel] = v as Precision;
            }
        }
        Ok(ImageTensor { data, channels, height, width })
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

fn check_len(len: usize, channels: usize, height: usize, width: usize) -> Result<()> {
    if len != channels * height * width {
        return Err(TensorError::ShapeMismatch {
            op: "image",
            expected: vec![channels, height, width],
            got: vec![len],
        });
    }
    Ok(())
}

/// One step of a preprocessing pipeline. Transforms run on loader worker
/// threads, hence `Send + Sync`.
pub trait Transform: Send + Sync {
    fn apply(&self, image: ImageTensor) -> Result<ImageTensor>;
}

/// Scales `0..=255` pixel values into `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToTensor;

impl Transform for ToTensor {
    fn apply(&self, mut image: ImageTensor) -> Result<ImageTensor> {
        for v in image.data.iter_mut() {
            *v /= 255.0;
        }
        Ok(image)
    }
}

/// Per-channel `(x - mean) / std`.
#[derive(Debug, Clone)]
pub struct Normalize {
    mean: Vec<Precision>,
    std: Vec<Precision>,
}

impl Normalize {
    pub fn new(mean: Vec<Precision>, std: Vec<Precision>) -> Result<Self> {
        if mean.len() != std.len() {
            return Err(TensorError::ShapeMismatch {
                op: "normalize",
                expected: vec![mean.len()],
                got: vec![std.len()],
            });
        }
        if std.iter().any(|s| *s == 0.0) {
            return Err(TensorError::InvalidArgument("normalize std must be non-zero".to_string()));
        }
        Ok(Normalize { mean, std })
    }
}

impl Transform for Normalize {
    fn apply(&self, mut image: ImageTensor) -> Result<ImageTensor> {
        if image.channels != self.mean.len() {
            return Err(TensorError::ShapeMismatch {
                op: "normalize",
                expected: vec![self.mean.len()],
                got: vec![image.channels],
            });
        }
        let plane = image.height * image.width;
        for (c, channel) in image.data.chunks_mut(plane.max(1)).enumerate() {
            let (mean, std) = (self.mean[c], self.std[c]);
            for v in channel {
                *v = (*v - mean) / std;
            }
        }
        Ok(image)
    }
}

/// Applies transforms in order. An empty pipeline passes images through.
#[derive(Default)]
pub struct Compose {
    steps: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new(steps: Vec<Box<dyn Transform>>) -> Self {
        Compose { steps }
    }

    pub fn then(mut self, step: impl Transform + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transform for Compose {
    fn apply(&self, image: ImageTensor) -> Result<ImageTensor> {
        self.steps.iter().try_fold(image, |image, step| step.apply(image))
    }
}

/// `ToTensor` then normalisation to `[-1, 1]`, as in the CIFAR-10 tutorial.
pub fn cifar_default() -> Result<Compose> {
    Ok(Compose::default()
        .then(ToTensor)
        .then(Normalize::new(vec![0.5; 3], vec![0.5; 3])?))
}
