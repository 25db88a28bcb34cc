use rand::Rng;

use crate::error::Result;
use crate::layers::{Conv2d, Linear, MaxPool2d};
use crate::model::{prefixed, Model, Module};
use crate::Tensor;

/// The small LeNet-style classifier of the CIFAR-10 tutorial, for
/// `[N, 3, 32, 32]` images.
pub struct TutorialCnn {
    conv1: Conv2d,
    pool: MaxPool2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
}

impl TutorialCnn {
    pub fn new(num_classes: usize) -> Self {
        TutorialCnn::with_rng(num_classes, &mut rand::thread_rng())
    }

    pub fn with_rng(num_classes: usize, rng: &mut impl Rng) -> Self {
        TutorialCnn {
            conv1: Conv2d::with_rng(3, 6, 5, 1, 0, true, rng),
            pool: MaxPool2d::new(2, 2),
            conv2: Conv2d::with_rng(6, 16, 5, 1, 0, true, rng),
            fc1: Linear::with_rng(16 * 5 * 5, 120, true, rng),
            fc2: Linear::with_rng(120, 84, true, rng),
            fc3: Linear::with_rng(84, num_classes, true, rng),
        }
    }
}

impl Module for TutorialCnn {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = self.pool.forward(&self.conv1.forward(input)?.relu())?;
        x = self.pool.forward(&self.conv2.forward(&x)?.relu())?;
        // flatten everything except the batch dimension
        x = x.flatten(1)?;
        x = self.fc1.forward(&x)?.relu();
        x = self.fc2.forward(&x)?.relu();
        self.fc3.forward(&x)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = Vec::new();
        params.extend(prefixed("conv1", self.conv1.named_parameters()));
        params.extend(prefixed("conv2", self.conv2.named_parameters()));
        params.extend(prefixed("fc1", self.fc1.named_parameters()));
        params.extend(prefixed("fc2", self.fc2.named_parameters()));
        params.extend(prefixed("fc3", self.fc3.named_parameters()));
        params
    }
}

impl Model for TutorialCnn {
    fn name(&self) -> &'static str {
        "tutorial_cnn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_cifar_batch_to_class_scores() {
        let net = TutorialCnn::new(10);
        let out = net.forward(&Tensor::randn(vec![4, 3, 32, 32])).unwrap();
        assert_eq!(out.shape(), vec![4, 10]);
        // 456 + 2416 + 48120 + 10164 + 850
        assert_eq!(net.num_parameters(), 62_006);
    }

    #[test]
    fn rejects_images_of_the_wrong_size() {
        let net = TutorialCnn::new(10);
        assert!(net.forward(&Tensor::zeros(vec![1, 3, 28, 28])).is_err());
    }
}
