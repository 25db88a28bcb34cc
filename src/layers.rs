use std::cell::Cell;

use rand::Rng;

use crate::error::Result;
use crate::model::Module;
use crate::ops::BatchNormState;
use crate::tensor::Precision;
use crate::Tensor;

fn trainable_zeros(len: usize) -> Tensor {
    let t = Tensor::zeros(vec![len]);
    t.set_requires_grad(true);
    t
}

fn weight_and_bias(weights: &Tensor, biases: &Option<Tensor>) -> Vec<(String, Tensor)> {
    let mut params = vec![("weight".to_string(), weights.clone())];
    if let Some(ref bias) = biases {
        params.push(("bias".to_string(), bias.clone()));
    }
    params
}

/// Fully connected layer. Weights are stored `[in_features, out_features]`
/// so the forward pass is a plain `input x weights`.
pub struct Linear {
    pub weights: Tensor,
    pub biases: Option<Tensor>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool) -> Self {
        Linear::with_rng(in_features, out_features, bias, &mut rand::thread_rng())
    }

    pub fn with_rng(in_features: usize, out_features: usize, bias: bool, rng: &mut impl Rng) -> Self {
        let weights = Tensor::kaiming_he_init_with_rng(vec![in_features, out_features], rng);
        let biases = bias.then(|| trainable_zeros(out_features));
        Linear { weights, biases }
    }

    pub fn in_features(&self) -> usize {
        self.weights.shape()[0]
    }

    pub fn out_features(&self) -> usize {
        self.weights.shape()[1]
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let output = input.matmul(&self.weights)?;
        match self.biases {
            Some(ref bias) => output.add(bias),
            None => Ok(output),
        }
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        weight_and_bias(&self.weights, &self.biases)
    }
}

pub struct Conv2d {
    pub weights: Tensor,
    pub biases: Option<Tensor>,
    pub stride: usize,
    pub padding: usize,
}

impl Conv2d {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize, stride: usize, padding: usize, bias: bool) -> Self {
        Conv2d::with_rng(in_channels, out_channels, kernel_size, stride, padding, bias, &mut rand::thread_rng())
    }

    pub fn with_rng(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        bias: bool,
        rng: &mut impl Rng,
    ) -> Self {
        let weights = Tensor::kaiming_he_init_with_rng(vec![out_channels, in_channels, kernel_size, kernel_size], rng);
        let biases = bias.then(|| trainable_zeros(out_channels));
        Conv2d { weights, biases, stride, padding }
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        input.conv2d(&self.weights, self.biases.as_ref(), self.stride, self.padding)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        weight_and_bias(&self.weights, &self.biases)
    }
}

pub struct BatchNorm2d {
    pub gamma: Tensor,
    pub beta: Tensor,
    pub running_mean: Tensor,
    pub running_var: Tensor,
    pub momentum: Precision,
    pub eps: Precision,
    training: Cell<bool>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> Self {
        let gamma = Tensor::ones(vec![channels]);
        gamma.set_requires_grad(true);
        BatchNorm2d {
            gamma,
            beta: trainable_zeros(channels),
            running_mean: Tensor::zeros(vec![channels]),
            running_var: Tensor::ones(vec![channels]),
            momentum: 0.1,
            eps: 1e-5,
            training: Cell::new(true),
        }
    }

    pub fn is_training(&self) -> bool {
        self.training.get()
    }
}

impl Module for BatchNorm2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let state = BatchNormState {
            running_mean: &self.running_mean,
            running_var: &self.running_var,
            momentum: self.momentum,
            eps: self.eps,
            training: self.training.get(),
        };
        input.batch_norm2d(&self.gamma, &self.beta, &state)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![("weight".to_string(), self.gamma.clone()), ("bias".to_string(), self.beta.clone())]
    }

    fn named_buffers(&self) -> Vec<(String, Tensor)> {
        vec![
            ("running_mean".to_string(), self.running_mean.clone()),
            ("running_var".to_string(), self.running_var.clone()),
        ]
    }

    fn set_training(&self, training: bool) {
        self.training.set(training);
    }
}

pub struct MaxPool2d {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl MaxPool2d {
    pub fn new(kernel_size: usize, stride: usize) -> Self {
        MaxPool2d { kernel_size, stride, padding: 0 }
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }
}

impl Module for MaxPool2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        input.max_pool2d(self.kernel_size, self.stride, self.padding)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn linear_maps_batch_and_exposes_parameters() {
        let layer = Linear::new(400, 120, true);
        let out = layer.forward(&Tensor::ones(vec![4, 400])).unwrap();
        assert_eq!(out.shape(), vec![4, 120]);
        let names: Vec<String> = layer.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["weight", "bias"]);
        assert_eq!(layer.num_parameters(), 400 * 120 + 120);
        assert!(layer.parameters().iter().all(Tensor::requires_grad));
    }

    #[test]
    fn seeded_layers_are_reproducible() {
        let a = Conv2d::with_rng(3, 6, 5, 1, 0, true, &mut StdRng::seed_from_u64(7));
        let b = Conv2d::with_rng(3, 6, 5, 1, 0, true, &mut StdRng::seed_from_u64(7));
        assert_eq!(a.weights.data(), b.weights.data());
    }

    #[test]
    fn batch_norm_reports_buffers_and_mode() {
        let bn = BatchNorm2d::new(4);
        assert!(bn.is_training());
        bn.set_training(false);
        assert!(!bn.is_training());
        assert_eq!(bn.named_buffers().len(), 2);
        assert_eq!(bn.num_parameters(), 8);
    }
}
