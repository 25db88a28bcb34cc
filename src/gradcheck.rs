//! Compares backpropagated gradients against central finite differences.

use log::{debug, warn};

use crate::error::Result;
use crate::model::Module;
use crate::tensor::{no_grad, Precision};
use crate::Tensor;

/// One element whose analytical and numerical gradients disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub name: String,
    pub index: usize,
    pub analytical: f64,
    pub numerical: f64,
}

#[derive(Debug, Clone, Default)]
pub struct GradCheckReport {
    pub checked: usize,
    pub max_abs_error: f64,
    pub mismatches: Vec<Mismatch>,
}

impl GradCheckReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

pub struct GradientChecker {
    epsilon: Precision,
    tolerance: f64,
}

impl Default for GradientChecker {
    /// Step and tolerance sized for single precision.
    fn default() -> Self {
        GradientChecker::new(1e-2, 1e-2)
    }
}

impl GradientChecker {
    pub fn new(epsilon: Precision, tolerance: f64) -> Self {
        GradientChecker { epsilon, tolerance }
    }

    /// Checks every element of `inputs` that requires grad against the
    /// scalar produced by `f`.
    pub fn check_fn(&self, inputs: &[Tensor], f: impl Fn(&[Tensor]) -> Result<Tensor>) -> Result<GradCheckReport> {
        let named: Vec<(String, Tensor)> = inputs
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("input{i}"), t.clone()))
            .collect();
        self.compare(&named, || f(inputs))
    }

    /// Checks every parameter of `module` under the cross-entropy loss on
    /// one batch. Layers with running statistics should be in evaluation
    /// mode, or their buffers will drift while probing.
    pub fn check_module<M: Module + ?Sized>(&self, module: &M, input: &Tensor, labels: &Tensor) -> Result<GradCheckReport> {
        let named = module.named_parameters();
        self.compare(&named, || module.forward(input)?.cross_entropy(labels))
    }

    fn compare(&self, named: &[(String, Tensor)], loss: impl Fn() -> Result<Tensor>) -> Result<GradCheckReport> {
        for (_, t) in named {
            t.zero_grad();
        }
        loss()?.backward()?;

        let eps = self.epsilon;
        let mut report = GradCheckReport::default();
        for (name, tensor) in named {
            let Some(analytical) = tensor.grad() else {
                continue;
            };
            let original = tensor.data();
            for (index, &value) in original.iter().enumerate() {
                let mut probe = original.clone();
                probe[index] = value + eps;
                tensor.set_data(probe.clone())?;
                let plus = no_grad(&loss)?.item()? as f64;
                probe[index] = value - eps;
                tensor.set_data(probe)?;
                let minus = no_grad(&loss)?.item()? as f64;
                tensor.set_data(original.clone())?;

                let numerical = (plus - minus) / (2.0 * eps as f64);
                let analytical = analytical[index] as f64;
                let error = (analytical - numerical).abs();
                report.checked += 1;
                report.max_abs_error = report.max_abs_error.max(error);
                if error > self.tolerance * (1.0 + numerical.abs()) {
                    warn!("{name}[{index}]: analytical {analytical:.6} vs numerical {numerical:.6}");
                    report.mismatches.push(Mismatch {
                        name: name.clone(),
                        index,
                        analytical,
                        numerical,
                    });
                }
            }
        }
        debug!(
            "gradcheck: {} elements, max error {:.3e}, {} mismatches",
            report.checked,
            report.max_abs_error,
            report.mismatches.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Linear;

    fn leaf(data: Vec<Precision>, shape: Vec<usize>) -> Tensor {
        let t = Tensor::from_vec(data, shape).unwrap();
        t.set_requires_grad(true);
        t
    }

    #[test]
    fn smooth_expression_passes() {
        let a = leaf(vec![0.5, -1.0, 2.0], vec![3]);
        let b = leaf(vec![1.5, 0.25, -0.5], vec![3]);
        let report = GradientChecker::default()
            .check_fn(&[a, b], |x| Ok(x[0].mul(&x[1])?.exp().sum()))
            .unwrap();
        assert_eq!(report.checked, 6);
        assert!(report.passed(), "{:?}", report.mismatches);
    }

    #[test]
    fn corrupted_gradient_is_reported() {
        let a = leaf(vec![1.0, 2.0], vec![2]);
        // detaching hides the dependency from autograd but not from probing
        let report = GradientChecker::default()
            .check_fn(&[a], |x| x[0].detach().powf(2.0).sum().add(&x[0].scale(0.0).sum()))
            .unwrap();
        assert_eq!(report.mismatches.len(), 2);
        assert_eq!(report.mismatches[1].index, 1);
    }

    #[test]
    fn linear_layer_parameters_match() {
        let layer = Linear::new(3, 2, true);
        let input = Tensor::from_vec(vec![0.3, -0.7, 1.1, 0.9, 0.2, -0.4], vec![2, 3]).unwrap();
        let labels = Tensor::from_vec(vec![1.0, 0.0], vec![2]).unwrap();
        let report = GradientChecker::default().check_module(&layer, &input, &labels).unwrap();
        assert_eq!(report.checked, 8);
        assert!(report.passed(), "{:?}", report.mismatches);
    }
}
