//! The autograd walkthrough: one training step on a classifier, gradients
//! of a small closed-form expression, and fine-tuning a frozen backbone.

use log::info;

use crate::error::Result;
use crate::layers::Linear;
use crate::model::Module;
use crate::models::ResNet;
use crate::optim::{Optimizer, Sgd};
use crate::tensor::Precision;
use crate::Tensor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub loss: Precision,
    /// L2 norm over the gradients of every parameter.
    pub grad_norm: f64,
    /// L2 norm of the parameter change made by the optimizer step.
    pub param_delta: f64,
}

fn l2_distance(before: &[Vec<Precision>], params: &[Tensor]) -> f64 {
    before
        .iter()
        .zip(params)
        .map(|(old, p)| {
            p.with_data(|new| {
                old.iter()
                    .zip(new)
                    .map(|(a, b)| ((a - b) as f64).powi(2))
                    .sum::<f64>()
            })
        })
        .sum::<f64>()
        .sqrt()
}

/// Forward pass, `loss = (prediction - labels).sum()`, backward pass and one
/// optimizer step over `model`'s parameters.
pub fn single_step<M, O>(model: &M, input: &Tensor, labels: &Tensor, optimizer: &mut O) -> Result<StepReport>
where
    M: Module + ?Sized,
    O: Optimizer,
{
    let params = model.parameters();
    let before: Vec<Vec<Precision>> = params.iter().map(Tensor::data).collect();

    let prediction = model.forward(input)?;
    let loss = prediction.sub(labels)?.sum();
    loss.backward()?;

    let grad_norm = params
        .iter()
        .filter_map(Tensor::grad)
        .flatten()
        .map(|g| (g as f64).powi(2))
        .sum::<f64>()
        .sqrt();
    optimizer.step();

    let report = StepReport {
        loss: loss.item()?,
        grad_norm,
        param_delta: l2_distance(&before, &params),
    };
    info!(
        "single step: loss {:.4}, grad norm {:.4}, parameter change {:.4}",
        report.loss, report.grad_norm, report.param_delta
    );
    Ok(report)
}

/// Gradients of `Q = 3a^3 - b^2` seeded with `dQ/dQ = 1`, next to their
/// closed forms `9a^2` and `-2b`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalGradient {
    pub q: Vec<Precision>,
    pub a_grad: Vec<Precision>,
    pub b_grad: Vec<Precision>,
    pub expected_a_grad: Vec<Precision>,
    pub expected_b_grad: Vec<Precision>,
}

impl ExternalGradient {
    pub fn matches(&self, tolerance: Precision) -> bool {
        let close = |got: &[Precision], want: &[Precision]| {
            got.len() == want.len() && got.iter().zip(want).all(|(g, w)| (g - w).abs() <= tolerance)
        };
        close(&self.a_grad, &self.expected_a_grad) && close(&self.b_grad, &self.expected_b_grad)
    }
}

pub fn external_gradient_demo() -> Result<ExternalGradient> {
    let a = Tensor::from_vec(vec![2.0, 3.0], vec![2])?;
    let b = Tensor::from_vec(vec![6.0, 4.0], vec![2])?;
    a.set_requires_grad(true);
    b.set_requires_grad(true);

    let q = a.powf(3.0).scale(3.0).sub(&b.powf(2.0))?;
    // Q is a vector, so the seed gradient has to be given explicitly
    q.backward_with_grad(&Tensor::ones(q.shape()))?;

    Ok(ExternalGradient {
        q: q.data(),
        a_grad: a.grad().unwrap_or_default(),
        b_grad: b.grad().unwrap_or_default(),
        expected_a_grad: a.data().iter().map(|v| 9.0 * v * v).collect(),
        expected_b_grad: b.data().iter().map(|v| -2.0 * v).collect(),
    })
}

#[derive(Debug, Clone)]
pub struct FinetuneReport {
    pub step: StepReport,
    /// Parameters that still require grad after freezing and swapping the
    /// head.
    pub trainable: Vec<String>,
    pub frozen: usize,
}

/// Freezes every parameter of `model`, replaces its classifier with a fresh
/// `Linear(512, num_classes)` and takes one SGD step. Only the new head
/// trains.
pub fn frozen_finetune_demo(model: &mut ResNet, input: &Tensor, num_classes: usize) -> Result<FinetuneReport> {
    model.freeze();
    let in_features = model.fc().in_features();
    model.replace_fc(Linear::new(in_features, num_classes, true));

    let named = model.named_parameters();
    let trainable: Vec<String> = named
        .iter()
        .filter(|(_, p)| p.requires_grad())
        .map(|(name, _)| name.clone())
        .collect();
    let frozen = named.len() - trainable.len();

    let mut optimizer = Sgd::new(model.parameters(), 1e-2, 0.9);
    let batch = input.shape().first().copied().unwrap_or(1);
    let labels = Tensor::rand(vec![batch, num_classes]);
    let step = single_step(&*model, input, &labels, &mut optimizer)?;
    info!("fine-tuning {:?} with {frozen} frozen parameters", trainable);
    Ok(FinetuneReport { step, trainable, frozen })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn closed_form_gradients_match() {
        let demo = external_gradient_demo().unwrap();
        assert_abs_diff_eq!(demo.q[0], -12.0, epsilon = 1e-4);
        assert_abs_diff_eq!(demo.q[1], 65.0, epsilon = 1e-4);
        assert_eq!(demo.expected_a_grad, vec![36.0, 81.0]);
        assert_eq!(demo.expected_b_grad, vec![-12.0, -8.0]);
        assert!(demo.matches(1e-3), "{demo:?}");
    }

    #[test]
    fn single_step_moves_parameters() {
        let layer = Linear::new(4, 3, true);
        let mut sgd = Sgd::new(layer.parameters(), 1e-2, 0.9);
        let input = Tensor::rand(vec![2, 4]);
        let labels = Tensor::rand(vec![2, 3]);
        let report = single_step(&layer, &input, &labels, &mut sgd).unwrap();
        assert!(report.grad_norm > 0.0);
        // first momentum step is plain SGD
        assert!((report.param_delta - 1e-2 * report.grad_norm).abs() < 1e-4);
    }
}
