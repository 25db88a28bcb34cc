use crate::error::{Result, TensorError};
use crate::tensor::{accumulate_grad, wants_grad, Precision, Tensor, TensorOp};

/// Running statistics and hyper-parameters of a batch-norm layer.
pub struct BatchNormState<'a> {
    pub running_mean: &'a Tensor,
    pub running_var: &'a Tensor,
    pub momentum: Precision,
    pub eps: Precision,
    pub training: bool,
}

impl Tensor {
    /// Per-channel batch normalisation of an `[N, C, H, W]` input.
    ///
    /// In training mode the batch statistics normalise the input and are
    /// blended into the running statistics (`new = (1 - momentum) * old +
    /// momentum * batch`, unbiased variance). In evaluation mode the running
    /// statistics are used unchanged.
    pub fn batch_norm2d(&self, gamma: &Tensor, beta: &Tensor, state: &BatchNormState<'_>) -> Result<Tensor> {
        let shape = self.shape();
        let &[batch, channels, height, width] = shape.as_slice() else {
            return Err(TensorError::InvalidArgument(format!(
                "batch_norm2d needs a 4d input, got {shape:?}"
            )));
        };
        for (name, t) in [
            ("gamma", gamma),
            ("beta", beta),
            ("running_mean", state.running_mean),
            ("running_var", state.running_var),
        ] {
            if t.shape() != [channels] {
                return Err(TensorError::ShapeMismatch {
                    op: if name == "gamma" || name == "beta" { "batch_norm2d affine" } else { "batch_norm2d stats" },
                    expected: vec![channels],
                    got: t.shape(),
                });
            }
        }
        let plane = height * width;
        let count = batch * plane;
        if state.training && count < 2 {
            return Err(TensorError::InvalidArgument(
                "expected more than 1 value per channel when training".to_string(),
            ));
        }

        let data = self.data();
        let channel_values = |c: usize| (0..batch).flat_map(move |n| (0..plane).map(move |p| (n * channels + c) * plane + p));

        let (mean, var) = if state.training {
            let mut mean = vec![0.0; channels];
            let mut var = vec![0.0; channels];
            for c in 0..channels {
                let m = channel_values(c).map(|i| data[i]).sum::<Precision>() / count as Precision;
                let v = channel_values(c).map(|i| (data[i] - m).powi(2)).sum::<Precision>() / count as Precision;
                mean[c] = m;
                var[c] = v;
            }
            let unbiased = count as Precision / (count - 1) as Precision;
            let blend = |old: Vec<Precision>, new: &[Precision], correction: Precision| -> Vec<Precision> {
                old.iter()
                    .zip(new)
                    .map(|(o, n)| (1.0 - state.momentum) * o + state.momentum * n * correction)
                    .collect()
            };
            state.running_mean.set_data(blend(state.running_mean.data(), &mean, 1.0))?;
            state.running_var.set_data(blend(state.running_var.data(), &var, unbiased))?;
            (mean, var)
        } else {
            (state.running_mean.data(), state.running_var.data())
        };

        let inv_std: Vec<Precision> = var.iter().map(|v| 1.0 / (v + state.eps).sqrt()).collect();
        let gamma_data = gamma.data();
        let beta_data = beta.data();

        let mut x_hat = vec![0.0; data.len()];
        let mut result_data = vec![0.0; data.len()];
        for c in 0..channels {
            for i in channel_values(c) {
                x_hat[i] = (data[i] - mean[c]) * inv_std[c];
                result_data[i] = gamma_data[c] * x_hat[i] + beta_data[c];
            }
        }

        let training = state.training;
        let input = self.0.clone();
        let gamma_node = gamma.0.clone();
        let beta_node = beta.0.clone();
        Ok(Tensor::from_op(
            result_data,
            shape,
            &[self, gamma, beta],
            TensorOp::BatchNorm2d,
            move |grad| {
                let channel_values =
                    |c: usize| (0..batch).flat_map(move |n| (0..plane).map(move |p| (n * channels + c) * plane + p));
                let mut grad_gamma = vec![0.0; channels];
                let mut grad_beta = vec![0.0; channels];
                for c in 0..channels {
                    for i in channel_values(c) {
                        grad_gamma[c] += grad[i] * x_hat[i];
                        grad_beta[c] += grad[i];
                    }
                }

                if wants_grad(&input) {
                    let gamma_now = gamma_node.borrow().data.clone();
                    let mut grad_input = vec![0.0; grad.len()];
                    let m = count as Precision;
                    for c in 0..channels {
                        let scale = gamma_now[c] * inv_std[c];
                        if training {
                            // dx = gamma * inv_std / M * (M * dy - sum(dy) - x_hat * sum(dy * x_hat))
                            for i in channel_values(c) {
                                grad_input[i] =
                                    scale / m * (m * grad[i] - grad_beta[c] - x_hat[i] * grad_gamma[c]);
                            }
                        } else {
                            for i in channel_values(c) {
                                grad_input[i] = scale * grad[i];
                            }
                        }
                    }
                    accumulate_grad(&input, &grad_input);
                }
                accumulate_grad(&gamma_node, &grad_gamma);
                accumulate_grad(&beta_node, &grad_beta);
            },
        ))
    }
}
