use crate::error::{Result, TensorError};
use crate::tensor::{accumulate_grad, Precision, Tensor, TensorOp};

impl Tensor {
    /// Mean cross-entropy between `[N, C]` logits and `[N]` class indices.
    ///
    /// Computed as `logsumexp(row) - row[label]` with the row maximum
    /// subtracted first, so large logits do not overflow.
    pub fn cross_entropy(&self, labels: &Tensor) -> Result<Tensor> {
        let shape = self.shape();
        let &[batch, classes] = shape.as_slice() else {
            return Err(TensorError::InvalidArgument(format!(
                "cross_entropy needs [N, C] logits, got {shape:?}"
            )));
        };
        if labels.shape() != [batch] {
            return Err(TensorError::ShapeMismatch {
                op: "cross_entropy labels",
                expected: vec![batch],
                got: labels.shape(),
            });
        }
        if batch == 0 || classes == 0 {
            return Err(TensorError::InvalidArgument("cross_entropy over an empty batch".to_string()));
        }
        let targets = labels.class_indices(classes)?;

        let mut probabilities = Vec::with_capacity(batch * classes);
        let mut total = 0.0;
        self.with_data(|data| {
            for (row, target) in data.chunks(classes).zip(&targets) {
                let max = row.iter().copied().fold(Precision::NEG_INFINITY, Precision::max);
                let exps: Vec<Precision> = row.iter().map(|v| (v - max).exp()).collect();
                let sum: Precision = exps.iter().sum();
                total += sum.ln() + max - row[*target];
                probabilities.extend(exps.iter().map(|e| e / sum));
            }
        });
        let loss = total / batch as Precision;

        let logits = self.0.clone();
        Ok(Tensor::from_op(vec![loss], vec![1], &[self], TensorOp::CrossEntropy, move |grad| {
            // d/dlogits = (softmax - one_hot) / N
            let scale = grad[0] / batch as Precision;
            let mut contribution: Vec<Precision> = probabilities.iter().map(|p| p * scale).collect();
            for (n, target) in targets.iter().enumerate() {
                contribution[n * classes + target] -= scale;
            }
            accumulate_grad(&logits, &contribution);
        }))
    }

    /// Mean squared error against a target of the same shape.
    pub fn mse_loss(&self, target: &Tensor) -> Result<Tensor> {
        if self.shape() != target.shape() {
            return Err(TensorError::ShapeMismatch {
                op: "mse_loss",
                expected: self.shape(),
                got: target.shape(),
            });
        }
        Ok(self.sub(target)?.powf(2.0).mean())
    }

    /// Reads a `[N]` label tensor as class indices below `classes`.
    pub fn class_indices(&self, classes: usize) -> Result<Vec<usize>> {
        self.with_data(|data| {
            data.iter()
                .map(|v| {
                    if *v < 0.0 || v.fract() != 0.0 || *v as usize >= classes {
                        Err(TensorError::InvalidArgument(format!(
                            "label {v} is not a class index below {classes}"
                        )))
                    } else {
                        Ok(*v as usize)
                    }
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::Tensor;

    #[test]
    fn uniform_logits_give_log_of_class_count() {
        let logits = Tensor::zeros(vec![2, 4]);
        let labels = Tensor::from_vec(vec![0.0, 3.0], vec![2]).unwrap();
        let loss = logits.cross_entropy(&labels).unwrap();
        assert_abs_diff_eq!(loss.item().unwrap() as f64, 4f64.ln(), epsilon = 1e-6);
    }

    #[test]
    fn gradient_is_softmax_minus_one_hot_over_batch() {
        let logits = Tensor::zeros(vec![1, 2]);
        logits.set_requires_grad(true);
        let labels = Tensor::from_vec(vec![1.0], vec![1]).unwrap();
        logits.cross_entropy(&labels).unwrap().backward().unwrap();
        let grad = logits.grad().unwrap();
        assert_abs_diff_eq!(grad[0] as f64, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(grad[1] as f64, -0.5, epsilon = 1e-6);
    }

    #[test]
    fn large_logits_stay_finite() {
        let logits = Tensor::from_vec(vec![1000.0, 0.0, -1000.0], vec![1, 3]).unwrap();
        let labels = Tensor::from_vec(vec![0.0], vec![1]).unwrap();
        let loss = logits.cross_entropy(&labels).unwrap().item().unwrap();
        assert!(loss.is_finite());
        assert_abs_diff_eq!(loss as f64, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn out_of_range_labels_are_rejected() {
        let logits = Tensor::zeros(vec![1, 3]);
        for bad in [3.0, -1.0, 0.5] {
            let labels = Tensor::from_vec(vec![bad], vec![1]).unwrap();
            assert!(logits.cross_entropy(&labels).is_err());
        }
        let labels = Tensor::from_vec(vec![0.0, 1.0], vec![2]).unwrap();
        assert!(logits.cross_entropy(&labels).is_err());
    }

    #[test]
    fn mse_of_identical_tensors_is_zero() {
        let a = Tensor::rand(vec![3, 3]);
        assert_eq!(a.mse_loss(&a.detach()).unwrap().item().unwrap(), 0.0);
    }
}
