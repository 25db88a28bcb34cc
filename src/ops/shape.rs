use crate::error::{Result, TensorError};
use crate::tensor::{accumulate_grad, numel_of, Tensor, TensorOp};

impl Tensor {
    /// Same values under a new shape; the element count must not change.
    pub fn reshape(&self, new_shape: Vec<usize>) -> Result<Tensor> {
        let (data, old_shape) = {
            let core = self.0.borrow();
            (core.data.clone(), core.shape.clone())
        };
        if numel_of(&old_shape) != numel_of(&new_shape) {
            return Err(TensorError::ShapeMismatch {
                op: "reshape",
                expected: old_shape,
                got: new_shape,
            });
        }

        let input = self.0.clone();
        Ok(Tensor::from_op(data, new_shape, &[self], TensorOp::Reshape, move |grad| {
            accumulate_grad(&input, grad);
        }))
    }

    /// Collapses every dimension from `start_dim` onwards into one.
    pub fn flatten(&self, start_dim: usize) -> Result<Tensor> {
        let shape = self.shape();
        if start_dim >= shape.len() {
            return Err(TensorError::InvalidArgument(format!(
                "flatten start_dim {start_dim} out of range for shape {shape:?}"
            )));
        }
        let mut new_shape = shape[..start_dim].to_vec();
        new_shape.push(numel_of(&shape[start_dim..]));
        self.reshape(new_shape)
    }
}

#[cfg(test)]
mod tests {
    use crate::Tensor;

    #[test]
    fn flatten_keeps_batch_dimension() {
        let t = Tensor::zeros(vec![4, 16, 5, 5]);
        assert_eq!(t.flatten(1).unwrap().shape(), vec![4, 400]);
        assert!(t.flatten(4).is_err());
    }

    #[test]
    fn reshape_rejects_element_count_change() {
        let t = Tensor::zeros(vec![2, 3]);
        assert!(t.reshape(vec![3, 2]).is_ok());
        assert!(t.reshape(vec![7]).is_err());
    }

    #[test]
    fn reshape_passes_gradient_through() {
        let t = Tensor::ones(vec![2, 3]);
        t.set_requires_grad(true);
        let r = t.reshape(vec![6]).unwrap();
        r.scale(2.0).sum().backward().unwrap();
        assert_eq!(t.grad().unwrap(), vec![2.0; 6]);
    }
}
