use crate::error::{Result, TensorError};
use crate::tensor::{accumulate_grad, Precision, Tensor, TensorOp};

impl Tensor {
    /// Sum of all elements as a `[1]` tensor.
    pub fn sum(&self) -> Tensor {
        let (total, len) = {
            let core = self.0.borrow();
            (core.data.iter().sum::<Precision>(), core.data.len())
        };
        let input = self.0.clone();
        Tensor::from_op(vec![total], vec![1], &[self], TensorOp::Sum, move |grad| {
            accumulate_grad(&input, &vec![grad[0]; len]);
        })
    }

    /// Mean of all elements as a `[1]` tensor.
    pub fn mean(&self) -> Tensor {
        let (mean, len) = {
            let core = self.0.borrow();
            let len = core.data.len().max(1);
            (core.data.iter().sum::<Precision>() / len as Precision, len)
        };
        let input = self.0.clone();
        Tensor::from_op(vec![mean], vec![1], &[self], TensorOp::Mean, move |grad| {
            accumulate_grad(&input, &vec![grad[0] / len as Precision; len]);
        })
    }

    /// Index of the largest value in every row of a `[N, C]` tensor.
    /// Ties resolve to the first index. Not differentiable.
    pub fn argmax_rows(&self) -> Result<Vec<usize>> {
        let core = self.0.borrow();
        let &[_, cols] = core.shape.as_slice() else {
            return Err(TensorError::InvalidArgument(format!(
                "argmax_rows needs a 2d tensor, got shape {:?}",
                core.shape
            )));
        };
        if cols == 0 {
            return Err(TensorError::InvalidArgument("argmax_rows over zero columns".to_string()));
        }
        Ok(core
            .data
            .chunks(cols)
            .map(|row| {
                let mut best = 0;
                for (j, value) in row.iter().enumerate() {
                    if *value > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect())
    }
}
