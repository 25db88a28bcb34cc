use crate::error::{Result, TensorError};
use crate::tensor::{accumulate_grad, wants_grad, Precision, Tensor, TensorOp};

/// `C[m, n] = A[m, k] * B[k, n]`, all row-major.
pub(crate) fn gemm(a: &[Precision], b: &[Precision], m: usize, k: usize, n: usize) -> Vec<Precision> {
    let mut c = vec![0.0; m * n];
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        let c_row = &mut c[i * n..(i + 1) * n];
        for (kk, a_val) in a_row.iter().enumerate() {
            if *a_val == 0.0 {
                continue;
            }
            let b_row = &b[kk * n..(kk + 1) * n];
            for (c_val, b_val) in c_row.iter_mut().zip(b_row) {
                *c_val += a_val * b_val;
            }
        }
    }
    c
}

/// `C[m, k] = A[m, n] * B[k, n]^T`. Rows of both operands are multiplied
/// together, so B never has to be transposed in memory.
pub(crate) fn gemm_a_bt(a: &[Precision], b: &[Precision], m: usize, n: usize, k: usize) -> Vec<Precision> {
    let mut c = vec![0.0; m * k];
    for i in 0..m {
        let a_row = &a[i * n..(i + 1) * n];
        for j in 0..k {
            let b_row = &b[j * n..(j + 1) * n];
            c[i * k + j] = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
        }
    }
    c
}

/// `C[m, n] = A[k, m]^T * B[k, n]`.
pub(crate) fn gemm_at_b(a: &[Precision], b: &[Precision], k: usize, m: usize, n: usize) -> Vec<Precision> {
    let mut c = vec![0.0; m * n];
    for kk in 0..k {
        let a_row = &a[kk * m..(kk + 1) * m];
        let b_row = &b[kk * n..(kk + 1) * n];
        for (i, a_val) in a_row.iter().enumerate() {
            if *a_val == 0.0 {
                continue;
            }
            let c_row = &mut c[i * n..(i + 1) * n];
            for (c_val, b_val) in c_row.iter_mut().zip(b_row) {
                *c_val += a_val * b_val;
            }
        }
    }
    c
}

impl Tensor {
    /// Matrix product of `[m, n] x [n, p]`, or `[b, m, n] x [n, p]` where the
    /// right operand is shared across the batch.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let (self_shape, other_shape) = (self.shape(), other.shape());
        let (rows, inner, cols, result_shape) = match (self_shape.as_slice(), other_shape.as_slice()) {
            (&[m, n], &[x, y]) if n == x => (m, n, y, vec![m, y]),
            // [batch, m, n] is laid out exactly like [batch * m, n]
            (&[batch, m, n], &[x, y]) if n == x => (batch * m, n, y, vec![batch, m, y]),
            _ => {
                return Err(TensorError::ShapeMismatch {
                    op: "matmul",
                    expected: self_shape,
                    got: other_shape,
                })
            }
        };

        let result_data = {
            let a = self.0.borrow();
            let b = other.0.borrow();
            gemm(&a.data, &b.data, rows, inner, cols)
        };

        let lhs = self.0.clone();
        let rhs = other.0.clone();
        Ok(Tensor::from_op(result_data, result_shape, &[self, other], TensorOp::MatMul, move |grad| {
            // dA = G * B^T, dB = A^T * G
            if wants_grad(&lhs) {
                let grad_a = gemm_a_bt(grad, &rhs.borrow().data, rows, cols, inner);
                accumulate_grad(&lhs, &grad_a);
            }
            if wants_grad(&rhs) {
                let grad_b = gemm_at_b(&lhs.borrow().data, grad, rows, inner, cols);
                accumulate_grad(&rhs, &grad_b);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemm_kernels_agree_with_hand_computation() {
        // A = [[1, 2], [3, 4]], B = [[5, 6], [7, 8]]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        assert_eq!(gemm(&a, &b, 2, 2, 2), vec![19.0, 22.0, 43.0, 50.0]);
        // A * B^T = [[17, 23], [39, 53]]
        assert_eq!(gemm_a_bt(&a, &b, 2, 2, 2), vec![17.0, 23.0, 39.0, 53.0]);
        // A^T * B = [[26, 30], [38, 44]]
        assert_eq!(gemm_at_b(&a, &b, 2, 2, 2), vec![26.0, 30.0, 38.0, 44.0]);
    }

    #[test]
    fn matmul_gradients_match_closed_form() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let b = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]).unwrap();
        a.set_requires_grad(true);
        b.set_requires_grad(true);

        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), vec![2, 2]);
        assert_eq!(c.data(), vec![4.0, 5.0, 10.0, 11.0]);

        c.sum().backward().unwrap();
        // dA[i][k] = sum_j B[k][j], dB[k][j] = sum_i A[i][k]
        assert_eq!(a.grad().unwrap(), vec![1.0, 1.0, 2.0, 1.0, 1.0, 2.0]);
        assert_eq!(b.grad().unwrap(), vec![5.0, 5.0, 7.0, 7.0, 9.0, 9.0]);
    }

    #[test]
    fn batched_left_operand_shares_right_matrix() {
        let a = Tensor::ones(vec![2, 3, 4]);
        let b = Tensor::ones(vec![4, 5]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), vec![2, 3, 5]);
        assert!(c.data().iter().all(|v| *v == 4.0));
    }

    #[test]
    fn inner_dimension_mismatch_is_rejected() {
        let a = Tensor::ones(vec![2, 3]);
        let b = Tensor::ones(vec![4, 2]);
        assert!(a.matmul(&b).is_err());
    }
}
