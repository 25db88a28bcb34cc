use std::ops::{Add, Mul, Neg, Sub};

use crate::error::Result;
use crate::tensor::{accumulate_grad, numel_of, wants_grad, Precision, Tensor, TensorOp};

type BinaryForward = fn(Precision, Precision) -> Precision;
/// Local derivatives `(d/da, d/db)` at `(a, b)`.
type BinaryDerivative = fn(Precision, Precision) -> (Precision, Precision);

impl Tensor {
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(other, TensorOp::Add, |a, b| a + b, |_, _| (1.0, 1.0))
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(other, TensorOp::Sub, |a, b| a - b, |_, _| (1.0, -1.0))
    }

    /// Elementwise product, not matrix multiplication.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(other, TensorOp::Mul, |a, b| a * b, |a, b| (b, a))
    }

    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(other, TensorOp::Div, |a, b| a / b, |a, b| (1.0 / b, -a / (b * b)))
    }

    fn zip_broadcast(
        &self,
        other: &Tensor,
        op: TensorOp,
        forward: BinaryForward,
        derivative: BinaryDerivative,
    ) -> Result<Tensor> {
        let (result_data, result_shape, a_shape, b_shape) = {
            let self_borrow = self.0.borrow();
            let other_borrow = other.0.borrow();
            let a_shape = self_borrow.shape.clone();
            let b_shape = other_borrow.shape.clone();
            let result_shape = Tensor::broadcast_shapes(&a_shape, &b_shape)?;

            let result_data: Vec<Precision> = if a_shape == b_shape {
                self_borrow
                    .data
                    .iter()
                    .zip(&other_borrow.data)
                    .map(|(a, b)| forward(*a, *b))
                    .collect()
            } else {
                let mut result_idx_buff = vec![0usize; result_shape.len()];
                (0..numel_of(&result_shape))
                    .map(|i| {
                        Tensor::index_1d_to_nd_inplace(i, &result_shape, &mut result_idx_buff);
                        let a_idx = Tensor::broadcast_source_index(&a_shape, &result_shape, &result_idx_buff);
                        let b_idx = Tensor::broadcast_source_index(&b_shape, &result_shape, &result_idx_buff);
                        forward(self_borrow.data[a_idx], other_borrow.data[b_idx])
                    })
                    .collect()
            };
            (result_data, result_shape, a_shape, b_shape)
        };

        let lhs = self.0.clone();
        let rhs = other.0.clone();
        let out_shape = result_shape.clone();

        Ok(Tensor::from_op(result_data, result_shape, &[self, other], op, move |grad| {
            let (grad_a, grad_b) = {
                let a = lhs.borrow();
                let b = rhs.borrow();
                let mut grad_a = vec![0.0; a.data.len()];
                let mut grad_b = vec![0.0; b.data.len()];
                if a_shape == b_shape {
                    for i in 0..grad.len() {
                        let (da, db) = derivative(a.data[i], b.data[i]);
                        grad_a[i] += grad[i] * da;
                        grad_b[i] += grad[i] * db;
                    }
                } else {
                    // a stretched operand receives the sum over the stretched axes
                    let mut result_idx_buff = vec![0usize; out_shape.len()];
                    for (i, g) in grad.iter().enumerate() {
                        Tensor::index_1d_to_nd_inplace(i, &out_shape, &mut result_idx_buff);
                        let a_idx = Tensor::broadcast_source_index(&a_shape, &out_shape, &result_idx_buff);
                        let b_idx = Tensor::broadcast_source_index(&b_shape, &out_shape, &result_idx_buff);
                        let (da, db) = derivative(a.data[a_idx], b.data[b_idx]);
                        grad_a[a_idx] += g * da;
                        grad_b[b_idx] += g * db;
                    }
                }
                (grad_a, grad_b)
            };
            accumulate_grad(&lhs, &grad_a);
            accumulate_grad(&rhs, &grad_b);
        }))
    }

    fn map_unary(
        &self,
        op: TensorOp,
        forward: impl Fn(Precision) -> Precision,
        derivative: impl Fn(Precision) -> Precision + 'static,
    ) -> Tensor {
        let (result_data, shape) = {
            let core = self.0.borrow();
            (core.data.iter().map(|x| forward(*x)).collect(), core.shape.clone())
        };
        let input = self.0.clone();
        Tensor::from_op(result_data, shape, &[self], op, move |grad| {
            if !wants_grad(&input) {
                return;
            }
            let contribution: Vec<Precision> = {
                let core = input.borrow();
                core.data.iter().zip(grad).map(|(x, g)| g * derivative(*x)).collect()
            };
            accumulate_grad(&input, &contribution);
        })
    }

    pub fn neg(&self) -> Tensor {
        self.map_unary(TensorOp::Neg, |x| -x, |_| -1.0)
    }

    /// Multiplies every element by a constant.
    pub fn scale(&self, factor: Precision) -> Tensor {
        self.map_unary(TensorOp::Scale, move |x| x * factor, move |_| factor)
    }

    pub fn add_scalar(&self, value: Precision) -> Tensor {
        self.map_unary(TensorOp::AddScalar, move |x| x + value, |_| 1.0)
    }

    pub fn powf(&self, exponent: Precision) -> Tensor {
        self.map_unary(
            TensorOp::Powf,
            move |x| x.powf(exponent),
            move |x| exponent * x.powf(exponent - 1.0),
        )
    }

    pub fn exp(&self) -> Tensor {
        self.map_unary(TensorOp::Exp, |x| x.exp(), |x| x.exp())
    }

    pub fn ln(&self) -> Tensor {
        self.map_unary(TensorOp::Ln, |x| x.ln(), |x| 1.0 / x)
    }

    pub fn relu(&self) -> Tensor {
        self.map_unary(TensorOp::ReLU, |x| x.max(0.0), |x| if x > 0.0 { 1.0 } else { 0.0 })
    }
}

// Operator sugar panics on incompatible shapes, the same way slice indexing
// panics out of bounds; use the named methods to get a `Result`.
impl Add for &Tensor {
    type Output = Tensor;

    fn add(self, other: &Tensor) -> Tensor {
        match Tensor::add(self, other) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }
}

impl Sub for &Tensor {
    type Output = Tensor;

    fn sub(self, other: &Tensor) -> Tensor {
        match Tensor::sub(self, other) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }
}

impl Mul for &Tensor {
    type Output = Tensor;

    fn mul(self, other: &Tensor) -> Tensor {
        match Tensor::mul(self, other) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }
}

impl Neg for &Tensor {
    type Output = Tensor;

    fn neg(self) -> Tensor {
        Tensor::neg(self)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::Tensor;

    fn leaf(data: Vec<f32>, shape: Vec<usize>) -> Tensor {
        let t = Tensor::from_vec(data.into_iter().map(|v| v as crate::Precision).collect(), shape).unwrap();
        t.set_requires_grad(true);
        t
    }

    #[test]
    fn broadcast_add_sums_gradient_over_stretched_axis() {
        let a = leaf(vec![1.0, 2.0, 3.0], vec![3, 1]);
        let b = leaf(vec![10.0, 20.0, 30.0, 40.0], vec![1, 4]);
        let c = a.add(&b).unwrap();
        assert_eq!(c.shape(), vec![3, 4]);
        assert_abs_diff_eq!(c.data()[5] as f64, 22.0, epsilon = 1e-6);

        c.sum().backward().unwrap();
        assert_eq!(a.grad().unwrap(), vec![4.0, 4.0, 4.0]);
        assert_eq!(b.grad().unwrap(), vec![3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn mul_of_tensor_with_itself_doubles_gradient() {
        let a = leaf(vec![1.5, -2.0], vec![2]);
        let sq = &a * &a;
        sq.sum().backward().unwrap();
        assert_eq!(a.grad().unwrap(), vec![3.0, -4.0]);
    }

    #[test]
    fn div_gradients() {
        let a = leaf(vec![3.0], vec![1]);
        let b = leaf(vec![2.0], vec![1]);
        a.div(&b).unwrap().backward().unwrap();
        assert_abs_diff_eq!(a.grad().unwrap()[0] as f64, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(b.grad().unwrap()[0] as f64, -0.75, epsilon = 1e-6);
    }

    #[test]
    fn relu_blocks_negative_inputs() {
        let a = leaf(vec![-1.0, 0.5, 2.0], vec![3]);
        let r = a.relu();
        assert_eq!(r.data(), vec![0.0, 0.5, 2.0]);
        r.sum().backward().unwrap();
        assert_eq!(a.grad().unwrap(), vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn incompatible_shapes_are_an_error() {
        let a = Tensor::ones(vec![2, 3]);
        let b = Tensor::ones(vec![4]);
        assert!(a.add(&b).is_err());
    }

    #[test]
    #[should_panic]
    fn operator_panics_on_incompatible_shapes() {
        let _ = &Tensor::ones(vec![2, 3]) + &Tensor::ones(vec![2]);
    }
}
