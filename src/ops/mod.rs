//! Differentiable operations on [`Tensor`](crate::Tensor).
//!
//! Each submodule adds an `impl Tensor` block. Forward passes validate the
//! shapes they are given and return `Result`; backward closures capture the
//! parents they need and never the node they are attached to.

mod conv;
mod elementwise;
pub(crate) mod linalg;
mod loss;
mod norm;
mod pool;
mod reduce;
mod shape;

pub use norm::BatchNormState;
