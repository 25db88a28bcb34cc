// Tensor micrograd: a small reverse-mode tensor engine with the layers,
// data pipeline and training loop needed for two classic tutorials.
pub mod checkpoint;
pub mod cli;
pub mod data;
pub mod error;
pub mod gradcheck;
pub mod layers;
pub mod model;
pub mod models;
pub mod ops;
pub mod optim;
pub mod tensor;
pub mod train;
pub mod tutorial;
pub mod walkthrough;

pub use error::{Result, TensorError};
pub use layers::{BatchNorm2d, Conv2d, Linear, MaxPool2d};
pub use model::{Model, Module};
pub use optim::{Optimizer, Sgd};
pub use tensor::{is_grad_enabled, no_grad, Precision, Tensor, TensorOp};

#[cfg(test)]
mod tensor_tests;
