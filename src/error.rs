//! Error types for the tensor engine, the data pipeline and the tutorials.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch in {op}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("operands could not be broadcast together: {left:?} and {right:?}")]
    Broadcast { left: Vec<usize>, right: Vec<usize> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("grad can be implicitly created only for scalar outputs, got shape {0:?}")]
    NonScalarBackward(Vec<usize>),

    #[error("unknown model `{0}` (available: resnet18, tutorial_cnn)")]
    UnknownModel(String),

    #[error("dataset not found at {path}: {hint}")]
    DatasetNotFound { path: PathBuf, hint: String },

    #[error("malformed dataset file {path}: {reason}")]
    MalformedDataset { path: PathBuf, reason: String },

    #[error("checkpoint is missing parameter `{0}`")]
    MissingParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TensorError>;
