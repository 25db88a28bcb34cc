//! Parameter checkpoints in the safetensors format.
//!
//! Tensors are stored under their dotted module names with the engine's
//! precision (`F32`, or `F64` with the `dtype-f64` feature). Free-form
//! metadata such as the final loss lives in the safetensors header.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use safetensors::tensor::{Dtype, SafeTensorError, SafeTensors, TensorView};

use crate::error::{Result, TensorError};
use crate::tensor::Precision;
use crate::Tensor;

#[cfg(not(feature = "dtype-f64"))]
const DTYPE: Dtype = Dtype::F32;
#[cfg(feature = "dtype-f64")]
const DTYPE: Dtype = Dtype::F64;

const WIDTH: usize = std::mem::size_of::<Precision>();

fn to_bytes(values: &[Precision]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn from_bytes(bytes: &[u8]) -> Vec<Precision> {
    bytes
        .chunks_exact(WIDTH)
        .map(|chunk| {
            let mut raw = [0u8; WIDTH];
            raw.copy_from_slice(chunk);
            Precision::from_le_bytes(raw)
        })
        .collect()
}

/// Writes every named tensor to `path`, recording `loss` in the metadata
/// when given.
pub fn save_state(path: &Path, state: &[(String, Tensor)], loss: Option<Precision>) -> Result<()> {
    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = state
        .iter()
        .map(|(name, tensor)| (name.clone(), tensor.shape(), tensor.with_data(to_bytes)))
        .collect();

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| Ok((name.as_str(), TensorView::new(DTYPE, shape.clone(), bytes)?)))
        .collect::<std::result::Result<Vec<_>, SafeTensorError>>()?;

    let metadata = loss.map(|loss| HashMap::from([("loss".to_string(), loss.to_string())]));
    safetensors::serialize_to_file(views, &metadata, path)?;
    info!("saved {} tensors to {}", state.len(), path.display());
    Ok(())
}

/// Overwrites every tensor in `state` with the stored values of the same
/// name. The file must contain each name with an identical shape; extra
/// entries in the file are ignored. Nothing is overwritten unless every
/// entry checks out.
pub fn load_state(path: &Path, state: &[(String, Tensor)]) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let stored = SafeTensors::deserialize(&bytes)?;

    let mut views = Vec::with_capacity(state.len());
    for (name, tensor) in state {
        let view = match stored.tensor(name) {
            Ok(view) => view,
            Err(SafeTensorError::TensorNotFound(_)) => return Err(TensorError::MissingParameter(name.clone())),
            Err(err) => return Err(err.into()),
        };
        if view.dtype() != DTYPE {
            return Err(TensorError::InvalidArgument(format!(
                "parameter `{name}` is stored as {:?}, expected {:?}",
                view.dtype(),
                DTYPE
            )));
        }
        let shape = tensor.shape();
        if view.shape() != shape.as_slice() {
            return Err(TensorError::ShapeMismatch {
                op: "load_state",
                expected: shape,
                got: view.shape().to_vec(),
            });
        }
        views.push(view);
    }

    for ((name, tensor), view) in state.iter().zip(&views) {
        tensor.set_data(from_bytes(view.data()))?;
        debug!("loaded `{name}` {:?}", view.shape());
    }
    info!("loaded {} tensors from {}", state.len(), path.display());
    Ok(())
}

/// Header metadata of a checkpoint, empty when none was written.
pub fn read_metadata(path: &Path) -> Result<HashMap<String, String>> {
    let bytes = std::fs::read(path)?;
    let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
    Ok(metadata.metadata().clone().unwrap_or_default())
}
