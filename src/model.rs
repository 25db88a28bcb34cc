use std::path::Path;

use crate::checkpoint;
use crate::error::Result;
use crate::tensor::Precision;
use crate::Tensor;

/// A differentiable building block with trainable parameters.
pub trait Module {
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Trainable tensors under dotted names such as `layer1.0.conv1.weight`,
    /// in a stable order.
    fn named_parameters(&self) -> Vec<(String, Tensor)>;

    /// Non-trainable state that still belongs in a checkpoint (running
    /// statistics).
    fn named_buffers(&self) -> Vec<(String, Tensor)> {
        Vec::new()
    }

    /// Switches between training and evaluation behaviour. Only layers with
    /// mode-dependent forward passes care.
    fn set_training(&self, _training: bool) {}

    fn parameters(&self) -> Vec<Tensor> {
        self.named_parameters().into_iter().map(|(_, t)| t).collect()
    }

    /// Parameters followed by buffers.
    fn state(&self) -> Vec<(String, Tensor)> {
        let mut state = self.named_parameters();
        state.extend(self.named_buffers());
        state
    }

    fn zero_grad(&self) {
        for p in self.parameters() {
            p.zero_grad();
        }
    }

    /// Excludes every parameter from differentiation.
    fn freeze(&self) {
        for p in self.parameters() {
            p.set_requires_grad(false);
        }
    }

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(Tensor::numel).sum()
    }
}

/// Prepends `prefix.` to every name produced by a submodule.
pub(crate) fn prefixed(prefix: &str, entries: Vec<(String, Tensor)>) -> impl Iterator<Item = (String, Tensor)> + '_ {
    entries.into_iter().map(move |(name, t)| (format!("{prefix}.{name}"), t))
}

/// A complete network that can be built by name and persisted.
pub trait Model: Module {
    fn name(&self) -> &'static str;

    fn save_parameters(&self, path: &Path, loss: Option<Precision>) -> Result<()> {
        checkpoint::save_state(path, &self.state(), loss)
    }

    fn load_parameters(&self, path: &Path) -> Result<()> {
        checkpoint::load_state(path, &self.state())
    }
}
