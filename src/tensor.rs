use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Result, TensorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorOp {
    None,
    Reshape,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Scale,
    AddScalar,
    Powf,
    Exp,
    Ln,
    ReLU,
    Sum,
    Mean,
    MatMul,
    Conv2d,
    MaxPool2d,
    AvgPool2d,
    BatchNorm2d,
    CrossEntropy,
}

#[cfg(not(feature = "dtype-f64"))]
pub type Precision = f32;
#[cfg(feature = "dtype-f64")]
pub type Precision = f64;

pub(crate) type NodeRef = Rc<RefCell<TensorCore>>;

/// Receives the gradient of the node it belongs to and pushes contributions
/// into the parents it captured.
type BackwardFn = Box<dyn Fn(&[Precision])>;

pub struct TensorCore {
    pub(crate) data: Vec<Precision>,
    pub(crate) shape: Vec<usize>,
    pub(crate) requires_grad: bool,
    pub(crate) grad: Vec<Precision>,
    backward: Option<BackwardFn>,
    op: TensorOp,
    prev: Vec<NodeRef>,
}

// Box<dyn Fn> has no Debug, so the closure is reported as a flag only.
impl std::fmt::Debug for TensorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorCore")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("op", &self.op)
            .field("data", &self.data)
            .field("has_backward", &self.backward.is_some())
            .field("prev_count", &self.prev.len())
            .finish()
    }
}

/// Shared handle to a node of the computation graph. Cloning is cheap and
/// yields the same node; equality and hashing go by node identity.
#[derive(Debug, Clone)]
pub struct Tensor(pub(crate) NodeRef);

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Tensor {}

impl Hash for Tensor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let pointer_raw: *const RefCell<TensorCore> = &*self.0;
        pointer_raw.hash(state);
    }
}

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether new operations record the graph on this thread.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|flag| flag.get())
}

struct GradModeGuard(bool);

impl Drop for GradModeGuard {
    fn drop(&mut self) {
        let previous = self.0;
        GRAD_ENABLED.with(|flag| flag.set(previous));
    }
}

/// Runs `f` with graph recording disabled. Tensors produced inside never
/// require grad. The previous mode is restored when `f` returns or unwinds.
pub fn no_grad<T>(f: impl FnOnce() -> T) -> T {
    let _guard = GradModeGuard(GRAD_ENABLED.with(|flag| flag.replace(false)));
    f()
}

pub(crate) fn numel_of(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Adds `contribution` into the grad of `node` unless the node is excluded
/// from differentiation.
pub(crate) fn accumulate_grad(node: &NodeRef, contribution: &[Precision]) {
    let mut core = node.borrow_mut();
    if !core.requires_grad {
        return;
    }
    for (g, c) in core.grad.iter_mut().zip(contribution) {
        *g += *c;
    }
}

pub(crate) fn wants_grad(node: &NodeRef) -> bool {
    node.borrow().requires_grad
}

impl Tensor {
    fn new(data: Vec<Precision>, shape: Vec<usize>, requires_grad: bool) -> Tensor {
        let data_len = data.len();
        let core = TensorCore {
            data,
            shape,
            requires_grad,
            grad: vec![0.0; data_len],
            backward: None,
            op: TensorOp::None,
            prev: Vec::new(),
        };
        Tensor(Rc::new(RefCell::new(core)))
    }

    /// Creates the result of an operation. The node is attached to the graph
    /// only when recording is enabled and one of the parents requires grad;
    /// otherwise `backward` is dropped unused.
    pub(crate) fn from_op(
        data: Vec<Precision>,
        shape: Vec<usize>,
        parents: &[&Tensor],
        op: TensorOp,
        backward: impl Fn(&[Precision]) + 'static,
    ) -> Tensor {
        let requires_grad = is_grad_enabled() && parents.iter().any(|p| p.requires_grad());
        let result = Tensor::new(data, shape, requires_grad);
        {
            let mut core = result.0.borrow_mut();
            core.op = op;
            if requires_grad {
                core.prev = parents.iter().map(|p| p.0.clone()).collect();
                core.backward = Some(Box::new(backward));
            }
        }
        result
    }

    pub fn zeros(shape: Vec<usize>) -> Tensor {
        Tensor::full(shape, 0.0)
    }

    pub fn ones(shape: Vec<usize>) -> Tensor {
        Tensor::full(shape, 1.0)
    }

    pub fn full(shape: Vec<usize>, value: Precision) -> Tensor {
        let data = vec![value; numel_of(&shape)];
        Tensor::new(data, shape, false)
    }

    /// A one-element tensor of shape `[1]`.
    pub fn scalar(value: Precision) -> Tensor {
        Tensor::new(vec![value], vec![1], false)
    }

    pub fn from_vec(data: Vec<Precision>, shape: Vec<usize>) -> Result<Tensor> {
        let expected = numel_of(&shape);
        if data.len() != expected {
            return Err(TensorError::InvalidArgument(format!(
                "{} values cannot fill shape {:?} ({} elements)",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Tensor::new(data, shape, false))
    }

    /// Uniform samples from `[0, 1)`.
    pub fn rand(shape: Vec<usize>) -> Tensor {
        Tensor::rand_with_rng(shape, &mut rand::thread_rng())
    }

    pub fn rand_with_rng(shape: Vec<usize>, rng: &mut impl Rng) -> Tensor {
        let data = (0..numel_of(&shape)).map(|_| rng.gen::<Precision>()).collect();
        Tensor::new(data, shape, false)
    }

    pub fn rand_uniform(shape: Vec<usize>, low: Precision, high: Precision) -> Result<Tensor> {
        Tensor::rand_uniform_with_rng(shape, low, high, &mut rand::thread_rng())
    }

    /// Uniform samples from `[low, high)`, or a tensor filled with `low` when
    /// the range is empty.
    pub fn rand_uniform_with_rng(
        shape: Vec<usize>,
        low: Precision,
        high: Precision,
        rng: &mut impl Rng,
    ) -> Result<Tensor> {
        if !(high - low).is_finite() || low > high {
            return Err(TensorError::InvalidArgument(format!(
                "invalid uniform range [{low}, {high})"
            )));
        }
        let data = if low == high {
            vec![low; numel_of(&shape)]
        } else {
            (0..numel_of(&shape)).map(|_| rng.gen_range(low..high)).collect()
        };
        Ok(Tensor::new(data, shape, false))
    }

    pub fn randn(shape: Vec<usize>) -> Tensor {
        Tensor::randn_with_rng(shape, &mut rand::thread_rng())
    }

    pub fn randn_with_rng(shape: Vec<usize>, rng: &mut impl Rng) -> Tensor {
        Tensor::normal_with_rng(shape, 1.0, rng)
    }

    fn normal_with_rng(shape: Vec<usize>, std: Precision, rng: &mut impl Rng) -> Tensor {
        let data = match Normal::new(0.0 as Precision, std) {
            Ok(normal) => (0..numel_of(&shape)).map(|_| normal.sample(rng)).collect(),
            // only reachable with a non-finite std, e.g. an empty fan-in
            Err(_) => vec![0.0; numel_of(&shape)],
        };
        Tensor::new(data, shape, false)
    }

    /// He-normal initialisation for a trainable weight: `N(0, 2 / fan_in)`.
    ///
    /// Linear weights are laid out `[in, out]`, so their fan-in is the first
    /// dimension; convolution weights are `[out, in, kh, kw]` and use
    /// `in * kh * kw`.
    pub fn kaiming_he_init(shape: Vec<usize>) -> Tensor {
        Tensor::kaiming_he_init_with_rng(shape, &mut rand::thread_rng())
    }

    pub fn kaiming_he_init_with_rng(shape: Vec<usize>, rng: &mut impl Rng) -> Tensor {
        let fan_in = match shape.len() {
            0 => 1,
            1 | 2 => shape[0],
            _ => numel_of(&shape[1..]),
        };
        let std = (2.0 / fan_in.max(1) as Precision).sqrt();
        let tensor = Tensor::normal_with_rng(shape, std, rng);
        tensor.set_requires_grad(true);
        tensor
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.borrow().shape.clone()
    }

    pub fn numel(&self) -> usize {
        self.0.borrow().data.len()
    }

    pub fn op(&self) -> TensorOp {
        self.0.borrow().op
    }

    /// Copy of the values in row-major order.
    pub fn data(&self) -> Vec<Precision> {
        self.0.borrow().data.clone()
    }

    /// Borrows the values without copying them.
    pub fn with_data<R>(&self, f: impl FnOnce(&[Precision]) -> R) -> R {
        f(&self.0.borrow().data)
    }

    pub fn set_data(&self, data: Vec<Precision>) -> Result<()> {
        let mut core = self.0.borrow_mut();
        if data.len() != core.data.len() {
            return Err(TensorError::ShapeMismatch {
                op: "set_data",
                expected: vec![core.data.len()],
                got: vec![data.len()],
            });
        }
        core.data = data;
        Ok(())
    }

    /// Accumulated gradient, or `None` for tensors excluded from
    /// differentiation.
    pub fn grad(&self) -> Option<Vec<Precision>> {
        let core = self.0.borrow();
        core.requires_grad.then(|| core.grad.clone())
    }

    pub fn item(&self) -> Result<Precision> {
        let core = self.0.borrow();
        match core.data.as_slice() {
            [value] => Ok(*value),
            _ => Err(TensorError::InvalidArgument(format!(
                "item() needs a one-element tensor, got shape {:?}",
                core.shape
            ))),
        }
    }

    pub fn requires_grad(&self) -> bool {
        self.0.borrow().requires_grad
    }

    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.0.borrow_mut().requires_grad = requires_grad;
    }

    pub fn is_leaf(&self) -> bool {
        self.0.borrow().backward.is_none()
    }

    /// A new leaf sharing no history with `self`.
    pub fn detach(&self) -> Tensor {
        let core = self.0.borrow();
        Tensor::new(core.data.clone(), core.shape.clone(), false)
    }

    pub fn zero_grad(&self) {
        self.0.borrow_mut().grad.fill(0.0);
    }

    // indices are e.g. (1,0,1,1) for shape (2,2,2,2); walk from the last axis
    pub fn index_1d(indices: &[usize], shape: &[usize]) -> usize {
        let mut index_1d = 0;
        let mut multiplier = 1;
        for i in (0..indices.len()).rev() {
            index_1d += indices[i] * multiplier;
            multiplier *= shape[i];
        }
        index_1d
    }

    pub fn index_1d_to_nd(index_1d: usize, shape: &[usize]) -> Vec<usize> {
        let mut indices = vec![0; shape.len()];
        Tensor::index_1d_to_nd_inplace(index_1d, shape, &mut indices);
        indices
    }

    pub fn index_1d_to_nd_inplace(mut index_1d: usize, shape: &[usize], result_idx: &mut [usize]) {
        for i in (0..shape.len()).rev() {
            result_idx[i] = index_1d % shape[i];
            index_1d /= shape[i];
        }
    }

    /// NumPy broadcasting: shapes are right-aligned and every dimension pair
    /// must be equal or contain a 1.
    pub fn broadcast_shapes(shape_a: &[usize], shape_b: &[usize]) -> Result<Vec<usize>> {
        let max_len = shape_a.len().max(shape_b.len());
        let mut broadcast_shape = vec![0; max_len];
        for i in 0..max_len {
            // missing leading dimensions behave as 1
            let curr_a = if i < shape_a.len() { shape_a[shape_a.len() - i - 1] } else { 1 };
            let curr_b = if i < shape_b.len() { shape_b[shape_b.len() - i - 1] } else { 1 };

            let result_dimension = if curr_a == curr_b || curr_b == 1 {
                curr_a
            } else if curr_a == 1 {
                curr_b
            } else {
                return Err(TensorError::Broadcast {
                    left: shape_a.to_vec(),
                    right: shape_b.to_vec(),
                });
            };
            broadcast_shape[max_len - i - 1] = result_dimension;
        }
        Ok(broadcast_shape)
    }

    /// Maps a position in the broadcast result back to the flat index of the
    /// operand that was stretched to produce it.
    pub fn broadcast_source_index(
        original_shape: &[usize],
        broadcast_shape: &[usize],
        broadcast_indices: &[usize],
    ) -> usize {
        let offset = broadcast_shape.len() - original_shape.len();
        let mut index_1d = 0;
        let mut multiplier = 1;
        for i in (0..original_shape.len()).rev() {
            let idx = if original_shape[i] == 1 { 0 } else { broadcast_indices[i + offset] };
            index_1d += idx * multiplier;
            multiplier *= original_shape[i];
        }
        index_1d
    }

    /// Backpropagates from a one-element tensor, seeding its gradient with 1.
    pub fn backward(&self) -> Result<()> {
        if self.numel() != 1 {
            return Err(TensorError::NonScalarBackward(self.shape()));
        }
        self.run_backward(&[1.0])
    }

    /// Backpropagates with an explicit seed gradient of the same shape as
    /// `self` (the vector-Jacobian product form).
    pub fn backward_with_grad(&self, gradient: &Tensor) -> Result<()> {
        let (own_shape, seed_shape) = (self.shape(), gradient.shape());
        if own_shape != seed_shape {
            return Err(TensorError::ShapeMismatch {
                op: "backward_with_grad",
                expected: own_shape,
                got: seed_shape,
            });
        }
        let seed = gradient.data();
        self.run_backward(&seed)
    }

    fn run_backward(&self, seed: &[Precision]) -> Result<()> {
        if !self.requires_grad() {
            return Err(TensorError::InvalidArgument(
                "tensor does not require grad and has no backward function".to_string(),
            ));
        }
        accumulate_grad(&self.0, seed);

        // reverse topological order visits every node after all its consumers
        let topological_order = self.build_topological_graph();
        for tensor in topological_order.iter().rev() {
            let has_backward = {
                let core = tensor.0.borrow();
                match core.backward {
                    Some(ref backward_fn) => {
                        backward_fn(&core.grad);
                        true
                    }
                    None => false,
                }
            };
            // interior grads are consumed; only leaves keep accumulating
            if has_backward {
                tensor.zero_grad();
            }
        }
        Ok(())
    }

    pub fn build_topological_graph(&self) -> Vec<Tensor> {
        let mut topologically_sorted: Vec<Tensor> = Vec::new();
        let mut visited: HashSet<Tensor> = HashSet::new();
        self.topo_recursive(&mut topologically_sorted, &mut visited);
        topologically_sorted
    }

    fn topo_recursive(&self, topologically_sorted: &mut Vec<Tensor>, visited: &mut HashSet<Tensor>) {
        if visited.insert(self.clone()) {
            let parents: Vec<Tensor> = self.0.borrow().prev.iter().map(|p| Tensor(p.clone())).collect();
            for parent in parents {
                parent.topo_recursive(topologically_sorted, visited);
            }
            topologically_sorted.push(self.clone());
        }
    }
}
