use std::collections::HashMap;

use log::trace;

use crate::tensor::Precision;
use crate::Tensor;

/// Updates a fixed set of parameters from their accumulated gradients.
pub trait Optimizer {
    fn step(&mut self);

    fn zero_grad(&self);

    fn lr(&self) -> Precision;

    fn set_lr(&mut self, lr: Precision);
}

/// Stochastic gradient descent with optional momentum and L2 weight decay.
///
/// Per parameter `p` with gradient `g`:
///
/// ```text
/// g = g + weight_decay * p
/// v = momentum * v + g        (v = g on the first step)
/// p = p - lr * v
/// ```
///
/// Parameters that do not require grad are left untouched, so frozen layers
/// can stay in the list.
pub struct Sgd {
    parameters: Vec<Tensor>,
    learning_rate: Precision,
    momentum: Precision,
    weight_decay: Precision,
    velocities: HashMap<usize, Vec<Precision>>,
}

impl Sgd {
    pub fn new(parameters: Vec<Tensor>, learning_rate: Precision, momentum: Precision) -> Self {
        Sgd {
            parameters,
            learning_rate,
            momentum,
            weight_decay: 0.0,
            velocities: HashMap::new(),
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: Precision) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self) {
        for (position, parameter) in self.parameters.iter().enumerate() {
            let mut core = parameter.0.borrow_mut();
            if !core.requires_grad {
                continue;
            }
            let core = &mut *core;

            let mut update: Vec<Precision> = core
                .grad
                .iter()
                .zip(&core.data)
                .map(|(g, p)| g + self.weight_decay * p)
                .collect();

            if self.momentum != 0.0 {
                match self.velocities.get_mut(&position) {
                    Some(velocity) => {
                        for (v, u) in velocity.iter_mut().zip(update.iter_mut()) {
                            *v = self.momentum * *v + *u;
                            *u = *v;
                        }
                    }
                    None => {
                        self.velocities.insert(position, update.clone());
                    }
                }
            }

            for (p, u) in core.data.iter_mut().zip(&update) {
                *p -= self.learning_rate * u;
            }
        }
        trace!("sgd step over {} parameters", self.parameters.len());
    }

    fn zero_grad(&self) {
        for parameter in &self.parameters {
            parameter.zero_grad();
        }
    }

    fn lr(&self) -> Precision {
        self.learning_rate
    }

    fn set_lr(&mut self, lr: Precision) {
        self.learning_rate = lr;
    }
}
