//! Mini-batch training and evaluation loops for classifiers.

use std::fmt;

use log::{debug, info};
use serde::Serialize;

use crate::data::{DataLoader, Dataset};
use crate::error::{Result, TensorError};
use crate::model::Module;
use crate::optim::{Optimizer, Sgd};
use crate::tensor::{no_grad, Precision};
use crate::Tensor;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: Precision,
    pub momentum: Precision,
    pub weight_decay: Precision,
    /// Batches between two loss reports.
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 2,
            learning_rate: 0.001,
            momentum: 0.9,
            weight_decay: 0.0,
            log_every: 2000,
        }
    }
}

impl TrainConfig {
    pub fn optimizer(&self, parameters: Vec<Tensor>) -> Sgd {
        Sgd::new(parameters, self.learning_rate, self.momentum).with_weight_decay(self.weight_decay)
    }
}

/// Mean loss over the `log_every` batches ending at `batch`. Epoch and
/// batch are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossReport {
    pub epoch: usize,
    pub batch: usize,
    pub loss: Precision,
}

impl fmt::Display for LossReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {:5}] loss: {:.3}", self.epoch, self.batch, self.loss)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainSummary {
    pub reports: Vec<LossReport>,
    pub batches: usize,
    /// Mean batch loss of every epoch.
    pub epoch_losses: Vec<Precision>,
}

impl TrainSummary {
    pub fn final_loss(&self) -> Option<Precision> {
        self.epoch_losses.last().copied()
    }
}

/// Runs `config.epochs` passes over `loader`: zero grads, forward,
/// cross-entropy, backward and an optimizer step per batch. Every
/// `config.log_every` batches the running loss average is handed to
/// `on_report` and the running sum restarts.
pub fn train<M, D, O>(
    model: &M,
    loader: &mut DataLoader<D>,
    optimizer: &mut O,
    config: &TrainConfig,
    mut on_report: impl FnMut(&LossReport),
) -> Result<TrainSummary>
where
    M: Module + ?Sized,
    D: Dataset,
    O: Optimizer,
{
    if config.log_every == 0 {
        return Err(TensorError::InvalidArgument("log_every must be positive".to_string()));
    }
    if loader.is_empty() {
        return Err(TensorError::InvalidArgument("cannot train on an empty dataset".to_string()));
    }

    model.set_training(true);
    let mut summary = TrainSummary::default();
    for epoch in 0..config.epochs {
        let mut running_loss = 0.0;
        let mut epoch_loss = 0.0;
        let mut batch_idx = 0;

        for batch in loader.iter() {
            let batch = batch?;
            optimizer.zero_grad();

            let outputs = model.forward(&batch.images)?;
            let loss = outputs.cross_entropy(&batch.labels)?;
            loss.backward()?;
            optimizer.step();

            let loss_val = loss.item()?;
            running_loss += loss_val;
            epoch_loss += loss_val;
            batch_idx += 1;

            if batch_idx % config.log_every == 0 {
                let report = LossReport {
                    epoch: epoch + 1,
                    batch: batch_idx,
                    loss: running_loss / config.log_every as Precision,
                };
                debug!("{report}");
                on_report(&report);
                summary.reports.push(report);
                running_loss = 0.0;
            }
        }

        summary.batches += batch_idx;
        let mean = epoch_loss / batch_idx.max(1) as Precision;
        summary.epoch_losses.push(mean);
        info!("epoch {}/{} done, mean batch loss {:.6}", epoch + 1, config.epochs, mean);
    }
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub correct: usize,
    pub total: usize,
    pub per_class_correct: Vec<usize>,
    pub per_class_total: Vec<usize>,
}

impl Evaluation {
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.total)
    }

    /// Whole percent of correct predictions, rounded down; 0 for an empty
    /// pass.
    pub fn percent_correct(&self) -> usize {
        match self.total {
            0 => 0,
            total => 100 * self.correct / total,
        }
    }

    /// `None` when the class never occurred.
    pub fn class_accuracy(&self, class: usize) -> Option<f64> {
        let total = *self.per_class_total.get(class)?;
        (total > 0).then(|| ratio(self.per_class_correct[class], total))
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Top-1 accuracy over one pass of `loader`, overall and per class. Runs
/// without recording the graph and leaves the model in evaluation mode.
pub fn evaluate<M, D>(model: &M, loader: &mut DataLoader<D>) -> Result<Evaluation>
where
    M: Module + ?Sized,
    D: Dataset,
{
    let classes = loader.dataset().classes().len();
    let mut evaluation = Evaluation {
        correct: 0,
        total: 0,
        per_class_correct: vec![0; classes],
        per_class_total: vec![0; classes],
    };

    model.set_training(false);
    no_grad(|| {
        for batch in loader.iter() {
            let batch = batch?;
            let predicted = model.forward(&batch.images)?.argmax_rows()?;
            let labels = batch.labels.class_indices(classes)?;
            for (guess, label) in predicted.into_iter().zip(labels) {
                evaluation.total += 1;
                evaluation.per_class_total[label] += 1;
                if guess == label {
                    evaluation.correct += 1;
                    evaluation.per_class_correct[label] += 1;
                }
            }
        }
        Ok::<_, TensorError>(())
    })?;

    info!(
        "evaluated {} images, accuracy {:.2}%",
        evaluation.total,
        100.0 * evaluation.accuracy()
    );
    Ok(evaluation)
}
