use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{shuffle, Dataset, Sample};
use crate::error::{Result, TensorError};
use crate::tensor::Precision;
use crate::Tensor;

/// Images `[N, C, H, W]` and labels `[N]` holding class indices.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.numel()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Groups samples into batches, optionally in a fresh random order every
/// pass. With `num_workers > 0` the samples of a batch are loaded on a
/// dedicated rayon pool; the batch tensors are always built on the calling
/// thread.
pub struct DataLoader<D: Dataset> {
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    order: Vec<usize>,
    current_element: usize,
    rng: StdRng,
    pool: Option<ThreadPool>,
}

impl<D: Dataset> DataLoader<D> {
    pub fn new(dataset: D, batch_size: usize, shuffle: bool, num_workers: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TensorError::InvalidArgument("batch_size must be positive".to_string()));
        }
        let pool = match num_workers {
            0 => None,
            n => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("loader-{i}"))
                    .build()
                    .map_err(|e| TensorError::InvalidArgument(format!("cannot start {n} loader workers: {e}")))?,
            ),
        };
        let mut loader = DataLoader {
            order: (0..dataset.len()).collect(),
            dataset,
            batch_size,
            shuffle,
            current_element: 0,
            rng: StdRng::from_entropy(),
            pool,
        };
        loader.reset_epoch();
        Ok(loader)
    }

    /// Reseeds the shuffling order, making every following pass
    /// reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.order = (0..self.dataset.len()).collect();
        self.reset_epoch();
        self
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches per pass, counting a short final batch.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Rewinds to the first batch, reshuffling when enabled.
    pub fn reset_epoch(&mut self) {
        self.current_element = 0;
        if self.shuffle {
            shuffle(&mut self.order, &mut self.rng);
        }
    }

    pub fn has_batches(&self) -> bool {
        self.current_element < self.order.len()
    }

    pub fn next_batch(&mut self) -> Result<Batch> {
        if !self.has_batches() {
            return Err(TensorError::InvalidArgument("no batches left in this pass".to_string()));
        }
        let start = self.current_element;
        let end = (start + self.batch_size).min(self.order.len());
        // a failed batch is skipped, not retried
        self.current_element = end;
        let indices = &self.order[start..end];
        let dataset = &self.dataset;

        let samples: Vec<Sample> = match self.pool {
            Some(ref pool) => pool.install(|| indices.par_iter().map(|&i| dataset.get(i)).collect::<Result<_>>())?,
            None => indices.iter().map(|&i| dataset.get(i)).collect::<Result<_>>()?,
        };
        debug!("batch of {} samples, {} left", samples.len(), self.order.len() - end);
        collate(samples)
    }

    /// Starts a new pass and yields its batches.
    pub fn iter(&mut self) -> Batches<'_, D> {
        self.reset_epoch();
        Batches { loader: self }
    }
}

pub struct Batches<'a, D: Dataset> {
    loader: &'a mut DataLoader<D>,
}

impl<D: Dataset> Iterator for Batches<'_, D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.loader.has_batches().then(|| self.loader.next_batch())
    }
}

fn collate(samples: Vec<Sample>) -> Result<Batch> {
    let Some(first) = samples.first() else {
        return Err(TensorError::InvalidArgument("cannot collate an empty batch".to_string()));
    };
    let [channels, height, width] = first.image.shape();
    let mut images: Vec<Precision> = Vec::with_capacity(samples.len() * channels * height * width);
    let mut labels: Vec<Precision> = Vec::with_capacity(samples.len());
    for sample in &samples {
        if sample.image.shape() != [channels, height, width] {
            return Err(TensorError::ShapeMismatch {
                op: "collate",
                expected: vec![channels, height, width],
                got: sample.image.shape().to_vec(),
            });
        }
        images.extend_from_slice(&sample.image.data);
        labels.push(sample.label as Precision);
    }
    let n = samples.len();
    Ok(Batch {
        images: Tensor::from_vec(images, vec![n, channels, height, width])?,
        labels: Tensor::from_vec(labels, vec![n])?,
    })
}
