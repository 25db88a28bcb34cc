//! Datasets, preprocessing and batching.

mod cifar;
mod image_folder;
mod loader;
pub mod transforms;

use rand::Rng;

pub use cifar::Cifar10;
pub use image_folder::ImageFolder;
pub use loader::{Batch, Batches, DataLoader};
pub use transforms::{Compose, ImageTensor, Normalize, ToTensor, Transform};

use crate::error::Result;

/// One preprocessed image and its class index.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: ImageTensor,
    pub label: usize,
}

/// Random access to labelled samples. Implementations are shared with
/// loader worker threads.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<Sample>;

    /// Class names indexed by label.
    fn classes(&self) -> &[String];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-place Fisher-Yates shuffle.
pub fn shuffle<T>(items: &mut [T], rng: &mut impl Rng) {
    let mut i = items.len();
    while i > 1 {
        i -= 1;
        let idx = rng.gen_range(0..=i);
        items.swap(i, idx);
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn shuffle_is_a_permutation() {
        let mut items: Vec<usize> = (0..100).collect();
        shuffle(&mut items, &mut StdRng::seed_from_u64(11));
        assert_ne!(items, (0..100).collect::<Vec<_>>());
        items.sort_unstable();
        assert_eq!(items, (0..100).collect::<Vec<_>>());
    }
}
