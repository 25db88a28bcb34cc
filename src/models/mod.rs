//! Model zoo. Networks are built by name with either fresh random weights
//! or weights restored from a safetensors checkpoint.

mod cnn;
mod resnet;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub use cnn::TutorialCnn;
pub use resnet::{BasicBlock, ResNet};

use crate::error::{Result, TensorError};
use crate::model::Model;

/// Where initial weights come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Weights {
    /// He-initialized, reproducible when a seed is given.
    Random { seed: Option<u64> },
    /// A checkpoint holding every parameter and buffer of the model.
    File(PathBuf),
}

impl Default for Weights {
    fn default() -> Self {
        Weights::Random { seed: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    ResNet18,
    TutorialCnn,
}

impl FromStr for ModelKind {
    type Err = TensorError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "resnet18" | "resnet-18" => Ok(ModelKind::ResNet18),
            "tutorial_cnn" | "cnn" | "net" => Ok(ModelKind::TutorialCnn),
            _ => Err(TensorError::UnknownModel(name.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::ResNet18 => write!(f, "resnet18"),
            ModelKind::TutorialCnn => write!(f, "tutorial_cnn"),
        }
    }
}

fn rng_for(weights: &Weights) -> StdRng {
    match weights {
        Weights::Random { seed: Some(seed) } => StdRng::seed_from_u64(*seed),
        _ => StdRng::from_entropy(),
    }
}

fn restore<M: Model>(model: M, weights: &Weights) -> Result<M> {
    if let Weights::File(path) = weights {
        model.load_parameters(path)?;
        info!("{} weights restored from {}", model.name(), path.display());
    }
    Ok(model)
}

/// ResNet-18 as a concrete type, for callers that need to modify the head.
pub fn resnet18(weights: &Weights, num_classes: usize) -> Result<ResNet> {
    restore(ResNet::resnet18_with_rng(num_classes, &mut rng_for(weights)), weights)
}

pub fn tutorial_cnn(weights: &Weights, num_classes: usize) -> Result<TutorialCnn> {
    restore(TutorialCnn::with_rng(num_classes, &mut rng_for(weights)), weights)
}

/// Builds a model by name. Unknown names yield [`TensorError::UnknownModel`].
pub fn build(name: &str, weights: &Weights, num_classes: usize) -> Result<Box<dyn Model>> {
    let model: Box<dyn Model> = match name.parse::<ModelKind>()? {
        ModelKind::ResNet18 => Box::new(resnet18(weights, num_classes)?),
        ModelKind::TutorialCnn => Box::new(tutorial_cnn(weights, num_classes)?),
    };
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_rejected() {
        let err = build("vgg16", &Weights::default(), 10).err();
        assert!(matches!(err, Some(TensorError::UnknownModel(name)) if name == "vgg16"));
    }

    #[test]
    fn seeded_builds_agree() {
        let seed = Weights::Random { seed: Some(3) };
        let a = build("tutorial_cnn", &seed, 10).unwrap();
        let b = build("net", &seed, 10).unwrap();
        assert_eq!(a.name(), "tutorial_cnn");
        assert_eq!(a.parameters()[0].data(), b.parameters()[0].data());
    }

    #[test]
    fn model_kind_display_parses_back() {
        for kind in [ModelKind::ResNet18, ModelKind::TutorialCnn] {
            assert_eq!(kind.to_string().parse::<ModelKind>().unwrap(), kind);
        }
    }
}
