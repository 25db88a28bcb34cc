//! Command-line interface.
//!
//! ```bash
//! tensor-micrograd autograd --model resnet18 --seed 0
//! tensor-micrograd autograd --weights resnet18.safetensors
//! tensor-micrograd cifar --data-root ./data --epochs 2 --report report.json
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::tensor::Precision;

/// Autograd walkthrough and CIFAR-10 training tutorial on a small
/// reverse-mode tensor engine
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "tensor-micrograd")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// One forward/backward/SGD step on a classifier, plus the autograd demos
    Autograd(AutogradArgs),

    /// Train the small CNN on CIFAR-10 and report test accuracy
    Cifar(CifarArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct AutogradArgs {
    /// Model name: resnet18 or tutorial_cnn
    #[arg(short, long, default_value = "resnet18")]
    pub model: String,

    /// safetensors checkpoint with pretrained weights; random init when absent
    #[arg(short, long, value_name = "PATH")]
    pub weights: Option<PathBuf>,

    /// Seed for weight init and the random input
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Side of the random square input image (64 for resnet18, 32 for tutorial_cnn)
    #[arg(long)]
    pub image_size: Option<usize>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CifarArgs {
    /// Directory containing cifar-10-batches-bin
    #[arg(long, default_value = "./data", value_name = "DIR")]
    pub data_root: PathBuf,

    #[arg(short, long, default_value_t = 2)]
    pub epochs: usize,

    #[arg(short, long, default_value_t = 4)]
    pub batch_size: usize,

    /// Loader threads; 0 loads on the training thread
    #[arg(long, default_value_t = 2)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 0.001)]
    pub lr: Precision,

    #[arg(long, default_value_t = 0.9)]
    pub momentum: Precision,

    /// Print the running loss every N mini-batches
    #[arg(long, default_value_t = 2000)]
    pub log_every: usize,

    /// Where the trained weights are written
    #[arg(long, default_value = "./cifar_net.safetensors", value_name = "PATH")]
    pub save: PathBuf,

    /// Skip the test-set evaluation
    #[arg(long)]
    pub skip_eval: bool,

    /// Write losses and accuracies as JSON
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Seed for weight init and shuffling
    #[arg(long)]
    pub seed: Option<u64>,
}
