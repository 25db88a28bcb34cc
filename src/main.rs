use clap::Parser;
use env_logger::Env;

use tensor_micrograd::cli::Cli;
use tensor_micrograd::{tutorial, TensorError};

fn main() -> Result<(), TensorError> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    tutorial::run(&cli)
}
