//! The two tutorials behind the command-line subcommands. Progress meant
//! for the reader goes to stdout; diagnostics go through `log`.

use std::fs::File;
use std::io::BufWriter;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::cli::{AutogradArgs, CifarArgs, Cli, Command};
use crate::data::{transforms, Cifar10, DataLoader, Dataset};
use crate::error::Result;
use crate::model::{Model, Module};
use crate::models::{self, ModelKind, Weights};
use crate::optim::Sgd;
use crate::train::{evaluate, train, Evaluation, TrainConfig, TrainSummary};
use crate::walkthrough;
use crate::Tensor;

pub fn run(cli: &Cli) -> Result<()> {
    match cli.command {
        Command::Autograd(ref args) => run_autograd(args),
        Command::Cifar(ref args) => run_cifar(args),
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

pub fn run_autograd(args: &AutogradArgs) -> Result<()> {
    let kind: ModelKind = args.model.parse()?;
    let (default_size, num_classes) = match kind {
        ModelKind::ResNet18 => (64, 1000),
        ModelKind::TutorialCnn => (32, 10),
    };
    let size = args.image_size.unwrap_or(default_size);
    let weights = match args.weights {
        Some(ref path) => Weights::File(path.clone()),
        None => Weights::Random { seed: args.seed },
    };

    let model = models::build(&args.model, &weights, num_classes)?;
    let mut rng = rng_from(args.seed);
    let data = Tensor::rand_with_rng(vec![1, 3, size, size], &mut rng);
    let labels = Tensor::rand_with_rng(vec![1, num_classes], &mut rng);
    println!(
        "{kind}: {} parameters, input {:?}, labels {:?}",
        model.num_parameters(),
        data.shape(),
        labels.shape()
    );

    let mut optimizer = Sgd::new(model.parameters(), 1e-2, 0.9);
    let step = walkthrough::single_step(model.as_ref(), &data, &labels, &mut optimizer)?;
    println!("loss = (prediction - labels).sum() = {:.4}", step.loss);
    println!("gradient norm {:.4}, parameter change after one step {:.6}", step.grad_norm, step.param_delta);

    let external = walkthrough::external_gradient_demo()?;
    println!("Q = 3a^3 - b^2 = {:?}", external.q);
    println!("9*a^2 == a.grad: {:?} == {:?}", external.expected_a_grad, external.a_grad);
    println!("-2*b == b.grad: {:?} == {:?}", external.expected_b_grad, external.b_grad);

    if kind == ModelKind::ResNet18 {
        let mut resnet = models::resnet18(&weights, num_classes)?;
        let finetune = walkthrough::frozen_finetune_demo(&mut resnet, &data, 10)?;
        println!(
            "frozen backbone: {} parameters frozen, training only {:?} (loss {:.4})",
            finetune.frozen, finetune.trainable, finetune.step.loss
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CifarReport<'a> {
    training: &'a TrainSummary,
    evaluation: Option<&'a Evaluation>,
    classes: &'a [String],
}

pub fn run_cifar(args: &CifarArgs) -> Result<()> {
    let trainset = Cifar10::new(&args.data_root, true, transforms::cifar_default()?)?;
    let mut trainloader = DataLoader::new(trainset, args.batch_size, true, args.num_workers)?;
    if let Some(seed) = args.seed {
        trainloader = trainloader.with_seed(seed);
    }
    let classes = trainloader.dataset().classes().to_vec();

    let net = models::tutorial_cnn(&Weights::Random { seed: args.seed }, classes.len())?;
    let config = TrainConfig {
        epochs: args.epochs,
        learning_rate: args.lr,
        momentum: args.momentum,
        log_every: args.log_every,
        ..TrainConfig::default()
    };
    let mut optimizer = config.optimizer(net.parameters());
    let summary = train(&net, &mut trainloader, &mut optimizer, &config, |report| println!("{report}"))?;
    println!("Finished Training");

    net.save_parameters(&args.save, summary.final_loss())?;

    let evaluation = if args.skip_eval {
        None
    } else {
        let testset = Cifar10::new(&args.data_root, false, transforms::cifar_default()?)?;
        let mut testloader = DataLoader::new(testset, args.batch_size, false, args.num_workers)?;
        let evaluation = evaluate(&net, &mut testloader)?;
        println!(
            "Accuracy of the network on the {} test images: {} %",
            evaluation.total,
            evaluation.percent_correct()
        );
        for (class, name) in classes.iter().enumerate() {
            if let Some(accuracy) = evaluation.class_accuracy(class) {
                println!("Accuracy for class: {name:5} is {:.1} %", 100.0 * accuracy);
            }
        }
        Some(evaluation)
    };

    if let Some(ref path) = args.report {
        let report = CifarReport {
            training: &summary,
            evaluation: evaluation.as_ref(),
            classes: &classes,
        };
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &report)?;
        info!("report written to {}", path.display());
    }
    Ok(())
}
