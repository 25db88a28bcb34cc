use rand::rngs::StdRng;
use rand::SeedableRng;
use tensor_micrograd::gradcheck::GradientChecker;
use tensor_micrograd::ops::BatchNormState;
use tensor_micrograd::{Precision, Tensor};

fn leaf(data: Vec<Precision>, shape: Vec<usize>) -> Tensor {
    let t = Tensor::from_vec(data, shape).unwrap();
    t.set_requires_grad(true);
    t
}

fn random_leaf(shape: Vec<usize>, seed: u64) -> Tensor {
    let t = Tensor::randn_with_rng(shape, &mut StdRng::seed_from_u64(seed));
    t.set_requires_grad(true);
    t
}

/// Distinct values at least 0.1 apart, so no max-pool window has a tie
/// within the probing step.
fn spread(n: usize) -> Vec<Precision> {
    (0..n).map(|i| ((i * 7) % n) as Precision * 0.1 - 1.0).collect()
}

fn assert_passes(report: tensor_micrograd::gradcheck::GradCheckReport) {
    assert!(report.checked > 0);
    assert!(report.passed(), "mismatches: {:?}", report.mismatches);
}

#[test]
fn elementwise_with_broadcasting() {
    let a = random_leaf(vec![2, 3], 1);
    let b = leaf(vec![1.5, 2.0, 2.5], vec![3]);
    let report = GradientChecker::default()
        .check_fn(&[a, b], |x| {
            let quotient = x[0].div(&x[1])?;
            let product = x[0].mul(&x[1])?;
            Ok(quotient.add(&product)?.sub(&x[1])?.powf(2.0).mean())
        })
        .unwrap();
    assert_passes(report);
}

#[test]
fn unary_functions() {
    let a = leaf(vec![0.5, 1.2, 2.0, 0.8], vec![4]);
    let report = GradientChecker::default()
        .check_fn(&[a], |x| {
            let t = &x[0];
            Ok(t.ln().add(&t.exp().scale(0.5))?.add(&t.neg().add_scalar(3.0).relu())?.sum())
        })
        .unwrap();
    assert_passes(report);
}

#[test]
fn matmul_plain_and_batched() {
    let a = random_leaf(vec![2, 3, 4], 2);
    let w = random_leaf(vec![4, 5], 3);
    let m = random_leaf(vec![5, 3], 4);
    let report = GradientChecker::default()
        .check_fn(&[a, w, m], |x| {
            let batched = x[0].matmul(&x[1])?.reshape(vec![6, 5])?;
            Ok(batched.matmul(&x[2])?.powf(2.0).sum().scale(0.1))
        })
        .unwrap();
    assert_passes(report);
}

#[test]
fn conv2d_input_weight_and_bias() {
    let input = random_leaf(vec![2, 2, 5, 5], 5);
    let weight = random_leaf(vec![3, 2, 3, 3], 6);
    let bias = leaf(vec![0.1, -0.2, 0.3], vec![3]);
    let report = GradientChecker::default()
        .check_fn(&[input, weight, bias], |x| {
            let out = x[0].conv2d(&x[1], Some(&x[2]), 2, 1)?;
            Ok(out.powf(2.0).mean())
        })
        .unwrap();
    assert_passes(report);
}

#[test]
fn max_pool_and_global_average() {
    let input = leaf(spread(2 * 16), vec![1, 2, 4, 4]);
    let report = GradientChecker::default()
        .check_fn(&[input], |x| {
            let pooled = x[0].max_pool2d(2, 2, 0)?;
            let padded = x[0].max_pool2d(3, 2, 1)?;
            Ok(pooled.powf(2.0).sum().add(&padded.avg_pool2d_global()?.flatten(1)?.sum())?)
        })
        .unwrap();
    assert_passes(report);
}

#[test]
fn batch_norm_in_training_mode() {
    let input = random_leaf(vec![3, 2, 2, 2], 7);
    let gamma = leaf(vec![1.2, 0.7], vec![2]);
    let beta = leaf(vec![0.1, -0.3], vec![2]);
    let weights = Tensor::randn_with_rng(vec![3, 2, 2, 2], &mut StdRng::seed_from_u64(8));
    let running_mean = Tensor::zeros(vec![2]);
    let running_var = Tensor::ones(vec![2]);
    let report = GradientChecker::new(1e-2, 2e-2)
        .check_fn(&[input, gamma, beta], |x| {
            let state = BatchNormState {
                running_mean: &running_mean,
                running_var: &running_var,
                momentum: 0.1,
                eps: 1e-5,
                training: true,
            };
            Ok(x[0].batch_norm2d(&x[1], &x[2], &state)?.mul(&weights)?.sum())
        })
        .unwrap();
    assert_passes(report);
}

#[test]
fn cross_entropy_over_logits() {
    let logits = random_leaf(vec![4, 5], 9);
    let labels = Tensor::from_vec(vec![0.0, 4.0, 2.0, 2.0], vec![4]).unwrap();
    let report = GradientChecker::default()
        .check_fn(&[logits], |x| x[0].cross_entropy(&labels))
        .unwrap();
    assert_passes(report);
}
