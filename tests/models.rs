use rand::rngs::StdRng;
use rand::SeedableRng;
use tensor_micrograd::models::{self, ResNet, TutorialCnn, Weights};
use tensor_micrograd::{no_grad, Model, Module, Tensor, TensorError};

#[test]
fn tutorial_cnn_classifies_cifar_sized_batches() {
    let net = TutorialCnn::with_rng(10, &mut StdRng::seed_from_u64(0));
    let images = Tensor::randn(vec![3, 3, 32, 32]);
    let out = net.forward(&images).unwrap();
    assert_eq!(out.shape(), vec![3, 10]);
    assert_eq!(out.argmax_rows().unwrap().len(), 3);
}

#[test]
fn resnet18_matches_reference_size_and_output() {
    let net = ResNet::resnet18_with_rng(1000, &mut StdRng::seed_from_u64(0));
    assert_eq!(net.num_parameters(), 11_689_512);
    assert_eq!(net.named_parameters().len(), 62);

    let out = net.forward(&Tensor::rand(vec![1, 3, 64, 64])).unwrap();
    assert_eq!(out.shape(), vec![1, 1000]);
}

#[test]
fn resnet_eval_mode_is_deterministic() {
    let net = ResNet::resnet18_with_rng(10, &mut StdRng::seed_from_u64(1));
    net.set_training(false);
    let input = Tensor::rand(vec![1, 3, 32, 32]);
    let (first, second) = no_grad(|| (net.forward(&input).unwrap(), net.forward(&input).unwrap()));
    assert_eq!(first.data(), second.data());
    assert!(!first.requires_grad());
}

#[test]
fn batch_norm_running_stats_move_only_in_training() {
    let net = ResNet::resnet18_with_rng(10, &mut StdRng::seed_from_u64(2));
    let running_mean = |net: &ResNet| {
        net.named_buffers()
            .into_iter()
            .find(|(name, _)| name == "bn1.running_mean")
            .map(|(_, t)| t.data())
            .unwrap()
    };
    let input = Tensor::rand(vec![2, 3, 32, 32]);

    net.set_training(false);
    net.forward(&input).unwrap();
    assert!(running_mean(&net).iter().all(|v| *v == 0.0));

    net.set_training(true);
    net.forward(&input).unwrap();
    assert!(running_mean(&net).iter().any(|v| *v != 0.0));
}

#[test]
fn checkpoint_round_trip_through_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.safetensors");

    let trained = models::build("tutorial_cnn", &Weights::Random { seed: Some(4) }, 10).unwrap();
    trained.save_parameters(&path, Some(0.5)).unwrap();

    let restored = models::build("tutorial_cnn", &Weights::File(path.clone()), 10).unwrap();
    for ((name, a), (_, b)) in trained.named_parameters().iter().zip(restored.named_parameters()) {
        assert_eq!(a.data(), b.data(), "{name} differs");
    }
    assert_eq!(
        tensor_micrograd::checkpoint::read_metadata(&path).unwrap().get("loss").map(String::as_str),
        Some("0.5")
    );
}

#[test]
fn checkpoint_for_another_architecture_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.safetensors");
    TutorialCnn::new(10).save_parameters(&path, None).unwrap();

    // same layer names, different head width
    let err = models::build("tutorial_cnn", &Weights::File(path.clone()), 5).err();
    assert!(matches!(err, Some(TensorError::ShapeMismatch { .. })));

    // conv1.weight exists in both, with different kernels
    let err = models::resnet18(&Weights::File(path), 10).err();
    assert!(matches!(err, Some(TensorError::ShapeMismatch { op: "load_state", .. })));
}
