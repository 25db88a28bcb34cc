#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::error::TensorError;
    use crate::tensor::{is_grad_enabled, no_grad, Precision};
    use crate::{Tensor, TensorOp};

    fn leaf(data: Vec<Precision>, shape: Vec<usize>) -> Tensor {
        let t = Tensor::from_vec(data, shape).unwrap();
        t.set_requires_grad(true);
        t
    }

    #[test]
    fn test_index_1d_2d_tensor() {
        let shape = [3, 4];
        assert_eq!(Tensor::index_1d(&[0, 0], &shape), 0);
        assert_eq!(Tensor::index_1d(&[0, 3], &shape), 3);
        assert_eq!(Tensor::index_1d(&[2, 0], &shape), 8);
        assert_eq!(Tensor::index_1d(&[2, 3], &shape), 11);
        assert_eq!(Tensor::index_1d(&[1, 2], &shape), 6);
    }

    #[test]
    fn test_index_1d_to_nd_roundtrip() {
        let shape = [2, 3, 4];
        for orig in [[0, 0, 0], [0, 1, 2], [1, 0, 3], [1, 2, 1], [1, 2, 3]] {
            let flat = Tensor::index_1d(&orig, &shape);
            assert_eq!(Tensor::index_1d_to_nd(flat, &shape), orig.to_vec());
        }
    }

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(Tensor::broadcast_shapes(&[3, 1], &[1, 4]).unwrap(), vec![3, 4]);
        assert_eq!(Tensor::broadcast_shapes(&[2, 3], &[3]).unwrap(), vec![2, 3]);
        assert_eq!(Tensor::broadcast_shapes(&[1], &[5, 1, 2]).unwrap(), vec![5, 1, 2]);
        assert!(matches!(
            Tensor::broadcast_shapes(&[2, 3], &[4]),
            Err(TensorError::Broadcast { .. })
        ));
    }

    #[test]
    fn test_tensor_equality_and_hash() {
        let t1 = Tensor::zeros(vec![2, 2]);
        let t2 = Tensor::zeros(vec![2, 2]);
        let t1_clone = t1.clone();

        // identity, not value, equality
        assert_eq!(t1, t1_clone);
        assert_ne!(t1, t2);

        let mut set = HashSet::new();
        assert!(set.insert(t1.clone()));
        assert!(!set.insert(t1_clone));
        assert!(set.insert(t2));
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Tensor::from_vec(vec![1.0; 5], vec![2, 3]).is_err());
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        assert_eq!(t.numel(), 6);
        assert!(t.is_leaf());
        assert_eq!(t.op(), TensorOp::None);
        assert_eq!(t.grad(), None);
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a = Tensor::randn_with_rng(vec![4, 4], &mut StdRng::seed_from_u64(1));
        let b = Tensor::randn_with_rng(vec![4, 4], &mut StdRng::seed_from_u64(1));
        assert_eq!(a.data(), b.data());
        let u = Tensor::rand_uniform(vec![1000], -2.0, 3.0).unwrap();
        assert!(u.data().iter().all(|v| (-2.0..3.0).contains(v)));
        let k = Tensor::kaiming_he_init(vec![16, 3, 3, 3]);
        assert!(k.requires_grad());
    }

    #[test]
    fn test_rand_uniform_degenerate_ranges() {
        let filled = Tensor::rand_uniform(vec![3], 1.0, 1.0).unwrap();
        assert_eq!(filled.data(), vec![1.0; 3]);
        assert!(Tensor::rand_uniform(vec![3], 2.0, 1.0).is_err());
        assert!(Tensor::rand_uniform(vec![3], 0.0, Precision::INFINITY).is_err());
    }

    #[test]
    fn test_topological_sort_single_node() {
        let t = Tensor::zeros(vec![2, 2]);
        let order = t.build_topological_graph();
        assert_eq!(order.len(), 1);
        assert_eq!(order[0], t);
    }

    #[test]
    fn test_topological_sort_puts_parents_first() {
        let a = leaf(vec![1.0, 2.0], vec![2]);
        let b = leaf(vec![3.0, 4.0], vec![2]);
        let c = &a * &b;
        let d = (&c + &a).sum();
        let order = d.build_topological_graph();
        let position = |t: &Tensor| order.iter().position(|o| o == t).unwrap();
        assert_eq!(order.len(), 5);
        assert!(position(&a) < position(&c));
        assert!(position(&b) < position(&c));
        assert_eq!(position(&d), 4);
    }

    #[test]
    fn test_shared_subexpression_gradient() {
        // d/da sum(a*b + a) = b + 1
        let a = leaf(vec![1.0, 2.0], vec![2]);
        let b = leaf(vec![3.0, 4.0], vec![2]);
        (&(&a * &b) + &a).sum().backward().unwrap();
        assert_eq!(a.grad().unwrap(), vec![4.0, 5.0]);
        assert_eq!(b.grad().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_gradients_accumulate_until_zeroed() {
        let a = leaf(vec![1.0, -2.0], vec![2]);
        for _ in 0..2 {
            a.powf(2.0).sum().backward().unwrap();
        }
        let grad = a.grad().unwrap();
        assert_abs_diff_eq!(grad[0], 4.0, epsilon = 1e-5);
        assert_abs_diff_eq!(grad[1], -8.0, epsilon = 1e-5);
        a.zero_grad();
        assert_eq!(a.grad().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_constants_receive_no_gradient() {
        let a = leaf(vec![1.0, 2.0], vec![2]);
        let c = Tensor::from_vec(vec![5.0, 5.0], vec![2]).unwrap();
        (&a * &c).sum().backward().unwrap();
        assert_eq!(a.grad().unwrap(), vec![5.0, 5.0]);
        assert_eq!(c.grad(), None);
        assert_eq!(c.with_data(|d| d.to_vec()), vec![5.0, 5.0]);
    }

    #[test]
    fn test_no_grad_disables_recording_and_restores() {
        let a = leaf(vec![1.0], vec![1]);
        let inside = no_grad(|| {
            assert!(!is_grad_enabled());
            &a * &a
        });
        assert!(is_grad_enabled());
        assert!(!inside.requires_grad());
        assert!(inside.is_leaf());
        assert!(inside.backward().is_err());

        // nesting keeps the outer mode
        no_grad(|| {
            no_grad(|| ());
            assert!(!is_grad_enabled());
        });
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_backward_requires_scalar_or_seed() {
        let a = leaf(vec![1.0, 2.0, 3.0], vec![3]);
        let doubled = a.scale(2.0);
        assert!(matches!(doubled.backward(), Err(TensorError::NonScalarBackward(shape)) if shape == vec![3]));
        assert!(doubled.backward_with_grad(&Tensor::ones(vec![2])).is_err());

        doubled
            .backward_with_grad(&Tensor::from_vec(vec![1.0, 0.5, 0.0], vec![3]).unwrap())
            .unwrap();
        assert_eq!(a.grad().unwrap(), vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_detach_cuts_history() {
        let a = leaf(vec![3.0], vec![1]);
        let b = a.scale(2.0);
        let d = b.detach();
        assert!(d.is_leaf());
        assert!(!d.requires_grad());
        assert_eq!(d.data(), vec![6.0]);
        assert!(!b.is_leaf());
    }

    #[test]
    fn test_dropping_loss_frees_graph() {
        let a = leaf(vec![1.0, 2.0], vec![2]);
        let loss = a.scale(3.0).sum();
        let weak = std::rc::Rc::downgrade(&loss.0);
        loss.backward().unwrap();
        drop(loss);
        assert!(weak.upgrade().is_none());
    }

    proptest! {
        #[test]
        fn prop_index_roundtrip(shape in prop::collection::vec(1usize..5, 1..5), seed in any::<usize>()) {
            let total: usize = shape.iter().product();
            let flat = seed % total;
            let nd = Tensor::index_1d_to_nd(flat, &shape);
            prop_assert_eq!(Tensor::index_1d(&nd, &shape), flat);
            prop_assert!(nd.iter().zip(&shape).all(|(i, s)| i < s));
        }

        #[test]
        fn prop_broadcast_with_ones_is_identity(shape in prop::collection::vec(1usize..6, 1..4)) {
            let ones = vec![1; shape.len()];
            prop_assert_eq!(Tensor::broadcast_shapes(&shape, &ones).unwrap(), shape.clone());
            prop_assert_eq!(Tensor::broadcast_shapes(&ones, &shape).unwrap(), shape.clone());
            prop_assert_eq!(Tensor::broadcast_shapes(&shape, &shape[1..]).unwrap(), shape);
        }
    }
}
