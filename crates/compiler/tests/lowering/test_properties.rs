//! Property tests for the shape helpers the lowerings share

use onnx_xla_compiler::ir::broadcast_shapes;
use onnx_xla_compiler::utils::{element_count, resolve_reshape, unsqueeze_dims};
use onnx_xla_compiler::window::same_total_padding;
use proptest::prelude::*;

fn dims(max_rank: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..6, 1..=max_rank)
}

proptest! {
    #[test]
    fn test_same_padding_keeps_ceil_output(
        input in 1i64..64,
        kernel in 1i64..8,
        stride in 1i64..5,
    ) {
        let total = same_total_padding(input, kernel, stride, 1);
        prop_assert!(total >= 0);
        let output = (input + total - kernel) / stride + 1;
        prop_assert_eq!(output, (input + stride - 1) / stride);
    }

    #[test]
    fn test_reshape_infers_the_missing_dim(shape in dims(4), split in 0usize..4) {
        let count = element_count(&shape).unwrap();
        let split = split.min(shape.len() - 1);
        let mut requested: Vec<i64> = shape[..split].to_vec();
        requested.push(-1);

        let resolved = resolve_reshape(&shape, &requested).unwrap();
        prop_assert_eq!(resolved.len(), split + 1);
        prop_assert_eq!(element_count(&resolved).unwrap(), count);
        prop_assert_eq!(resolved[split], shape[split..].iter().product::<i64>());
    }

    #[test]
    fn test_reshape_zero_copies_input_dims(shape in dims(4)) {
        let requested = vec![0; shape.len()];
        prop_assert_eq!(resolve_reshape(&shape, &requested).unwrap(), shape);
    }

    #[test]
    fn test_unsqueeze_inserts_unit_axes(shape in dims(3), axis in 0i64..4) {
        let axis = axis.min(shape.len() as i64);
        let out = unsqueeze_dims(&shape, &[axis], 1).unwrap();
        prop_assert_eq!(out.len(), shape.len() + 1);
        prop_assert_eq!(out[axis as usize], 1);

        let mut removed = out.clone();
        removed.remove(axis as usize);
        prop_assert_eq!(removed, shape);
    }

    #[test]
    fn test_broadcast_against_ones_is_identity(shape in dims(4), extra in 0usize..3) {
        let ones = vec![1i64; shape.len() + extra];
        let out = broadcast_shapes(&shape, &ones).unwrap();
        prop_assert_eq!(out.len(), shape.len() + extra);
        prop_assert_eq!(&out[extra..], &shape[..]);
    }

    #[test]
    fn test_broadcast_is_symmetric(a in dims(4), b in dims(4)) {
        let ab = broadcast_shapes(&a, &b);
        let ba = broadcast_shapes(&b, &a);
        prop_assert_eq!(ab.is_ok(), ba.is_ok());
        if let (Ok(ab), Ok(ba)) = (ab, ba) {
            prop_assert_eq!(ab, ba);
        }
    }
}
