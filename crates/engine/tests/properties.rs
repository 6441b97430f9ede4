//! Property tests for window geometry and broadcasting

use onnx_xla_engine::{
    make_padding, ComputationBuilder, Literal, Padding, PrimitiveType, Shape, WindowDimension, XlaBuilder,
};
use proptest::prelude::*;

fn window(size: i64, stride: i64, padding: (i64, i64)) -> WindowDimension {
    WindowDimension {
        size,
        stride,
        padding_low: padding.0,
        padding_high: padding.1,
        window_dilation: 1,
        base_dilation: 1,
    }
}

proptest! {
    #[test]
    fn test_same_padding_output_is_ceil_of_input_over_stride(
        input in 1i64..64,
        size in 1i64..8,
        stride in 1i64..5,
    ) {
        let padding = make_padding(&[input], &[size], &[stride], Padding::Same)[0];
        prop_assert!(padding.0 >= 0 && padding.1 >= 0);
        prop_assert!(padding.1 - padding.0 <= 1 && padding.1 >= padding.0);
        let out = window(size, stride, padding).output_size(input);
        prop_assert_eq!(out, (input + stride - 1) / stride);
    }

    #[test]
    fn test_valid_padding_output_fits_inside_input(
        input in 1i64..64,
        size in 1i64..8,
        stride in 1i64..5,
    ) {
        let padding = make_padding(&[input], &[size], &[stride], Padding::Valid)[0];
        prop_assert_eq!(padding, (0, 0));
        let out = window(size, stride, padding).output_size(input);
        if out > 0 {
            prop_assert!((out - 1) * stride + size <= input);
        } else {
            prop_assert!(size > input);
        }
    }

    #[test]
    fn test_rank1_add_broadcasts_along_mapped_axis(
        rows in 1i64..5,
        cols in 1i64..5,
        axis in 0usize..2,
    ) {
        let dims = vec![rows, cols];
        let len = dims[axis];
        let mut b = XlaBuilder::new("bcast");
        let x = b.parameter(0, &Shape::array(PrimitiveType::S64, dims.clone()), "x");
        let y = b.constant_literal(&Literal::vec1(&(0..len).collect::<Vec<i64>>()));
        b.add(x, y, &[axis as i64]);
        let computation = b.build().unwrap();

        let zeros = Literal::from_vec(dims.clone(), vec![0i64; (rows * cols) as usize]).unwrap();
        let out = onnx_xla_engine::evaluate(&computation, &[&zeros]).unwrap().to_vec::<i64>().unwrap();
        for r in 0..rows {
            for c in 0..cols {
                let expected = if axis == 0 { r } else { c };
                prop_assert_eq!(out[(r * cols + c) as usize], expected);
            }
        }
    }
}
