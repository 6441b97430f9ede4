use super::{elementwise::apply_binary, evaluate, for_each_index, try_for_each_index};
use crate::computation::XlaComputation;
use crate::error::{EngineError, Result};
use crate::literal::{Literal, LiteralData, NativeType};
use crate::map_literal_data;
use crate::op::{BinaryOp, ConvolutionDimensionNumbers, WindowDimension};
use crate::shape::{element_count, strides};

/// Position in the operand read by window element `k` of output position
/// `out`, or `None` when it lands in padding or a base-dilation hole.
fn input_position(dim: &WindowDimension, out: i64, k: i64, input_size: i64) -> Option<i64> {
    let dilated = out * dim.stride - dim.padding_low + k * dim.window_dilation;
    if dilated < 0 {
        return None;
    }
    let base = dim.base_dilation.max(1);
    if dilated % base != 0 {
        return None;
    }
    let position = dilated / base;
    (position < input_size).then_some(position)
}

fn convolution_typed<T: NativeType>(
    lhs: &[T],
    lhs_dims: &[i64],
    rhs: &Literal,
    window: &[WindowDimension],
    dnums: &ConvolutionDimensionNumbers,
    output_dims: &[i64],
) -> Result<LiteralData> {
    let kernel = rhs.as_slice::<T>()?;
    let kernel_dims = rhs.dims();
    let lhs_strides = strides(lhs_dims);
    let kernel_strides = strides(kernel_dims);
    let input_features = lhs_dims[dnums.input_feature_dimension];
    let kernel_spatial: Vec<i64> = dnums.kernel_spatial_dimensions.iter().map(|&d| kernel_dims[d]).collect();

    let mut out = Vec::with_capacity(element_count(output_dims));
    for_each_index(output_dims, |index| {
        let batch = index[dnums.output_batch_dimension] as usize;
        let feature = index[dnums.output_feature_dimension] as usize;
        let lhs_base = batch * lhs_strides[dnums.input_batch_dimension];
        let kernel_base = feature * kernel_strides[dnums.kernel_output_feature_dimension];

        let mut acc = T::default();
        for_each_index(&kernel_spatial, |k| {
            let mut lhs_offset = lhs_base;
            let mut kernel_offset = kernel_base;
            for (s, dim) in window.iter().enumerate() {
                let input_axis = dnums.input_spatial_dimensions[s];
                let out_position = index[dnums.output_spatial_dimensions[s]];
                let Some(position) = input_position(dim, out_position, k[s], lhs_dims[input_axis]) else {
                    return;
                };
                lhs_offset += position as usize * lhs_strides[input_axis];
                kernel_offset += k[s] as usize * kernel_strides[dnums.kernel_spatial_dimensions[s]];
            }
            for c in 0..input_features as usize {
                let x = lhs[lhs_offset + c * lhs_strides[dnums.input_feature_dimension]];
                let w = kernel[kernel_offset + c * kernel_strides[dnums.kernel_input_feature_dimension]];
                acc = acc.elem_add(x.elem_mul(w));
            }
        });
        out.push(acc);
    });
    Ok(T::into_data(out))
}

pub(crate) fn convolution(
    lhs: &Literal,
    rhs: &Literal,
    window: &[WindowDimension],
    dnums: &ConvolutionDimensionNumbers,
    output_dims: &[i64],
) -> Result<Literal> {
    let array = lhs.as_array()?;
    let data = map_literal_data!(array.data(), values => {
        convolution_typed(values, array.dims(), rhs, window, dnums, output_dims)?
    });
    Literal::from_data(output_dims.to_vec(), data)
}

/// Scalar combiner used by reduce-window.
enum Reducer<'a> {
    Binary(BinaryOp),
    General(&'a XlaComputation),
}

impl<'a> Reducer<'a> {
    fn new(computation: &'a XlaComputation) -> Self {
        match computation.as_scalar_binary() {
            Some(op) => Reducer::Binary(op),
            None => Reducer::General(computation),
        }
    }

    fn apply<T: NativeType>(&self, acc: T, value: T) -> Result<T> {
        match self {
            Reducer::Binary(op) => Ok(apply_binary(*op, acc, value)),
            Reducer::General(computation) => {
                let result = evaluate(computation, &[&Literal::scalar(acc), &Literal::scalar(value)])?;
                result
                    .as_slice::<T>()?
                    .first()
                    .copied()
                    .ok_or_else(|| EngineError::execution(format!("reducer '{}' returned no value", computation.name())))
            }
        }
    }
}

fn reduce_window_typed<T: NativeType>(
    values: &[T],
    dims: &[i64],
    init: &Literal,
    reducer: &Reducer<'_>,
    window: &[WindowDimension],
    output_dims: &[i64],
) -> Result<LiteralData> {
    let init = init
        .as_slice::<T>()?
        .first()
        .copied()
        .ok_or_else(|| EngineError::execution("empty init value"))?;
    let input_strides = strides(dims);
    let window_sizes: Vec<i64> = window.iter().map(|w| w.size).collect();

    let mut out = Vec::with_capacity(element_count(output_dims));
    try_for_each_index(output_dims, |index| {
        let mut acc = init;
        try_for_each_index(&window_sizes, |k| {
            let mut offset = 0usize;
            for (axis, dim) in window.iter().enumerate() {
                match input_position(dim, index[axis], k[axis], dims[axis]) {
                    Some(position) => offset += position as usize * input_strides[axis],
                    None => {
                        acc = reducer.apply(acc, init)?;
                        return Ok(());
                    }
                }
            }
            acc = reducer.apply(acc, values[offset])?;
            Ok(())
        })?;
        out.push(acc);
        Ok(())
    })?;
    Ok(T::into_data(out))
}

pub(crate) fn reduce_window(
    operand: &Literal,
    init: &Literal,
    reducer: &XlaComputation,
    window: &[WindowDimension],
    output_dims: &[i64],
) -> Result<Literal> {
    let array = operand.as_array()?;
    let reducer = Reducer::new(reducer);
    let data = map_literal_data!(array.data(), values => {
        reduce_window_typed(values, array.dims(), init, &reducer, window, output_dims)?
    });
    Literal::from_data(output_dims.to_vec(), data)
}
