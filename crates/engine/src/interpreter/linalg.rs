use super::for_each_index;
use crate::error::{EngineError, Result};
use crate::literal::{Literal, LiteralData, NativeType};
use crate::map_literal_data;
use crate::op::DotDimensionNumbers;
use crate::shape::{element_count, strides};

fn dot_typed<T: NativeType>(
    lhs: &[T],
    lhs_dims: &[i64],
    rhs: &Literal,
    dnums: &DotDimensionNumbers,
    output_dims: &[i64],
) -> Result<LiteralData> {
    let rhs_values = rhs.as_slice::<T>()?;
    let rhs_dims = rhs.dims();
    let lhs_strides = strides(lhs_dims);
    let rhs_strides = strides(rhs_dims);

    let lhs_contracting: Vec<usize> = dnums.lhs_contracting_dimensions.iter().map(|&d| d as usize).collect();
    let rhs_contracting: Vec<usize> = dnums.rhs_contracting_dimensions.iter().map(|&d| d as usize).collect();
    let lhs_free: Vec<usize> = (0..lhs_dims.len()).filter(|a| !lhs_contracting.contains(a)).collect();
    let rhs_free: Vec<usize> = (0..rhs_dims.len()).filter(|a| !rhs_contracting.contains(a)).collect();
    let contracting_dims: Vec<i64> = lhs_contracting.iter().map(|&a| lhs_dims[a]).collect();

    let mut out = Vec::with_capacity(element_count(output_dims));
    for_each_index(output_dims, |index| {
        let (lhs_index, rhs_index) = index.split_at(lhs_free.len());
        let lhs_base: usize = lhs_free
            .iter()
            .zip(lhs_index)
            .map(|(&axis, &i)| i as usize * lhs_strides[axis])
            .sum();
        let rhs_base: usize = rhs_free
            .iter()
            .zip(rhs_index)
            .map(|(&axis, &i)| i as usize * rhs_strides[axis])
            .sum();
        let mut acc = T::default();
        for_each_index(&contracting_dims, |k| {
            let mut l = lhs_base;
            let mut r = rhs_base;
            for (j, &i) in k.iter().enumerate() {
                l += i as usize * lhs_strides[lhs_contracting[j]];
                r += i as usize * rhs_strides[rhs_contracting[j]];
            }
            acc = acc.elem_add(lhs[l].elem_mul(rhs_values[r]));
        });
        out.push(acc);
    });
    Ok(T::into_data(out))
}

pub(crate) fn dot(lhs: &Literal, rhs: &Literal, dnums: &DotDimensionNumbers, output_dims: &[i64]) -> Result<Literal> {
    let array = lhs.as_array()?;
    let data = map_literal_data!(array.data(), values => {
        dot_typed(values, array.dims(), rhs, dnums, output_dims)?
    });
    Literal::from_data(output_dims.to_vec(), data)
}

fn batch_norm_typed<T: NativeType>(
    values: &[T],
    dims: &[i64],
    operands: &[&Literal],
    epsilon: f32,
    feature_index: usize,
) -> Result<LiteralData> {
    let scale = operands[1].as_slice::<T>()?;
    let offset = operands[2].as_slice::<T>()?;
    let mean = operands[3].as_slice::<T>()?;
    let variance = operands[4].as_slice::<T>()?;
    let epsilon = T::from_f64(epsilon as f64);

    // Per-feature multiplier: scale / sqrt(variance + epsilon)
    let factor: Vec<T> = (0..scale.len())
        .map(|f| scale[f].elem_div(variance[f].elem_add(epsilon).elem_sqrt()))
        .collect();

    let mut out = Vec::with_capacity(values.len());
    let mut position = 0usize;
    for_each_index(dims, |index| {
        let f = index[feature_index] as usize;
        out.push(values[position].elem_sub(mean[f]).elem_mul(factor[f]).elem_add(offset[f]));
        position += 1;
    });
    Ok(T::into_data(out))
}

pub(crate) fn batch_norm_inference(operands: &[&Literal], epsilon: f32, feature_index: usize) -> Result<Literal> {
    if operands.len() != 5 {
        return Err(EngineError::execution(format!("expected 5 operands, got {}", operands.len())));
    }
    let array = operands[0].as_array()?;
    let data = map_literal_data!(array.data(), values => {
        batch_norm_typed(values, array.dims(), operands, epsilon, feature_index)?
    });
    Literal::from_data(array.dims().to_vec(), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_norm_normalizes_per_feature() {
        let x = Literal::from_vec(vec![1, 2, 2], vec![1.0f32, 3.0, 10.0, 14.0]).unwrap();
        let scale = Literal::vec1(&[1.0f32, 2.0]);
        let offset = Literal::vec1(&[0.0f32, 1.0]);
        let mean = Literal::vec1(&[2.0f32, 12.0]);
        let variance = Literal::vec1(&[1.0f32, 4.0]);
        let out = batch_norm_inference(&[&x, &scale, &offset, &mean, &variance], 0.0, 1).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![-1.0, 1.0, -1.0, 3.0]);
    }

    #[test]
    fn test_dot_with_transposed_lhs() {
        // lhs^T * rhs where lhs is 2x2
        let lhs = Literal::from_vec(vec![2, 2], vec![1i32, 2, 3, 4]).unwrap();
        let rhs = Literal::from_vec(vec![2, 1], vec![1i32, 1]).unwrap();
        let out = dot(&lhs, &rhs, &DotDimensionNumbers::contracting(0, 0), &[2, 1]).unwrap();
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![4, 6]);
    }
}
