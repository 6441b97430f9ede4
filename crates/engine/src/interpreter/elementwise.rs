use super::for_each_index;
use crate::error::{EngineError, Result};
use crate::literal::{Literal, LiteralData, NativeType};
use crate::map_literal_data;
use crate::op::{BinaryOp, UnaryOp};
use crate::shape::{element_count, strides};

pub(crate) fn apply_binary<T: NativeType>(op: BinaryOp, a: T, b: T) -> T {
    match op {
        BinaryOp::Add => a.elem_add(b),
        BinaryOp::Sub => a.elem_sub(b),
        BinaryOp::Mul => a.elem_mul(b),
        BinaryOp::Div => a.elem_div(b),
        BinaryOp::Max => a.elem_max(b),
        BinaryOp::Pow => a.elem_pow(b),
    }
}

/// Output axis that each operand axis reads from.
fn operand_axis_map(operand_rank: usize, output_rank: usize, broadcast_dimensions: &[i64]) -> Vec<usize> {
    if operand_rank == output_rank {
        (0..operand_rank).collect()
    } else if operand_rank == 0 {
        Vec::new()
    } else {
        broadcast_dimensions.iter().map(|&d| d as usize).collect()
    }
}

struct BroadcastView<'a> {
    dims: &'a [i64],
    strides: Vec<usize>,
    axis_map: Vec<usize>,
}

impl<'a> BroadcastView<'a> {
    fn new(dims: &'a [i64], output_rank: usize, broadcast_dimensions: &[i64]) -> Self {
        Self {
            dims,
            strides: strides(dims),
            axis_map: operand_axis_map(dims.len(), output_rank, broadcast_dimensions),
        }
    }

    fn offset(&self, index: &[i64]) -> usize {
        self.axis_map
            .iter()
            .enumerate()
            .filter(|(axis, _)| self.dims[*axis] != 1)
            .map(|(axis, &output_axis)| index[output_axis] as usize * self.strides[axis])
            .sum()
    }
}

fn binary_typed<T: NativeType>(
    op: BinaryOp,
    lhs: &[T],
    lhs_view: &BroadcastView<'_>,
    rhs: &LiteralData,
    rhs_view: &BroadcastView<'_>,
    output_dims: &[i64],
) -> Result<LiteralData> {
    let rhs = T::slice(rhs).ok_or_else(|| {
        EngineError::execution(format!("operand types differ: {} vs {}", T::TYPE, rhs.element_type()))
    })?;
    let mut out = Vec::with_capacity(element_count(output_dims));
    for_each_index(output_dims, |index| {
        let a = lhs[lhs_view.offset(index)];
        let b = rhs[rhs_view.offset(index)];
        out.push(apply_binary(op, a, b));
    });
    Ok(T::into_data(out))
}

pub(crate) fn binary(
    op: BinaryOp,
    lhs: &Literal,
    rhs: &Literal,
    broadcast_dimensions: &[i64],
    output_dims: &[i64],
) -> Result<Literal> {
    let lhs = lhs.as_array()?;
    let rhs = rhs.as_array()?;
    let lhs_view = BroadcastView::new(lhs.dims(), output_dims.len(), broadcast_dimensions);
    let rhs_view = BroadcastView::new(rhs.dims(), output_dims.len(), broadcast_dimensions);
    let data = map_literal_data!(lhs.data(), values => {
        binary_typed(op, values, &lhs_view, rhs.data(), &rhs_view, output_dims)?
    });
    Literal::from_data(output_dims.to_vec(), data)
}

pub(crate) fn unary(op: UnaryOp, operand: &Literal) -> Result<Literal> {
    let array = operand.as_array()?;
    let data = map_literal_data!(array.data(), values => {
        let out: Vec<_> = match op {
            UnaryOp::Exp => values.iter().map(|v| v.elem_exp()).collect(),
        };
        NativeType::into_data(out)
    });
    Literal::from_data(array.dims().to_vec(), data)
}

pub(crate) fn broadcast(operand: &Literal, output_dims: &[i64]) -> Result<Literal> {
    let array = operand.as_array()?;
    let count = element_count(output_dims);
    let data = map_literal_data!(array.data(), values => {
        let out: Vec<_> = if values.is_empty() {
            Vec::new()
        } else {
            (0..count).map(|i| values[i % values.len()]).collect()
        };
        NativeType::into_data(out)
    });
    Literal::from_data(output_dims.to_vec(), data)
}

pub(crate) fn transpose(operand: &Literal, permutation: &[usize], output_dims: &[i64]) -> Result<Literal> {
    let array = operand.as_array()?;
    let input_strides = strides(array.dims());
    let permuted: Vec<usize> = permutation.iter().map(|&axis| input_strides[axis]).collect();
    let data = map_literal_data!(array.data(), values => {
        let mut out = Vec::with_capacity(values.len());
        for_each_index(output_dims, |index| {
            let offset: usize = index.iter().zip(&permuted).map(|(&i, &s)| i as usize * s).sum();
            out.push(values[offset]);
        });
        NativeType::into_data(out)
    });
    Literal::from_data(output_dims.to_vec(), data)
}

pub(crate) fn slice(operand: &Literal, dimension: usize, start: i64, stride: i64, output_dims: &[i64]) -> Result<Literal> {
    let array = operand.as_array()?;
    let input_strides = strides(array.dims());
    let data = map_literal_data!(array.data(), values => {
        let mut out = Vec::with_capacity(element_count(output_dims));
        for_each_index(output_dims, |index| {
            let offset: usize = index
                .iter()
                .enumerate()
                .map(|(axis, &i)| {
                    let i = if axis == dimension { start + i * stride } else { i };
                    i as usize * input_strides[axis]
                })
                .sum();
            out.push(values[offset]);
        });
        NativeType::into_data(out)
    });
    Literal::from_data(output_dims.to_vec(), data)
}

fn concatenate_typed<T: NativeType>(
    first: &[T],
    operands: &[&Literal],
    dimension: usize,
    output_dims: &[i64],
) -> Result<LiteralData> {
    let mut pieces: Vec<(&[T], usize)> = Vec::with_capacity(operands.len());
    for (i, operand) in operands.iter().enumerate() {
        let values = if i == 0 { first } else { operand.as_slice::<T>()? };
        // Contiguous run per outer index: the operand's extent from `dimension` inward.
        let run: usize = operand.dims()[dimension..].iter().map(|&d| d as usize).product();
        pieces.push((values, run));
    }
    let outer: usize = output_dims[..dimension].iter().map(|&d| d as usize).product();
    let mut out = Vec::with_capacity(element_count(output_dims));
    for o in 0..outer {
        for (values, run) in &pieces {
            out.extend_from_slice(&values[o * run..(o + 1) * run]);
        }
    }
    Ok(T::into_data(out))
}

pub(crate) fn concatenate(operands: &[&Literal], dimension: usize, output_dims: &[i64]) -> Result<Literal> {
    let first = operands
        .first()
        .ok_or_else(|| EngineError::execution("concatenate without operands"))?
        .as_array()?;
    let data = map_literal_data!(first.data(), values => {
        concatenate_typed(values, operands, dimension, output_dims)?
    });
    Literal::from_data(output_dims.to_vec(), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_broadcasts_against_array() {
        let lhs = Literal::from_vec(vec![3], vec![1.0f32, 2.0, 3.0]).unwrap();
        let rhs = Literal::scalar(2.0f32);
        let out = binary(BinaryOp::Pow, &lhs, &rhs, &[], &[3]).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_degenerate_axes_broadcast_both_ways() {
        let lhs = Literal::from_vec(vec![2, 1], vec![10i32, 20]).unwrap();
        let rhs = Literal::from_vec(vec![1, 3], vec![1i32, 2, 3]).unwrap();
        let out = binary(BinaryOp::Sub, &lhs, &rhs, &[], &[2, 3]).unwrap();
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![9, 8, 7, 19, 18, 17]);
    }

    #[test]
    fn test_broadcast_prepends_axes() {
        let operand = Literal::vec1(&[1u8, 2]);
        let out = broadcast(&operand, &[3, 2]).unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), vec![1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn test_strided_slice() {
        let operand = Literal::vec1(&[0i64, 1, 2, 3, 4, 5]);
        let out = slice(&operand, 0, 1, 2, &[3]).unwrap();
        assert_eq!(out.to_vec::<i64>().unwrap(), vec![1, 3, 5]);
    }

    #[test]
    fn test_integer_division_by_zero_is_zero() {
        let lhs = Literal::vec1(&[4i32, 9]);
        let rhs = Literal::vec1(&[0i32, 3]);
        let out = binary(BinaryOp::Div, &lhs, &rhs, &[], &[2]).unwrap();
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![0, 3]);
    }
}
