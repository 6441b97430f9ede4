//! Shape and type utilities shared by the lowering rules

use crate::proto::tensor_proto::DataType;
use crate::{CompilerError, Result};
use onnx_xla_engine::{BinaryOp, ComputationBuilder, PrimitiveType, Shape, XlaBuilder, XlaComputation};

/// Engine element type for an ONNX element type
pub fn primitive_type(data_type: DataType) -> Result<PrimitiveType> {
    Ok(match data_type {
        DataType::Float => PrimitiveType::F32,
        DataType::Double => PrimitiveType::F64,
        DataType::Float16 => PrimitiveType::F16,
        DataType::Complex64 => PrimitiveType::C64,
        DataType::Bool => PrimitiveType::Pred,
        DataType::Int8 => PrimitiveType::S8,
        DataType::Int16 => PrimitiveType::S16,
        DataType::Int32 => PrimitiveType::S32,
        DataType::Int64 => PrimitiveType::S64,
        DataType::Uint8 => PrimitiveType::U8,
        DataType::Uint16 => PrimitiveType::U16,
        DataType::Uint32 => PrimitiveType::U32,
        DataType::Uint64 => PrimitiveType::U64,
        DataType::Undefined | DataType::String | DataType::Complex128 | DataType::Bfloat16 => {
            return Err(CompilerError::UnsupportedDatatype(format!("{:?}", data_type)));
        }
    })
}

/// ONNX element type for an engine element type
pub fn data_type(ty: PrimitiveType) -> DataType {
    match ty {
        PrimitiveType::F32 => DataType::Float,
        PrimitiveType::F64 => DataType::Double,
        PrimitiveType::F16 => DataType::Float16,
        PrimitiveType::C64 => DataType::Complex64,
        PrimitiveType::Pred => DataType::Bool,
        PrimitiveType::S8 => DataType::Int8,
        PrimitiveType::S16 => DataType::Int16,
        PrimitiveType::S32 => DataType::Int32,
        PrimitiveType::S64 => DataType::Int64,
        PrimitiveType::U8 => DataType::Uint8,
        PrimitiveType::U16 => DataType::Uint16,
        PrimitiveType::U32 => DataType::Uint32,
        PrimitiveType::U64 => DataType::Uint64,
    }
}

/// Decode a raw ONNX element type code
pub fn data_type_from_code(code: i32) -> Result<DataType> {
    DataType::try_from(code).map_err(|_| CompilerError::UnsupportedDatatype(format!("element type code {}", code)))
}

fn scalar_binary(name: &str, op: BinaryOp, ty: PrimitiveType) -> Result<XlaComputation> {
    let mut builder = XlaBuilder::new(name);
    let scalar = Shape::array(ty, Vec::new());
    let y = builder.parameter(0, &scalar, "y");
    let x = builder.parameter(1, &scalar, "x");
    builder.binary(op, y, x, &[]);
    builder.build().map_err(CompilerError::CouldNotBuild)
}

/// `(y, x) -> y + x` over scalars of `ty`
pub fn scalar_add(ty: PrimitiveType) -> Result<XlaComputation> {
    scalar_binary("add", BinaryOp::Add, ty)
}

/// `(y, x) -> max(y, x)` over scalars of `ty`
pub fn scalar_max(ty: PrimitiveType) -> Result<XlaComputation> {
    scalar_binary("max", BinaryOp::Max, ty)
}

/// Broadcast dimensions aligning the trailing axes of two operands.
///
/// The lower-rank operand's axes map onto the last axes of the higher-rank
/// one, which is ONNX multidirectional broadcasting for the engine's
/// explicit-broadcast binary ops. Scalars need no mapping.
pub fn multidirectional_broadcast_dims(first_rank: usize, second_rank: usize) -> Vec<i64> {
    let min = first_rank.min(second_rank);
    let max = first_rank.max(second_rank);
    (0..min).map(|j| (j + max - min) as i64).collect()
}

/// Product of dimensions, rejecting negative sizes
pub fn element_count(dims: &[i64]) -> Result<i64> {
    dims.iter().try_fold(1i64, |acc, &d| {
        if d < 0 {
            Err(CompilerError::InvalidModel(format!("negative dimension in {:?}", dims)))
        } else {
            acc.checked_mul(d)
                .ok_or_else(|| CompilerError::InvalidModel(format!("element count of {:?} overflows", dims)))
        }
    })
}

/// Resolve a Reshape target against the input dimensions.
///
/// `0` copies the input dimension at the same position, a single `-1` is
/// inferred from the remaining element count, and anything below `-1` is
/// invalid. The element count must be preserved.
pub fn resolve_reshape(input_dims: &[i64], requested: &[i64]) -> Result<Vec<i64>> {
    let input_count = element_count(input_dims)?;
    let mut resolved = Vec::with_capacity(requested.len());
    let mut inferred = None;
    for (axis, &d) in requested.iter().enumerate() {
        match d {
            0 => {
                let copied = input_dims.get(axis).copied().ok_or_else(|| {
                    CompilerError::InvalidModel(format!(
                        "reshape {:?}: axis {} copies a dimension {:?} does not have",
                        requested, axis, input_dims
                    ))
                })?;
                resolved.push(copied);
            }
            -1 => {
                if inferred.replace(axis).is_some() {
                    return Err(CompilerError::InvalidModel(format!(
                        "reshape {:?} has more than one -1",
                        requested
                    )));
                }
                resolved.push(1);
            }
            d if d < -1 => {
                return Err(CompilerError::InvalidModel(format!(
                    "reshape {:?} has invalid dimension {}",
                    requested, d
                )));
            }
            d => resolved.push(d),
        }
    }

    let known = element_count(&resolved)?;
    if let Some(axis) = inferred {
        if known == 0 || input_count % known != 0 {
            return Err(CompilerError::InvalidModel(format!(
                "cannot infer -1 in reshape {:?} of {:?}",
                requested, input_dims
            )));
        }
        resolved[axis] = input_count / known;
    } else if known != input_count {
        return Err(CompilerError::InvalidModel(format!(
            "reshape {:?} of {:?} changes the element count",
            requested, input_dims
        )));
    }
    Ok(resolved)
}

/// Output dims of Unsqueeze: unit axes inserted at `axes` of the output rank
pub fn unsqueeze_dims<T: Clone>(input: &[T], axes: &[i64], unit: T) -> Result<Vec<T>> {
    let output_rank = input.len() + axes.len();
    let mut positions = Vec::with_capacity(axes.len());
    for &axis in axes {
        let normalized = if axis < 0 { axis + output_rank as i64 } else { axis };
        if normalized < 0 || normalized as usize >= output_rank {
            return Err(CompilerError::InvalidAttribute(format!(
                "unsqueeze axis {} out of range for output rank {}",
                axis, output_rank
            )));
        }
        positions.push(normalized as usize);
    }
    positions.sort_unstable();
    if positions.windows(2).any(|w| w[0] == w[1]) {
        return Err(CompilerError::InvalidAttribute(format!("unsqueeze axes {:?} repeat", axes)));
    }

    let mut source = input.iter();
    let mut output = Vec::with_capacity(output_rank);
    for position in 0..output_rank {
        if positions.binary_search(&position).is_ok() {
            output.push(unit.clone());
        } else if let Some(dim) = source.next() {
            output.push(dim.clone());
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping_round_trips() {
        for onnx in [DataType::Float, DataType::Bool, DataType::Uint32, DataType::Float16, DataType::Complex64] {
            assert_eq!(data_type(primitive_type(onnx).unwrap()), onnx);
        }
        assert!(matches!(
            primitive_type(DataType::String),
            Err(CompilerError::UnsupportedDatatype(_))
        ));
        assert!(primitive_type(DataType::Complex128).is_err());
    }

    #[test]
    fn test_broadcast_dims_align_trailing_axes() {
        assert_eq!(multidirectional_broadcast_dims(4, 2), vec![2, 3]);
        assert_eq!(multidirectional_broadcast_dims(1, 3), vec![2]);
        assert_eq!(multidirectional_broadcast_dims(2, 2), vec![0, 1]);
        assert!(multidirectional_broadcast_dims(0, 3).is_empty());
        assert!(multidirectional_broadcast_dims(0, 0).is_empty());
    }

    #[test]
    fn test_reshape_copies_and_infers() {
        assert_eq!(resolve_reshape(&[2, 3, 4], &[0, -1]).unwrap(), vec![2, 12]);
        assert_eq!(resolve_reshape(&[2, 3, 4], &[0, -1, 4]).unwrap(), vec![2, 3, 4]);
        assert_eq!(resolve_reshape(&[2, 3, 4], &[-1]).unwrap(), vec![24]);
        assert_eq!(resolve_reshape(&[2, 3, 4], &[4, 6]).unwrap(), vec![4, 6]);
    }

    #[test]
    fn test_reshape_rejects_bad_requests() {
        assert!(resolve_reshape(&[2, 3], &[-1, -1]).is_err());
        assert!(resolve_reshape(&[2, 3], &[-2, 3]).is_err());
        assert!(resolve_reshape(&[2, 3], &[4, 2]).is_err());
        assert!(resolve_reshape(&[2, 3], &[-1, 4]).is_err());
        assert!(resolve_reshape(&[2], &[0, 0]).is_err());
    }

    #[test]
    fn test_huge_dimensions_overflow_as_invalid_model() {
        let err = element_count(&[i64::MAX, 2]).unwrap_err();
        assert!(matches!(err, CompilerError::InvalidModel(_)));
        assert_eq!(element_count(&[i64::MAX, 1]).unwrap(), i64::MAX);

        let err = resolve_reshape(&[2, 3], &[i64::MAX, 4, -1]).unwrap_err();
        assert!(matches!(err, CompilerError::InvalidModel(_)));
    }

    #[test]
    fn test_unsqueeze_inserts_at_output_positions() {
        assert_eq!(unsqueeze_dims(&[3, 4], &[0], 1).unwrap(), vec![1, 3, 4]);
        assert_eq!(unsqueeze_dims(&[3, 4], &[2, 0], 1).unwrap(), vec![1, 3, 1, 4]);
        assert_eq!(unsqueeze_dims(&[3, 4], &[3, 1], 1).unwrap(), vec![3, 1, 4, 1]);
        assert_eq!(unsqueeze_dims(&[3], &[-1], 1).unwrap(), vec![3, 1]);
        assert!(unsqueeze_dims(&[3], &[1, 1], 1).is_err());
        assert!(unsqueeze_dims(&[3], &[5], 1).is_err());
    }

    #[test]
    fn test_scalar_reducers_are_recognized() {
        let add = scalar_add(PrimitiveType::F32).unwrap();
        assert_eq!(add.parameter_shapes().len(), 2);
        let max = scalar_max(PrimitiveType::S32).unwrap();
        assert_eq!(max.result_shape(), &Shape::array(PrimitiveType::S32, vec![]));
    }
}
