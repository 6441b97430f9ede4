//! Primitive element types and shapes

use crate::error::{EngineError, Result};
use std::fmt;

/// Element type of an array value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Pred,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
    C64,
}

impl PrimitiveType {
    /// Size in bytes of one element
    pub fn byte_size(self) -> usize {
        match self {
            PrimitiveType::Pred | PrimitiveType::S8 | PrimitiveType::U8 => 1,
            PrimitiveType::S16 | PrimitiveType::U16 | PrimitiveType::F16 => 2,
            PrimitiveType::S32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::S64 | PrimitiveType::U64 | PrimitiveType::F64 | PrimitiveType::C64 => 8,
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, PrimitiveType::F16 | PrimitiveType::F32 | PrimitiveType::F64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, PrimitiveType::C64)
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveType::S8
                | PrimitiveType::S16
                | PrimitiveType::S32
                | PrimitiveType::S64
                | PrimitiveType::U8
                | PrimitiveType::U16
                | PrimitiveType::U32
                | PrimitiveType::U64
        )
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Pred => "pred",
            PrimitiveType::S8 => "s8",
            PrimitiveType::S16 => "s16",
            PrimitiveType::S32 => "s32",
            PrimitiveType::S64 => "s64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F16 => "f16",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
            PrimitiveType::C64 => "c64",
        };
        write!(f, "{}", name)
    }
}

/// Shape of a dense row-major array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayShape {
    element_type: PrimitiveType,
    dims: Vec<i64>,
}

impl ArrayShape {
    pub fn new(element_type: PrimitiveType, dims: impl Into<Vec<i64>>) -> Self {
        Self {
            element_type,
            dims: dims.into(),
        }
    }

    pub fn scalar(element_type: PrimitiveType) -> Self {
        Self::new(element_type, Vec::new())
    }

    pub fn element_type(&self) -> PrimitiveType {
        self.element_type
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.dims)
    }

    pub fn with_dims(&self, dims: impl Into<Vec<i64>>) -> Self {
        Self::new(self.element_type, dims)
    }
}

impl fmt::Display for ArrayShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.element_type, self.dims)
    }
}

/// Shape of any value produced by a computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Array(ArrayShape),
    Tuple(Vec<Shape>),
}

impl Shape {
    pub fn array(element_type: PrimitiveType, dims: impl Into<Vec<i64>>) -> Self {
        Shape::Array(ArrayShape::new(element_type, dims))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    /// The array shape, or an error for tuples
    pub fn as_array(&self) -> Result<&ArrayShape> {
        match self {
            Shape::Array(shape) => Ok(shape),
            Shape::Tuple(_) => Err(EngineError::InvalidOperand(
                "expected an array shape, found a tuple".to_string(),
            )),
        }
    }

    /// Dimensions of an array shape; empty for tuples
    pub fn dims(&self) -> &[i64] {
        match self {
            Shape::Array(shape) => shape.dims(),
            Shape::Tuple(_) => &[],
        }
    }

    pub fn rank(&self) -> usize {
        self.dims().len()
    }
}

impl From<ArrayShape> for Shape {
    fn from(shape: ArrayShape) -> Self {
        Shape::Array(shape)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array(shape) => write!(f, "{}", shape),
            Shape::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Number of elements described by `dims`
pub fn element_count(dims: &[i64]) -> usize {
    dims.iter().map(|&d| d.max(0) as usize).product()
}

/// Row-major strides for `dims`
pub fn strides(dims: &[i64]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1].max(0) as usize;
    }
    strides
}

/// Advance a multi-index in row-major order. Returns false after the last index.
pub fn next_index(index: &mut [i64], dims: &[i64]) -> bool {
    for axis in (0..dims.len()).rev() {
        index[axis] += 1;
        if index[axis] < dims[axis] {
            return true;
        }
        index[axis] = 0;
    }
    false
}
