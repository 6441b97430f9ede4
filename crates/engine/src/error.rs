//! Error types for the computation engine

use crate::shape::PrimitiveType;
use thiserror::Error;

/// Errors raised while building or evaluating a computation.
///
/// Builder errors are recorded when an op is added and reported again by
/// [`crate::ComputationBuilder::build`], so the variants are `Clone`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Operand shapes are inconsistent for the requested op
    #[error("shape error in {op}: {message}")]
    Shape { op: &'static str, message: String },

    /// Operand element types differ where they must agree
    #[error("type mismatch in {op}: {lhs} vs {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: PrimitiveType,
        rhs: PrimitiveType,
    },

    /// Element type is not valid for the op (e.g. `Exp` on integers)
    #[error("{op} does not support element type {ty}")]
    UnsupportedType { op: &'static str, ty: PrimitiveType },

    /// Handle does not belong to this builder or refers to a failed op
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// Parameter numbering or argument binding problem
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Literal construction or access problem
    #[error("literal error: {0}")]
    Literal(String),

    /// Runtime failure inside the interpreter
    #[error("execution error: {0}")]
    Execution(String),
}

impl EngineError {
    pub fn shape(op: &'static str, message: impl Into<String>) -> Self {
        EngineError::Shape {
            op,
            message: message.into(),
        }
    }

    pub fn literal(message: impl Into<String>) -> Self {
        EngineError::Literal(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        EngineError::Execution(message.into())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Return early with an [`EngineError::Shape`].
#[macro_export]
macro_rules! shape_bail {
    ($op:expr, $($arg:tt)*) => {
        return Err($crate::EngineError::shape($op, format!($($arg)*)))
    };
}
