//! Error types for ONNX lowering and execution

use crate::status::Status;
use onnx_xla_engine::EngineError;
use std::io;
use thiserror::Error;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, CompilerError>;

/// Errors raised while ingesting, lowering or running a graph
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Unsupported operator version: {0}")]
    UnsupportedVersion(String),

    #[error("Unsupported attribute: {0}")]
    UnsupportedAttribute(String),

    #[error("Missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("Invalid attribute value: {0}")]
    InvalidAttribute(String),

    #[error("Invalid model structure: {0}")]
    InvalidModel(String),

    #[error("Failed to decode ONNX protobuf: {0}")]
    InvalidProtobuf(#[from] prost::DecodeError),

    #[error("Unsupported descriptor tag: 0x{0:08X}")]
    UnsupportedTag(u32),

    #[error("Unknown tensor name: {0}")]
    InvalidName(String),

    #[error("Mismatching datatype for '{name}': expected {expected}, got {actual}")]
    MismatchingDatatype { name: String, expected: String, actual: String },

    #[error("Mismatching shape for '{name}': expected {expected:?}, got {actual:?}")]
    MismatchingShape {
        name: String,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("Unsupported shape: {0}")]
    UnsupportedShape(String),

    #[error("Invalid pointer: {0}")]
    InvalidPointer(String),

    #[error("Invalid memory type: {0}")]
    InvalidMemoryType(u64),

    #[error("Expected {expected} {what}, got {actual}")]
    UnexpectedCount {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported datatype: {0}")]
    UnsupportedDatatype(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Could not build computation: {0}")]
    CouldNotBuild(EngineError),

    #[error("Both initializers and weight descriptors were supplied")]
    ConflictingWeights,

    #[error("Value '{0}' was never lowered")]
    MissingValue(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CompilerError {
    /// ONNXIFI status reported for this error
    pub fn status(&self) -> Status {
        match self {
            CompilerError::UnsupportedOperator(_) => Status::UnsupportedOperator,
            CompilerError::UnsupportedVersion(_) => Status::UnsupportedVersion,
            CompilerError::UnsupportedAttribute(_) => Status::UnsupportedAttribute,
            CompilerError::MissingAttribute(_)
            | CompilerError::InvalidAttribute(_)
            | CompilerError::InvalidModel(_) => Status::InvalidModel,
            CompilerError::InvalidProtobuf(_) => Status::InvalidProtobuf,
            CompilerError::UnsupportedTag(_) => Status::UnsupportedTag,
            CompilerError::InvalidName(_) => Status::InvalidName,
            CompilerError::MismatchingDatatype { .. } => Status::MismatchingDatatype,
            CompilerError::MismatchingShape { .. } => Status::MismatchingShape,
            CompilerError::UnsupportedShape(_) => Status::UnsupportedShape,
            CompilerError::InvalidPointer(_) => Status::InvalidPointer,
            CompilerError::InvalidMemoryType(_) => Status::InvalidMemoryType,
            CompilerError::UnexpectedCount { .. } => Status::InvalidSize,
            CompilerError::UnsupportedDatatype(_) => Status::UnsupportedDatatype,
            CompilerError::InvalidState(_) => Status::InvalidState,
            CompilerError::OutOfMemory(_) => Status::NoSystemMemory,
            CompilerError::CouldNotBuild(_)
            | CompilerError::ConflictingWeights
            | CompilerError::MissingValue(_)
            | CompilerError::Engine(_)
            | CompilerError::Io(_)
            | CompilerError::Config(_) => Status::InternalError,
        }
    }
}

impl From<serde_json::Error> for CompilerError {
    fn from(err: serde_json::Error) -> Self {
        CompilerError::Config(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for CompilerError {
    fn from(err: std::collections::TryReserveError) -> Self {
        CompilerError::OutOfMemory(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_errors_share_invalid_model_status() {
        assert_eq!(CompilerError::MissingAttribute("axis".into()).status(), Status::InvalidModel);
        assert_eq!(CompilerError::InvalidAttribute("pads".into()).status(), Status::InvalidModel);
        assert_eq!(CompilerError::InvalidModel("x".into()).status(), Status::InvalidModel);
    }

    #[test]
    fn test_caller_errors_have_distinct_statuses() {
        let count = CompilerError::UnexpectedCount {
            what: "inputs",
            expected: 1,
            actual: 2,
        };
        assert_eq!(count.status(), Status::InvalidSize);
        assert_eq!(CompilerError::UnsupportedTag(7).status(), Status::UnsupportedTag);
        assert_eq!(CompilerError::InvalidName("x".into()).status(), Status::InvalidName);
        assert_eq!(CompilerError::InvalidMemoryType(3).status(), Status::InvalidMemoryType);
    }

    #[test]
    fn test_engine_failures_are_internal() {
        let engine = EngineError::execution("boom");
        assert_eq!(CompilerError::CouldNotBuild(engine.clone()).status(), Status::InternalError);
        assert_eq!(CompilerError::from(engine).status(), Status::InternalError);
        assert_eq!(CompilerError::ConflictingWeights.status(), Status::InternalError);
    }
}
