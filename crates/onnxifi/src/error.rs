//! Error types for the ONNXIFI entry points

use crate::handles::HandleKind;
use onnx_xla_compiler::{CompilerError, Status};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnnxifiError {
    #[error(transparent)]
    Compiler(#[from] CompilerError),

    #[error("{0} is null")]
    NullPointer(&'static str),

    #[error("invalid {kind} handle {handle:#x}")]
    InvalidHandle { kind: HandleKind, handle: u64 },

    #[error("unsupported auxiliary property {0:#x}")]
    UnsupportedProperty(u64),

    #[error("unknown backend info key {0}")]
    UnknownInfo(i32),

    #[error("backend memory size is not reported")]
    MemorySizeUnavailable,

    #[error("model is empty")]
    EmptyModel,

    #[error("model of {size} bytes exceeds the {max} byte limit")]
    ModelTooLarge { size: usize, max: u64 },

    #[error("backend already holds its maximum of {0} graph(s)")]
    GraphLimit(u64),

    #[error("unsupported memory fence tag {0:#x}")]
    UnsupportedFenceTag(i32),

    #[error("unsupported memory fence type {0}")]
    UnsupportedFenceType(u64),

    #[error("entry point panicked: {0}")]
    Panic(String),
}

impl OnnxifiError {
    pub fn status(&self) -> Status {
        match self {
            OnnxifiError::Compiler(e) => e.status(),
            OnnxifiError::NullPointer(_) => Status::InvalidPointer,
            OnnxifiError::InvalidHandle { kind, .. } => match kind {
                HandleKind::BackendId => Status::InvalidId,
                HandleKind::Backend => Status::InvalidBackend,
                HandleKind::Graph => Status::InvalidGraph,
                HandleKind::Event => Status::InvalidEvent,
            },
            OnnxifiError::UnsupportedProperty(_) => Status::UnsupportedProperty,
            OnnxifiError::UnknownInfo(_) | OnnxifiError::MemorySizeUnavailable => Status::UnsupportedAttribute,
            OnnxifiError::EmptyModel | OnnxifiError::ModelTooLarge { .. } => Status::InvalidSize,
            OnnxifiError::GraphLimit(_) => Status::NoSystemResources,
            OnnxifiError::UnsupportedFenceTag(_) => Status::UnsupportedTag,
            OnnxifiError::UnsupportedFenceType(_) => Status::UnsupportedFenceType,
            OnnxifiError::Panic(_) => Status::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, OnnxifiError>;
