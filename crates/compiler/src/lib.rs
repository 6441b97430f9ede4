//! # ONNX-XLA Compiler
//!
//! Lowers ONNX graphs onto the onnx-xla engine and runs them against
//! caller-owned host buffers.
//!
//! ## Pipeline
//!
//! ```text
//! model bytes
//!     ↓
//! 1. Ingest → GraphIR (typed values, initializers, shape inference)
//!     ↓
//! 2. Translate → constants + parameters, one lowering per node, tuple result
//!     ↓
//! 3. Build → Executor owning the computation and IO metadata
//!     ↓
//! 4. init_io / execute_computation → results scattered into output buffers
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use onnx_xla_compiler::{compile, Literal};
//!
//! let bytes = std::fs::read("relu.onnx")?;
//! let executor = compile(&bytes, &[])?;
//! let x = Literal::from_vec(vec![2, 2], vec![-1.0f32, 2.0, -3.0, 4.0])?;
//! let outputs = executor.execute_literals(&[x])?;
//! println!("{}", outputs[0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Errors
//!
//! Every failure is a [`CompilerError`]; [`CompilerError::status`] gives the
//! ONNXIFI [`Status`] the ABI layer reports for it.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod fence;
pub mod ir;
mod ops;
pub mod proto;
pub mod registry;
pub mod status;
pub mod transform;
pub mod utils;
pub mod window;

pub use config::{init_logging, BackendConfig};
pub use descriptor::{HostBuffer, HostStorage, TensorDescriptor, MEMORY_TYPE_CPU, TAG_TENSOR_DESCRIPTOR_V1};
pub use error::{CompilerError, Result};
pub use executor::{Executor, IoMetadata};
pub use fence::Event;
pub use ir::{Attribute, Dim, GraphIR, Node, TensorValue};
pub use registry::{LoweringContext, OperatorRegistry, TranslationFn, ValueLiteralMap, ValueOpMap};
pub use status::Status;
pub use transform::{Translator, TranslatorState};
pub use window::WindowGeometry;

pub use onnx_xla_engine::Literal;

/// Highest ONNX IR version accepted
pub const ONNX_IR_VERSION: i64 = 3;

/// Default-domain operator set the lowerings follow
pub const ONNX_OPSET_VERSION: i64 = 7;

/// Ingest `model` and translate it, taking constant data from `weights`
/// when the model carries no initializers
pub fn compile(model: &[u8], weights: &[TensorDescriptor]) -> Result<Executor> {
    let ir = GraphIR::from_bytes(model)?;
    Translator::new(ir).translate(weights)
}

/// Ingest `model` and check that every operator it uses is registered
pub fn check_compatibility(model: &[u8]) -> Result<GraphIR> {
    let ir = GraphIR::from_bytes(model)?;
    let registry = OperatorRegistry::global();
    if let Some(kind) = ir.operator_kinds().into_iter().find(|kind| !registry.is_registered(kind)) {
        return Err(CompilerError::UnsupportedOperator(kind.to_string()));
    }
    Ok(ir)
}
