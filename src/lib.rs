//! # ONNX-XLA
//!
//! ONNX graph lowering and execution backend with an ONNXIFI interface.
//!
//! ## Overview
//!
//! A serialized ONNX model is ingested into a typed graph, lowered operator
//! by operator onto the engine's computation builder, and executed against
//! caller-owned host buffers. The same pipeline is reachable three ways:
//!
//! - the library API re-exported here ([`compile`], [`Executor`]),
//! - the `onnx-xla-run` CLI,
//! - the ONNXIFI C interface in [`onnxifi`].
//!
//! ## CLI Usage
//!
//! ```bash
//! # Backend information and supported operators
//! onnx-xla-run info
//!
//! # Check a model's operators against the registry
//! onnx-xla-run ops model.onnx
//!
//! # Run with explicit inputs
//! onnx-xla-run run model.onnx --input x=1,-2,3,-4 --json
//! ```
//!
//! ## Library Usage
//!
//! ```no_run
//! use onnx_xla::{compile, Event, Literal};
//!
//! let bytes = std::fs::read("model.onnx")?;
//! let executor = compile(&bytes, &[])?;
//! let x = Literal::from_vec(vec![1, 4], vec![1.0f32, -2.0, 3.0, -4.0])?;
//! let outputs = executor.execute_literals(&[x])?;
//! # let _ = Event::new();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export everything from the compiler crate
pub use onnx_xla_compiler::*;

// The engine and the C interface as namespaces
pub use onnx_xla_engine as engine;
pub use onnx_xla_onnxifi as onnxifi;

/// Get the version of onnx-xla
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert!(ver.contains('.'));
    }

    #[test]
    fn test_compiler_reexports() {
        assert_eq!(ONNX_IR_VERSION, 3);
        assert_eq!(ONNX_OPSET_VERSION, 7);
        assert!(OperatorRegistry::global().is_registered("Conv"));
        assert_eq!(Status::InvalidProtobuf.code(), 0x104);
    }

    #[test]
    fn test_onnxifi_namespace() {
        assert_eq!(onnxifi::abi::TAG_MEMORY_FENCE_V1, 0x23E0_8AAB);
        assert_eq!(onnxifi::abi::TAG_TENSOR_DESCRIPTOR_V1 as u32, TAG_TENSOR_DESCRIPTOR_V1);
    }
}
