//! # ONNX-XLA ONNXIFI
//!
//! The ONNXIFI 1.0 C interface over the onnx-xla compiler. Built as a
//! `cdylib`, the library exports the `onnx*` symbols a host model runner
//! loads to use onnx-xla as an execution backend.
//!
//! ## Lifecycle
//!
//! ```text
//! onnxGetBackendIDs → onnxInitBackend → onnxInitGraph → onnxSetGraphIO
//!                                                            ↓
//!        onnxReleaseGraph ← onnxWaitEvent(output) ← onnxRunGraph
//! ```
//!
//! Backends, graphs and events are opaque handles into process-wide
//! registries. Every handle is checked on use; a released handle reports
//! the `INVALID_*` status for its kind instead of touching freed memory.
//!
//! Logging goes through `tracing`; the filter comes from `ONNX_XLA_LOG`
//! (or `RUST_LOG`) on the first call into the library.

pub mod abi;
pub mod api;
pub mod backend;
pub mod error;
pub mod handles;
pub mod info;

pub use abi::{OnnxMemoryFenceV1, OnnxStatus, OnnxTensorDescriptorV1};
pub use error::{OnnxifiError, Result};
pub use handles::{HandleKind, HandleTable};
pub use info::{backend_info, InfoValue};
