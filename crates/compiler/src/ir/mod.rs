//! Graph IR: ingestion, typed values and shape inference
//!
//! [`GraphIR::from_bytes`] turns a serialized ONNX model into the form the
//! translator consumes. Every value carries its element type and
//! dimensions; intermediate values are filled in by [`ShapeInference`].

mod graph;
mod ingest;
mod shape_inference;

pub use graph::{static_dims, Attribute, Dim, GraphIR, Node, TensorValue};
pub use ingest::tensor_to_literal;
pub use shape_inference::{broadcast_shapes, ShapeInference};
