//! # ONNX-XLA Engine
//!
//! Target compute engine for lowered ONNX graphs.
//!
//! ## Overview
//!
//! Lowering code programs against the [`ComputationBuilder`] trait. The
//! in-tree [`XlaBuilder`] records a flat instruction list, infers result
//! shapes as ops are added, and finalizes into an immutable
//! [`XlaComputation`]. A [`ComputationClient`] accepts host [`Literal`]s and
//! runs computations; [`LocalClient`] does so with a reference interpreter.
//!
//! ## Example
//!
//! ```
//! use onnx_xla_engine::{ComputationBuilder, ComputationClient, Literal, LocalClient, PrimitiveType, Shape, XlaBuilder};
//!
//! let mut b = XlaBuilder::new("relu");
//! let x = b.parameter(0, &Shape::array(PrimitiveType::F32, vec![3]), "x");
//! let zero = b.constant_literal(&Literal::zero(PrimitiveType::F32));
//! b.max(x, zero, &[]);
//! let computation = b.build()?;
//!
//! let client = LocalClient::new();
//! let input = client.transfer_to_server(&Literal::vec1(&[-1.0f32, 0.5, 2.0]))?;
//! let out = client.execute(&computation, &[&input])?;
//! assert_eq!(out.to_vec::<f32>()?, vec![0.0, 0.5, 2.0]);
//! # Ok::<(), onnx_xla_engine::EngineError>(())
//! ```

pub mod builder;
pub mod client;
pub mod computation;
pub mod error;
pub mod interpreter;
pub mod literal;
pub mod op;
pub mod shape;

pub use builder::{ComputationBuilder, XlaBuilder};
pub use client::{ComputationClient, GlobalData, LocalClient};
pub use computation::XlaComputation;
pub use error::{EngineError, Result};
pub use interpreter::evaluate;
pub use literal::{convert_element, ArrayLiteral, Literal, LiteralData, NativeType};
pub use op::{
    make_padding, BinaryOp, ConvolutionDimensionNumbers, DotDimensionNumbers, Padding, UnaryOp, WindowDimension, XlaOp,
};
pub use shape::{ArrayShape, PrimitiveType, Shape};

// Used by the exported dispatch macros.
pub use half;
pub use num_complex;
