//! Per-operator lowering rules
//!
//! Each submodule lowers a family of ONNX operators and registers its
//! functions with [`OperatorRegistry`]. A translation reads every input it
//! needs from the [`LoweringContext`] and binds each output it produces
//! before returning.
//!
//! ## Supported operators
//!
//! - **Elementwise**: Add, Sub, Mul, Div, Sum, Relu
//! - **Convolution**: Conv (grouped, optional bias)
//! - **Pooling**: MaxPool, AveragePool, GlobalAveragePool
//! - **Normalization**: BatchNormalization, LRN, Softmax
//! - **Matrix**: Gemm
//! - **Tensor**: Concat, Reshape, Transpose, Unsqueeze, Identity, Dropout

use crate::ir::Node;
use crate::registry::{LoweringContext, OperatorRegistry};
use crate::{CompilerError, Result};
use onnx_xla_engine::{PrimitiveType, XlaOp};

mod conv;
mod elementwise;
mod matrix;
mod normalization;
mod pool;
mod tensor;

/// Register every built-in lowering
pub(crate) fn register_all(registry: &mut OperatorRegistry) {
    elementwise::register(registry);
    conv::register(registry);
    pool::register(registry);
    normalization::register(registry);
    matrix::register(registry);
    tensor::register(registry);
}

/// Reject a node whose optional output `i` is consumed
fn reject_used_output(node: &Node, ctx: &LoweringContext<'_>, i: usize, what: &str) -> Result<()> {
    if ctx.output_is_used(node, i) {
        return Err(CompilerError::UnsupportedAttribute(format!(
            "{} node '{}': the {} output is not supported",
            node.kind, node.name, what
        )));
    }
    Ok(())
}

/// Scalar constant of `ty`
fn scalar(ctx: &mut LoweringContext<'_>, ty: PrimitiveType, value: f64) -> XlaOp {
    ctx.builder.constant_f64(ty, value)
}

/// Normalize a possibly negative axis against `rank`; `upper` is inclusive
fn normalize_axis(node: &Node, name: &str, axis: i64, rank: usize, upper: usize) -> Result<usize> {
    let normalized = if axis < 0 { axis + rank as i64 } else { axis };
    if normalized < 0 || normalized as usize > upper {
        return Err(CompilerError::InvalidAttribute(format!(
            "{} node '{}': {} {} out of range for rank {}",
            node.kind, node.name, name, axis, rank
        )));
    }
    Ok(normalized as usize)
}
