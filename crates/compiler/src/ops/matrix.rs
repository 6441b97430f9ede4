//! Gemm: `alpha * op(A) . op(B) + beta * C`

use super::scalar;
use crate::ir::Node;
use crate::registry::{LoweringContext, OperatorRegistry};
use crate::{CompilerError, Result};
use onnx_xla_engine::DotDimensionNumbers;

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.register("Gemm", gemm);
}

fn gemm(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let a = ctx.input(node, 0)?;
    let b = ctx.input(node, 1)?;
    let a_dims = ctx.static_input_shape(node, 0)?;
    let b_dims = ctx.static_input_shape(node, 1)?;
    if a_dims.len() != 2 || b_dims.len() != 2 {
        return Err(CompilerError::InvalidModel(format!(
            "Gemm node '{}' takes matrices, got {:?} and {:?}",
            node.name, a_dims, b_dims
        )));
    }
    let ty = ctx.input_type(node, 0)?;
    let b_ty = ctx.input_type(node, 1)?;
    if ty != b_ty {
        return Err(CompilerError::InvalidModel(format!(
            "Gemm node '{}' mixes {} and {}",
            node.name, ty, b_ty
        )));
    }

    let alpha = node.float_or("alpha", 1.0)?;
    let beta = node.float_or("beta", 1.0)?;
    let trans_a = node.int_or("transA", 0)? != 0;
    let trans_b = node.int_or("transB", 0)? != 0;

    let dnums = DotDimensionNumbers::contracting(if trans_a { 0 } else { 1 }, if trans_b { 1 } else { 0 });
    let mut y = ctx.builder.dot_general(a, b, &dnums);
    if alpha != 1.0 {
        let alpha = scalar(ctx, ty, alpha as f64);
        y = ctx.builder.mul(y, alpha, &[]);
    }

    if let Some(mut c) = ctx.optional_input(node, 2)? {
        if beta != 1.0 {
            let beta = scalar(ctx, ty, beta as f64);
            c = ctx.builder.mul(c, beta, &[]);
        }
        // A vector bias runs along the columns.
        let c_rank = ctx.static_input_shape(node, 2)?.len();
        let broadcast_dims: &[i64] = if c_rank == 1 { &[1] } else { &[] };
        y = ctx.builder.add(y, c, broadcast_dims);
    }
    ctx.bind_output(node, 0, y)
}
