//! BatchNormalization (inference), LRN and Softmax

use super::{normalize_axis, reject_used_output, scalar};
use crate::ir::Node;
use crate::registry::{LoweringContext, OperatorRegistry};
use crate::utils::{scalar_add, scalar_max};
use crate::{CompilerError, Result};
use onnx_xla_engine::{Literal, Padding};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.register("BatchNormalization", batch_normalization);
    registry.register("LRN", lrn);
    registry.register("Softmax", softmax);
}

fn batch_normalization(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    for attribute in ["momentum", "spatial"] {
        if node.has_attribute(attribute) {
            return Err(CompilerError::UnsupportedAttribute(format!(
                "BatchNormalization node '{}': {}",
                node.name, attribute
            )));
        }
    }
    for (i, what) in [(1, "running mean"), (2, "running variance"), (3, "saved mean"), (4, "saved variance")] {
        reject_used_output(node, ctx, i, what)?;
    }

    let x = ctx.input(node, 0)?;
    let scale = ctx.input(node, 1)?;
    let offset = ctx.input(node, 2)?;
    let mean = ctx.input(node, 3)?;
    let variance = ctx.input(node, 4)?;
    let epsilon = node.float_or("epsilon", 1e-5)?;
    let y = ctx
        .builder
        .batch_norm_inference(x, scale, offset, mean, variance, epsilon, 1);
    ctx.bind_output(node, 0, y)
}

/// `x / (bias + alpha / size * sum(x^2 over neighbouring channels))^beta`
fn lrn(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let size = node.require_int("size")?;
    if size < 1 {
        return Err(CompilerError::InvalidAttribute(format!(
            "LRN node '{}': size {} must be positive",
            node.name, size
        )));
    }
    let alpha = node.float_or("alpha", 1e-4)?;
    let beta = node.float_or("beta", 0.75)?;
    let bias = node.float_or("bias", 1.0)?;

    let x = ctx.input(node, 0)?;
    let ty = ctx.input_type(node, 0)?;
    let rank = ctx.static_input_shape(node, 0)?.len();
    if rank < 2 {
        return Err(CompilerError::InvalidModel(format!(
            "LRN node '{}' needs a channel axis",
            node.name
        )));
    }

    let mut window = vec![1; rank];
    window[1] = size;
    let strides = vec![1; rank];
    let reducer = scalar_add(ty)?;
    let zero = scalar(ctx, ty, 0.0);
    let squares = ctx.builder.mul(x, x, &[]);
    let sum_of_squares = ctx
        .builder
        .reduce_window(squares, zero, &reducer, &window, &strides, Padding::Same);

    let alpha_over_size = scalar(ctx, ty, alpha as f64 / size as f64);
    let bias = scalar(ctx, ty, bias as f64);
    let beta = scalar(ctx, ty, beta as f64);
    let scaled = ctx.builder.mul(sum_of_squares, alpha_over_size, &[]);
    let base = ctx.builder.add(scaled, bias, &[]);
    let denominator = ctx.builder.pow(base, beta, &[]);
    let y = ctx.builder.div(x, denominator, &[]);
    ctx.bind_output(node, 0, y)
}

/// Softmax over the flattened axes `axis..rank`
fn softmax(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let x = ctx.input(node, 0)?;
    let ty = ctx.input_type(node, 0)?;
    let dims = ctx.static_input_shape(node, 0)?;
    let axis = normalize_axis(node, "axis", node.int_or("axis", 1)?, dims.len(), dims.len())?;

    let window: Vec<i64> = dims
        .iter()
        .enumerate()
        .map(|(i, &d)| if i < axis { 1 } else { d })
        .collect();
    let strides = vec![1; dims.len()];

    let lowest = ctx.builder.constant_literal(&Literal::min_value(ty));
    let max = scalar_max(ty)?;
    let maxima = ctx
        .builder
        .reduce_window(x, lowest, &max, &window, &strides, Padding::Valid);
    let shifted = ctx.builder.sub(x, maxima, &[]);
    let exponentials = ctx.builder.exp(shifted);

    let zero = scalar(ctx, ty, 0.0);
    let add = scalar_add(ty)?;
    let sums = ctx
        .builder
        .reduce_window(exponentials, zero, &add, &window, &strides, Padding::Valid);
    let y = ctx.builder.div(exponentials, sums, &[]);
    ctx.bind_output(node, 0, y)
}
