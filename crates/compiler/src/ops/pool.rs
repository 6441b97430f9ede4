//! Pooling: MaxPool, AveragePool, GlobalAveragePool

use super::{reject_used_output, scalar};
use crate::ir::Node;
use crate::registry::{LoweringContext, OperatorRegistry};
use crate::utils::{scalar_add, scalar_max};
use crate::window::WindowGeometry;
use crate::{CompilerError, Result};
use onnx_xla_engine::{Literal, Padding};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.register("MaxPool", max_pool);
    registry.register("AveragePool", average_pool);
    registry.register("GlobalAveragePool", global_average_pool);
}

fn reject_ceil_mode(node: &Node) -> Result<()> {
    if node.int_or("ceil_mode", 0)? != 0 {
        return Err(CompilerError::UnsupportedAttribute(format!(
            "{} node '{}': ceil_mode",
            node.kind, node.name
        )));
    }
    Ok(())
}

fn max_pool(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    reject_used_output(node, ctx, 1, "indices")?;
    if node.int_or("storage_order", 0)? != 0 {
        return Err(CompilerError::UnsupportedAttribute(format!(
            "MaxPool node '{}': storage_order",
            node.name
        )));
    }
    reject_ceil_mode(node)?;

    let x = ctx.input(node, 0)?;
    let ty = ctx.input_type(node, 0)?;
    let x_dims = ctx.static_input_shape(node, 0)?;
    let geometry = WindowGeometry::for_node(node, &x_dims, None)?;

    let init = ctx.builder.constant_literal(&Literal::min_value(ty));
    let reducer = scalar_max(ty)?;
    let y = ctx.builder.reduce_window_with_general_padding(
        x,
        init,
        &reducer,
        &geometry.window_dimensions,
        &geometry.window_strides,
        &geometry.window_dilations,
        &geometry.padding,
    );
    ctx.bind_output(node, 0, y)
}

/// Windowed sum divided by the number of elements each window averages.
///
/// With `count_include_pad` the divisor is the window volume. Otherwise it
/// is the count of non-padding elements under each window, computed by
/// summing a tensor of ones over the same padded windows.
fn average_pool(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    reject_ceil_mode(node)?;
    let x = ctx.input(node, 0)?;
    let ty = ctx.input_type(node, 0)?;
    let x_dims = ctx.static_input_shape(node, 0)?;
    let geometry = WindowGeometry::for_node(node, &x_dims, None)?;
    let reducer = scalar_add(ty)?;

    let zero = scalar(ctx, ty, 0.0);
    let sums = ctx.builder.reduce_window_with_general_padding(
        x,
        zero,
        &reducer,
        &geometry.window_dimensions,
        &geometry.window_strides,
        &geometry.window_dilations,
        &geometry.padding,
    );

    let y = if node.int_or("count_include_pad", 0)? != 0 {
        let volume: i64 = geometry.window_dimensions.iter().product();
        let divisor = scalar(ctx, ty, volume as f64);
        ctx.builder.div(sums, divisor, &[])
    } else {
        let one = scalar(ctx, ty, 1.0);
        let ones = ctx.builder.broadcast(one, &x_dims);
        let counts = ctx.builder.reduce_window_with_general_padding(
            ones,
            zero,
            &reducer,
            &geometry.window_dimensions,
            &geometry.window_strides,
            &geometry.window_dilations,
            &geometry.padding,
        );
        ctx.builder.div(sums, counts, &[])
    };
    ctx.bind_output(node, 0, y)
}

fn global_average_pool(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let x = ctx.input(node, 0)?;
    let ty = ctx.input_type(node, 0)?;
    let x_dims = ctx.static_input_shape(node, 0)?;
    if x_dims.len() <= 2 {
        return Err(CompilerError::InvalidModel(format!(
            "GlobalAveragePool node '{}' needs spatial axes, input is {:?}",
            node.name, x_dims
        )));
    }

    let mut window = x_dims.clone();
    window[0] = 1;
    window[1] = 1;
    let strides = vec![1; x_dims.len()];
    let reducer = scalar_add(ty)?;
    let zero = scalar(ctx, ty, 0.0);
    let sums = ctx
        .builder
        .reduce_window(x, zero, &reducer, &window, &strides, Padding::Valid);
    let count: i64 = x_dims[2..].iter().product();
    let divisor = scalar(ctx, ty, count as f64);
    let y = ctx.builder.div(sums, divisor, &[]);
    ctx.bind_output(node, 0, y)
}
