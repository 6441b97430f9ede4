//! Conv, including grouped convolution

use crate::ir::Node;
use crate::registry::{LoweringContext, OperatorRegistry};
use crate::window::WindowGeometry;
use crate::{CompilerError, Result};
use onnx_xla_engine::{ConvolutionDimensionNumbers, XlaOp};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.register("Conv", conv);
}

fn conv(node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
    let x = ctx.input(node, 0)?;
    let w = ctx.input(node, 1)?;
    let bias = ctx.optional_input(node, 2)?;
    let x_dims = ctx.static_input_shape(node, 0)?;
    let w_dims = ctx.static_input_shape(node, 1)?;
    let geometry = WindowGeometry::for_node(node, &x_dims, Some(&w_dims))?;
    if w_dims.len() != x_dims.len() {
        return Err(CompilerError::InvalidModel(format!(
            "Conv node '{}': weight {:?} does not match input {:?}",
            node.name, w_dims, x_dims
        )));
    }

    let group = node.int_or("group", 1)?;
    if group < 1 || x_dims[1] % group != 0 || w_dims[0] % group != 0 {
        return Err(CompilerError::InvalidAttribute(format!(
            "Conv node '{}': group {} must divide {} input and {} output channels",
            node.name, group, x_dims[1], w_dims[0]
        )));
    }
    let in_per_group = x_dims[1] / group;
    let out_per_group = w_dims[0] / group;
    if w_dims[1] != in_per_group {
        return Err(CompilerError::InvalidModel(format!(
            "Conv node '{}': weight takes {} channels per group, input supplies {}",
            node.name, w_dims[1], in_per_group
        )));
    }

    let dnums = ConvolutionDimensionNumbers::create_default(x_dims.len() - 2);
    let mut y = if group == 1 {
        convolve(ctx, x, w, &geometry, &dnums)
    } else {
        let mut parts = Vec::with_capacity(group as usize);
        for g in 0..group {
            let xs = ctx
                .builder
                .slice_in_dim(x, g * in_per_group, (g + 1) * in_per_group, 1, 1);
            let ws = ctx
                .builder
                .slice_in_dim(w, g * out_per_group, (g + 1) * out_per_group, 1, 0);
            parts.push(convolve(ctx, xs, ws, &geometry, &dnums));
        }
        ctx.builder.concat_in_dim(&parts, 1)
    };

    // Bias applies once to the concatenated channels.
    if let Some(bias) = bias {
        y = ctx.builder.add(y, bias, &[1]);
    }
    ctx.bind_output(node, 0, y)
}

fn convolve(
    ctx: &mut LoweringContext<'_>,
    lhs: XlaOp,
    rhs: XlaOp,
    geometry: &WindowGeometry,
    dnums: &ConvolutionDimensionNumbers,
) -> XlaOp {
    ctx.builder.conv_general_dilated(
        lhs,
        rhs,
        &geometry.window_strides,
        &geometry.padding,
        &[],
        &geometry.window_dilations,
        dnums,
    )
}
