//! Window geometry for Conv, MaxPool and AveragePool
//!
//! Resolves kernel size, strides, dilations and per-axis `(low, high)`
//! padding from node attributes. For Conv the geometry covers the spatial
//! axes only; for the pooling operators it covers every axis, with the
//! batch and channel axes pinned to a unit window.

use crate::ir::Node;
use crate::{CompilerError, Result};

/// Resolved window of a windowed operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowGeometry {
    pub window_dimensions: Vec<i64>,
    pub window_strides: Vec<i64>,
    pub window_dilations: Vec<i64>,
    pub padding: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowedOp {
    Conv,
    Pool,
}

impl WindowGeometry {
    /// Geometry of `node` given its static input dims and, for Conv, the
    /// weight dims used to infer a missing `kernel_shape`.
    pub fn for_node(node: &Node, input_dims: &[i64], weight_dims: Option<&[i64]>) -> Result<Self> {
        let op = match node.kind.as_str() {
            "Conv" => WindowedOp::Conv,
            "MaxPool" | "AveragePool" => WindowedOp::Pool,
            other => {
                return Err(CompilerError::InvalidModel(format!(
                    "'{}' is not a convolution or pooling operator",
                    other
                )))
            }
        };
        if input_dims.len() <= 2 {
            return Err(CompilerError::InvalidModel(format!(
                "{} node '{}' needs at least one spatial axis, input is {:?}",
                node.kind, node.name, input_dims
            )));
        }
        let spatial = input_dims.len() - 2;

        let kernel = match (node.ints("kernel_shape")?, op, weight_dims) {
            (Some(kernel), _, _) => per_axis(node, "kernel_shape", kernel, spatial)?,
            (None, WindowedOp::Conv, Some(weight)) if weight.len() == spatial + 2 => weight[2..].to_vec(),
            (None, WindowedOp::Conv, _) => {
                return Err(CompilerError::InvalidModel(format!(
                    "Conv node '{}': kernel shape could not be inferred from weight {:?}",
                    node.name, weight_dims
                )))
            }
            (None, WindowedOp::Pool, _) => vec![1; spatial],
        };
        let strides = match node.ints("strides")? {
            Some(strides) => per_axis(node, "strides", strides, spatial)?,
            None => vec![1; spatial],
        };
        let dilations = match node.ints("dilations")? {
            Some(dilations) => per_axis(node, "dilations", dilations, spatial)?,
            None => vec![1; spatial],
        };
        let spatial_dims = &input_dims[2..];
        let padding = resolve_padding(node, spatial_dims, &kernel, &strides, &dilations)?;

        let mut geometry = Self {
            window_dimensions: kernel,
            window_strides: strides,
            window_dilations: dilations,
            padding,
        };
        if op == WindowedOp::Pool {
            geometry.prepend_unit_axes(2);
        }
        Ok(geometry)
    }

    fn prepend_unit_axes(&mut self, count: usize) {
        let ones = std::iter::repeat(1).take(count);
        self.window_dimensions.splice(0..0, ones.clone());
        self.window_strides.splice(0..0, ones.clone());
        self.window_dilations.splice(0..0, ones);
        self.padding.splice(0..0, std::iter::repeat((0, 0)).take(count));
    }

    /// Output size along each window axis for the given input sizes
    pub fn output_sizes(&self, input_dims: &[i64]) -> Vec<i64> {
        input_dims
            .iter()
            .enumerate()
            .map(|(axis, &size)| {
                let window = (self.window_dimensions[axis] - 1) * self.window_dilations[axis] + 1;
                let padded = size + self.padding[axis].0 + self.padding[axis].1;
                if padded < window {
                    0
                } else {
                    (padded - window) / self.window_strides[axis] + 1
                }
            })
            .collect()
    }
}

fn per_axis(node: &Node, name: &str, values: &[i64], spatial: usize) -> Result<Vec<i64>> {
    if values.len() != spatial {
        return Err(CompilerError::InvalidAttribute(format!(
            "{} node '{}': '{}' has {} entries for {} spatial axes",
            node.kind,
            node.name,
            name,
            values.len(),
            spatial
        )));
    }
    if values.iter().any(|&v| v < 1) {
        return Err(CompilerError::InvalidAttribute(format!(
            "{} node '{}': '{}' must be positive, got {:?}",
            node.kind, node.name, name, values
        )));
    }
    Ok(values.to_vec())
}

fn resolve_padding(
    node: &Node,
    input_sizes: &[i64],
    kernel: &[i64],
    strides: &[i64],
    dilations: &[i64],
) -> Result<Vec<(i64, i64)>> {
    let spatial = input_sizes.len();
    match node.string("auto_pad")? {
        Some("VALID") => Ok(vec![(0, 0); spatial]),
        Some(mode @ ("SAME_UPPER" | "SAME_LOWER")) => Ok((0..spatial)
            .map(|i| {
                let total = same_total_padding(input_sizes[i], kernel[i], strides[i], dilations[i]);
                if mode == "SAME_UPPER" {
                    (total / 2, (total + 1) / 2)
                } else {
                    ((total + 1) / 2, total / 2)
                }
            })
            .collect()),
        Some("NOTSET") | None => explicit_padding(node, spatial),
        Some(other) => Err(CompilerError::InvalidAttribute(format!(
            "{} node '{}': unknown auto_pad '{}'",
            node.kind, node.name, other
        ))),
    }
}

/// Total SAME padding: `(ceil(in / stride) - 1) * stride + kernel * dilation - in`
pub fn same_total_padding(input: i64, kernel: i64, stride: i64, dilation: i64) -> i64 {
    let output = (input + stride - 1) / stride;
    ((output - 1) * stride + kernel * dilation - input).max(0)
}

fn explicit_padding(node: &Node, spatial: usize) -> Result<Vec<(i64, i64)>> {
    let Some(pads) = node.ints("pads")? else {
        return Ok(vec![(0, 0); spatial]);
    };
    if pads.len() != 2 * spatial {
        return Err(CompilerError::InvalidAttribute(format!(
            "{} node '{}': 'pads' has {} entries, expected {}",
            node.kind,
            node.name,
            pads.len(),
            2 * spatial
        )));
    }
    if pads.iter().any(|&p| p < 0) {
        return Err(CompilerError::InvalidAttribute(format!(
            "{} node '{}': negative padding {:?}",
            node.kind, node.name, pads
        )));
    }
    Ok((0..spatial).map(|i| (pads[i], pads[i + spatial])).collect())
}
