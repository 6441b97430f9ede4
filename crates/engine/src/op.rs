//! Operation handles and op configuration types

use std::fmt;

/// Handle to a value inside one [`crate::XlaBuilder`].
///
/// Handles are cheap to copy. A handle whose op failed shape inference is
/// still returned so callers can keep building; the recorded error is
/// reported by `build` or `get_shape`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XlaOp {
    pub(crate) builder_id: u64,
    pub(crate) index: usize,
}

impl XlaOp {
    pub(crate) const INVALID_INDEX: usize = usize::MAX;

    pub(crate) fn invalid(builder_id: u64) -> Self {
        Self {
            builder_id,
            index: Self::INVALID_INDEX,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.index != Self::INVALID_INDEX
    }
}

/// Elementwise binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Pow,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "subtract",
            BinaryOp::Mul => "multiply",
            BinaryOp::Div => "divide",
            BinaryOp::Max => "maximum",
            BinaryOp::Pow => "power",
        };
        write!(f, "{}", name)
    }
}

/// Elementwise unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Exp,
}

/// Padding mode for [`crate::ComputationBuilder::reduce_window`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// No padding; windows must fit inside the operand
    Valid,
    /// Output size is `ceil(input / stride)`; odd padding goes to the high side
    Same,
}

/// Contracting and batch dimensions of a dot product
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotDimensionNumbers {
    pub lhs_contracting_dimensions: Vec<i64>,
    pub rhs_contracting_dimensions: Vec<i64>,
    pub lhs_batch_dimensions: Vec<i64>,
    pub rhs_batch_dimensions: Vec<i64>,
}

impl DotDimensionNumbers {
    /// Plain contraction of `lhs` axis against `rhs` axis
    pub fn contracting(lhs: i64, rhs: i64) -> Self {
        Self {
            lhs_contracting_dimensions: vec![lhs],
            rhs_contracting_dimensions: vec![rhs],
            ..Default::default()
        }
    }
}

/// Axis roles of a convolution's input, kernel and output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvolutionDimensionNumbers {
    pub input_batch_dimension: usize,
    pub input_feature_dimension: usize,
    pub input_spatial_dimensions: Vec<usize>,
    pub kernel_output_feature_dimension: usize,
    pub kernel_input_feature_dimension: usize,
    pub kernel_spatial_dimensions: Vec<usize>,
    pub output_batch_dimension: usize,
    pub output_feature_dimension: usize,
    pub output_spatial_dimensions: Vec<usize>,
}

impl ConvolutionDimensionNumbers {
    /// NCHW input, OIHW kernel, NCHW output with `num_spatial` spatial axes
    pub fn create_default(num_spatial: usize) -> Self {
        let spatial: Vec<usize> = (2..2 + num_spatial).collect();
        Self {
            input_batch_dimension: 0,
            input_feature_dimension: 1,
            input_spatial_dimensions: spatial.clone(),
            kernel_output_feature_dimension: 0,
            kernel_input_feature_dimension: 1,
            kernel_spatial_dimensions: spatial.clone(),
            output_batch_dimension: 0,
            output_feature_dimension: 1,
            output_spatial_dimensions: spatial,
        }
    }

    pub fn num_spatial(&self) -> usize {
        self.input_spatial_dimensions.len()
    }
}

/// Geometry of one axis of a convolution or reduce-window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDimension {
    pub size: i64,
    pub stride: i64,
    pub padding_low: i64,
    pub padding_high: i64,
    pub window_dilation: i64,
    pub base_dilation: i64,
}

impl WindowDimension {
    /// Extent of the window once dilation is applied
    pub fn dilated_size(&self) -> i64 {
        if self.size == 0 {
            0
        } else {
            (self.size - 1) * self.window_dilation + 1
        }
    }

    /// Number of output positions along this axis for an input of `input_size`
    pub fn output_size(&self, input_size: i64) -> i64 {
        let dilated_base = if input_size == 0 {
            0
        } else {
            (input_size - 1) * self.base_dilation + 1
        };
        let padded = dilated_base + self.padding_low + self.padding_high;
        let window = self.dilated_size();
        if padded < window {
            0
        } else {
            (padded - window) / self.stride + 1
        }
    }
}

/// Low/high padding for [`Padding`] over the given input sizes.
pub fn make_padding(input_dims: &[i64], window_dims: &[i64], strides: &[i64], padding: Padding) -> Vec<(i64, i64)> {
    match padding {
        Padding::Valid => vec![(0, 0); input_dims.len()],
        Padding::Same => input_dims
            .iter()
            .zip(window_dims.iter().zip(strides))
            .map(|(&input, (&window, &stride))| {
                let output = (input + stride - 1) / stride;
                let needed = ((output - 1) * stride + window - input).max(0);
                let low = needed / 2;
                (low, needed - low)
            })
            .collect(),
    }
}
