//! Finalized computations

use crate::literal::Literal;
use crate::op::{BinaryOp, ConvolutionDimensionNumbers, DotDimensionNumbers, UnaryOp, WindowDimension};
use crate::shape::Shape;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) enum InstructionKind {
    Parameter { number: usize, name: String },
    Constant(Literal),
    Binary { op: BinaryOp, broadcast_dimensions: Vec<i64> },
    Unary(UnaryOp),
    Broadcast,
    Reshape,
    Transpose { permutation: Vec<usize> },
    Slice { dimension: usize, start: i64, stride: i64 },
    Concatenate { dimension: usize },
    Dot(DotDimensionNumbers),
    Convolution {
        window: Vec<WindowDimension>,
        dimension_numbers: ConvolutionDimensionNumbers,
    },
    ReduceWindow {
        reducer: XlaComputation,
        window: Vec<WindowDimension>,
    },
    BatchNormInference { epsilon: f32, feature_index: usize },
    Tuple,
}

impl InstructionKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            InstructionKind::Parameter { .. } => "parameter",
            InstructionKind::Constant(_) => "constant",
            InstructionKind::Binary { .. } => "binary",
            InstructionKind::Unary(_) => "unary",
            InstructionKind::Broadcast => "broadcast",
            InstructionKind::Reshape => "reshape",
            InstructionKind::Transpose { .. } => "transpose",
            InstructionKind::Slice { .. } => "slice",
            InstructionKind::Concatenate { .. } => "concatenate",
            InstructionKind::Dot(_) => "dot",
            InstructionKind::Convolution { .. } => "convolution",
            InstructionKind::ReduceWindow { .. } => "reduce-window",
            InstructionKind::BatchNormInference { .. } => "batch-norm-inference",
            InstructionKind::Tuple => "tuple",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Instruction {
    pub(crate) kind: InstructionKind,
    pub(crate) operands: Vec<usize>,
    pub(crate) shape: Shape,
}

/// An immutable computation produced by [`crate::ComputationBuilder::build`].
///
/// Instructions are stored in creation order, which is a valid evaluation
/// order. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct XlaComputation {
    name: String,
    instructions: Arc<Vec<Instruction>>,
    root: usize,
    parameter_shapes: Vec<Shape>,
}

impl XlaComputation {
    pub(crate) fn new(name: String, instructions: Vec<Instruction>, root: usize, parameter_shapes: Vec<Shape>) -> Self {
        Self {
            name,
            instructions: Arc::new(instructions),
            root,
            parameter_shapes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shapes of parameters `0..n`
    pub fn parameter_shapes(&self) -> &[Shape] {
        &self.parameter_shapes
    }

    pub fn result_shape(&self) -> &Shape {
        &self.instructions[self.root].shape
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub(crate) fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub(crate) fn root(&self) -> usize {
        self.root
    }

    /// If this is `op(param0, param1)` over scalars, the op.
    pub(crate) fn as_scalar_binary(&self) -> Option<BinaryOp> {
        let root = &self.instructions[self.root];
        let InstructionKind::Binary { op, .. } = &root.kind else {
            return None;
        };
        let is_param = |index: usize, expected: usize| {
            matches!(
                &self.instructions[index].kind,
                InstructionKind::Parameter { number, .. } if *number == expected
            )
        };
        if self.parameter_shapes.len() == 2 && is_param(root.operands[0], 0) && is_param(root.operands[1], 1) {
            Some(*op)
        } else {
            None
        }
    }
}
