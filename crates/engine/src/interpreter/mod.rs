//! Reference host interpreter for [`XlaComputation`]s
//!
//! Evaluates instructions in creation order, keeping every intermediate
//! literal alive until the root is produced. Element loops are generic over
//! [`crate::NativeType`] and dispatched once per instruction.

mod elementwise;
mod linalg;
mod window;

use crate::computation::{Instruction, InstructionKind, XlaComputation};
use crate::error::{EngineError, Result};
use crate::literal::Literal;
use crate::shape::next_index;

/// Evaluate `computation` with `arguments` bound to parameters `0..n`.
pub fn evaluate(computation: &XlaComputation, arguments: &[&Literal]) -> Result<Literal> {
    let parameters = computation.parameter_shapes();
    if arguments.len() != parameters.len() {
        return Err(EngineError::Parameter(format!(
            "computation '{}' takes {} arguments, got {}",
            computation.name(),
            parameters.len(),
            arguments.len()
        )));
    }
    for (number, (argument, expected)) in arguments.iter().zip(parameters).enumerate() {
        let actual = argument.shape();
        if actual != *expected {
            return Err(EngineError::Parameter(format!(
                "argument {} has shape {}, expected {}",
                number, actual, expected
            )));
        }
    }

    let instructions = computation.instructions();
    let mut values: Vec<Option<Literal>> = vec![None; instructions.len()];
    for (index, instruction) in instructions.iter().enumerate() {
        let operands = instruction
            .operands
            .iter()
            .map(|&operand| {
                values[operand]
                    .as_ref()
                    .ok_or_else(|| EngineError::execution(format!("operand {} of #{} not evaluated", operand, index)))
            })
            .collect::<Result<Vec<&Literal>>>()?;
        let value = evaluate_instruction(instruction, &operands, arguments)?;
        values[index] = Some(value);
    }

    values[computation.root()]
        .take()
        .ok_or_else(|| EngineError::execution("root was not evaluated"))
}

fn evaluate_instruction(instruction: &Instruction, operands: &[&Literal], arguments: &[&Literal]) -> Result<Literal> {
    let shape = &instruction.shape;
    let result = match &instruction.kind {
        InstructionKind::Parameter { number, .. } => Ok(arguments[*number].clone()),
        InstructionKind::Constant(literal) => Ok(literal.clone()),
        InstructionKind::Tuple => Ok(Literal::tuple(operands.iter().map(|&l| l.clone()).collect())),
        InstructionKind::Reshape => operands[0].reshape(shape.dims()),
        InstructionKind::Binary {
            op,
            broadcast_dimensions,
        } => elementwise::binary(*op, operands[0], operands[1], broadcast_dimensions, shape.dims()),
        InstructionKind::Unary(op) => elementwise::unary(*op, operands[0]),
        InstructionKind::Broadcast => elementwise::broadcast(operands[0], shape.dims()),
        InstructionKind::Transpose { permutation } => elementwise::transpose(operands[0], permutation, shape.dims()),
        InstructionKind::Slice {
            dimension,
            start,
            stride,
        } => elementwise::slice(operands[0], *dimension, *start, *stride, shape.dims()),
        InstructionKind::Concatenate { dimension } => elementwise::concatenate(operands, *dimension, shape.dims()),
        InstructionKind::Dot(dimension_numbers) => linalg::dot(operands[0], operands[1], dimension_numbers, shape.dims()),
        InstructionKind::BatchNormInference { epsilon, feature_index } => {
            linalg::batch_norm_inference(operands, *epsilon, *feature_index)
        }
        InstructionKind::Convolution {
            window,
            dimension_numbers,
        } => window::convolution(operands[0], operands[1], window, dimension_numbers, shape.dims()),
        InstructionKind::ReduceWindow { reducer, window } => {
            window::reduce_window(operands[0], operands[1], reducer, window, shape.dims())
        }
    };
    result.map_err(|error| match error {
        EngineError::Execution(message) => {
            EngineError::Execution(format!("{}: {}", instruction.kind.name(), message))
        }
        other => other,
    })
}

/// Call `f` with every multi-index of `dims` in row-major order.
pub(crate) fn for_each_index(dims: &[i64], mut f: impl FnMut(&[i64])) {
    if dims.iter().any(|&d| d <= 0) {
        return;
    }
    let mut index = vec![0i64; dims.len()];
    loop {
        f(&index);
        if !next_index(&mut index, dims) {
            break;
        }
    }
}

/// Fallible variant of [`for_each_index`].
pub(crate) fn try_for_each_index(dims: &[i64], mut f: impl FnMut(&[i64]) -> Result<()>) -> Result<()> {
    if dims.iter().any(|&d| d <= 0) {
        return Ok(());
    }
    let mut index = vec![0i64; dims.len()];
    loop {
        f(&index)?;
        if !next_index(&mut index, dims) {
            return Ok(());
        }
    }
}
