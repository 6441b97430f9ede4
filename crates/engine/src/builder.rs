//! Computation builder
//!
//! [`ComputationBuilder`] is the capability the ONNX lowering code programs
//! against; [`XlaBuilder`] is the in-tree implementation. Every op method
//! returns an [`XlaOp`] immediately. Shape errors are recorded on the
//! builder and surface from [`ComputationBuilder::build`] (first error wins),
//! mirroring how a deferred-status graph builder behaves.

use crate::computation::{Instruction, InstructionKind, XlaComputation};
use crate::error::{EngineError, Result};
use crate::literal::Literal;
use crate::op::{
    make_padding, BinaryOp, ConvolutionDimensionNumbers, DotDimensionNumbers, Padding, UnaryOp, WindowDimension, XlaOp,
};
use crate::shape::{ArrayShape, PrimitiveType, Shape};
use crate::shape_bail;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

/// Graph-building capability used by the lowering rules.
pub trait ComputationBuilder {
    fn name(&self) -> &str;

    /// Runtime input number `number` with the given shape
    fn parameter(&mut self, number: usize, shape: &Shape, name: &str) -> XlaOp;

    fn constant_literal(&mut self, literal: &Literal) -> XlaOp;

    /// Elementwise binary op.
    ///
    /// With empty `broadcast_dimensions` the operands must have equal rank
    /// (size-1 axes broadcast) or one must be a scalar. Otherwise
    /// `broadcast_dimensions[i]` names the axis of the higher-rank operand
    /// that axis `i` of the lower-rank operand maps to.
    fn binary(&mut self, op: BinaryOp, lhs: XlaOp, rhs: XlaOp, broadcast_dimensions: &[i64]) -> XlaOp;

    fn unary(&mut self, op: UnaryOp, operand: XlaOp) -> XlaOp;

    /// Prepend `broadcast_sizes` as new leading axes
    fn broadcast(&mut self, operand: XlaOp, broadcast_sizes: &[i64]) -> XlaOp;

    fn reshape(&mut self, operand: XlaOp, new_sizes: &[i64]) -> XlaOp;

    fn transpose(&mut self, operand: XlaOp, permutation: &[i64]) -> XlaOp;

    fn slice_in_dim(&mut self, operand: XlaOp, start_index: i64, limit_index: i64, stride: i64, dimno: i64) -> XlaOp;

    fn concat_in_dim(&mut self, operands: &[XlaOp], dimension: i64) -> XlaOp;

    fn dot_general(&mut self, lhs: XlaOp, rhs: XlaOp, dimension_numbers: &DotDimensionNumbers) -> XlaOp;

    /// Convolution; empty dilation lists mean no dilation
    #[allow(clippy::too_many_arguments)]
    fn conv_general_dilated(
        &mut self,
        lhs: XlaOp,
        rhs: XlaOp,
        window_strides: &[i64],
        padding: &[(i64, i64)],
        lhs_dilation: &[i64],
        rhs_dilation: &[i64],
        dimension_numbers: &ConvolutionDimensionNumbers,
    ) -> XlaOp;

    fn reduce_window(
        &mut self,
        operand: XlaOp,
        init_value: XlaOp,
        computation: &XlaComputation,
        window_dimensions: &[i64],
        window_strides: &[i64],
        padding: Padding,
    ) -> XlaOp;

    /// Reduce-window with explicit per-axis padding; empty dilations mean 1
    #[allow(clippy::too_many_arguments)]
    fn reduce_window_with_general_padding(
        &mut self,
        operand: XlaOp,
        init_value: XlaOp,
        computation: &XlaComputation,
        window_dimensions: &[i64],
        window_strides: &[i64],
        window_dilations: &[i64],
        padding: &[(i64, i64)],
    ) -> XlaOp;

    #[allow(clippy::too_many_arguments)]
    fn batch_norm_inference(
        &mut self,
        operand: XlaOp,
        scale: XlaOp,
        offset: XlaOp,
        mean: XlaOp,
        variance: XlaOp,
        epsilon: f32,
        feature_index: i64,
    ) -> XlaOp;

    fn tuple(&mut self, elements: &[XlaOp]) -> XlaOp;

    fn get_shape(&self, op: XlaOp) -> Result<Shape>;

    /// Finalize using the most recently added op as the root
    fn build(&mut self) -> Result<XlaComputation>;

    fn add(&mut self, lhs: XlaOp, rhs: XlaOp, broadcast_dimensions: &[i64]) -> XlaOp {
        self.binary(BinaryOp::Add, lhs, rhs, broadcast_dimensions)
    }

    fn sub(&mut self, lhs: XlaOp, rhs: XlaOp, broadcast_dimensions: &[i64]) -> XlaOp {
        self.binary(BinaryOp::Sub, lhs, rhs, broadcast_dimensions)
    }

    fn mul(&mut self, lhs: XlaOp, rhs: XlaOp, broadcast_dimensions: &[i64]) -> XlaOp {
        self.binary(BinaryOp::Mul, lhs, rhs, broadcast_dimensions)
    }

    fn div(&mut self, lhs: XlaOp, rhs: XlaOp, broadcast_dimensions: &[i64]) -> XlaOp {
        self.binary(BinaryOp::Div, lhs, rhs, broadcast_dimensions)
    }

    fn max(&mut self, lhs: XlaOp, rhs: XlaOp, broadcast_dimensions: &[i64]) -> XlaOp {
        self.binary(BinaryOp::Max, lhs, rhs, broadcast_dimensions)
    }

    fn pow(&mut self, lhs: XlaOp, rhs: XlaOp, broadcast_dimensions: &[i64]) -> XlaOp {
        self.binary(BinaryOp::Pow, lhs, rhs, broadcast_dimensions)
    }

    fn exp(&mut self, operand: XlaOp) -> XlaOp {
        self.unary(UnaryOp::Exp, operand)
    }

    /// Scalar constant of type `ty`
    fn constant_f64(&mut self, ty: PrimitiveType, value: f64) -> XlaOp {
        self.constant_literal(&Literal::from_f64(ty, value))
    }

    fn get_array_shape(&self, op: XlaOp) -> Result<ArrayShape> {
        Ok(self.get_shape(op)?.as_array()?.clone())
    }
}

/// In-tree [`ComputationBuilder`] producing [`XlaComputation`]s.
#[derive(Debug)]
pub struct XlaBuilder {
    id: u64,
    name: String,
    instructions: Vec<Instruction>,
    first_error: Option<EngineError>,
}

impl XlaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            instructions: Vec::new(),
            first_error: None,
        }
    }

    /// First recorded shape error, if any
    pub fn first_error(&self) -> Option<&EngineError> {
        self.first_error.as_ref()
    }

    fn record_error(&mut self, error: EngineError) -> XlaOp {
        tracing::debug!(builder = %self.name, error = %error, "op rejected");
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
        XlaOp::invalid(self.id)
    }

    fn operand_shape(&self, op: XlaOp) -> Result<&Shape> {
        if op.builder_id != self.id {
            return Err(EngineError::InvalidOperand(format!(
                "op belongs to builder #{}, not '{}'",
                op.builder_id, self.name
            )));
        }
        if !op.is_valid() {
            return Err(self
                .first_error
                .clone()
                .unwrap_or_else(|| EngineError::InvalidOperand("op was never created".to_string())));
        }
        self.instructions
            .get(op.index)
            .map(|instruction| &instruction.shape)
            .ok_or_else(|| EngineError::InvalidOperand(format!("op index {} out of range", op.index)))
    }

    /// Validate operands, infer the result, and append the instruction.
    fn add_instruction<F>(&mut self, operands: &[XlaOp], infer: F) -> XlaOp
    where
        F: FnOnce(&[Shape]) -> Result<(InstructionKind, Shape)>,
    {
        let mut shapes = Vec::with_capacity(operands.len());
        for &operand in operands {
            match self.operand_shape(operand) {
                Ok(shape) => shapes.push(shape.clone()),
                // An earlier op already failed; keep the first error.
                Err(_) if !operand.is_valid() && operand.builder_id == self.id => {
                    return XlaOp::invalid(self.id);
                }
                Err(error) => return self.record_error(error),
            }
        }
        match infer(&shapes) {
            Ok((kind, shape)) => {
                self.instructions.push(Instruction {
                    kind,
                    operands: operands.iter().map(|op| op.index).collect(),
                    shape,
                });
                XlaOp {
                    builder_id: self.id,
                    index: self.instructions.len() - 1,
                }
            }
            Err(error) => self.record_error(error),
        }
    }
}

impl ComputationBuilder for XlaBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameter(&mut self, number: usize, shape: &Shape, name: &str) -> XlaOp {
        let duplicate = self
            .instructions
            .iter()
            .any(|i| matches!(&i.kind, InstructionKind::Parameter { number: n, .. } if *n == number));
        if duplicate {
            return self.record_error(EngineError::Parameter(format!("parameter {} declared twice", number)));
        }
        let shape = shape.clone();
        let name = name.to_string();
        self.add_instruction(&[], move |_| Ok((InstructionKind::Parameter { number, name }, shape)))
    }

    fn constant_literal(&mut self, literal: &Literal) -> XlaOp {
        let literal = literal.clone();
        self.add_instruction(&[], move |_| {
            let shape = literal.shape();
            Ok((InstructionKind::Constant(literal), shape))
        })
    }

    fn binary(&mut self, op: BinaryOp, lhs: XlaOp, rhs: XlaOp, broadcast_dimensions: &[i64]) -> XlaOp {
        self.add_instruction(&[lhs, rhs], |shapes| {
            let shape = infer_binary_shape(op, shapes[0].as_array()?, shapes[1].as_array()?, broadcast_dimensions)?;
            Ok((
                InstructionKind::Binary {
                    op,
                    broadcast_dimensions: broadcast_dimensions.to_vec(),
                },
                Shape::Array(shape),
            ))
        })
    }

    fn unary(&mut self, op: UnaryOp, operand: XlaOp) -> XlaOp {
        self.add_instruction(&[operand], |shapes| {
            let shape = shapes[0].as_array()?;
            let ty = shape.element_type();
            if !(ty.is_floating() || ty.is_complex()) {
                return Err(EngineError::UnsupportedType { op: "exp", ty });
            }
            Ok((InstructionKind::Unary(op), Shape::Array(shape.clone())))
        })
    }

    fn broadcast(&mut self, operand: XlaOp, broadcast_sizes: &[i64]) -> XlaOp {
        self.add_instruction(&[operand], |shapes| {
            let shape = shapes[0].as_array()?;
            if let Some(bad) = broadcast_sizes.iter().find(|&&d| d < 0) {
                shape_bail!("broadcast", "negative broadcast size {}", bad);
            }
            let mut dims = broadcast_sizes.to_vec();
            dims.extend_from_slice(shape.dims());
            Ok((InstructionKind::Broadcast, Shape::Array(shape.with_dims(dims))))
        })
    }

    fn reshape(&mut self, operand: XlaOp, new_sizes: &[i64]) -> XlaOp {
        self.add_instruction(&[operand], |shapes| {
            let shape = shapes[0].as_array()?;
            if new_sizes.iter().any(|&d| d < 0) {
                shape_bail!("reshape", "negative dimension in {:?}", new_sizes);
            }
            let new_count: i64 = new_sizes.iter().product();
            if new_count as usize != shape.element_count() {
                shape_bail!(
                    "reshape",
                    "cannot reshape {} ({} elements) to {:?}",
                    shape,
                    shape.element_count(),
                    new_sizes
                );
            }
            Ok((InstructionKind::Reshape, Shape::Array(shape.with_dims(new_sizes.to_vec()))))
        })
    }

    fn transpose(&mut self, operand: XlaOp, permutation: &[i64]) -> XlaOp {
        self.add_instruction(&[operand], |shapes| {
            let shape = shapes[0].as_array()?;
            let rank = shape.rank();
            let mut seen = vec![false; rank];
            if permutation.len() != rank {
                shape_bail!("transpose", "permutation {:?} does not match rank {}", permutation, rank);
            }
            let mut perm = Vec::with_capacity(rank);
            for &axis in permutation {
                if axis < 0 || axis as usize >= rank || seen[axis as usize] {
                    shape_bail!("transpose", "{:?} is not a permutation of 0..{}", permutation, rank);
                }
                seen[axis as usize] = true;
                perm.push(axis as usize);
            }
            let dims: Vec<i64> = perm.iter().map(|&axis| shape.dims()[axis]).collect();
            Ok((
                InstructionKind::Transpose { permutation: perm },
                Shape::Array(shape.with_dims(dims)),
            ))
        })
    }

    fn slice_in_dim(&mut self, operand: XlaOp, start_index: i64, limit_index: i64, stride: i64, dimno: i64) -> XlaOp {
        self.add_instruction(&[operand], |shapes| {
            let shape = shapes[0].as_array()?;
            if dimno < 0 || dimno as usize >= shape.rank() {
                shape_bail!("slice", "dimension {} out of range for {}", dimno, shape);
            }
            let dimension = dimno as usize;
            let size = shape.dims()[dimension];
            if stride < 1 || start_index < 0 || start_index > limit_index || limit_index > size {
                shape_bail!(
                    "slice",
                    "invalid slice [{}:{}:{}] of axis with size {}",
                    start_index,
                    limit_index,
                    stride,
                    size
                );
            }
            let mut dims = shape.dims().to_vec();
            dims[dimension] = (limit_index - start_index + stride - 1) / stride;
            Ok((
                InstructionKind::Slice {
                    dimension,
                    start: start_index,
                    stride,
                },
                Shape::Array(shape.with_dims(dims)),
            ))
        })
    }

    fn concat_in_dim(&mut self, operands: &[XlaOp], dimension: i64) -> XlaOp {
        self.add_instruction(operands, |shapes| {
            let Some(first) = shapes.first() else {
                shape_bail!("concatenate", "needs at least one operand");
            };
            let first = first.as_array()?;
            if dimension < 0 || dimension as usize >= first.rank() {
                shape_bail!("concatenate", "dimension {} out of range for {}", dimension, first);
            }
            let dimension = dimension as usize;
            let mut dims = first.dims().to_vec();
            for shape in &shapes[1..] {
                let shape = shape.as_array()?;
                if shape.element_type() != first.element_type() {
                    return Err(EngineError::TypeMismatch {
                        op: "concatenate",
                        lhs: first.element_type(),
                        rhs: shape.element_type(),
                    });
                }
                let compatible = shape.rank() == first.rank()
                    && (0..first.rank()).all(|axis| axis == dimension || shape.dims()[axis] == first.dims()[axis]);
                if !compatible {
                    shape_bail!("concatenate", "{} and {} differ outside axis {}", first, shape, dimension);
                }
                dims[dimension] += shape.dims()[dimension];
            }
            Ok((
                InstructionKind::Concatenate { dimension },
                Shape::Array(first.with_dims(dims)),
            ))
        })
    }

    fn dot_general(&mut self, lhs: XlaOp, rhs: XlaOp, dimension_numbers: &DotDimensionNumbers) -> XlaOp {
        self.add_instruction(&[lhs, rhs], |shapes| {
            let shape = infer_dot_shape(shapes[0].as_array()?, shapes[1].as_array()?, dimension_numbers)?;
            Ok((InstructionKind::Dot(dimension_numbers.clone()), Shape::Array(shape)))
        })
    }

    fn conv_general_dilated(
        &mut self,
        lhs: XlaOp,
        rhs: XlaOp,
        window_strides: &[i64],
        padding: &[(i64, i64)],
        lhs_dilation: &[i64],
        rhs_dilation: &[i64],
        dimension_numbers: &ConvolutionDimensionNumbers,
    ) -> XlaOp {
        self.add_instruction(&[lhs, rhs], |shapes| {
            let (window, shape) = infer_conv_shape(
                shapes[0].as_array()?,
                shapes[1].as_array()?,
                window_strides,
                padding,
                lhs_dilation,
                rhs_dilation,
                dimension_numbers,
            )?;
            Ok((
                InstructionKind::Convolution {
                    window,
                    dimension_numbers: dimension_numbers.clone(),
                },
                Shape::Array(shape),
            ))
        })
    }

    fn reduce_window(
        &mut self,
        operand: XlaOp,
        init_value: XlaOp,
        computation: &XlaComputation,
        window_dimensions: &[i64],
        window_strides: &[i64],
        padding: Padding,
    ) -> XlaOp {
        let dims = match self.operand_shape(operand).and_then(|s| s.as_array().map(|a| a.dims().to_vec())) {
            Ok(dims) => dims,
            Err(_) if !operand.is_valid() && operand.builder_id == self.id => return XlaOp::invalid(self.id),
            Err(error) => return self.record_error(error),
        };
        if window_dimensions.len() != dims.len() || window_strides.len() != dims.len() {
            return self.record_error(EngineError::shape(
                "reduce-window",
                format!(
                    "window {:?} / strides {:?} do not match rank {}",
                    window_dimensions,
                    window_strides,
                    dims.len()
                ),
            ));
        }
        let padding = make_padding(&dims, window_dimensions, window_strides, padding);
        self.reduce_window_with_general_padding(
            operand,
            init_value,
            computation,
            window_dimensions,
            window_strides,
            &[],
            &padding,
        )
    }

    fn reduce_window_with_general_padding(
        &mut self,
        operand: XlaOp,
        init_value: XlaOp,
        computation: &XlaComputation,
        window_dimensions: &[i64],
        window_strides: &[i64],
        window_dilations: &[i64],
        padding: &[(i64, i64)],
    ) -> XlaOp {
        self.add_instruction(&[operand, init_value], |shapes| {
            let (window, shape) = infer_reduce_window_shape(
                shapes[0].as_array()?,
                shapes[1].as_array()?,
                computation,
                window_dimensions,
                window_strides,
                window_dilations,
                padding,
            )?;
            Ok((
                InstructionKind::ReduceWindow {
                    reducer: computation.clone(),
                    window,
                },
                Shape::Array(shape),
            ))
        })
    }

    fn batch_norm_inference(
        &mut self,
        operand: XlaOp,
        scale: XlaOp,
        offset: XlaOp,
        mean: XlaOp,
        variance: XlaOp,
        epsilon: f32,
        feature_index: i64,
    ) -> XlaOp {
        self.add_instruction(&[operand, scale, offset, mean, variance], |shapes| {
            let input = shapes[0].as_array()?;
            if !input.element_type().is_floating() {
                return Err(EngineError::UnsupportedType {
                    op: "batch-norm-inference",
                    ty: input.element_type(),
                });
            }
            if feature_index < 0 || feature_index as usize >= input.rank() {
                shape_bail!("batch-norm-inference", "feature index {} out of range for {}", feature_index, input);
            }
            let features = input.dims()[feature_index as usize];
            for shape in &shapes[1..] {
                let shape = shape.as_array()?;
                if shape.element_type() != input.element_type() {
                    return Err(EngineError::TypeMismatch {
                        op: "batch-norm-inference",
                        lhs: input.element_type(),
                        rhs: shape.element_type(),
                    });
                }
                if shape.dims() != [features] {
                    shape_bail!(
                        "batch-norm-inference",
                        "per-feature operand {} does not match {} features",
                        shape,
                        features
                    );
                }
            }
            Ok((
                InstructionKind::BatchNormInference {
                    epsilon,
                    feature_index: feature_index as usize,
                },
                Shape::Array(input.clone()),
            ))
        })
    }

    fn tuple(&mut self, elements: &[XlaOp]) -> XlaOp {
        self.add_instruction(elements, |shapes| Ok((InstructionKind::Tuple, Shape::Tuple(shapes.to_vec()))))
    }

    fn get_shape(&self, op: XlaOp) -> Result<Shape> {
        self.operand_shape(op).cloned()
    }

    fn build(&mut self) -> Result<XlaComputation> {
        if let Some(error) = &self.first_error {
            return Err(error.clone());
        }
        if self.instructions.is_empty() {
            return Err(EngineError::InvalidOperand(format!("builder '{}' has no ops", self.name)));
        }

        let mut parameters: Vec<(usize, Shape)> = self
            .instructions
            .iter()
            .filter_map(|i| match &i.kind {
                InstructionKind::Parameter { number, .. } => Some((*number, i.shape.clone())),
                _ => None,
            })
            .collect();
        parameters.sort_by_key(|(number, _)| *number);
        for (expected, (number, _)) in parameters.iter().enumerate() {
            if *number != expected {
                return Err(EngineError::Parameter(format!(
                    "parameter numbers must be contiguous from 0; missing {}",
                    expected
                )));
            }
        }

        let instructions = std::mem::take(&mut self.instructions);
        let root = instructions.len() - 1;
        tracing::debug!(
            builder = %self.name,
            instructions = instructions.len(),
            parameters = parameters.len(),
            "built computation"
        );
        Ok(XlaComputation::new(
            self.name.clone(),
            instructions,
            root,
            parameters.into_iter().map(|(_, shape)| shape).collect(),
        ))
    }
}

fn infer_binary_shape(
    op: BinaryOp,
    lhs: &ArrayShape,
    rhs: &ArrayShape,
    broadcast_dimensions: &[i64],
) -> Result<ArrayShape> {
    if lhs.element_type() != rhs.element_type() {
        return Err(EngineError::TypeMismatch {
            op: "binary",
            lhs: lhs.element_type(),
            rhs: rhs.element_type(),
        });
    }
    let ty = lhs.element_type();
    if op == BinaryOp::Max && ty.is_complex() {
        return Err(EngineError::UnsupportedType { op: "maximum", ty });
    }

    if broadcast_dimensions.is_empty() {
        if lhs.rank() == 0 {
            return Ok(rhs.clone());
        }
        if rhs.rank() == 0 {
            return Ok(lhs.clone());
        }
        if lhs.rank() != rhs.rank() {
            shape_bail!(
                "binary",
                "{} {} {} needs broadcast dimensions for operands of different rank",
                lhs,
                op,
                rhs
            );
        }
        let dims = lhs
            .dims()
            .iter()
            .zip(rhs.dims())
            .map(|(&a, &b)| merge_dimension(a, b))
            .collect::<Option<Vec<_>>>();
        return match dims {
            Some(dims) => Ok(lhs.with_dims(dims)),
            None => shape_bail!("binary", "incompatible shapes {} and {} for {}", lhs, rhs, op),
        };
    }

    let (small, large) = if lhs.rank() < rhs.rank() { (lhs, rhs) } else { (rhs, lhs) };
    if broadcast_dimensions.len() != small.rank() {
        shape_bail!(
            "binary",
            "broadcast dimensions {:?} do not match rank of {}",
            broadcast_dimensions,
            small
        );
    }
    let mut dims = large.dims().to_vec();
    let mut previous = -1i64;
    for (axis, &target) in broadcast_dimensions.iter().enumerate() {
        if target <= previous || target as usize >= large.rank() {
            shape_bail!(
                "binary",
                "broadcast dimensions {:?} must be increasing axes of {}",
                broadcast_dimensions,
                large
            );
        }
        previous = target;
        match merge_dimension(small.dims()[axis], large.dims()[target as usize]) {
            Some(size) => dims[target as usize] = size,
            None => shape_bail!(
                "binary",
                "axis {} of {} does not broadcast to axis {} of {}",
                axis,
                small,
                target,
                large
            ),
        }
    }
    Ok(large.with_dims(dims))
}

fn merge_dimension(a: i64, b: i64) -> Option<i64> {
    if a == b || b == 1 {
        Some(a)
    } else if a == 1 {
        Some(b)
    } else {
        None
    }
}

fn infer_dot_shape(lhs: &ArrayShape, rhs: &ArrayShape, dnums: &DotDimensionNumbers) -> Result<ArrayShape> {
    if lhs.element_type() != rhs.element_type() {
        return Err(EngineError::TypeMismatch {
            op: "dot",
            lhs: lhs.element_type(),
            rhs: rhs.element_type(),
        });
    }
    if !dnums.lhs_batch_dimensions.is_empty() || !dnums.rhs_batch_dimensions.is_empty() {
        shape_bail!("dot", "batch dimensions are not supported");
    }
    if dnums.lhs_contracting_dimensions.len() != dnums.rhs_contracting_dimensions.len() {
        shape_bail!("dot", "contracting dimension lists differ in length");
    }
    for (&l, &r) in dnums.lhs_contracting_dimensions.iter().zip(&dnums.rhs_contracting_dimensions) {
        if l < 0 || l as usize >= lhs.rank() || r < 0 || r as usize >= rhs.rank() {
            shape_bail!("dot", "contracting dimensions ({}, {}) out of range for {} x {}", l, r, lhs, rhs);
        }
        if lhs.dims()[l as usize] != rhs.dims()[r as usize] {
            shape_bail!("dot", "contracting dimension sizes differ for {} x {}", lhs, rhs);
        }
    }
    let mut dims: Vec<i64> = (0..lhs.rank() as i64)
        .filter(|axis| !dnums.lhs_contracting_dimensions.contains(axis))
        .map(|axis| lhs.dims()[axis as usize])
        .collect();
    dims.extend(
        (0..rhs.rank() as i64)
            .filter(|axis| !dnums.rhs_contracting_dimensions.contains(axis))
            .map(|axis| rhs.dims()[axis as usize]),
    );
    Ok(lhs.with_dims(dims))
}

fn per_axis_or_default(values: &[i64], count: usize, default: i64, what: &str, op: &'static str) -> Result<Vec<i64>> {
    if values.is_empty() {
        return Ok(vec![default; count]);
    }
    if values.len() != count {
        shape_bail!(op, "{} {:?} should have {} entries", what, values, count);
    }
    if values.iter().any(|&v| v < 1) {
        shape_bail!(op, "{} {:?} must be positive", what, values);
    }
    Ok(values.to_vec())
}

fn infer_conv_shape(
    lhs: &ArrayShape,
    rhs: &ArrayShape,
    window_strides: &[i64],
    padding: &[(i64, i64)],
    lhs_dilation: &[i64],
    rhs_dilation: &[i64],
    dnums: &ConvolutionDimensionNumbers,
) -> Result<(Vec<WindowDimension>, ArrayShape)> {
    const OP: &str = "convolution";
    if lhs.element_type() != rhs.element_type() {
        return Err(EngineError::TypeMismatch {
            op: OP,
            lhs: lhs.element_type(),
            rhs: rhs.element_type(),
        });
    }
    let n = dnums.num_spatial();
    if lhs.rank() != n + 2 || rhs.rank() != n + 2 {
        shape_bail!(OP, "input {} and kernel {} must have rank {}", lhs, rhs, n + 2);
    }
    let strides = per_axis_or_default(window_strides, n, 1, "window strides", OP)?;
    let lhs_dilation = per_axis_or_default(lhs_dilation, n, 1, "lhs dilation", OP)?;
    let rhs_dilation = per_axis_or_default(rhs_dilation, n, 1, "rhs dilation", OP)?;
    let padding = if padding.is_empty() { vec![(0, 0); n] } else { padding.to_vec() };
    if padding.len() != n {
        shape_bail!(OP, "padding {:?} should have {} entries", padding, n);
    }

    let input_features = lhs.dims()[dnums.input_feature_dimension];
    let kernel_features = rhs.dims()[dnums.kernel_input_feature_dimension];
    if input_features != kernel_features {
        shape_bail!(
            OP,
            "input has {} features but kernel expects {} ({} vs {})",
            input_features,
            kernel_features,
            lhs,
            rhs
        );
    }

    let mut window = Vec::with_capacity(n);
    let mut dims = vec![0i64; n + 2];
    dims[dnums.output_batch_dimension] = lhs.dims()[dnums.input_batch_dimension];
    dims[dnums.output_feature_dimension] = rhs.dims()[dnums.kernel_output_feature_dimension];
    for i in 0..n {
        let dim = WindowDimension {
            size: rhs.dims()[dnums.kernel_spatial_dimensions[i]],
            stride: strides[i],
            padding_low: padding[i].0,
            padding_high: padding[i].1,
            window_dilation: rhs_dilation[i],
            base_dilation: lhs_dilation[i],
        };
        dims[dnums.output_spatial_dimensions[i]] = dim.output_size(lhs.dims()[dnums.input_spatial_dimensions[i]]);
        window.push(dim);
    }
    Ok((window, lhs.with_dims(dims)))
}

fn infer_reduce_window_shape(
    operand: &ArrayShape,
    init: &ArrayShape,
    computation: &XlaComputation,
    window_dimensions: &[i64],
    window_strides: &[i64],
    window_dilations: &[i64],
    padding: &[(i64, i64)],
) -> Result<(Vec<WindowDimension>, ArrayShape)> {
    const OP: &str = "reduce-window";
    let ty = operand.element_type();
    if init.rank() != 0 || init.element_type() != ty {
        shape_bail!(OP, "init value {} must be a {} scalar", init, ty);
    }
    let scalar = Shape::array(ty, Vec::new());
    let params = computation.parameter_shapes();
    if params.len() != 2 || params.iter().any(|p| *p != scalar) || *computation.result_shape() != scalar {
        shape_bail!(OP, "reducer '{}' must map two {} scalars to one", computation.name(), ty);
    }
    let rank = operand.rank();
    let sizes = per_axis_or_default(window_dimensions, rank, 1, "window dimensions", OP)?;
    let strides = per_axis_or_default(window_strides, rank, 1, "window strides", OP)?;
    let dilations = per_axis_or_default(window_dilations, rank, 1, "window dilations", OP)?;
    let padding = if padding.is_empty() { vec![(0, 0); rank] } else { padding.to_vec() };
    if padding.len() != rank || padding.iter().any(|&(lo, hi)| lo < 0 || hi < 0) {
        shape_bail!(OP, "padding {:?} invalid for rank {}", padding, rank);
    }

    let window: Vec<WindowDimension> = (0..rank)
        .map(|axis| WindowDimension {
            size: sizes[axis],
            stride: strides[axis],
            padding_low: padding[axis].0,
            padding_high: padding[axis].1,
            window_dilation: dilations[axis],
            base_dilation: 1,
        })
        .collect();
    let dims: Vec<i64> = window
        .iter()
        .zip(operand.dims())
        .map(|(dim, &size)| dim.output_size(size))
        .collect();
    Ok((window, operand.with_dims(dims)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_add(ty: PrimitiveType) -> XlaComputation {
        let mut b = XlaBuilder::new("add");
        let x = b.parameter(0, &Shape::array(ty, vec![]), "x");
        let y = b.parameter(1, &Shape::array(ty, vec![]), "y");
        b.add(x, y, &[]);
        b.build().unwrap()
    }

    #[test]
    fn test_binary_broadcast_dimensions() {
        let mut b = XlaBuilder::new("test");
        let x = b.parameter(0, &Shape::array(PrimitiveType::F32, vec![2, 3, 4]), "x");
        let bias = b.parameter(1, &Shape::array(PrimitiveType::F32, vec![3]), "bias");
        let sum = b.add(x, bias, &[1]);
        assert_eq!(b.get_shape(sum).unwrap().dims(), &[2, 3, 4]);
    }

    #[test]
    fn test_degenerate_dimension_broadcast() {
        let mut b = XlaBuilder::new("test");
        let x = b.parameter(0, &Shape::array(PrimitiveType::F32, vec![2, 3]), "x");
        let m = b.parameter(1, &Shape::array(PrimitiveType::F32, vec![2, 1]), "m");
        let diff = b.sub(x, m, &[]);
        assert_eq!(b.get_shape(diff).unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn test_shape_error_surfaces_at_build() {
        let mut b = XlaBuilder::new("test");
        let x = b.parameter(0, &Shape::array(PrimitiveType::F32, vec![2, 3]), "x");
        let y = b.parameter(1, &Shape::array(PrimitiveType::F32, vec![4]), "y");
        let bad = b.add(x, y, &[]);
        assert!(!bad.is_valid());
        // Later ops on the failed handle do not replace the first error.
        let _ = b.exp(bad);
        let err = b.build().unwrap_err();
        assert!(matches!(err, EngineError::Shape { op: "binary", .. }));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut b = XlaBuilder::new("test");
        let x = b.parameter(0, &Shape::array(PrimitiveType::F32, vec![2]), "x");
        let y = b.parameter(1, &Shape::array(PrimitiveType::S32, vec![2]), "y");
        b.mul(x, y, &[]);
        assert!(matches!(b.build(), Err(EngineError::TypeMismatch { .. })));
    }

    #[test]
    fn test_parameters_must_be_contiguous() {
        let mut b = XlaBuilder::new("test");
        b.parameter(1, &Shape::array(PrimitiveType::F32, vec![2]), "x");
        assert!(matches!(b.build(), Err(EngineError::Parameter(_))));
    }

    #[test]
    fn test_foreign_op_is_rejected() {
        let mut a = XlaBuilder::new("a");
        let mut b = XlaBuilder::new("b");
        let x = a.parameter(0, &Shape::array(PrimitiveType::F32, vec![2]), "x");
        b.exp(x);
        assert!(matches!(b.build(), Err(EngineError::InvalidOperand(_))));
    }

    #[test]
    fn test_conv_output_shape() {
        let mut b = XlaBuilder::new("conv");
        let x = b.parameter(0, &Shape::array(PrimitiveType::F32, vec![1, 4, 5, 5]), "x");
        let w = b.parameter(1, &Shape::array(PrimitiveType::F32, vec![8, 4, 3, 3]), "w");
        let y = b.conv_general_dilated(
            x,
            w,
            &[2, 2],
            &[(1, 1), (1, 1)],
            &[],
            &[],
            &ConvolutionDimensionNumbers::create_default(2),
        );
        assert_eq!(b.get_shape(y).unwrap().dims(), &[1, 8, 3, 3]);
    }

    #[test]
    fn test_reduce_window_same_padding_keeps_size() {
        let mut b = XlaBuilder::new("rw");
        let x = b.parameter(0, &Shape::array(PrimitiveType::F32, vec![1, 5, 2, 2]), "x");
        let zero = b.constant_literal(&Literal::zero(PrimitiveType::F32));
        let add = scalar_add(PrimitiveType::F32);
        let y = b.reduce_window(x, zero, &add, &[1, 3, 1, 1], &[1, 1, 1, 1], Padding::Same);
        assert_eq!(b.get_shape(y).unwrap().dims(), &[1, 5, 2, 2]);
    }

    #[test]
    fn test_dot_general_contracting() {
        let mut b = XlaBuilder::new("dot");
        let a = b.parameter(0, &Shape::array(PrimitiveType::F32, vec![3, 2]), "a");
        let c = b.parameter(1, &Shape::array(PrimitiveType::F32, vec![3, 4]), "c");
        let y = b.dot_general(a, c, &DotDimensionNumbers::contracting(0, 0));
        assert_eq!(b.get_shape(y).unwrap().dims(), &[2, 4]);
    }
}
