//! ONNX shape inference
//!
//! Propagates element types and dimensions through the graph using ONNX
//! operator semantics.
//!
//! ## Algorithm
//!
//! 1. Start from graph inputs, initializers and declared `value_info`
//! 2. Walk nodes in graph order (producers already precede consumers)
//! 3. Infer each node's outputs from its inputs with an operator-specific rule
//! 4. Store the result on the output's [`TensorValue`]
//!
//! Operators without a rule leave their outputs as declared, or with unknown
//! type and rank. Symbolic dimensions pass through shape-preserving
//! operators unchanged; rules that need arithmetic on sizes require static
//! input dimensions and otherwise leave the output rank-only or unknown.

use super::graph::{static_dims, Dim, GraphIR, Node, TensorValue};
use crate::proto::tensor_proto::DataType;
use crate::utils::{resolve_reshape, unsqueeze_dims};
use crate::window::WindowGeometry;
use crate::{CompilerError, Result};

/// Inferred type and dims of one node output
#[derive(Debug, Clone, PartialEq)]
struct Inferred {
    elem_type: DataType,
    dims: Option<Vec<Dim>>,
}

impl Inferred {
    fn like(value: &TensorValue) -> Self {
        Self {
            elem_type: value.elem_type,
            dims: value.dims.clone(),
        }
    }

    fn fixed(elem_type: DataType, dims: Vec<i64>) -> Self {
        Self {
            elem_type,
            dims: Some(static_dims(&dims)),
        }
    }
}

/// Shape inference engine
#[derive(Debug, Default)]
pub struct ShapeInference;

impl ShapeInference {
    pub fn new() -> Self {
        Self
    }

    /// Infer types and dims for every node output of `graph`
    pub fn infer(&self, graph: &mut GraphIR) -> Result<()> {
        for index in 0..graph.nodes.len() {
            let node = &graph.nodes[index];
            let inferred = self.infer_node(graph, node)?;
            let outputs: Vec<(String, Option<Inferred>)> = node
                .outputs
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(slot, name)| (name.clone(), inferred.get(slot).cloned()))
                .collect();

            for (name, inferred) in outputs {
                let value = graph
                    .values
                    .entry(name.clone())
                    .or_insert_with(|| TensorValue::new(&name, DataType::Undefined, None));
                let Some(inferred) = inferred else {
                    continue;
                };
                if inferred.elem_type != DataType::Undefined {
                    value.elem_type = inferred.elem_type;
                }
                // Declared dims win unless inference produced something at least as precise.
                let keep_declared = match (&value.dims, &inferred.dims) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(declared), Some(dims)) => {
                        let inferred_static = dims.iter().all(|d| d.as_static().is_some());
                        !inferred_static && declared.len() == dims.len()
                    }
                };
                if !keep_declared {
                    value.dims = inferred.dims;
                }
                tracing::trace!(value = %value, "inferred");
            }
        }
        Ok(())
    }

    /// Output types and dims for one node, in output-slot order
    fn infer_node(&self, graph: &GraphIR, node: &Node) -> Result<Vec<Inferred>> {
        let input = |i: usize| -> Result<&TensorValue> { graph.require_value(node.required_input(i)?) };
        let static_input = |i: usize| -> Result<Option<Vec<i64>>> { Ok(input(i)?.static_dims()) };

        match node.kind.as_str() {
            "Add" | "Sub" | "Mul" | "Div" | "Sum" => {
                let operands: Vec<&TensorValue> = node
                    .present_inputs()
                    .map(|name| graph.require_value(name))
                    .collect::<Result<_>>()?;
                let Some(first) = operands.first() else {
                    return Err(CompilerError::InvalidModel(format!(
                        "{} node '{}' has no inputs",
                        node.kind, node.name
                    )));
                };
                let statics: Option<Vec<Vec<i64>>> = operands.iter().map(|v| v.static_dims()).collect();
                let dims = match statics {
                    Some(statics) => {
                        let mut shape = statics[0].clone();
                        for other in &statics[1..] {
                            shape = broadcast_shapes(&shape, other)?;
                        }
                        Some(static_dims(&shape))
                    }
                    None if operands.iter().all(|v| v.dims == first.dims) => first.dims.clone(),
                    None => None,
                };
                Ok(vec![Inferred {
                    elem_type: first.elem_type,
                    dims,
                }])
            }

            "Relu" | "Identity" | "LRN" | "Softmax" => Ok(vec![Inferred::like(input(0)?)]),

            "Dropout" => {
                let x = input(0)?;
                Ok(vec![
                    Inferred::like(x),
                    Inferred {
                        elem_type: DataType::Bool,
                        dims: x.dims.clone(),
                    },
                ])
            }

            "BatchNormalization" => {
                let x = input(0)?;
                let stats = Inferred::like(input(1)?);
                let mut outputs = vec![Inferred::like(x)];
                outputs.extend(std::iter::repeat(stats).take(node.outputs.len().saturating_sub(1)));
                Ok(outputs)
            }

            "Concat" => {
                let axis = node.require_int("axis")?;
                let operands: Vec<&TensorValue> = node
                    .present_inputs()
                    .map(|name| graph.require_value(name))
                    .collect::<Result<_>>()?;
                let Some(first) = operands.first() else {
                    return Err(CompilerError::InvalidModel(format!(
                        "Concat node '{}' has no inputs",
                        node.name
                    )));
                };
                let statics: Option<Vec<Vec<i64>>> = operands.iter().map(|v| v.static_dims()).collect();
                let Some(statics) = statics else {
                    return Ok(vec![Inferred {
                        elem_type: first.elem_type,
                        dims: first.rank().map(|rank| vec![Dim::Symbolic(String::new()); rank]),
                    }]);
                };
                let rank = statics[0].len() as i64;
                let axis = if axis < 0 { axis + rank } else { axis };
                if axis < 0 || axis >= rank {
                    return Err(CompilerError::InvalidAttribute(format!(
                        "Concat node '{}': axis {} out of range for rank {}",
                        node.name, axis, rank
                    )));
                }
                let axis = axis as usize;
                let mut shape = statics[0].clone();
                for other in &statics[1..] {
                    let compatible = other.len() == shape.len()
                        && other.iter().zip(&shape).enumerate().all(|(i, (a, b))| i == axis || a == b);
                    if !compatible {
                        return Err(CompilerError::InvalidModel(format!(
                            "Concat node '{}': {:?} and {:?} differ off axis {}",
                            node.name, statics[0], other, axis
                        )));
                    }
                    shape[axis] += other[axis];
                }
                Ok(vec![Inferred::fixed(first.elem_type, shape)])
            }

            "Conv" => {
                let x = input(0)?;
                let (Some(x_dims), Some(w_dims)) = (x.static_dims(), static_input(1)?) else {
                    return Ok(vec![rank_only(x)]);
                };
                let geometry = WindowGeometry::for_node(node, &x_dims, Some(&w_dims))?;
                let mut shape = vec![x_dims[0], w_dims[0]];
                shape.extend(geometry.output_sizes(&x_dims[2..]));
                Ok(vec![Inferred::fixed(x.elem_type, shape)])
            }

            "MaxPool" | "AveragePool" => {
                let x = input(0)?;
                let Some(x_dims) = x.static_dims() else {
                    return Ok(vec![rank_only(x)]);
                };
                let geometry = WindowGeometry::for_node(node, &x_dims, None)?;
                let shape = geometry.output_sizes(&x_dims);
                Ok(vec![
                    Inferred::fixed(x.elem_type, shape.clone()),
                    Inferred::fixed(DataType::Int64, shape),
                ])
            }

            "GlobalAveragePool" => {
                let x = input(0)?;
                let Some(dims) = &x.dims else {
                    return Ok(vec![Inferred::like(x)]);
                };
                let pooled = dims
                    .iter()
                    .enumerate()
                    .map(|(axis, d)| if axis < 2 { d.clone() } else { Dim::Static(1) })
                    .collect();
                Ok(vec![Inferred {
                    elem_type: x.elem_type,
                    dims: Some(pooled),
                }])
            }

            "Gemm" => {
                let a = input(0)?;
                let (Some(a_dims), Some(b_dims)) = (a.static_dims(), static_input(1)?) else {
                    return Ok(vec![Inferred {
                        elem_type: a.elem_type,
                        dims: Some(vec![Dim::Symbolic(String::new()); 2]),
                    }]);
                };
                if a_dims.len() != 2 || b_dims.len() != 2 {
                    return Err(CompilerError::InvalidModel(format!(
                        "Gemm node '{}' needs rank 2 operands, got {:?} and {:?}",
                        node.name, a_dims, b_dims
                    )));
                }
                let trans_a = node.int_or("transA", 0)? != 0;
                let trans_b = node.int_or("transB", 0)? != 0;
                let m = if trans_a { a_dims[1] } else { a_dims[0] };
                let n = if trans_b { b_dims[0] } else { b_dims[1] };
                Ok(vec![Inferred::fixed(a.elem_type, vec![m, n])])
            }

            "Reshape" => {
                let x = input(0)?;
                let shape_name = node.required_input(1)?;
                let requested = match graph.initializer(shape_name) {
                    Some(literal) => Some(literal.to_i64_vec()?),
                    None => None,
                };
                match (x.static_dims(), requested) {
                    (Some(x_dims), Some(requested)) => {
                        Ok(vec![Inferred::fixed(x.elem_type, resolve_reshape(&x_dims, &requested)?)])
                    }
                    (_, requested) => {
                        let rank = requested
                            .map(|r| r.len())
                            .or_else(|| graph.value(shape_name).and_then(|v| v.static_dims()).and_then(|d| d.first().map(|&n| n as usize)));
                        Ok(vec![Inferred {
                            elem_type: x.elem_type,
                            dims: rank.map(|rank| vec![Dim::Symbolic(String::new()); rank]),
                        }])
                    }
                }
            }

            "Transpose" => {
                let x = input(0)?;
                let Some(dims) = &x.dims else {
                    return Ok(vec![Inferred::like(x)]);
                };
                let permuted = match node.ints("perm")? {
                    Some(perm) => {
                        let mut seen = vec![false; dims.len()];
                        let mut permuted = Vec::with_capacity(perm.len());
                        for &p in perm {
                            let valid = p >= 0 && (p as usize) < dims.len() && !seen[p as usize];
                            if !valid || perm.len() != dims.len() {
                                return Err(CompilerError::InvalidAttribute(format!(
                                    "Transpose node '{}': perm {:?} is not a permutation of rank {}",
                                    node.name,
                                    perm,
                                    dims.len()
                                )));
                            }
                            seen[p as usize] = true;
                            permuted.push(dims[p as usize].clone());
                        }
                        permuted
                    }
                    None => dims.iter().rev().cloned().collect(),
                };
                Ok(vec![Inferred {
                    elem_type: x.elem_type,
                    dims: Some(permuted),
                }])
            }

            "Unsqueeze" => {
                let x = input(0)?;
                let axes = node.require_ints("axes")?;
                let dims = match &x.dims {
                    Some(dims) => Some(unsqueeze_dims(dims, axes, Dim::Static(1))?),
                    None => None,
                };
                Ok(vec![Inferred {
                    elem_type: x.elem_type,
                    dims,
                }])
            }

            other => {
                tracing::debug!(node = %node.name, kind = other, "no shape rule, outputs left as declared");
                Ok(Vec::new())
            }
        }
    }
}

/// Same element type and rank as `value`, every dim unknown
fn rank_only(value: &TensorValue) -> Inferred {
    Inferred {
        elem_type: value.elem_type,
        dims: value.rank().map(|rank| vec![Dim::Symbolic(String::new()); rank]),
    }
}

/// Broadcast two shapes according to NumPy broadcasting rules
pub fn broadcast_shapes(shape1: &[i64], shape2: &[i64]) -> Result<Vec<i64>> {
    let max_len = shape1.len().max(shape2.len());
    let mut output_shape = Vec::with_capacity(max_len);

    for i in 0..max_len {
        let dim1 = if i < shape1.len() { shape1[shape1.len() - 1 - i] } else { 1 };
        let dim2 = if i < shape2.len() { shape2[shape2.len() - 1 - i] } else { 1 };

        if dim1 == dim2 || dim1 == 1 || dim2 == 1 {
            output_shape.push(if dim1 == 1 { dim2 } else { dim1 });
        } else {
            return Err(CompilerError::InvalidModel(format!(
                "Incompatible broadcast dimensions {:?} and {:?}",
                shape1, shape2
            )));
        }
    }

    output_shape.reverse();
    Ok(output_shape)
}
