//! ONNX model ingestion
//!
//! Decodes model bytes, validates the graph structure, decodes initializer
//! data into literals and runs shape inference so that every value the
//! supported operators produce carries an element type and dimensions.

use super::graph::{static_dims, Attribute, Dim, GraphIR, Node, TensorValue};
use super::shape_inference::ShapeInference;
use crate::proto::attribute_proto::AttributeType;
use crate::proto::tensor_proto::DataType;
use crate::proto::tensor_shape_proto::dimension;
use crate::proto::type_proto;
use crate::proto::{AttributeProto, ModelProto, TensorProto, ValueInfoProto};
use crate::utils::{data_type_from_code, primitive_type};
use crate::{CompilerError, Result};
use half::f16;
use num_complex::Complex32;
use onnx_xla_engine::{Literal, LiteralData, PrimitiveType};
use prost::Message;
use rustc_hash::FxHashSet;

impl GraphIR {
    /// Decode and ingest a serialized `ModelProto`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let model = ModelProto::decode(bytes)?;
        Self::from_model(&model)
    }

    /// Ingest a decoded model
    pub fn from_model(model: &ModelProto) -> Result<Self> {
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| CompilerError::InvalidModel("model has no graph".to_string()))?;

        let opset_version = model
            .opset_import
            .iter()
            .filter(|opset| opset.domain.is_empty() || opset.domain == "ai.onnx")
            .map(|opset| opset.version)
            .max()
            .unwrap_or(0);

        let mut ir = GraphIR {
            name: graph.name.clone(),
            ir_version: model.ir_version,
            opset_version,
            ..Default::default()
        };

        for input in &graph.input {
            let value = declared_value(input)?;
            if ir.values.insert(value.name.clone(), value).is_some() {
                return Err(CompilerError::InvalidModel(format!("graph input '{}' declared twice", input.name)));
            }
            ir.inputs.push(input.name.clone());
        }

        for tensor in &graph.initializer {
            if tensor.name.is_empty() {
                return Err(CompilerError::InvalidModel("initializer without a name".to_string()));
            }
            let literal = tensor_to_literal(tensor)?;
            let elem_type = data_type_from_code(tensor.data_type).map_err(|_| invalid_type(&tensor.name))?;
            match ir.values.get(&tensor.name) {
                Some(declared) => {
                    if declared.elem_type != elem_type {
                        return Err(CompilerError::InvalidModel(format!(
                            "initializer '{}' is {:?} but its input is declared {:?}",
                            tensor.name, elem_type, declared.elem_type
                        )));
                    }
                }
                None => {
                    // Initializers need not be listed as graph inputs.
                    let value = TensorValue::new(&tensor.name, elem_type, Some(static_dims(&tensor.dims)));
                    ir.values.insert(tensor.name.clone(), value);
                    ir.inputs.push(tensor.name.clone());
                }
            }
            if let Some(value) = ir.values.get_mut(&tensor.name) {
                value.dims = Some(static_dims(&tensor.dims));
            }
            ir.initializers.push((tensor.name.clone(), literal));
        }

        let mut defined: FxHashSet<String> = ir.inputs.iter().cloned().collect();
        for (index, proto) in graph.node.iter().enumerate() {
            let node = Node::from_proto(proto, index)?;
            for input in node.present_inputs() {
                if !defined.contains(input) {
                    return Err(CompilerError::InvalidModel(format!(
                        "{} node '{}' reads '{}' before it is produced",
                        node.kind, node.name, input
                    )));
                }
            }
            for output in node.outputs.iter().filter(|name| !name.is_empty()) {
                if !defined.insert(output.clone()) {
                    return Err(CompilerError::InvalidModel(format!("value '{}' is produced twice", output)));
                }
            }
            ir.nodes.push(node);
        }

        // Declared intermediate and output types seed shape inference.
        for info in graph.value_info.iter().chain(&graph.output) {
            if !defined.contains(&info.name) {
                if graph.output.iter().any(|output| output.name == info.name) {
                    return Err(CompilerError::InvalidModel(format!(
                        "graph output '{}' is never produced",
                        info.name
                    )));
                }
                continue;
            }
            if !ir.values.contains_key(&info.name) {
                let value = declared_value(info)?;
                ir.values.insert(value.name.clone(), value);
            }
        }
        ir.outputs = graph.output.iter().map(|output| output.name.clone()).collect();

        ShapeInference::new().infer(&mut ir)?;
        ir.recount_uses();

        tracing::debug!(
            graph = %ir.name,
            nodes = ir.nodes.len(),
            inputs = ir.inputs.len(),
            initializers = ir.initializers.len(),
            outputs = ir.outputs.len(),
            opset = ir.opset_version,
            "ingested model"
        );
        Ok(ir)
    }
}

fn invalid_type(name: &str) -> CompilerError {
    CompilerError::InvalidModel(format!("value '{}' has an unsupported element type", name))
}

/// Declared type of a graph input, output or value_info entry
fn declared_value(info: &ValueInfoProto) -> Result<TensorValue> {
    if info.name.is_empty() {
        return Err(CompilerError::InvalidModel("value declaration without a name".to_string()));
    }
    let tensor = match info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
        Some(type_proto::Value::TensorType(tensor)) => tensor,
        None => return Ok(TensorValue::new(&info.name, DataType::Undefined, None)),
    };
    let elem_type = data_type_from_code(tensor.elem_type).map_err(|_| invalid_type(&info.name))?;
    if elem_type != DataType::Undefined {
        primitive_type(elem_type).map_err(|_| invalid_type(&info.name))?;
    }
    let dims = tensor.shape.as_ref().map(|shape| {
        shape
            .dim
            .iter()
            .map(|dim| match &dim.value {
                Some(dimension::Value::DimValue(d)) => Dim::Static(*d),
                Some(dimension::Value::DimParam(name)) => Dim::Symbolic(name.clone()),
                None => Dim::Symbolic(String::new()),
            })
            .collect()
    });
    Ok(TensorValue::new(&info.name, elem_type, dims))
}

pub(crate) fn decode_attribute(attribute: &AttributeProto, node_name: &str) -> Result<Attribute> {
    let kind = AttributeType::try_from(attribute.r#type).unwrap_or(AttributeType::Undefined);
    let utf8 = |bytes: &[u8]| {
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            CompilerError::InvalidAttribute(format!(
                "node '{}': attribute '{}' is not valid UTF-8",
                node_name, attribute.name
            ))
        })
    };
    Ok(match kind {
        AttributeType::Float => Attribute::Float(attribute.f),
        AttributeType::Int => Attribute::Int(attribute.i),
        AttributeType::String => Attribute::String(utf8(&attribute.s)?),
        AttributeType::Tensor => match &attribute.t {
            Some(tensor) => Attribute::Tensor(tensor_to_literal(tensor)?),
            None => {
                return Err(CompilerError::InvalidAttribute(format!(
                    "node '{}': tensor attribute '{}' has no value",
                    node_name, attribute.name
                )))
            }
        },
        AttributeType::Floats => Attribute::Floats(attribute.floats.clone()),
        AttributeType::Ints => Attribute::Ints(attribute.ints.clone()),
        AttributeType::Strings => Attribute::Strings(
            attribute
                .strings
                .iter()
                .map(|s| utf8(s))
                .collect::<Result<Vec<_>>>()?,
        ),
        // Untyped attributes from old producers: infer from the populated field.
        AttributeType::Undefined => infer_untyped_attribute(attribute, node_name)?,
        other => {
            return Err(CompilerError::UnsupportedAttribute(format!(
                "node '{}': attribute '{}' has type {:?}",
                node_name, attribute.name, other
            )))
        }
    })
}

fn infer_untyped_attribute(attribute: &AttributeProto, node_name: &str) -> Result<Attribute> {
    if !attribute.ints.is_empty() {
        Ok(Attribute::Ints(attribute.ints.clone()))
    } else if !attribute.floats.is_empty() {
        Ok(Attribute::Floats(attribute.floats.clone()))
    } else if !attribute.s.is_empty() {
        Ok(Attribute::String(String::from_utf8_lossy(&attribute.s).into_owned()))
    } else if attribute.f != 0.0 {
        Ok(Attribute::Float(attribute.f))
    } else if attribute.i != 0 {
        Ok(Attribute::Int(attribute.i))
    } else {
        Err(CompilerError::InvalidAttribute(format!(
            "node '{}': attribute '{}' has no type",
            node_name, attribute.name
        )))
    }
}

/// Little-endian fixed-width chunks of `raw`
fn le_chunks<const N: usize>(raw: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    raw.chunks_exact(N).map(|chunk| {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(chunk);
        bytes
    })
}

/// Decode a `TensorProto` into a literal of its natural element type
pub fn tensor_to_literal(tensor: &TensorProto) -> Result<Literal> {
    let data_type = data_type_from_code(tensor.data_type).map_err(|_| invalid_type(&tensor.name))?;
    let ty = primitive_type(data_type).map_err(|_| invalid_type(&tensor.name))?;
    let raw = &tensor.raw_data;
    let has_raw = !raw.is_empty();
    if has_raw && raw.len() % ty.byte_size() != 0 {
        return Err(CompilerError::InvalidModel(format!(
            "tensor '{}': {} raw bytes is not a multiple of {}",
            tensor.name,
            raw.len(),
            ty.byte_size()
        )));
    }

    let data = match ty {
        PrimitiveType::F32 if has_raw => LiteralData::F32(le_chunks::<4>(raw).map(f32::from_le_bytes).collect()),
        PrimitiveType::F32 => LiteralData::F32(tensor.float_data.clone()),
        PrimitiveType::F64 if has_raw => LiteralData::F64(le_chunks::<8>(raw).map(f64::from_le_bytes).collect()),
        PrimitiveType::F64 => LiteralData::F64(tensor.double_data.clone()),
        PrimitiveType::S64 if has_raw => LiteralData::S64(le_chunks::<8>(raw).map(i64::from_le_bytes).collect()),
        PrimitiveType::S64 => LiteralData::S64(tensor.int64_data.clone()),
        PrimitiveType::S32 if has_raw => LiteralData::S32(le_chunks::<4>(raw).map(i32::from_le_bytes).collect()),
        PrimitiveType::S32 => LiteralData::S32(tensor.int32_data.clone()),
        PrimitiveType::S16 if has_raw => LiteralData::S16(le_chunks::<2>(raw).map(i16::from_le_bytes).collect()),
        PrimitiveType::S16 => LiteralData::S16(tensor.int32_data.iter().map(|&v| v as i16).collect()),
        PrimitiveType::S8 if has_raw => LiteralData::S8(raw.iter().map(|&b| b as i8).collect()),
        PrimitiveType::S8 => LiteralData::S8(tensor.int32_data.iter().map(|&v| v as i8).collect()),
        PrimitiveType::U8 if has_raw => LiteralData::U8(raw.clone()),
        PrimitiveType::U8 => LiteralData::U8(tensor.int32_data.iter().map(|&v| v as u8).collect()),
        PrimitiveType::U16 if has_raw => LiteralData::U16(le_chunks::<2>(raw).map(u16::from_le_bytes).collect()),
        PrimitiveType::U16 => LiteralData::U16(tensor.int32_data.iter().map(|&v| v as u16).collect()),
        PrimitiveType::Pred if has_raw => LiteralData::Pred(raw.iter().map(|&b| b != 0).collect()),
        PrimitiveType::Pred => LiteralData::Pred(tensor.int32_data.iter().map(|&v| v != 0).collect()),
        PrimitiveType::F16 if has_raw => {
            LiteralData::F16(le_chunks::<2>(raw).map(|b| f16::from_bits(u16::from_le_bytes(b))).collect())
        }
        // int32_data holds float16 values widened numerically, the same way outputs are scattered
        PrimitiveType::F16 => LiteralData::F16(tensor.int32_data.iter().map(|&v| f16::from_f32(v as f32)).collect()),
        PrimitiveType::U32 if has_raw => LiteralData::U32(le_chunks::<4>(raw).map(u32::from_le_bytes).collect()),
        PrimitiveType::U32 => LiteralData::U32(tensor.uint64_data.iter().map(|&v| v as u32).collect()),
        PrimitiveType::U64 if has_raw => LiteralData::U64(le_chunks::<8>(raw).map(u64::from_le_bytes).collect()),
        PrimitiveType::U64 => LiteralData::U64(tensor.uint64_data.clone()),
        PrimitiveType::C64 if has_raw => LiteralData::C64(
            le_chunks::<8>(raw)
                .map(|b| {
                    let re = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    let im = f32::from_le_bytes([b[4], b[5], b[6], b[7]]);
                    Complex32::new(re, im)
                })
                .collect(),
        ),
        PrimitiveType::C64 => {
            LiteralData::C64(tensor.float_data.chunks_exact(2).map(|p| Complex32::new(p[0], p[1])).collect())
        }
    };

    Literal::from_data(tensor.dims.clone(), data).map_err(|error| {
        CompilerError::InvalidModel(format!("tensor '{}' data does not match its dims: {}", tensor.name, error))
    })
}
