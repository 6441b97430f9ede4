//! Whole-graph test infrastructure
//!
//! Builds small ONNX models in memory, serializes them the way an ONNX
//! producer would, and drives them through ingestion, translation and
//! execution against host buffers.

#![allow(dead_code)]

use onnx_xla_compiler::proto::attribute_proto::AttributeType;
use onnx_xla_compiler::proto::tensor_proto::DataType;
use onnx_xla_compiler::proto::tensor_shape_proto::{dimension::Value as DimValue, Dimension};
use onnx_xla_compiler::proto::type_proto::{Tensor, Value as TypeValue};
use onnx_xla_compiler::proto::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto, TensorShapeProto, TypeProto,
    ValueInfoProto,
};
use onnx_xla_compiler::{HostBuffer, TensorDescriptor};
use prost::Message;

// ============================================================================
// Output Validation
// ============================================================================

/// Assert two tensors are equal within tolerance
pub fn assert_tensors_equal(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Tensor sizes don't match: actual={}, expected={}",
        actual.len(),
        expected.len()
    );

    for (i, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        let diff = (a - e).abs();
        assert!(
            diff <= tolerance,
            "Values don't match at index {}: actual={}, expected={}, diff={}, tolerance={}",
            i,
            a,
            e,
            diff,
            tolerance
        );
    }
}

/// Sequential values (start, start + 1, ...)
pub fn range(start: f32, count: usize) -> Vec<f32> {
    (0..count).map(|i| start + i as f32).collect()
}

/// Descriptor over a host slice
pub fn descriptor<T>(name: &str, data_type: DataType, dims: &[u64], data: &mut [T]) -> TensorDescriptor {
    // SAFETY: tests keep `data` alive and untouched until execution ends.
    let buffer = unsafe { HostBuffer::from_raw(data.as_mut_ptr() as *mut u8) };
    TensorDescriptor::new(name, data_type, dims, buffer)
}

// ============================================================================
// ONNX Graph Builder
// ============================================================================

/// Builder for creating ONNX models programmatically
///
/// # Example
///
/// ```ignore
/// let bytes = OnnxGraphBuilder::new()
///     .add_input("a", &[3], DataType::Float)
///     .add_input("b", &[3], DataType::Float)
///     .add_node("Add", &["a", "b"], &["output"])
///     .add_output("output", &[3], DataType::Float)
///     .to_bytes();
/// ```
pub struct OnnxGraphBuilder {
    nodes: Vec<NodeProto>,
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    initializers: Vec<TensorProto>,
    current_attributes: Vec<AttributeProto>,
    opset: i64,
}

impl OnnxGraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            initializers: Vec::new(),
            current_attributes: Vec::new(),
            opset: 7,
        }
    }

    pub fn with_opset(mut self, version: i64) -> Self {
        self.opset = version;
        self
    }

    /// Add input tensor specification
    pub fn add_input(mut self, name: &str, shape: &[i64], dtype: DataType) -> Self {
        self.inputs.push(Self::create_value_info(name, Some(shape), dtype));
        self
    }

    /// Add input with a named symbolic first dimension
    pub fn add_batched_input(mut self, name: &str, batch: &str, rest: &[i64], dtype: DataType) -> Self {
        let mut info = Self::create_value_info(name, Some(rest), dtype);
        if let Some(TypeValue::TensorType(tensor)) = info.r#type.as_mut().and_then(|t| t.value.as_mut()) {
            if let Some(shape) = tensor.shape.as_mut() {
                shape.dim.insert(
                    0,
                    Dimension {
                        denotation: String::new(),
                        value: Some(DimValue::DimParam(batch.to_string())),
                    },
                );
            }
        }
        self.inputs.push(info);
        self
    }

    /// Add output tensor specification
    pub fn add_output(mut self, name: &str, shape: &[i64], dtype: DataType) -> Self {
        self.outputs.push(Self::create_value_info(name, Some(shape), dtype));
        self
    }

    /// Add a tensor initializer in its typed field
    pub fn add_initializer(mut self, tensor: TensorProto) -> Self {
        self.initializers.push(tensor);
        self
    }

    /// Add a float initializer
    pub fn add_float_initializer(self, name: &str, dims: &[i64], values: Vec<f32>) -> Self {
        self.add_initializer(TensorProto {
            name: name.to_string(),
            dims: dims.to_vec(),
            data_type: DataType::Float as i32,
            float_data: values,
            ..Default::default()
        })
    }

    /// Add an int64 initializer
    pub fn add_int64_initializer(self, name: &str, dims: &[i64], values: Vec<i64>) -> Self {
        self.add_initializer(TensorProto {
            name: name.to_string(),
            dims: dims.to_vec(),
            data_type: DataType::Int64 as i32,
            int64_data: values,
            ..Default::default()
        })
    }

    /// Add operator node
    pub fn add_node(mut self, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        let node = NodeProto {
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: outputs.iter().map(|s| s.to_string()).collect(),
            name: format!("{}_node_{}", op_type.to_lowercase(), self.nodes.len()),
            op_type: op_type.to_string(),
            attribute: std::mem::take(&mut self.current_attributes),
            ..Default::default()
        };
        self.nodes.push(node);
        self
    }

    /// Add integer attribute to next node
    pub fn add_int_attribute(mut self, name: &str, value: i64) -> Self {
        self.current_attributes.push(AttributeProto {
            name: name.to_string(),
            r#type: AttributeType::Int as i32,
            i: value,
            ..Default::default()
        });
        self
    }

    /// Add float attribute to next node
    pub fn add_float_attribute(mut self, name: &str, value: f32) -> Self {
        self.current_attributes.push(AttributeProto {
            name: name.to_string(),
            r#type: AttributeType::Float as i32,
            f: value,
            ..Default::default()
        });
        self
    }

    /// Add integer list attribute to next node
    pub fn add_ints_attribute(mut self, name: &str, values: &[i64]) -> Self {
        self.current_attributes.push(AttributeProto {
            name: name.to_string(),
            r#type: AttributeType::Ints as i32,
            ints: values.to_vec(),
            ..Default::default()
        });
        self
    }

    /// Add string attribute to next node
    pub fn add_string_attribute(mut self, name: &str, value: &str) -> Self {
        self.current_attributes.push(AttributeProto {
            name: name.to_string(),
            r#type: AttributeType::String as i32,
            s: value.as_bytes().to_vec(),
            ..Default::default()
        });
        self
    }

    /// Build final ModelProto
    pub fn build(self) -> ModelProto {
        let graph = GraphProto {
            node: self.nodes,
            name: "test_graph".to_string(),
            initializer: self.initializers,
            input: self.inputs,
            output: self.outputs,
            ..Default::default()
        };

        ModelProto {
            ir_version: 3,
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: self.opset,
            }],
            producer_name: "onnx_xla_test_suite".to_string(),
            producer_version: "1.0".to_string(),
            model_version: 1,
            doc_string: "Graph lowering test".to_string(),
            graph: Some(graph),
            ..Default::default()
        }
    }

    /// Serialize to ONNX binary format
    pub fn to_bytes(self) -> Vec<u8> {
        self.build().encode_to_vec()
    }

    fn create_value_info(name: &str, shape: Option<&[i64]>, dtype: DataType) -> ValueInfoProto {
        let shape = shape.map(|dims| TensorShapeProto {
            dim: dims
                .iter()
                .map(|&dim| Dimension {
                    denotation: String::new(),
                    value: Some(DimValue::DimValue(dim)),
                })
                .collect(),
        });

        ValueInfoProto {
            name: name.to_string(),
            r#type: Some(TypeProto {
                denotation: String::new(),
                value: Some(TypeValue::TensorType(Tensor {
                    elem_type: dtype as i32,
                    shape,
                })),
            }),
            doc_string: String::new(),
        }
    }
}

impl Default for OnnxGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Single Relu over a (2, 3, 4) float tensor
pub fn relu_model(with_initializer: Option<Vec<f32>>) -> Vec<u8> {
    let mut builder = OnnxGraphBuilder::new().add_input("x", &[2, 3, 4], DataType::Float);
    if let Some(values) = with_initializer {
        builder = builder.add_float_initializer("x", &[2, 3, 4], values);
    }
    builder
        .add_node("Relu", &["x"], &["y"])
        .add_output("y", &[2, 3, 4], DataType::Float)
        .to_bytes()
}

/// Alternating-sign input for the Relu graphs
pub fn relu_input() -> Vec<f32> {
    (0..24).map(|i| if i % 2 == 0 { i as f32 } else { -(i as f32) / 2.0 }).collect()
}

pub fn relu_expected() -> Vec<f32> {
    relu_input().into_iter().map(|v| v.max(0.0)).collect()
}
