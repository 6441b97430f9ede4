//! In-memory graph IR
//!
//! A [`GraphIR`] is the ingested, shape-inferred form of an ONNX graph:
//! named tensor values with element type and (possibly symbolic)
//! dimensions, constant initializers, and a topologically ordered node list.

use crate::proto::tensor_proto::DataType;
use crate::proto::NodeProto;
use crate::{CompilerError, Result};
use ahash::AHashMap;
use onnx_xla_engine::Literal;
use rustc_hash::FxHashMap;
use std::fmt;

/// One tensor dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(i64),
    /// Named or unnamed dimension unknown until run time
    Symbolic(String),
}

impl Dim {
    pub fn as_static(&self) -> Option<i64> {
        match self {
            Dim::Static(d) => Some(*d),
            Dim::Symbolic(_) => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(d) => write!(f, "{}", d),
            Dim::Symbolic(name) if name.is_empty() => write!(f, "?"),
            Dim::Symbolic(name) => write!(f, "{}", name),
        }
    }
}

/// Convert static dims into [`Dim`]s
pub fn static_dims(dims: &[i64]) -> Vec<Dim> {
    dims.iter().map(|&d| Dim::Static(d)).collect()
}

/// A named tensor flowing through the graph
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    pub name: String,
    pub elem_type: DataType,
    /// `None` when even the rank is unknown
    pub dims: Option<Vec<Dim>>,
    /// Consumers plus graph-output references
    pub use_count: usize,
}

impl TensorValue {
    pub fn new(name: impl Into<String>, elem_type: DataType, dims: Option<Vec<Dim>>) -> Self {
        Self {
            name: name.into(),
            elem_type,
            dims,
            use_count: 0,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    /// Dimensions if every one is statically known
    pub fn static_dims(&self) -> Option<Vec<i64>> {
        self.dims.as_ref()?.iter().map(Dim::as_static).collect()
    }

    pub fn is_used(&self) -> bool {
        self.use_count > 0
    }
}

impl fmt::Display for TensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.name, self.elem_type)?;
        match &self.dims {
            Some(dims) => {
                let dims: Vec<String> = dims.iter().map(Dim::to_string).collect();
                write!(f, "[{}]", dims.join(", "))
            }
            None => write!(f, "[*]"),
        }
    }
}

/// Typed node attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(Literal),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl Attribute {
    fn kind(&self) -> &'static str {
        match self {
            Attribute::Float(_) => "float",
            Attribute::Int(_) => "int",
            Attribute::String(_) => "string",
            Attribute::Tensor(_) => "tensor",
            Attribute::Floats(_) => "floats",
            Attribute::Ints(_) => "ints",
            Attribute::Strings(_) => "strings",
        }
    }
}

/// One operator application
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Operator kind, e.g. `Conv`
    pub kind: String,
    pub domain: String,
    /// Input value names; an empty name marks an omitted optional input
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: AHashMap<String, Attribute>,
}

impl Node {
    /// Name of input `i`, if present and not omitted
    pub fn input(&self, i: usize) -> Option<&str> {
        self.inputs.get(i).map(String::as_str).filter(|name| !name.is_empty())
    }

    /// Name of input `i`, or an error naming the node
    pub fn required_input(&self, i: usize) -> Result<&str> {
        self.input(i)
            .ok_or_else(|| CompilerError::InvalidModel(format!("{} node '{}' is missing input {}", self.kind, self.name, i)))
    }

    pub fn output(&self, i: usize) -> Option<&str> {
        self.outputs.get(i).map(String::as_str).filter(|name| !name.is_empty())
    }

    pub fn required_output(&self, i: usize) -> Result<&str> {
        self.output(i).ok_or_else(|| {
            CompilerError::InvalidModel(format!("{} node '{}' is missing output {}", self.kind, self.name, i))
        })
    }

    /// Present (non-omitted) inputs, in order
    pub fn present_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(String::as_str).filter(|name| !name.is_empty())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    fn wrong_kind(&self, name: &str, expected: &str, found: &Attribute) -> CompilerError {
        CompilerError::InvalidAttribute(format!(
            "{} node '{}': attribute '{}' must be {}, found {}",
            self.kind,
            self.name,
            name,
            expected,
            found.kind()
        ))
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>> {
        match self.attributes.get(name) {
            None => Ok(None),
            Some(Attribute::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(self.wrong_kind(name, "an int", other)),
        }
    }

    pub fn int_or(&self, name: &str, default: i64) -> Result<i64> {
        Ok(self.int(name)?.unwrap_or(default))
    }

    pub fn require_int(&self, name: &str) -> Result<i64> {
        self.int(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn float_or(&self, name: &str, default: f32) -> Result<f32> {
        match self.attributes.get(name) {
            None => Ok(default),
            Some(Attribute::Float(v)) => Ok(*v),
            Some(other) => Err(self.wrong_kind(name, "a float", other)),
        }
    }

    pub fn ints(&self, name: &str) -> Result<Option<&[i64]>> {
        match self.attributes.get(name) {
            None => Ok(None),
            Some(Attribute::Ints(v)) => Ok(Some(v)),
            Some(other) => Err(self.wrong_kind(name, "a list of ints", other)),
        }
    }

    pub fn require_ints(&self, name: &str) -> Result<&[i64]> {
        self.ints(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn string(&self, name: &str) -> Result<Option<&str>> {
        match self.attributes.get(name) {
            None => Ok(None),
            Some(Attribute::String(v)) => Ok(Some(v)),
            Some(other) => Err(self.wrong_kind(name, "a string", other)),
        }
    }

    fn missing(&self, name: &str) -> CompilerError {
        CompilerError::MissingAttribute(format!("{} node '{}' requires '{}'", self.kind, self.name, name))
    }
}

/// Ingested graph
#[derive(Debug, Clone, Default)]
pub struct GraphIR {
    pub(crate) name: String,
    pub(crate) ir_version: i64,
    pub(crate) opset_version: i64,
    pub(crate) inputs: Vec<String>,
    pub(crate) outputs: Vec<String>,
    pub(crate) initializers: Vec<(String, Literal)>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) values: FxHashMap<String, TensorValue>,
}

impl GraphIR {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ir_version(&self) -> i64 {
        self.ir_version
    }

    /// Version of the default-domain operator set
    pub fn opset_version(&self) -> i64 {
        self.opset_version
    }

    /// Graph inputs in declaration order, including those backed by initializers
    pub fn inputs(&self) -> impl Iterator<Item = &TensorValue> {
        self.inputs.iter().filter_map(|name| self.values.get(name))
    }

    pub fn outputs(&self) -> impl Iterator<Item = &TensorValue> {
        self.outputs.iter().filter_map(|name| self.values.get(name))
    }

    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    pub fn initializers(&self) -> &[(String, Literal)] {
        &self.initializers
    }

    pub fn initializer(&self, name: &str) -> Option<&Literal> {
        self.initializers.iter().find(|(n, _)| n == name).map(|(_, literal)| literal)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn value(&self, name: &str) -> Option<&TensorValue> {
        self.values.get(name)
    }

    /// Value declaration, or an `InvalidModel` error naming it
    pub fn require_value(&self, name: &str) -> Result<&TensorValue> {
        self.values
            .get(name)
            .ok_or_else(|| CompilerError::InvalidModel(format!("value '{}' is not declared", name)))
    }

    /// Whether the named value is consumed or is a graph output
    pub fn is_used(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(TensorValue::is_used)
    }

    /// Distinct operator kinds, in first-use order
    pub fn operator_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = Vec::new();
        for node in &self.nodes {
            if !kinds.contains(&node.kind.as_str()) {
                kinds.push(&node.kind);
            }
        }
        kinds
    }

    /// Recount value uses from the node list and graph outputs
    pub(crate) fn recount_uses(&mut self) {
        for value in self.values.values_mut() {
            value.use_count = 0;
        }
        let consumers = self.nodes.iter().flat_map(|node| node.present_inputs());
        for name in consumers.chain(self.outputs.iter().map(String::as_str)) {
            if let Some(value) = self.values.get_mut(name) {
                value.use_count += 1;
            }
        }
    }
}

impl Node {
    /// Node from its protobuf form with attributes decoded
    pub(crate) fn from_proto(node: &NodeProto, index: usize) -> Result<Self> {
        let name = if node.name.is_empty() {
            format!("{}_{}", node.op_type, index)
        } else {
            node.name.clone()
        };
        let mut attributes = AHashMap::with_capacity(node.attribute.len());
        for attribute in &node.attribute {
            attributes.insert(attribute.name.clone(), super::ingest::decode_attribute(attribute, &name)?);
        }
        Ok(Self {
            name,
            kind: node.op_type.clone(),
            domain: node.domain.clone(),
            inputs: node.input.clone(),
            outputs: node.output.clone(),
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(attributes: Vec<(&str, Attribute)>) -> Node {
        Node {
            name: "n".to_string(),
            kind: "Conv".to_string(),
            domain: String::new(),
            inputs: vec!["x".to_string(), String::new(), "b".to_string()],
            outputs: vec!["y".to_string()],
            attributes: attributes.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn test_omitted_inputs_are_skipped() {
        let n = node(vec![]);
        assert_eq!(n.input(0), Some("x"));
        assert_eq!(n.input(1), None);
        assert_eq!(n.input(2), Some("b"));
        assert_eq!(n.present_inputs().collect::<Vec<_>>(), vec!["x", "b"]);
    }

    #[test]
    fn test_attribute_accessors() {
        let n = node(vec![
            ("group", Attribute::Int(2)),
            ("pads", Attribute::Ints(vec![1, 1])),
            ("auto_pad", Attribute::String("VALID".to_string())),
        ]);
        assert_eq!(n.int_or("group", 1).unwrap(), 2);
        assert_eq!(n.int_or("missing", 7).unwrap(), 7);
        assert_eq!(n.ints("pads").unwrap(), Some(&[1i64, 1][..]));
        assert_eq!(n.string("auto_pad").unwrap(), Some("VALID"));
        assert!(matches!(n.require_int("axis"), Err(CompilerError::MissingAttribute(_))));
        assert!(matches!(n.int("pads"), Err(CompilerError::InvalidAttribute(_))));
    }

    #[test]
    fn test_static_dims_requires_every_dim() {
        let mut value = TensorValue::new("x", DataType::Float, Some(vec![Dim::Static(2), Dim::Static(3)]));
        assert_eq!(value.static_dims(), Some(vec![2, 3]));
        value.dims = Some(vec![Dim::Symbolic("N".to_string()), Dim::Static(3)]);
        assert_eq!(value.static_dims(), None);
        assert_eq!(value.to_string(), "x: Float[N, 3]");
    }
}
