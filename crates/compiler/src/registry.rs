//! Operator registry
//!
//! Maps an ONNX operator kind to the function that lowers one node of that
//! kind onto a [`ComputationBuilder`]. The built-in table is assembled once,
//! on first use, and is read-only afterwards, so independent graphs can be
//! translated concurrently.

use crate::ir::{GraphIR, Node, TensorValue};
use crate::ops;
use crate::utils::primitive_type;
use crate::{CompilerError, Result};
use once_cell::sync::Lazy;
use onnx_xla_engine::{ComputationBuilder, Literal, PrimitiveType, XlaOp};
use rustc_hash::FxHashMap;

/// Lowers one node, reading its inputs from and binding its outputs into
/// the context.
pub type TranslationFn = fn(&Node, &mut LoweringContext<'_>) -> Result<()>;

/// Constant data for initializers and weights, by value name
pub type ValueLiteralMap = FxHashMap<String, Literal>;

/// Lowered op for every value bound so far.
///
/// Entries are written once. Rebinding a value means two producers claimed
/// the same name, which ingestion rules out, so it panics.
#[derive(Debug, Default)]
pub struct ValueOpMap {
    ops: FxHashMap<String, XlaOp>,
}

impl ValueOpMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &str, op: XlaOp) {
        if self.ops.insert(name.to_string(), op).is_some() {
            panic!("value '{}' was lowered twice", name);
        }
    }

    pub fn get(&self, name: &str) -> Result<XlaOp> {
        self.ops
            .get(name)
            .copied()
            .ok_or_else(|| CompilerError::MissingValue(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// State a translation function works against
pub struct LoweringContext<'a> {
    graph: &'a GraphIR,
    pub builder: &'a mut dyn ComputationBuilder,
    value_to_op: &'a mut ValueOpMap,
    value_to_literal: &'a ValueLiteralMap,
}

impl<'a> LoweringContext<'a> {
    pub fn new(
        graph: &'a GraphIR,
        builder: &'a mut dyn ComputationBuilder,
        value_to_op: &'a mut ValueOpMap,
        value_to_literal: &'a ValueLiteralMap,
    ) -> Self {
        Self {
            graph,
            builder,
            value_to_op,
            value_to_literal,
        }
    }

    pub fn graph(&self) -> &GraphIR {
        self.graph
    }

    /// Lowered op of input `i`
    pub fn input(&self, node: &Node, i: usize) -> Result<XlaOp> {
        self.value_to_op.get(node.required_input(i)?)
    }

    /// Lowered op of input `i`, or `None` when the input is omitted
    pub fn optional_input(&self, node: &Node, i: usize) -> Result<Option<XlaOp>> {
        node.input(i).map(|name| self.value_to_op.get(name)).transpose()
    }

    /// Bind output `i` of `node` to `op`
    pub fn bind_output(&mut self, node: &Node, i: usize, op: XlaOp) -> Result<()> {
        let name = node.required_output(i)?;
        self.value_to_op.bind(name, op);
        Ok(())
    }

    /// Constant data behind input `i`, if it is an initializer or weight
    pub fn input_literal(&self, node: &Node, i: usize) -> Option<&Literal> {
        node.input(i).and_then(|name| self.value_to_literal.get(name))
    }

    pub fn input_value(&self, node: &Node, i: usize) -> Result<&TensorValue> {
        self.graph.require_value(node.required_input(i)?)
    }

    /// Static dims of input `i`.
    ///
    /// Taken from the IR when fully known, otherwise from the shape of the
    /// already-lowered op.
    pub fn static_input_shape(&self, node: &Node, i: usize) -> Result<Vec<i64>> {
        if let Some(dims) = self.input_value(node, i)?.static_dims() {
            return Ok(dims);
        }
        let op = self.input(node, i)?;
        Ok(self.builder.get_array_shape(op)?.dims().to_vec())
    }

    /// Engine element type of input `i`
    pub fn input_type(&self, node: &Node, i: usize) -> Result<PrimitiveType> {
        let op = self.input(node, i)?;
        match self.builder.get_array_shape(op) {
            Ok(shape) => Ok(shape.element_type()),
            Err(_) => primitive_type(self.input_value(node, i)?.elem_type),
        }
    }

    /// Whether output `i` exists and something reads it
    pub fn output_is_used(&self, node: &Node, i: usize) -> bool {
        node.output(i).is_some_and(|name| self.graph.is_used(name))
    }
}

/// Operator kind to translation function
#[derive(Default, Clone)]
pub struct OperatorRegistry {
    table: FxHashMap<&'static str, TranslationFn>,
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry").field("kinds", &self.kinds()).finish()
    }
}

static BUILTIN: Lazy<OperatorRegistry> = Lazy::new(|| {
    let mut registry = OperatorRegistry::new();
    ops::register_all(&mut registry);
    tracing::debug!(operators = registry.len(), "operator registry initialized");
    registry
});

impl OperatorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry of every built-in lowering
    pub fn global() -> &'static OperatorRegistry {
        &BUILTIN
    }

    /// Add a lowering for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if `kind` already has one.
    pub fn register(&mut self, kind: &'static str, translate: TranslationFn) {
        if self.table.insert(kind, translate).is_some() {
            panic!("operator '{}' registered twice", kind);
        }
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.table.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.table.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Lower `node` with its registered function
    pub fn translate(&self, node: &Node, ctx: &mut LoweringContext<'_>) -> Result<()> {
        let Some(translate) = self.table.get(node.kind.as_str()) else {
            return Err(CompilerError::UnsupportedOperator(format!("{} (node '{}')", node.kind, node.name)));
        };
        if !node.domain.is_empty() && node.domain != "ai.onnx" {
            return Err(CompilerError::UnsupportedOperator(format!(
                "{}::{} (node '{}')",
                node.domain, node.kind, node.name
            )));
        }
        tracing::debug!(node = %node.name, kind = %node.kind, "lowering");
        translate(node, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use onnx_xla_engine::XlaBuilder;

    fn noop(_: &Node, _: &mut LoweringContext<'_>) -> Result<()> {
        Ok(())
    }

    fn node(kind: &str) -> Node {
        Node {
            name: "n".to_string(),
            kind: kind.to_string(),
            domain: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: AHashMap::new(),
        }
    }

    #[test]
    fn test_builtin_table_covers_operator_set() {
        let registry = OperatorRegistry::global();
        for kind in [
            "Add", "AveragePool", "BatchNormalization", "Concat", "Conv", "Div", "Dropout", "Gemm",
            "GlobalAveragePool", "Identity", "LRN", "MaxPool", "Mul", "Relu", "Reshape", "Softmax", "Sub", "Sum",
            "Transpose", "Unsqueeze",
        ] {
            assert!(registry.is_registered(kind), "{} missing", kind);
        }
        assert_eq!(registry.len(), 20);
        assert!(!registry.is_registered("Sigmoid"));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = OperatorRegistry::new();
        registry.register("Relu", noop);
        registry.register("Relu", noop);
    }

    #[test]
    fn test_unknown_kind_is_unsupported_operator() {
        let graph = GraphIR::default();
        let mut builder = XlaBuilder::new("t");
        let mut ops = ValueOpMap::new();
        let literals = ValueLiteralMap::default();
        let mut ctx = LoweringContext::new(&graph, &mut builder, &mut ops, &literals);
        let err = OperatorRegistry::new().translate(&node("Relu"), &mut ctx).unwrap_err();
        assert!(matches!(err, CompilerError::UnsupportedOperator(_)));

        let mut registry = OperatorRegistry::new();
        registry.register("Relu", noop);
        assert!(registry.translate(&node("Relu"), &mut ctx).is_ok());
        let mut foreign = node("Relu");
        foreign.domain = "com.example".to_string();
        assert!(registry.translate(&foreign, &mut ctx).is_err());
    }

    #[test]
    #[should_panic(expected = "lowered twice")]
    fn test_rebinding_a_value_panics() {
        let mut builder = XlaBuilder::new("t");
        let op = builder.constant_f64(PrimitiveType::F32, 1.0);
        let mut ops = ValueOpMap::new();
        ops.bind("x", op);
        ops.bind("x", op);
    }
}
