//! Graph translation driver
//!
//! A [`Translator`] lowers one [`GraphIR`] onto an [`XlaBuilder`] in four
//! steps that must run in order:
//!
//! ```text
//! Created --handle_inputs--> InputsBound --translate_nodes--> NodesTranslated
//!         --handle_outputs--> OutputsBound --build--> Executor
//! ```
//!
//! Constants (initializers, or weight descriptors supplied by the caller)
//! are bound first, every other graph input becomes a parameter, each node
//! is dispatched through the [`OperatorRegistry`], and the graph outputs
//! are gathered into one tuple result. A failed step leaves the translator
//! unusable; every later call returns `InvalidState`.

use crate::descriptor::{read_literal, TensorDescriptor, TAG_TENSOR_DESCRIPTOR_V1};
use crate::executor::{Executor, IoMetadata};
use crate::ir::GraphIR;
use crate::proto::tensor_proto::DataType;
use crate::registry::{LoweringContext, OperatorRegistry, ValueLiteralMap, ValueOpMap};
use crate::utils::{data_type, data_type_from_code, primitive_type};
use crate::{CompilerError, Result};
use onnx_xla_engine::{ComputationBuilder, ComputationClient, LocalClient, Shape, XlaBuilder};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Progress of a [`Translator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorState {
    Created,
    InputsBound,
    NodesTranslated,
    OutputsBound,
}

pub struct Translator<'r> {
    ir: GraphIR,
    registry: &'r OperatorRegistry,
    builder: XlaBuilder,
    state: TranslatorState,
    poisoned: bool,
    value_to_op: ValueOpMap,
    value_to_literal: ValueLiteralMap,
    parameters: Vec<String>,
    io: FxHashMap<String, IoMetadata>,
}

impl Translator<'static> {
    /// Translator over the built-in operator set
    pub fn new(ir: GraphIR) -> Self {
        Self::with_registry(ir, OperatorRegistry::global())
    }
}

impl<'r> Translator<'r> {
    pub fn with_registry(ir: GraphIR, registry: &'r OperatorRegistry) -> Self {
        let builder = XlaBuilder::new(if ir.name().is_empty() { "onnx_graph" } else { ir.name() });
        Self {
            ir,
            registry,
            builder,
            state: TranslatorState::Created,
            poisoned: false,
            value_to_op: ValueOpMap::new(),
            value_to_literal: ValueLiteralMap::default(),
            parameters: Vec::new(),
            io: FxHashMap::default(),
        }
    }

    pub fn state(&self) -> TranslatorState {
        self.state
    }

    pub fn graph(&self) -> &GraphIR {
        &self.ir
    }

    /// Runtime inputs bound so far, by parameter number
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Run `step` if the translator is in `from`, moving to `to` on success
    /// and poisoning it on failure.
    fn advance(
        &mut self,
        from: TranslatorState,
        to: TranslatorState,
        step: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        if self.poisoned {
            return Err(CompilerError::InvalidState("an earlier translation step failed".to_string()));
        }
        if self.state != from {
            return Err(CompilerError::InvalidState(format!(
                "expected translator state {:?}, found {:?}",
                from, self.state
            )));
        }
        match step(self) {
            Ok(()) => {
                self.state = to;
                Ok(())
            }
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    /// Bind constants and parameters.
    ///
    /// Constant data comes either from the model's initializers or from
    /// `weights`, never both. Graph inputs left unbound become parameters
    /// numbered from 0 in input order.
    pub fn handle_inputs(&mut self, weights: &[TensorDescriptor]) -> Result<()> {
        self.advance(TranslatorState::Created, TranslatorState::InputsBound, |t| {
            t.bind_constants(weights)?;
            t.bind_parameters()
        })
    }

    fn bind_constants(&mut self, weights: &[TensorDescriptor]) -> Result<()> {
        if !self.ir.initializers.is_empty() && !weights.is_empty() {
            return Err(CompilerError::ConflictingWeights);
        }

        for (name, literal) in &self.ir.initializers {
            let op = self.builder.constant_literal(literal);
            self.value_to_op.bind(name, op);
            self.value_to_literal.insert(name.clone(), literal.clone());
        }

        for weight in weights {
            let literal = {
                if weight.tag != TAG_TENSOR_DESCRIPTOR_V1 {
                    return Err(CompilerError::UnsupportedTag(weight.tag));
                }
                let value = self
                    .ir
                    .value(&weight.name)
                    .filter(|_| self.ir.input_names().contains(&weight.name))
                    .ok_or_else(|| CompilerError::InvalidName(weight.name.clone()))?;
                let weight_type = data_type_from_code(weight.data_type)?;
                if weight_type != value.elem_type {
                    return Err(CompilerError::MismatchingDatatype {
                        name: weight.name.clone(),
                        expected: format!("{:?}", value.elem_type),
                        actual: format!("{:?}", weight_type),
                    });
                }
                weight.check_tag_and_memory()?;
                let dims = weight.dims_i64();
                let declared = value.dims.as_deref().unwrap_or_default();
                let matches = declared.len() == dims.len()
                    && declared
                        .iter()
                        .zip(&dims)
                        .all(|(d, &w)| d.as_static().map_or(true, |d| d == w));
                if !matches {
                    return Err(CompilerError::MismatchingShape {
                        name: weight.name.clone(),
                        expected: declared.iter().map(|d| d.as_static().unwrap_or(-1)).collect(),
                        actual: dims,
                    });
                }
                if self.value_to_op.contains(&weight.name) {
                    return Err(CompilerError::InvalidName(format!("weight '{}' supplied twice", weight.name)));
                }
                // SAFETY: the descriptor's creator vouched for the buffer
                // when building its HostBuffer; type and dims are checked.
                unsafe { read_literal(weight.buffer, weight_type, &dims)? }
            };
            let op = self.builder.constant_literal(&literal);
            self.value_to_op.bind(&weight.name, op);
            self.value_to_literal.insert(weight.name.clone(), literal);
        }
        Ok(())
    }

    fn bind_parameters(&mut self) -> Result<()> {
        for name in self.ir.input_names() {
            if self.value_to_op.contains(name) {
                continue;
            }
            let value = self.ir.require_value(name)?;
            let ty = primitive_type(value.elem_type)?;
            let dims = value.static_dims().ok_or_else(|| {
                CompilerError::UnsupportedShape(format!("graph input {} has dynamic dimensions", value))
            })?;
            let number = self.parameters.len();
            let op = self.builder.parameter(number, &Shape::array(ty, dims.clone()), name);
            self.value_to_op.bind(name, op);
            self.io.insert(
                name.clone(),
                IoMetadata {
                    data_type: value.elem_type,
                    dims,
                },
            );
            self.parameters.push(name.clone());
        }
        debug!(
            parameters = self.parameters.len(),
            constants = self.value_to_literal.len(),
            "graph inputs bound"
        );
        Ok(())
    }

    /// Lower every node in graph order
    pub fn translate_nodes(&mut self) -> Result<()> {
        self.advance(TranslatorState::InputsBound, TranslatorState::NodesTranslated, |t| {
            let Translator {
                ir,
                registry,
                builder,
                value_to_op,
                value_to_literal,
                ..
            } = t;
            let ir: &GraphIR = ir;
            for node in ir.nodes() {
                let mut ctx = LoweringContext::new(ir, &mut *builder, &mut *value_to_op, &*value_to_literal);
                registry.translate(node, &mut ctx)?;
            }
            Ok(())
        })
    }

    /// Gather the graph outputs into the tuple result and record their
    /// metadata
    pub fn handle_outputs(&mut self) -> Result<()> {
        self.advance(TranslatorState::NodesTranslated, TranslatorState::OutputsBound, |t| {
            let mut ops = Vec::with_capacity(t.ir.outputs.len());
            for name in &t.ir.outputs {
                let op = t.value_to_op.get(name)?;
                let shape = t.builder.get_array_shape(op).map_err(CompilerError::CouldNotBuild)?;
                let declared = t.ir.value(name);
                let elem_type = match declared.map(|value| value.elem_type) {
                    Some(DataType::Undefined) | None => data_type(shape.element_type()),
                    Some(elem_type) => elem_type,
                };
                if let Some(dims) = declared.and_then(|value| value.static_dims()) {
                    if dims != shape.dims() {
                        return Err(CompilerError::InvalidModel(format!(
                            "output '{}' is declared {:?} but computes {:?}",
                            name,
                            dims,
                            shape.dims()
                        )));
                    }
                }
                t.io.insert(
                    name.clone(),
                    IoMetadata {
                        data_type: elem_type,
                        dims: shape.dims().to_vec(),
                    },
                );
                ops.push(op);
            }
            t.builder.tuple(&ops);
            Ok(())
        })
    }

    /// Finalize the computation into an [`Executor`] running on `client`
    pub fn build(mut self, client: Arc<dyn ComputationClient>) -> Result<Executor> {
        if self.poisoned || self.state != TranslatorState::OutputsBound {
            return Err(CompilerError::InvalidState(format!(
                "cannot build a translator in state {:?}",
                self.state
            )));
        }
        let computation = self.builder.build().map_err(CompilerError::CouldNotBuild)?;
        info!(
            graph = computation.name(),
            nodes = self.ir.nodes().len(),
            instructions = computation.instruction_count(),
            parameters = self.parameters.len(),
            outputs = self.ir.outputs.len(),
            "graph translated"
        );
        Ok(Executor::new(
            computation,
            client,
            self.parameters,
            self.ir.outputs,
            self.io,
        ))
    }

    /// Every step in order, executing on a [`LocalClient`]
    pub fn translate(self, weights: &[TensorDescriptor]) -> Result<Executor> {
        self.translate_on(weights, Arc::new(LocalClient::new()))
    }

    /// Every step in order, executing on `client`
    pub fn translate_on(mut self, weights: &[TensorDescriptor], client: Arc<dyn ComputationClient>) -> Result<Executor> {
        self.handle_inputs(weights)?;
        self.translate_nodes()?;
        self.handle_outputs()?;
        self.build(client)
    }
}
