//! Execution of a translated graph against caller buffers
//!
//! An [`Executor`] owns the built computation plus the element type and
//! static dims of every runtime input and every output, fixed at
//! translation time. [`Executor::init_io`] binds caller buffers after
//! checking them against that metadata; [`Executor::execute_computation`]
//! reads the inputs, runs, and scatters the results back.

use crate::descriptor::{read_literal, write_literal, HostBuffer, TensorDescriptor};
use crate::fence::Event;
use crate::proto::tensor_proto::DataType;
use crate::utils::{data_type_from_code, element_count};
use crate::{CompilerError, Result};
use onnx_xla_engine::{ComputationClient, GlobalData, Literal, XlaComputation};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Expected element type and dims of one graph input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoMetadata {
    pub data_type: DataType,
    pub dims: Vec<i64>,
}

pub struct Executor {
    computation: XlaComputation,
    client: Arc<dyn ComputationClient>,
    /// Runtime parameters, by parameter number
    parameters: Vec<String>,
    /// Graph outputs, in declaration order
    outputs: Vec<String>,
    io: FxHashMap<String, IoMetadata>,
    input_buffers: FxHashMap<String, HostBuffer>,
    output_buffers: FxHashMap<String, HostBuffer>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("computation", &self.computation.name())
            .field("platform", &self.client.platform_name())
            .field("parameters", &self.parameters)
            .field("outputs", &self.outputs)
            .field("bound", &!self.input_buffers.is_empty())
            .finish()
    }
}

impl Executor {
    pub(crate) fn new(
        computation: XlaComputation,
        client: Arc<dyn ComputationClient>,
        parameters: Vec<String>,
        outputs: Vec<String>,
        io: FxHashMap<String, IoMetadata>,
    ) -> Self {
        Self {
            computation,
            client,
            parameters,
            outputs,
            io,
            input_buffers: FxHashMap::default(),
            output_buffers: FxHashMap::default(),
        }
    }

    pub fn computation(&self) -> &XlaComputation {
        &self.computation
    }

    pub fn input_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Runtime input names in parameter order
    pub fn input_names(&self) -> &[String] {
        &self.parameters
    }

    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    pub fn metadata(&self, name: &str) -> Option<&IoMetadata> {
        self.io.get(name)
    }

    /// Check `inputs` and `outputs` against the recorded metadata and bind
    /// their buffers.
    ///
    /// Nothing is rebound unless every descriptor passes.
    pub fn init_io(&mut self, inputs: &[TensorDescriptor], outputs: &[TensorDescriptor]) -> Result<()> {
        if inputs.len() != self.parameters.len() {
            return Err(CompilerError::UnexpectedCount {
                what: "inputs",
                expected: self.parameters.len(),
                actual: inputs.len(),
            });
        }
        if outputs.len() != self.outputs.len() {
            return Err(CompilerError::UnexpectedCount {
                what: "outputs",
                expected: self.outputs.len(),
                actual: outputs.len(),
            });
        }

        let input_names: FxHashSet<&str> = self.parameters.iter().map(String::as_str).collect();
        let output_names: FxHashSet<&str> = self.outputs.iter().map(String::as_str).collect();
        let input_buffers = self.check_descriptors(inputs, &input_names)?;
        let output_buffers = self.check_descriptors(outputs, &output_names)?;

        self.input_buffers = input_buffers;
        self.output_buffers = output_buffers;
        debug!(inputs = inputs.len(), outputs = outputs.len(), "graph io bound");
        Ok(())
    }

    fn check_descriptors(
        &self,
        descriptors: &[TensorDescriptor],
        allowed: &FxHashSet<&str>,
    ) -> Result<FxHashMap<String, HostBuffer>> {
        let mut buffers = FxHashMap::default();
        buffers.try_reserve(descriptors.len())?;
        for descriptor in descriptors {
            descriptor.check_tag_and_memory()?;
            let name = descriptor.name.as_str();
            let Some(metadata) = self.io.get(name).filter(|_| allowed.contains(name)) else {
                return Err(CompilerError::InvalidName(descriptor.name.clone()));
            };
            let data_type = data_type_from_code(descriptor.data_type)?;
            if data_type != metadata.data_type {
                return Err(CompilerError::MismatchingDatatype {
                    name: descriptor.name.clone(),
                    expected: format!("{:?}", metadata.data_type),
                    actual: format!("{:?}", data_type),
                });
            }
            let dims = descriptor.dims_i64();
            if dims != metadata.dims {
                return Err(CompilerError::MismatchingShape {
                    name: descriptor.name.clone(),
                    expected: metadata.dims.clone(),
                    actual: dims,
                });
            }
            if descriptor.buffer.is_null() {
                return Err(CompilerError::InvalidPointer(format!("buffer of '{}' is null", name)));
            }
            if buffers.insert(descriptor.name.clone(), descriptor.buffer).is_some() {
                return Err(CompilerError::InvalidName(format!("'{}' is bound twice", name)));
            }
        }
        Ok(buffers)
    }

    /// Run on literals given in parameter order, returning the outputs in
    /// declaration order
    pub fn execute_literals(&self, arguments: &[Literal]) -> Result<Vec<Literal>> {
        if arguments.len() != self.parameters.len() {
            return Err(CompilerError::UnexpectedCount {
                what: "arguments",
                expected: self.parameters.len(),
                actual: arguments.len(),
            });
        }
        let mut transferred: Vec<GlobalData> = Vec::new();
        transferred.try_reserve(arguments.len())?;
        for argument in arguments {
            transferred.push(self.client.transfer_to_server(argument)?);
        }
        let handles: Vec<&GlobalData> = transferred.iter().collect();
        let result = self.client.execute(&self.computation, &handles)?;
        let results = result.decompose_tuple()?;
        if results.len() != self.outputs.len() {
            return Err(CompilerError::InvalidState(format!(
                "computation returned {} results for {} outputs",
                results.len(),
                self.outputs.len()
            )));
        }
        Ok(results)
    }

    /// Wait for `input_fence`, run on the bound buffers, write the outputs,
    /// then signal `output_fence`.
    ///
    /// On error `output_fence` is left unsignalled.
    pub fn execute_computation(&self, input_fence: &Event, output_fence: &Event) -> Result<()> {
        if self.input_buffers.len() != self.parameters.len() || self.output_buffers.len() != self.outputs.len() {
            return Err(CompilerError::InvalidState("graph io is not bound".to_string()));
        }
        input_fence.wait();

        let mut arguments = Vec::new();
        arguments.try_reserve(self.parameters.len())?;
        for name in &self.parameters {
            let (metadata, buffer) = self.bound(name, &self.input_buffers)?;
            // SAFETY: init_io checked the buffer's element type and dims;
            // the caller keeps it valid while bound.
            let literal = unsafe { read_literal(buffer, metadata.data_type, &metadata.dims)? };
            arguments.push(literal);
        }

        let results = self.execute_literals(&arguments)?;
        for (name, result) in self.outputs.iter().zip(&results) {
            let (metadata, buffer) = self.bound(name, &self.output_buffers)?;
            let count = element_count(&metadata.dims)? as usize;
            // SAFETY: as above, for the output buffer.
            unsafe { write_literal(buffer, result, metadata.data_type, count)? };
        }

        info!(
            computation = self.computation.name(),
            inputs = self.parameters.len(),
            outputs = self.outputs.len(),
            "graph executed"
        );
        output_fence.signal()
    }

    fn bound(&self, name: &str, buffers: &FxHashMap<String, HostBuffer>) -> Result<(&IoMetadata, HostBuffer)> {
        let metadata = self
            .io
            .get(name)
            .ok_or_else(|| CompilerError::InvalidState(format!("no metadata for '{}'", name)))?;
        let buffer = buffers
            .get(name)
            .copied()
            .ok_or_else(|| CompilerError::InvalidState(format!("no buffer bound for '{}'", name)))?;
        Ok((metadata, buffer))
    }
}
