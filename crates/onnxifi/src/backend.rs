//! Backend and graph objects behind the C handles

use crate::abi::OnnxTensorDescriptorV1;
use crate::error::{OnnxifiError, Result};
use once_cell::sync::Lazy;
use onnx_xla_compiler::{init_logging, BackendConfig, CompilerError, Executor, GraphIR, HostBuffer, TensorDescriptor, Translator};
use onnx_xla_engine::{ComputationClient, LocalClient};
use std::ffi::CStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Process configuration, loaded on first use. Installs logging.
pub static CONFIG: Lazy<BackendConfig> = Lazy::new(|| {
    let (config, error) = match BackendConfig::from_env() {
        Ok(config) => (config, None),
        Err(e) => (BackendConfig::default(), Some(e)),
    };
    init_logging(&config.log_filter);
    if let Some(e) = error {
        warn!(error = %e, "using the default backend config");
    }
    config
});

/// The one device this backend exposes
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendId {
    pub device: u32,
}

/// An initialized backend: the execution client and graph accounting
pub struct Backend {
    client: Arc<dyn ComputationClient>,
    live_graphs: AtomicU64,
    max_graph_count: u64,
    max_graph_size: u64,
}

impl Backend {
    pub fn new(id: BackendId, config: &BackendConfig) -> Self {
        let client: Arc<dyn ComputationClient> = Arc::new(LocalClient::new());
        info!(device = id.device, platform = client.platform_name(), "backend initialized");
        Self {
            client,
            live_graphs: AtomicU64::new(0),
            max_graph_count: config.max_graph_count,
            max_graph_size: config.max_graph_size,
        }
    }

    pub fn live_graphs(&self) -> u64 {
        self.live_graphs.load(Ordering::Acquire)
    }

    /// Ingest and translate `model` into a graph owned by this backend
    pub fn build_graph(self: &Arc<Self>, model: &[u8], weights: &[TensorDescriptor]) -> Result<Graph> {
        if model.is_empty() {
            return Err(OnnxifiError::EmptyModel);
        }
        if model.len() as u64 > self.max_graph_size {
            return Err(OnnxifiError::ModelTooLarge {
                size: model.len(),
                max: self.max_graph_size,
            });
        }
        self.live_graphs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max_graph_count).then_some(n + 1))
            .map_err(|_| OnnxifiError::GraphLimit(self.max_graph_count))?;

        let executor = GraphIR::from_bytes(model)
            .and_then(|ir| Translator::new(ir).translate_on(weights, Arc::clone(&self.client)));
        match executor {
            Ok(executor) => Ok(Graph {
                backend: Arc::clone(self),
                executor,
            }),
            Err(e) => {
                self.live_graphs.fetch_sub(1, Ordering::AcqRel);
                Err(e.into())
            }
        }
    }
}

/// A translated graph; counts against its backend until dropped
pub struct Graph {
    backend: Arc<Backend>,
    pub executor: Executor,
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.backend.live_graphs.fetch_sub(1, Ordering::AcqRel);
        debug!(graph = self.executor.computation().name(), "graph released");
    }
}

/// Copy caller descriptors into owned [`TensorDescriptor`]s.
///
/// # Safety
///
/// A non-null `descriptors` must point to `count` valid descriptors whose
/// names are NUL-terminated and whose shapes hold `dimensions` entries.
pub unsafe fn tensor_descriptors(
    descriptors: *const OnnxTensorDescriptorV1,
    count: u32,
) -> Result<Vec<TensorDescriptor>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if descriptors.is_null() {
        return Err(OnnxifiError::NullPointer("tensor descriptor array"));
    }
    let raw = std::slice::from_raw_parts(descriptors, count as usize);
    let mut converted = Vec::new();
    converted.try_reserve(raw.len()).map_err(CompilerError::from)?;
    for descriptor in raw {
        if descriptor.name.is_null() {
            return Err(OnnxifiError::NullPointer("tensor descriptor name"));
        }
        let name = CStr::from_ptr(descriptor.name)
            .to_str()
            .map_err(|_| CompilerError::InvalidName("tensor descriptor name is not UTF-8".to_string()))?;
        let dims = match descriptor.dimensions {
            0 => Vec::new(),
            _ if descriptor.shape.is_null() => return Err(OnnxifiError::NullPointer("tensor descriptor shape")),
            n => std::slice::from_raw_parts(descriptor.shape, n as usize).to_vec(),
        };
        converted.push(TensorDescriptor {
            tag: descriptor.tag as u32,
            name: name.to_string(),
            // Codes past i32 are never valid ONNX types.
            data_type: i32::try_from(descriptor.data_type).unwrap_or(-1),
            memory_type: descriptor.memory_type,
            dims,
            buffer: HostBuffer::from_raw(descriptor.buffer as usize as *mut u8),
        });
    }
    Ok(converted)
}
