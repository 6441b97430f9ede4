//! Exported ONNXIFI entry points
//!
//! Each entry point validates its pointers, resolves handles through the
//! registries, and reports failures as status codes. Nothing unwinds across
//! the boundary: a panic becomes `INTERNAL_ERROR`.
//!
//! The C caller owns every pointer passed in; the registries own the
//! objects behind the handles handed out.

#![allow(non_snake_case)]

use crate::abi::*;
use crate::backend::{tensor_descriptors, Backend, BackendId, CONFIG};
use crate::error::{OnnxifiError, Result};
use crate::handles::{HandleKind, BACKEND_ID_REGISTRY, BACKEND_REGISTRY, EVENT_REGISTRY, GRAPH_REGISTRY};
use crate::info::backend_info;
use once_cell::sync::Lazy;
use onnx_xla_compiler::{check_compatibility, Event, Status};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Run `body`, turning errors and panics into status codes
fn guarded<F>(entry: &'static str, body: F) -> OnnxStatus
where
    F: FnOnce() -> Result<Status>,
{
    Lazy::force(&CONFIG);
    let outcome = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(OnnxifiError::Panic(message))
    });
    match outcome {
        Ok(status) => status.code(),
        Err(e) => {
            let status = e.status();
            if matches!(e, OnnxifiError::Panic(_)) {
                error!(entry, error = %e, "entry point panicked");
            } else {
                debug!(entry, error = %e, %status, "entry point failed");
            }
            status.code()
        }
    }
}

fn invalid(kind: HandleKind, handle: u64) -> OnnxifiError {
    OnnxifiError::InvalidHandle { kind, handle }
}

fn non_null<T>(ptr: *const T, what: &'static str) -> Result<()> {
    if ptr.is_null() {
        return Err(OnnxifiError::NullPointer(what));
    }
    Ok(())
}

/// Only an absent or empty property list is accepted
unsafe fn check_properties(properties: *const u64) -> Result<()> {
    if properties.is_null() {
        return Ok(());
    }
    match *properties {
        PROPERTY_NONE => Ok(()),
        property => Err(OnnxifiError::UnsupportedProperty(property)),
    }
}

fn backend_id(id: OnnxBackendId) -> Result<BackendId> {
    let handle = from_ptr(id);
    BACKEND_ID_REGISTRY
        .lock()
        .cloned(handle)
        .ok_or_else(|| invalid(HandleKind::BackendId, handle))
}

fn event(event: OnnxEvent) -> Result<Arc<Event>> {
    let handle = from_ptr(event);
    EVENT_REGISTRY
        .lock()
        .cloned(handle)
        .ok_or_else(|| invalid(HandleKind::Event, handle))
}

// ============================================================================
// Backend discovery
// ============================================================================

/// # Safety
///
/// `num_backends` must be valid for reads and writes; a non-null
/// `backend_ids` must hold `*num_backends` entries.
#[no_mangle]
pub unsafe extern "C" fn onnxGetBackendIDs(backend_ids: *mut OnnxBackendId, num_backends: *mut usize) -> OnnxStatus {
    guarded("onnxGetBackendIDs", || {
        non_null(num_backends, "backend count")?;
        if backend_ids.is_null() || *num_backends < 1 {
            *num_backends = 1;
            return Ok(Status::Fallback);
        }
        let handle = BACKEND_ID_REGISTRY.lock().insert(BackendId::default());
        *backend_ids = to_ptr(handle);
        *num_backends = 1;
        Ok(Status::Success)
    })
}

/// # Safety
///
/// Safe for any argument value.
#[no_mangle]
pub unsafe extern "C" fn onnxReleaseBackendID(backend_id: OnnxBackendId) -> OnnxStatus {
    guarded("onnxReleaseBackendID", || {
        let handle = from_ptr(backend_id);
        BACKEND_ID_REGISTRY
            .lock()
            .remove(handle)
            .ok_or_else(|| invalid(HandleKind::BackendId, handle))?;
        Ok(Status::Success)
    })
}

/// # Safety
///
/// `info_value_size` must be valid for reads and writes; a non-null
/// `info_value` must hold `*info_value_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn onnxGetBackendInfo(
    backend_id: OnnxBackendId,
    info_type: OnnxBackendInfo,
    info_value: *mut c_void,
    info_value_size: *mut usize,
) -> OnnxStatus {
    guarded("onnxGetBackendInfo", || {
        non_null(info_value_size, "info value size")?;
        self::backend_id(backend_id)?;
        let value = backend_info(info_type, &CONFIG)?;
        Ok(value.write(info_value, &mut *info_value_size))
    })
}

/// # Safety
///
/// A non-null `onnx_model` must hold `onnx_model_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn onnxGetBackendCompatibility(
    backend_id: OnnxBackendId,
    onnx_model_size: usize,
    onnx_model: *const c_void,
) -> OnnxStatus {
    guarded("onnxGetBackendCompatibility", || {
        self::backend_id(backend_id)?;
        non_null(onnx_model, "model")?;
        if onnx_model_size == 0 {
            return Err(OnnxifiError::EmptyModel);
        }
        let model = std::slice::from_raw_parts(onnx_model as *const u8, onnx_model_size);
        check_compatibility(model)?;
        Ok(Status::Success)
    })
}

// ============================================================================
// Backend lifecycle
// ============================================================================

/// # Safety
///
/// `backend` must be valid for writes; a non-null `aux_properties_list`
/// must be readable up to its terminator.
#[no_mangle]
pub unsafe extern "C" fn onnxInitBackend(
    backend_id: OnnxBackendId,
    aux_properties_list: *const u64,
    backend: *mut OnnxBackend,
) -> OnnxStatus {
    guarded("onnxInitBackend", || {
        non_null(backend, "backend")?;
        *backend = std::ptr::null_mut();
        let id = self::backend_id(backend_id)?;
        check_properties(aux_properties_list)?;
        let handle = BACKEND_REGISTRY.lock().insert(Arc::new(Backend::new(id, &CONFIG)));
        *backend = to_ptr(handle);
        Ok(Status::Success)
    })
}

/// # Safety
///
/// Safe for any argument value.
#[no_mangle]
pub unsafe extern "C" fn onnxReleaseBackend(backend: OnnxBackend) -> OnnxStatus {
    guarded("onnxReleaseBackend", || {
        let handle = from_ptr(backend);
        BACKEND_REGISTRY
            .lock()
            .remove(handle)
            .ok_or_else(|| invalid(HandleKind::Backend, handle))?;
        Ok(Status::Success)
    })
}

// ============================================================================
// Events
// ============================================================================

/// # Safety
///
/// `event` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn onnxInitEvent(backend: OnnxBackend, event: *mut OnnxEvent) -> OnnxStatus {
    guarded("onnxInitEvent", || {
        non_null(event, "event")?;
        *event = std::ptr::null_mut();
        let handle = from_ptr(backend);
        if BACKEND_REGISTRY.lock().get(handle).is_none() {
            return Err(invalid(HandleKind::Backend, handle));
        }
        *event = to_ptr(EVENT_REGISTRY.lock().insert(Arc::new(Event::new())));
        Ok(Status::Success)
    })
}

/// # Safety
///
/// Safe for any argument value.
#[no_mangle]
pub unsafe extern "C" fn onnxSignalEvent(event: OnnxEvent) -> OnnxStatus {
    guarded("onnxSignalEvent", || {
        self::event(event)?.signal()?;
        Ok(Status::Success)
    })
}

/// # Safety
///
/// `state` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn onnxGetEventState(event: OnnxEvent, state: *mut OnnxEventState) -> OnnxStatus {
    guarded("onnxGetEventState", || {
        non_null(state, "event state")?;
        *state = EVENT_STATE_INVALID;
        let event = self::event(event)?;
        *state = if event.is_signalled() {
            EVENT_STATE_SIGNALLED
        } else {
            EVENT_STATE_NONSIGNALLED
        };
        Ok(Status::Success)
    })
}

/// Blocks until the event is signalled.
///
/// # Safety
///
/// Safe for any argument value.
#[no_mangle]
pub unsafe extern "C" fn onnxWaitEvent(event: OnnxEvent) -> OnnxStatus {
    guarded("onnxWaitEvent", || {
        // The registry lock is released before blocking.
        self::event(event)?.wait();
        Ok(Status::Success)
    })
}

/// # Safety
///
/// Safe for any argument value.
#[no_mangle]
pub unsafe extern "C" fn onnxReleaseEvent(event: OnnxEvent) -> OnnxStatus {
    guarded("onnxReleaseEvent", || {
        let handle = from_ptr(event);
        EVENT_REGISTRY
            .lock()
            .remove(handle)
            .ok_or_else(|| invalid(HandleKind::Event, handle))?;
        Ok(Status::Success)
    })
}

// ============================================================================
// Graphs
// ============================================================================

/// # Safety
///
/// `graph` must be valid for writes, a non-null `onnx_model` must hold
/// `onnx_model_size` bytes, and a non-null `weight_descriptors` must hold
/// `weights_count` descriptors whose buffers stay valid for this call.
#[no_mangle]
pub unsafe extern "C" fn onnxInitGraph(
    backend: OnnxBackend,
    aux_properties_list: *const u64,
    onnx_model_size: usize,
    onnx_model: *const c_void,
    weights_count: u32,
    weight_descriptors: *const OnnxTensorDescriptorV1,
    graph: *mut OnnxGraph,
) -> OnnxStatus {
    guarded("onnxInitGraph", || {
        non_null(graph, "graph")?;
        *graph = std::ptr::null_mut();
        let backend_handle = from_ptr(backend);
        let backend = BACKEND_REGISTRY
            .lock()
            .cloned(backend_handle)
            .ok_or_else(|| invalid(HandleKind::Backend, backend_handle))?;
        check_properties(aux_properties_list)?;
        non_null(onnx_model, "model")?;
        if onnx_model_size == 0 {
            return Err(OnnxifiError::EmptyModel);
        }

        let model = std::slice::from_raw_parts(onnx_model as *const u8, onnx_model_size);
        let weights = tensor_descriptors(weight_descriptors, weights_count)?;
        let built = backend.build_graph(model, &weights)?;
        *graph = to_ptr(GRAPH_REGISTRY.lock().insert(Arc::new(Mutex::new(built))));
        Ok(Status::Success)
    })
}

/// # Safety
///
/// Non-null descriptor arrays must hold their counts of descriptors; the
/// buffers they name must stay valid until rebound or the graph is released.
#[no_mangle]
pub unsafe extern "C" fn onnxSetGraphIO(
    graph: OnnxGraph,
    inputs_count: u32,
    input_descriptors: *const OnnxTensorDescriptorV1,
    outputs_count: u32,
    output_descriptors: *const OnnxTensorDescriptorV1,
) -> OnnxStatus {
    guarded("onnxSetGraphIO", || {
        let handle = from_ptr(graph);
        let graph = GRAPH_REGISTRY
            .lock()
            .cloned(handle)
            .ok_or_else(|| invalid(HandleKind::Graph, handle))?;
        let inputs = tensor_descriptors(input_descriptors, inputs_count)?;
        let outputs = tensor_descriptors(output_descriptors, outputs_count)?;
        graph.lock().executor.init_io(&inputs, &outputs)?;
        Ok(Status::Success)
    })
}

/// Creates the output event, stores it in `output_fence`, then runs the
/// graph once `input_fence` is signalled.
///
/// # Safety
///
/// `input_fence` must be readable and `output_fence` readable and writable.
#[no_mangle]
pub unsafe extern "C" fn onnxRunGraph(
    graph: OnnxGraph,
    input_fence: *const OnnxMemoryFenceV1,
    output_fence: *mut OnnxMemoryFenceV1,
) -> OnnxStatus {
    guarded("onnxRunGraph", || {
        let handle = from_ptr(graph);
        let graph = GRAPH_REGISTRY
            .lock()
            .cloned(handle)
            .ok_or_else(|| invalid(HandleKind::Graph, handle))?;
        non_null(input_fence, "input fence")?;
        non_null(output_fence, "output fence")?;
        let (input, output) = (&*input_fence, &mut *output_fence);
        for fence in [input, &*output] {
            if fence.tag != TAG_MEMORY_FENCE_V1 {
                return Err(OnnxifiError::UnsupportedFenceTag(fence.tag));
            }
            if fence.fence_type != SYNCHRONIZATION_EVENT {
                return Err(OnnxifiError::UnsupportedFenceType(fence.fence_type));
            }
        }

        let input_event = event(input.event)?;
        let output_event = Arc::new(Event::new());
        output.event = to_ptr(EVENT_REGISTRY.lock().insert(Arc::clone(&output_event)));

        graph.lock().executor.execute_computation(&input_event, &output_event)?;
        Ok(Status::Success)
    })
}

/// # Safety
///
/// Safe for any argument value.
#[no_mangle]
pub unsafe extern "C" fn onnxReleaseGraph(graph: OnnxGraph) -> OnnxStatus {
    guarded("onnxReleaseGraph", || {
        let handle = from_ptr(graph);
        GRAPH_REGISTRY
            .lock()
            .remove(handle)
            .ok_or_else(|| invalid(HandleKind::Graph, handle))?;
        Ok(Status::Success)
    })
}
