//! ONNXIFI 1.0 types and constants
//!
//! Layouts match `onnxifi.h`; every struct here is `#[repr(C)]`.

use std::ffi::{c_char, c_void};

pub type OnnxStatus = i32;
pub type OnnxBackendInfo = i32;
pub type OnnxEventState = i32;
pub type OnnxEnum = u64;
pub type OnnxBitfield = u64;
pub type OnnxPointer = u64;

pub type OnnxBackendId = *mut c_void;
pub type OnnxBackend = *mut c_void;
pub type OnnxGraph = *mut c_void;
pub type OnnxEvent = *mut c_void;

pub const ONNXIFI_VERSION: u64 = 1 << 32;

pub const TAG_TENSOR_DESCRIPTOR_V1: i32 = 0x43DF_BF69;
pub const TAG_MEMORY_FENCE_V1: i32 = 0x23E0_8AAB;

pub const MEMORY_TYPE_CPU: OnnxEnum = 0;
pub const DEVICE_TYPE_CPU: OnnxEnum = 0x08;

pub const SYNCHRONIZATION_EVENT: OnnxEnum = 0;
pub const SYNCHRONIZATION_IMPLICIT: OnnxEnum = 2;

pub const EVENT_STATE_INVALID: OnnxEventState = 0;
pub const EVENT_STATE_NONSIGNALLED: OnnxEventState = 0x16BD;
pub const EVENT_STATE_SIGNALLED: OnnxEventState = 0x3395;

/// Terminator of an auxiliary property list
pub const PROPERTY_NONE: u64 = 0;

// Backend info keys
pub const BACKEND_ONNXIFI_VERSION: OnnxBackendInfo = 0;
pub const BACKEND_NAME: OnnxBackendInfo = 1;
pub const BACKEND_VENDOR: OnnxBackendInfo = 2;
pub const BACKEND_VERSION: OnnxBackendInfo = 3;
pub const BACKEND_EXTENSIONS: OnnxBackendInfo = 4;
pub const BACKEND_DEVICE: OnnxBackendInfo = 5;
pub const BACKEND_DEVICE_TYPE: OnnxBackendInfo = 6;
pub const BACKEND_ONNX_IR_VERSION: OnnxBackendInfo = 7;
pub const BACKEND_OPSET_VERSION: OnnxBackendInfo = 8;
pub const BACKEND_CAPABILITIES: OnnxBackendInfo = 10;
pub const BACKEND_INIT_PROPERTIES: OnnxBackendInfo = 11;
pub const BACKEND_MEMORY_TYPES: OnnxBackendInfo = 12;
pub const BACKEND_GRAPH_INIT_PROPERTIES: OnnxBackendInfo = 13;
pub const BACKEND_SYNCHRONIZATION_TYPES: OnnxBackendInfo = 14;
pub const BACKEND_MEMORY_SIZE: OnnxBackendInfo = 20;
pub const BACKEND_MAX_GRAPH_SIZE: OnnxBackendInfo = 21;
pub const BACKEND_MAX_GRAPH_COUNT: OnnxBackendInfo = 22;
pub const BACKEND_MACS_FP32: OnnxBackendInfo = 30;
pub const BACKEND_MACS_FP16: OnnxBackendInfo = 31;
pub const BACKEND_MEMORY_BANDWIDTH: OnnxBackendInfo = 35;
pub const BACKEND_CPU_MEMORY_READ_BANDWIDTH: OnnxBackendInfo = 36;
pub const BACKEND_CPU_MEMORY_WRITE_BANDWIDTH: OnnxBackendInfo = 37;
pub const BACKEND_PCI_BUS_ID: OnnxBackendInfo = 40;
pub const BACKEND_PCI_DEVICE_ID: OnnxBackendInfo = 41;
pub const BACKEND_PCI_DOMAIN_ID: OnnxBackendInfo = 42;
pub const BACKEND_DIRECTX_ID: OnnxBackendInfo = 43;
pub const BACKEND_CUDA_INDEX: OnnxBackendInfo = 44;
pub const BACKEND_OPENCL_PLATFORM_ID: OnnxBackendInfo = 45;
pub const BACKEND_OPENCL_DEVICE_ID: OnnxBackendInfo = 46;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OnnxTensorDescriptorV1 {
    pub tag: i32,
    pub name: *const c_char,
    pub data_type: OnnxEnum,
    pub memory_type: OnnxEnum,
    pub dimensions: u32,
    pub shape: *const u64,
    pub buffer: OnnxPointer,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OnnxMemoryFenceV1 {
    pub tag: i32,
    pub fence_type: OnnxEnum,
    pub event: OnnxEvent,
}

/// Opaque handle from its integer form
pub fn to_ptr(handle: u64) -> *mut c_void {
    handle as usize as *mut c_void
}

/// Integer form of an opaque handle
pub fn from_ptr(ptr: *mut c_void) -> u64 {
    ptr as usize as u64
}
