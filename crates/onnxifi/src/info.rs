//! Backend info table

use crate::abi::*;
use crate::error::{OnnxifiError, Result};
use onnx_xla_compiler::{BackendConfig, Status, ONNX_IR_VERSION, ONNX_OPSET_VERSION};
use std::ffi::c_void;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    /// NUL-terminated on the wire
    Text(String),
    Number(u64),
}

impl InfoValue {
    /// Bytes the caller's buffer must hold
    pub fn required_size(&self) -> usize {
        match self {
            InfoValue::Text(text) => text.len() + 1,
            InfoValue::Number(_) => std::mem::size_of::<u64>(),
        }
    }

    /// Write the value using the probe-then-fill convention: a null or
    /// short buffer gets `Fallback` and the required size in `size`.
    ///
    /// # Safety
    ///
    /// A non-null `value` must be valid for writes of `*size` bytes.
    pub unsafe fn write(&self, value: *mut c_void, size: &mut usize) -> Status {
        let required = self.required_size();
        if value.is_null() || *size < required {
            *size = required;
            return Status::Fallback;
        }
        match self {
            InfoValue::Text(text) => {
                let dst = value as *mut u8;
                std::ptr::copy_nonoverlapping(text.as_ptr(), dst, text.len());
                dst.add(text.len()).write(0);
            }
            InfoValue::Number(number) => (value as *mut u64).write_unaligned(*number),
        }
        *size = required;
        Status::Success
    }
}

/// Value of backend info `key`
pub fn backend_info(key: OnnxBackendInfo, config: &BackendConfig) -> Result<InfoValue> {
    use InfoValue::{Number, Text};

    Ok(match key {
        BACKEND_ONNXIFI_VERSION => Number(ONNXIFI_VERSION),
        BACKEND_NAME => Text(config.name.clone()),
        BACKEND_VENDOR => Text(config.vendor.clone()),
        BACKEND_VERSION => Text(config.version.clone()),
        BACKEND_EXTENSIONS => Text(String::new()),
        BACKEND_DEVICE => Text(config.device.clone()),
        BACKEND_DEVICE_TYPE => Number(DEVICE_TYPE_CPU),
        BACKEND_ONNX_IR_VERSION => Text(ONNX_IR_VERSION.to_string()),
        BACKEND_OPSET_VERSION => Text(format!("ai.onnx:{}", ONNX_OPSET_VERSION)),
        BACKEND_CAPABILITIES | BACKEND_INIT_PROPERTIES | BACKEND_GRAPH_INIT_PROPERTIES => Number(0),
        BACKEND_MEMORY_TYPES => Number(MEMORY_TYPE_CPU),
        BACKEND_SYNCHRONIZATION_TYPES => Number(SYNCHRONIZATION_EVENT),
        BACKEND_MEMORY_SIZE => return Err(OnnxifiError::MemorySizeUnavailable),
        BACKEND_MAX_GRAPH_SIZE => Number(config.max_graph_size),
        BACKEND_MAX_GRAPH_COUNT => Number(config.max_graph_count),
        BACKEND_MACS_FP32
        | BACKEND_MACS_FP16
        | BACKEND_MEMORY_BANDWIDTH
        | BACKEND_CPU_MEMORY_READ_BANDWIDTH
        | BACKEND_CPU_MEMORY_WRITE_BANDWIDTH
        | BACKEND_PCI_BUS_ID
        | BACKEND_PCI_DEVICE_ID
        | BACKEND_PCI_DOMAIN_ID
        | BACKEND_DIRECTX_ID
        | BACKEND_CUDA_INDEX
        | BACKEND_OPENCL_PLATFORM_ID
        | BACKEND_OPENCL_DEVICE_ID => Number(0),
        other => return Err(OnnxifiError::UnknownInfo(other)),
    })
}
