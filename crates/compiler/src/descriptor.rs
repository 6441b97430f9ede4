//! Tensor descriptors and host buffer marshalling
//!
//! A [`TensorDescriptor`] names a caller-owned host buffer together with the
//! element type and shape the caller claims it holds. Buffers are read and
//! written with the element widening of the engine's literal storage:
//!
//! | ONNX element type | host element |
//! |-------------------|--------------|
//! | float, double, complex64, int64 | native |
//! | float16, bool, int8, int16, int32, uint8, uint16 | `i32` |
//! | uint32, uint64 | `u64` |

use crate::proto::tensor_proto::DataType;
use crate::utils::primitive_type;
use crate::{CompilerError, Result};
use num_complex::Complex32;
use onnx_xla_engine::{Literal, NativeType, PrimitiveType};

/// Tag of a version 1 tensor descriptor
pub const TAG_TENSOR_DESCRIPTOR_V1: u32 = 0x43DF_BF69;

/// Host (CPU) memory; the only memory type accepted
pub const MEMORY_TYPE_CPU: u64 = 0;

/// Raw pointer to caller-owned memory.
///
/// The engine never frees it. The caller keeps it valid for as long as it
/// stays bound to a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostBuffer(*mut u8);

// The pointer is only dereferenced inside execute calls, under the caller's
// guarantee that the memory is live and not concurrently written.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    /// # Safety
    ///
    /// `ptr` must be null or valid for reads and writes of the tensor it is
    /// described as for every execution it is used in.
    pub unsafe fn from_raw(ptr: *mut u8) -> Self {
        Self(ptr)
    }

    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.0
    }
}

/// Owned view of an ABI tensor descriptor
#[derive(Debug, Clone)]
pub struct TensorDescriptor {
    pub tag: u32,
    pub name: String,
    /// Raw ONNX element type code
    pub data_type: i32,
    pub memory_type: u64,
    pub dims: Vec<u64>,
    pub buffer: HostBuffer,
}

impl TensorDescriptor {
    /// Version 1 descriptor for CPU memory
    pub fn new(name: impl Into<String>, data_type: DataType, dims: &[u64], buffer: HostBuffer) -> Self {
        Self {
            tag: TAG_TENSOR_DESCRIPTOR_V1,
            name: name.into(),
            data_type: data_type as i32,
            memory_type: MEMORY_TYPE_CPU,
            dims: dims.to_vec(),
            buffer,
        }
    }

    pub fn dims_i64(&self) -> Vec<i64> {
        self.dims.iter().map(|&d| d as i64).collect()
    }

    /// Reject anything other than a v1 descriptor in host memory
    pub fn check_tag_and_memory(&self) -> Result<()> {
        if self.tag != TAG_TENSOR_DESCRIPTOR_V1 {
            return Err(CompilerError::UnsupportedTag(self.tag));
        }
        if self.memory_type != MEMORY_TYPE_CPU {
            return Err(CompilerError::InvalidMemoryType(self.memory_type));
        }
        Ok(())
    }
}

/// Element representation of a host buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStorage {
    F32,
    F64,
    C64,
    I32,
    I64,
    U64,
}

impl HostStorage {
    pub fn for_type(data_type: DataType) -> Result<Self> {
        Ok(match data_type {
            DataType::Float => HostStorage::F32,
            DataType::Double => HostStorage::F64,
            DataType::Complex64 => HostStorage::C64,
            DataType::Int64 => HostStorage::I64,
            DataType::Float16
            | DataType::Bool
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Uint8
            | DataType::Uint16 => HostStorage::I32,
            DataType::Uint32 | DataType::Uint64 => HostStorage::U64,
            DataType::Undefined | DataType::String | DataType::Complex128 | DataType::Bfloat16 => {
                return Err(CompilerError::UnsupportedDatatype(format!("{:?}", data_type)));
            }
        })
    }

    pub fn primitive_type(self) -> PrimitiveType {
        match self {
            HostStorage::F32 => PrimitiveType::F32,
            HostStorage::F64 => PrimitiveType::F64,
            HostStorage::C64 => PrimitiveType::C64,
            HostStorage::I32 => PrimitiveType::S32,
            HostStorage::I64 => PrimitiveType::S64,
            HostStorage::U64 => PrimitiveType::U64,
        }
    }

    /// Bytes per host element
    pub fn byte_width(self) -> usize {
        self.primitive_type().byte_size()
    }
}

unsafe fn read_elements<T: NativeType>(ptr: *const u8, count: usize) -> Vec<T> {
    let ptr = ptr as *const T;
    (0..count).map(|i| ptr.add(i).read_unaligned()).collect()
}

unsafe fn write_elements<T: NativeType>(ptr: *mut u8, values: &[T]) {
    let ptr = ptr as *mut T;
    for (i, value) in values.iter().enumerate() {
        ptr.add(i).write_unaligned(*value);
    }
}

/// Read a literal of `data_type` and `dims` out of `buffer`.
///
/// # Safety
///
/// `buffer` must point to at least `product(dims)` host elements of the
/// storage type for `data_type`.
pub unsafe fn read_literal(buffer: HostBuffer, data_type: DataType, dims: &[i64]) -> Result<Literal> {
    if buffer.is_null() {
        return Err(CompilerError::InvalidPointer("input buffer is null".to_string()));
    }
    let storage = HostStorage::for_type(data_type)?;
    let count = crate::utils::element_count(dims)? as usize;
    let ptr = buffer.as_ptr() as *const u8;
    let literal = match storage {
        HostStorage::F32 => Literal::from_vec(dims.to_vec(), read_elements::<f32>(ptr, count))?,
        HostStorage::F64 => Literal::from_vec(dims.to_vec(), read_elements::<f64>(ptr, count))?,
        HostStorage::C64 => Literal::from_vec(dims.to_vec(), read_elements::<Complex32>(ptr, count))?,
        HostStorage::I32 => Literal::from_vec(dims.to_vec(), read_elements::<i32>(ptr, count))?,
        HostStorage::I64 => Literal::from_vec(dims.to_vec(), read_elements::<i64>(ptr, count))?,
        HostStorage::U64 => Literal::from_vec(dims.to_vec(), read_elements::<u64>(ptr, count))?,
    };
    Ok(literal.convert(primitive_type(data_type)?)?)
}

/// Write the first `count` elements of `literal` into `buffer` as host
/// elements of `data_type`.
///
/// # Safety
///
/// `buffer` must be valid for writes of `count` host elements of the
/// storage type for `data_type`.
pub unsafe fn write_literal(buffer: HostBuffer, literal: &Literal, data_type: DataType, count: usize) -> Result<()> {
    if buffer.is_null() {
        return Err(CompilerError::InvalidPointer("output buffer is null".to_string()));
    }
    let storage = HostStorage::for_type(data_type)?;
    if literal.element_count() < count {
        return Err(CompilerError::InvalidState(format!(
            "result holds {} elements, output expects {}",
            literal.element_count(),
            count
        )));
    }
    let converted = literal.convert(storage.primitive_type())?;
    let ptr = buffer.as_ptr();
    match storage {
        HostStorage::F32 => write_elements(ptr, &converted.as_slice::<f32>()?[..count]),
        HostStorage::F64 => write_elements(ptr, &converted.as_slice::<f64>()?[..count]),
        HostStorage::C64 => write_elements(ptr, &converted.as_slice::<Complex32>()?[..count]),
        HostStorage::I32 => write_elements(ptr, &converted.as_slice::<i32>()?[..count]),
        HostStorage::I64 => write_elements(ptr, &converted.as_slice::<i64>()?[..count]),
        HostStorage::U64 => write_elements(ptr, &converted.as_slice::<u64>()?[..count]),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_types_widen_to_i32() {
        for ty in [DataType::Bool, DataType::Int8, DataType::Uint16, DataType::Float16] {
            assert_eq!(HostStorage::for_type(ty).unwrap(), HostStorage::I32);
        }
        assert_eq!(HostStorage::for_type(DataType::Uint32).unwrap(), HostStorage::U64);
        assert_eq!(HostStorage::for_type(DataType::Int64).unwrap().byte_width(), 8);
        assert!(matches!(
            HostStorage::for_type(DataType::String),
            Err(CompilerError::UnsupportedDatatype(_))
        ));
    }

    #[test]
    fn test_bool_buffer_round_trip() {
        let mut host = vec![1i32, 0, 1];
        let buffer = unsafe { HostBuffer::from_raw(host.as_mut_ptr() as *mut u8) };
        let literal = unsafe { read_literal(buffer, DataType::Bool, &[3]) }.unwrap();
        assert_eq!(literal.to_vec::<bool>().unwrap(), vec![true, false, true]);

        let mut out = vec![7i32; 3];
        let out_buffer = unsafe { HostBuffer::from_raw(out.as_mut_ptr() as *mut u8) };
        unsafe { write_literal(out_buffer, &literal, DataType::Bool, 3) }.unwrap();
        assert_eq!(out, host);
    }

    #[test]
    fn test_uint32_uses_u64_elements() {
        let mut host = vec![u32::MAX as u64, 5];
        let buffer = unsafe { HostBuffer::from_raw(host.as_mut_ptr() as *mut u8) };
        let literal = unsafe { read_literal(buffer, DataType::Uint32, &[2]) }.unwrap();
        assert_eq!(literal.to_vec::<u32>().unwrap(), vec![u32::MAX, 5]);
    }

    #[test]
    fn test_null_buffer_is_invalid_pointer() {
        let err = unsafe { read_literal(HostBuffer::null(), DataType::Float, &[1]) }.unwrap_err();
        assert!(matches!(err, CompilerError::InvalidPointer(_)));
    }

    #[test]
    fn test_descriptor_checks() {
        let mut d = TensorDescriptor::new("x", DataType::Float, &[2], HostBuffer::null());
        assert!(d.check_tag_and_memory().is_ok());
        d.memory_type = 1;
        assert!(matches!(d.check_tag_and_memory(), Err(CompilerError::InvalidMemoryType(1))));
        d.tag = 0;
        assert!(matches!(d.check_tag_and_memory(), Err(CompilerError::UnsupportedTag(0))));
    }
}
