//! ONNXIFI status taxonomy
//!
//! Every failure the compiler reports maps onto one of these codes; the ABI
//! layer returns them unchanged.

use std::fmt;

/// ONNXIFI status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success = 0x0000,
    Fallback = 0x0001,

    InvalidId = 0x0101,
    InvalidSize = 0x0102,
    InvalidPointer = 0x0103,
    InvalidProtobuf = 0x0104,
    InvalidModel = 0x0105,
    InvalidBackend = 0x0106,
    InvalidGraph = 0x0107,
    InvalidEvent = 0x0108,
    InvalidState = 0x0109,
    InvalidName = 0x010A,
    InvalidShape = 0x010B,
    InvalidDatatype = 0x010C,
    InvalidMemoryType = 0x010D,
    InvalidMemoryLocation = 0x010E,
    InvalidFenceType = 0x010F,
    InvalidProperty = 0x0110,

    UnsupportedTag = 0x0201,
    UnsupportedVersion = 0x0202,
    UnsupportedOperator = 0x0203,
    UnsupportedAttribute = 0x0204,
    UnsupportedShape = 0x0205,
    UnsupportedDatatype = 0x0206,
    UnsupportedMemoryType = 0x0207,
    UnsupportedFenceType = 0x0208,
    UnsupportedProperty = 0x0209,

    UnidentifiedName = 0x0301,
    MismatchingShape = 0x0302,
    MismatchingDatatype = 0x0303,

    NoSystemMemory = 0x0401,
    NoDeviceMemory = 0x0402,
    NoSystemResources = 0x0403,
    NoDeviceResources = 0x0404,
    BackendUnavailable = 0x0405,
    InternalError = 0x0406,
}

impl Status {
    /// Raw ABI value
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:04X})", self, self.code())
    }
}
