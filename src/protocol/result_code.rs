//! Result codes
//!
//! Status byte carried in every response header.

use std::fmt;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    Ok = 0,
    ServerError = 1,
    KeyNotFound = 2,
    GenerationError = 3,
    ParameterError = 4,
    KeyExists = 5,
    BinExists = 6,
    ServerMemError = 8,
    Timeout = 9,
    PartitionUnavailable = 11,
    BinTypeError = 12,
    RecordTooBig = 13,
    KeyBusy = 14,
    Unsupported = 16,
    BinNotFound = 17,
    DeviceOverload = 18,
    InvalidNamespace = 20,
    BinNameTooLong = 21,
    ElementNotFound = 23,
    ElementExists = 24,
}

impl ResultCode {
    /// Parse a status byte. Unknown codes are a protocol violation.
    pub fn from_u8(byte: u8) -> Option<Self> {
        let code = match byte {
            0 => ResultCode::Ok,
            1 => ResultCode::ServerError,
            2 => ResultCode::KeyNotFound,
            3 => ResultCode::GenerationError,
            4 => ResultCode::ParameterError,
            5 => ResultCode::KeyExists,
            6 => ResultCode::BinExists,
            8 => ResultCode::ServerMemError,
            9 => ResultCode::Timeout,
            11 => ResultCode::PartitionUnavailable,
            12 => ResultCode::BinTypeError,
            13 => ResultCode::RecordTooBig,
            14 => ResultCode::KeyBusy,
            16 => ResultCode::Unsupported,
            17 => ResultCode::BinNotFound,
            18 => ResultCode::DeviceOverload,
            20 => ResultCode::InvalidNamespace,
            21 => ResultCode::BinNameTooLong,
            23 => ResultCode::ElementNotFound,
            24 => ResultCode::ElementExists,
            _ => return None,
        };
        Some(code)
    }

    /// Codes where the server states it did not apply the request, so
    /// another attempt is safe for reads and writes alike.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ResultCode::KeyBusy | ResultCode::DeviceOverload | ResultCode::PartitionUnavailable
        )
    }

    /// Server-side timeout. The request reached the server, so a write may
    /// have been applied.
    pub fn is_timeout(self) -> bool {
        self == ResultCode::Timeout
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResultCode::Ok => "ok",
            ResultCode::ServerError => "server error",
            ResultCode::KeyNotFound => "key not found",
            ResultCode::GenerationError => "generation mismatch",
            ResultCode::ParameterError => "parameter error",
            ResultCode::KeyExists => "key exists",
            ResultCode::BinExists => "bin exists",
            ResultCode::ServerMemError => "server out of memory",
            ResultCode::Timeout => "server timeout",
            ResultCode::PartitionUnavailable => "partition unavailable",
            ResultCode::BinTypeError => "bin type error",
            ResultCode::RecordTooBig => "record too big",
            ResultCode::KeyBusy => "key busy",
            ResultCode::Unsupported => "unsupported operation",
            ResultCode::BinNotFound => "bin not found",
            ResultCode::DeviceOverload => "device overload",
            ResultCode::InvalidNamespace => "invalid namespace",
            ResultCode::BinNameTooLong => "bin name too long",
            ResultCode::ElementNotFound => "element not found",
            ResultCode::ElementExists => "element exists",
        };
        write!(f, "{} ({})", text, *self as u8)
    }
}
