//! Protocol Module
//!
//! Defines the wire protocol between the client and cluster nodes.
//!
//! ## Message Layout
//! ```text
//! ┌────────────────────┬──────────────────┬──────────────────────────────┐
//! │  Header (24 bytes) │  Fields (N)      │  Operation / Bin Records (M) │
//! └────────────────────┴──────────────────┴──────────────────────────────┘
//! ```
//!
//! Requests declare operation count, flags and total size in the header; the
//! response header carries the result code and bin record count.
//!
//! ### Result Codes
//! - 0: OK
//! - 2: KEY_NOT_FOUND
//! - 9: TIMEOUT
//! - 14: KEY_BUSY
//! - 17: BIN_NOT_FOUND
//! - 23: ELEMENT_NOT_FOUND
//! - ... see [`ResultCode`]

pub mod codec;
pub mod particle;
mod result_code;

pub use codec::{
    decode_request, decode_response, encode_operate, encode_response, estimate_operate_size,
    read_request, read_response_header, write_response, MessageHeader, RecordReader, Request,
    Response,
};
pub use particle::ParticleType;
pub use result_code::ResultCode;
