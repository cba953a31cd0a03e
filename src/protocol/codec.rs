//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Message Header (requests and responses)
//! ```text
//! ┌──────────┬─────────┬─────────┬─────────┬─────────┬──────────┬──────────┬────────────┬──────────┬─────────┐
//! │ Size (4) │Info1 (1)│Info2 (1)│Info3 (1)│ Code (1)│  Gen (4) │  TTL (4) │Timeout (4) │Fields (2)│ Ops (2) │
//! └──────────┴─────────┴─────────┴─────────┴─────────┴──────────┴──────────┴────────────┴──────────┴─────────┘
//! ```
//! `Size` counts every byte after itself.
//!
//! ### Field
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Size (4) │ Type (1) │            Data             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Operation / Bin Record
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┬──────────┬───────────┐
//! │ Size (4) │  Op (1)  │ Type (1) │ Rsvd (1) │NameLen(1)│   Name   │   Value   │
//! └──────────┴──────────┴──────────┴──────────┴──────────┴──────────┴───────────┘
//! ```
//!
//! Requests carry namespace, set, digest (and optionally the user key) as
//! fields, then one record per operation in declared order. Responses carry a
//! result code and one bin record per returned value, in the order the
//! server produced them. Duplicate bin names are meaningful.

use std::io::{Read, Write};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MeridianError, Result};
use crate::key::{Digest, Key, DIGEST_SIZE};
use crate::operation::{OperateArgs, Operation, OperationType};
use crate::policy::{GenerationPolicy, Policy};
use crate::value::Value;

use super::particle::{self, ParticleType};
use super::ResultCode;

/// Message header size, including the size field
pub const HEADER_SIZE: usize = 24;

/// Field header size: size (4) + type (1)
pub const FIELD_HEADER_SIZE: usize = 5;

/// Operation header size: size (4) + op (1) + type (1) + reserved (1) + name len (1)
pub const OP_HEADER_SIZE: usize = 8;

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// Info1: read attributes
pub const INFO1_READ: u8 = 0x01;
pub const INFO1_GET_ALL: u8 = 0x02;
pub const INFO1_NOBINDATA: u8 = 0x20;

// Info2: write attributes
pub const INFO2_WRITE: u8 = 0x01;
pub const INFO2_DELETE: u8 = 0x02;
pub const INFO2_GENERATION: u8 = 0x04;
pub const INFO2_CREATE_ONLY: u8 = 0x20;
pub const INFO2_RESPOND_ALL_OPS: u8 = 0x80;

// Info3: record-exists attributes
pub const INFO3_UPDATE_ONLY: u8 = 0x08;
pub const INFO3_CREATE_OR_REPLACE: u8 = 0x10;
pub const INFO3_REPLACE_ONLY: u8 = 0x20;

// Field types
pub const FIELD_NAMESPACE: u8 = 0;
pub const FIELD_SET: u8 = 1;
pub const FIELD_KEY: u8 = 2;
pub const FIELD_DIGEST: u8 = 4;

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Bytes following the header
    pub body_len: usize,
    pub info1: u8,
    pub info2: u8,
    pub info3: u8,
    pub result_code: u8,
    pub generation: u32,
    pub expiration: u32,
    pub timeout_ms: u32,
    pub field_count: u16,
    pub op_count: u16,
}

/// A decoded request, as seen by a node
#[derive(Debug, Clone)]
pub struct Request {
    pub header: MessageHeader,
    pub namespace: String,
    pub set: String,
    pub digest: Digest,
    pub user_key: Option<Value>,
    pub operations: Vec<Operation>,
}

/// A response, as produced by a node
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub result_code: ResultCode,
    pub generation: u32,
    pub expiration: u32,
    pub bins: Vec<(String, Value)>,
}

impl Response {
    pub fn ok(generation: u32, expiration: u32, bins: Vec<(String, Value)>) -> Self {
        Self {
            result_code: ResultCode::Ok,
            generation,
            expiration,
            bins,
        }
    }

    pub fn error(code: ResultCode) -> Self {
        Self {
            result_code: code,
            generation: 0,
            expiration: 0,
            bins: Vec::new(),
        }
    }
}

// =============================================================================
// Request Encoding
// =============================================================================

/// Size pass: exact byte length of an operate request
pub fn estimate_operate_size(key: &Key, args: &OperateArgs, policy: &Policy) -> usize {
    let mut size = HEADER_SIZE;
    size += FIELD_HEADER_SIZE + key.namespace().len();
    size += FIELD_HEADER_SIZE + key.set().len();
    size += FIELD_HEADER_SIZE + DIGEST_SIZE;
    if let Some(user_key) = key.user_key().filter(|_| policy.send_key) {
        size += FIELD_HEADER_SIZE + 1 + particle::encoded_len(user_key);
    }
    size + args.size
}

/// Encode an operate request
///
/// Sizes the buffer first, then fills it without reallocating.
pub fn encode_operate(
    key: &Key,
    operations: &[Operation],
    args: &OperateArgs,
    policy: &Policy,
    timeout: Option<Duration>,
) -> Result<Bytes> {
    let size = estimate_operate_size(key, args, policy);
    if size > MAX_MESSAGE_SIZE {
        return Err(MeridianError::BufferOverflow {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let send_key = key.user_key().filter(|_| policy.send_key);
    let field_count = 3 + send_key.is_some() as u16;
    let op_count = operations
        .iter()
        .filter(|op| op.op_type.wire_code().is_some())
        .count() as u16;
    let generation = match policy.generation_policy {
        GenerationPolicy::ExpectGenEqual => policy.generation,
        GenerationPolicy::None => 0,
    };

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u32((size - 4) as u32);
    buf.put_u8(args.read_attr);
    buf.put_u8(args.write_attr);
    buf.put_u8(args.info_attr);
    buf.put_u8(0);
    buf.put_u32(generation);
    buf.put_u32(policy.expiration);
    buf.put_u32(timeout.map_or(0, |t| t.as_millis().min(u32::MAX as u128) as u32));
    buf.put_u16(field_count);
    buf.put_u16(op_count);

    write_field(&mut buf, FIELD_NAMESPACE, key.namespace().as_bytes());
    write_field(&mut buf, FIELD_SET, key.set().as_bytes());
    write_field(&mut buf, FIELD_DIGEST, key.digest());
    if let Some(user_key) = send_key {
        buf.put_u32((1 + 1 + particle::encoded_len(user_key)) as u32);
        buf.put_u8(FIELD_KEY);
        buf.put_u8(ParticleType::of(user_key) as u8);
        particle::write_value(&mut buf, user_key);
    }

    for op in operations {
        if let Some(code) = op.op_type.wire_code() {
            write_op(&mut buf, code, op.bin_name.as_deref().unwrap_or(""), &op.value);
        }
    }

    debug_assert_eq!(buf.len(), size, "size pass and write pass disagree");
    Ok(buf.freeze())
}

fn write_field(buf: &mut BytesMut, field_type: u8, data: &[u8]) {
    buf.put_u32((1 + data.len()) as u32);
    buf.put_u8(field_type);
    buf.put_slice(data);
}

fn write_op(buf: &mut BytesMut, code: u8, name: &str, value: &Value) {
    buf.put_u32((OP_HEADER_SIZE - 4 + name.len() + particle::encoded_len(value)) as u32);
    buf.put_u8(code);
    buf.put_u8(ParticleType::of(value) as u8);
    buf.put_u8(0);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    particle::write_value(buf, value);
}

// =============================================================================
// Response Encoding
// =============================================================================

/// Encode a response to bytes
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    let size = HEADER_SIZE
        + response
            .bins
            .iter()
            .map(|(name, value)| OP_HEADER_SIZE + name.len() + particle::encoded_len(value))
            .sum::<usize>();
    if size > MAX_MESSAGE_SIZE {
        return Err(MeridianError::BufferOverflow {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u32((size - 4) as u32);
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_u8(response.result_code as u8);
    buf.put_u32(response.generation);
    buf.put_u32(response.expiration);
    buf.put_u32(0);
    buf.put_u16(0);
    buf.put_u16(response.bins.len() as u16);

    for (name, value) in &response.bins {
        write_op(&mut buf, 1, name, value);
    }

    Ok(buf.to_vec())
}

// =============================================================================
// Header Decoding
// =============================================================================

/// Parse a header from its fixed-size bytes
pub fn parse_header(bytes: &[u8; HEADER_SIZE]) -> Result<MessageHeader> {
    let size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if size < HEADER_SIZE - 4 {
        return Err(MeridianError::Protocol(format!(
            "Message size {} smaller than header",
            size
        )));
    }
    if size + 4 > MAX_MESSAGE_SIZE {
        return Err(MeridianError::Protocol(format!(
            "Message too large: {} bytes (max {})",
            size + 4,
            MAX_MESSAGE_SIZE
        )));
    }

    Ok(MessageHeader {
        body_len: size + 4 - HEADER_SIZE,
        info1: bytes[4],
        info2: bytes[5],
        info3: bytes[6],
        result_code: bytes[7],
        generation: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        expiration: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        timeout_ms: u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
        field_count: u16::from_be_bytes([bytes[20], bytes[21]]),
        op_count: u16::from_be_bytes([bytes[22], bytes[23]]),
    })
}

/// Read a message header from a stream
///
/// I/O failures are returned as-is: the caller decides whether a closed or
/// timed out connection is retryable.
pub fn read_header<R: Read>(reader: &mut R) -> Result<MessageHeader> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    parse_header(&header)
}

/// Read a response header and resolve its result code
pub fn read_response_header<R: Read>(reader: &mut R) -> Result<(ResultCode, MessageHeader)> {
    let header = read_header(reader)?;
    let code = ResultCode::from_u8(header.result_code).ok_or_else(|| {
        MeridianError::Protocol(format!("Unknown result code: {}", header.result_code))
    })?;
    Ok((code, header))
}

// =============================================================================
// Streaming Bin Record Decoding
// =============================================================================

/// Lazily reads the fields and bin records that follow a message header.
///
/// Yields `(bin_name, value)` in wire order until the declared record count
/// is exhausted. Reads never go past the declared body length.
pub struct RecordReader<R> {
    reader: R,
    fields_left: u16,
    records_left: u16,
    bytes_left: usize,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R, header: &MessageHeader) -> Self {
        Self {
            reader,
            fields_left: header.field_count,
            records_left: header.op_count,
            bytes_left: header.body_len,
            done: false,
        }
    }

    /// Records not yet read
    pub fn remaining(&self) -> u16 {
        self.records_left
    }

    /// Bytes of the body not yet consumed
    pub fn bytes_left(&self) -> usize {
        self.bytes_left
    }

    fn check_remaining(&self, needed: usize) -> Result<()> {
        if needed > self.bytes_left {
            return Err(MeridianError::Protocol(format!(
                "Record overruns message body ({} bytes needed, {} left)",
                needed, self.bytes_left
            )));
        }
        Ok(())
    }

    fn read_body(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_remaining(buf.len())?;
        self.reader.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                MeridianError::Protocol("Truncated response body".to_string())
            }
            _ => MeridianError::Io(e),
        })?;
        self.bytes_left -= buf.len();
        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_body(&mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn skip_fields(&mut self) -> Result<()> {
        while self.fields_left > 0 {
            let size = self.read_u32()? as usize;
            self.check_remaining(size)?;
            let mut data = vec![0u8; size];
            self.read_body(&mut data)?;
            self.fields_left -= 1;
        }
        Ok(())
    }

    fn read_record(&mut self) -> Result<(String, Value)> {
        let size = self.read_u32()? as usize;
        if size < OP_HEADER_SIZE - 4 {
            return Err(MeridianError::Protocol(format!(
                "Bin record size {} smaller than record header",
                size
            )));
        }

        self.check_remaining(size)?;
        let mut body = vec![0u8; size];
        self.read_body(&mut body)?;

        let particle_type = body[1];
        let name_len = body[3] as usize;
        let name_end = 4 + name_len;
        if name_end > body.len() {
            return Err(MeridianError::Protocol(format!(
                "Bin name length {} exceeds record size {}",
                name_len, size
            )));
        }

        let name = String::from_utf8(body[4..name_end].to_vec())
            .map_err(|e| MeridianError::Protocol(format!("Invalid bin name: {}", e)))?;
        let value = particle::read_value(particle_type, &body[name_end..])?;
        Ok((name, value))
    }

    fn next_item(&mut self) -> Result<Option<(String, Value)>> {
        self.skip_fields()?;
        if self.records_left == 0 {
            if self.bytes_left != 0 {
                return Err(MeridianError::Protocol(format!(
                    "{} trailing bytes after last bin record",
                    self.bytes_left
                )));
            }
            return Ok(None);
        }
        let record = self.read_record()?;
        self.records_left -= 1;
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_item() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a complete response held in memory
pub fn decode_response(bytes: &[u8]) -> Result<(ResultCode, MessageHeader, Vec<(String, Value)>)> {
    let mut cursor = std::io::Cursor::new(bytes);
    let (code, header) = read_response_header(&mut cursor).map_err(truncation_is_protocol)?;
    let bins = RecordReader::new(&mut cursor, &header).collect::<Result<Vec<_>>>()?;
    Ok((code, header, bins))
}

fn truncation_is_protocol(err: MeridianError) -> MeridianError {
    match err {
        MeridianError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            MeridianError::Protocol("Incomplete message header".to_string())
        }
        other => other,
    }
}

// =============================================================================
// Request Decoding
// =============================================================================

/// Decode a complete request held in memory
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    if bytes.len() < HEADER_SIZE {
        return Err(MeridianError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }
    let mut fixed = [0u8; HEADER_SIZE];
    fixed.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = parse_header(&fixed)?;

    let total_len = HEADER_SIZE + header.body_len;
    if bytes.len() < total_len {
        return Err(MeridianError::Protocol(format!(
            "Incomplete body: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let mut body = &bytes[HEADER_SIZE..total_len];
    let mut namespace = None;
    let mut set = String::new();
    let mut digest = None;
    let mut user_key = None;

    for _ in 0..header.field_count {
        let (field_type, data, rest) = split_field(body)?;
        match field_type {
            FIELD_NAMESPACE => namespace = Some(utf8(data, "namespace")?),
            FIELD_SET => set = utf8(data, "set")?,
            FIELD_DIGEST => {
                let d: Digest = data.try_into().map_err(|_| {
                    MeridianError::Protocol(format!("Digest field has {} bytes", data.len()))
                })?;
                digest = Some(d);
            }
            FIELD_KEY => {
                let (ptype, payload) = data.split_first().ok_or_else(|| {
                    MeridianError::Protocol("Empty user key field".to_string())
                })?;
                user_key = Some(particle::read_value(*ptype, payload)?);
            }
            other => {
                return Err(MeridianError::Protocol(format!(
                    "Unknown field type: {}",
                    other
                )))
            }
        }
        body = rest;
    }

    let mut operations = Vec::with_capacity(header.op_count as usize);
    for _ in 0..header.op_count {
        let (op, rest) = split_op(body)?;
        operations.push(op);
        body = rest;
    }

    if !body.is_empty() {
        return Err(MeridianError::Protocol(format!(
            "{} trailing bytes after last operation",
            body.len()
        )));
    }

    Ok(Request {
        header,
        namespace: namespace
            .ok_or_else(|| MeridianError::Protocol("Missing namespace field".to_string()))?,
        set,
        digest: digest.ok_or_else(|| MeridianError::Protocol("Missing digest field".to_string()))?,
        user_key,
        operations,
    })
}

fn split_field(bytes: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    if bytes.len() < FIELD_HEADER_SIZE {
        return Err(MeridianError::Protocol("Truncated field header".to_string()));
    }
    let size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if size == 0 || bytes.len() < 4 + size {
        return Err(MeridianError::Protocol(format!(
            "Invalid field size {} ({} bytes left)",
            size,
            bytes.len() - 4
        )));
    }
    Ok((bytes[4], &bytes[FIELD_HEADER_SIZE..4 + size], &bytes[4 + size..]))
}

fn split_op(bytes: &[u8]) -> Result<(Operation, &[u8])> {
    if bytes.len() < OP_HEADER_SIZE {
        return Err(MeridianError::Protocol("Truncated operation header".to_string()));
    }
    let size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if size < OP_HEADER_SIZE - 4 || bytes.len() < 4 + size {
        return Err(MeridianError::Protocol(format!(
            "Invalid operation size {} ({} bytes left)",
            size,
            bytes.len() - 4
        )));
    }

    let op_type = OperationType::from_wire(bytes[4])
        .ok_or_else(|| MeridianError::Protocol(format!("Unknown operation type: {}", bytes[4])))?;
    let particle_type = bytes[5];
    let name_len = bytes[7] as usize;
    let name_end = OP_HEADER_SIZE + name_len;
    if name_end > 4 + size {
        return Err(MeridianError::Protocol(format!(
            "Bin name length {} exceeds operation size {}",
            name_len, size
        )));
    }

    let name = utf8(&bytes[OP_HEADER_SIZE..name_end], "bin name")?;
    let value = particle::read_value(particle_type, &bytes[name_end..4 + size])?;

    let op = Operation {
        op_type,
        bin_name: (!name.is_empty()).then_some(name),
        value,
    };
    Ok((op, &bytes[4 + size..]))
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| MeridianError::Protocol(format!("Invalid {}: {}", what, e)))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete request from a stream
///
/// Blocks until a complete request is received or an error occurs
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let parsed = parse_header(&header)?;

    let mut message = Vec::with_capacity(HEADER_SIZE + parsed.body_len);
    message.extend_from_slice(&header);
    message.resize(HEADER_SIZE + parsed.body_len, 0);
    reader.read_exact(&mut message[HEADER_SIZE..])?;

    decode_request(&message)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
