//! Particle codec
//!
//! Encodes a [`Value`] as a particle type byte plus a value payload.
//!
//! ## Payload by Particle Type
//! - NIL:     empty
//! - INTEGER: i64 (8 bytes, big-endian)
//! - FLOAT:   f64 bits (8 bytes, big-endian)
//! - STRING:  UTF-8 bytes
//! - BLOB:    raw bytes
//! - LIST:    count (4) + count × item
//! - MAP:     count (4) + count × (key item, value item)
//!
//! where `item` = type (1) + len (4) + payload.

use bytes::BufMut;

use crate::error::{MeridianError, Result};
use crate::value::Value;

/// Particle type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParticleType {
    Nil = 0,
    Integer = 1,
    Float = 2,
    String = 3,
    Blob = 4,
    Map = 19,
    List = 20,
}

impl ParticleType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Nil => ParticleType::Nil,
            Value::Int(_) => ParticleType::Integer,
            Value::Float(_) => ParticleType::Float,
            Value::Str(_) => ParticleType::String,
            Value::Blob(_) => ParticleType::Blob,
            Value::Map(_) => ParticleType::Map,
            Value::List(_) => ParticleType::List,
        }
    }
}

/// Item header inside a list or map: type (1) + len (4)
const ITEM_HEADER_SIZE: usize = 5;

/// Deepest list/map nesting accepted when decoding
pub const MAX_NESTING_DEPTH: usize = 256;

/// Size of a value's payload, excluding the particle type byte
pub fn encoded_len(value: &Value) -> usize {
    match value {
        Value::Nil => 0,
        Value::Int(_) | Value::Float(_) => 8,
        Value::Str(s) => s.len(),
        Value::Blob(b) => b.len(),
        Value::List(items) => {
            4 + items
                .iter()
                .map(|item| ITEM_HEADER_SIZE + encoded_len(item))
                .sum::<usize>()
        }
        Value::Map(entries) => {
            4 + entries
                .iter()
                .map(|(k, v)| 2 * ITEM_HEADER_SIZE + encoded_len(k) + encoded_len(v))
                .sum::<usize>()
        }
    }
}

/// Write a value's payload (no type byte)
pub fn write_value<B: BufMut>(buf: &mut B, value: &Value) {
    match value {
        Value::Nil => {}
        Value::Int(i) => buf.put_i64(*i),
        Value::Float(x) => buf.put_u64(x.to_bits()),
        Value::Str(s) => buf.put_slice(s.as_bytes()),
        Value::Blob(b) => buf.put_slice(b),
        Value::List(items) => {
            buf.put_u32(items.len() as u32);
            for item in items {
                write_item(buf, item);
            }
        }
        Value::Map(entries) => {
            buf.put_u32(entries.len() as u32);
            for (k, v) in entries {
                write_item(buf, k);
                write_item(buf, v);
            }
        }
    }
}

fn write_item<B: BufMut>(buf: &mut B, value: &Value) {
    buf.put_u8(ParticleType::of(value) as u8);
    buf.put_u32(encoded_len(value) as u32);
    write_value(buf, value);
}

/// Decode a payload of the given particle type
///
/// Collections nested deeper than [`MAX_NESTING_DEPTH`] are rejected as a
/// protocol error.
pub fn read_value(particle_type: u8, bytes: &[u8]) -> Result<Value> {
    read_nested(particle_type, bytes, 0)
}

fn read_nested(particle_type: u8, bytes: &[u8], depth: usize) -> Result<Value> {
    if depth > MAX_NESTING_DEPTH {
        return Err(MeridianError::Protocol(format!(
            "Collection particle nesting too deep (limit {})",
            MAX_NESTING_DEPTH
        )));
    }
    match particle_type {
        0 => Ok(Value::Nil),
        1 => Ok(Value::Int(i64::from_be_bytes(fixed8(bytes, "integer")?))),
        2 => Ok(Value::Float(f64::from_bits(u64::from_be_bytes(fixed8(
            bytes, "float",
        )?)))),
        3 => String::from_utf8(bytes.to_vec())
            .map(Value::Str)
            .map_err(|e| MeridianError::Protocol(format!("Invalid UTF-8 string particle: {}", e))),
        4 => Ok(Value::Blob(bytes.to_vec())),
        19 => {
            let (count, mut rest) = read_count(bytes)?;
            let mut entries = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let (key, after_key) = read_item(rest, depth + 1)?;
                let (value, after_value) = read_item(after_key, depth + 1)?;
                entries.push((key, value));
                rest = after_value;
            }
            expect_consumed(rest, "map")?;
            Ok(Value::Map(entries))
        }
        20 => {
            let (count, mut rest) = read_count(bytes)?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let (item, after) = read_item(rest, depth + 1)?;
                items.push(item);
                rest = after;
            }
            expect_consumed(rest, "list")?;
            Ok(Value::List(items))
        }
        other => Err(MeridianError::Protocol(format!(
            "Unknown particle type: {}",
            other
        ))),
    }
}

fn fixed8(bytes: &[u8], what: &str) -> Result<[u8; 8]> {
    bytes.try_into().map_err(|_| {
        MeridianError::Protocol(format!(
            "Invalid {} particle: expected 8 bytes, got {}",
            what,
            bytes.len()
        ))
    })
}

fn read_count(bytes: &[u8]) -> Result<(usize, &[u8])> {
    if bytes.len() < 4 {
        return Err(MeridianError::Protocol(
            "Collection particle: missing element count".to_string(),
        ));
    }
    let count = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    Ok((count, &bytes[4..]))
}

fn read_item(bytes: &[u8], depth: usize) -> Result<(Value, &[u8])> {
    if bytes.len() < ITEM_HEADER_SIZE {
        return Err(MeridianError::Protocol(
            "Collection particle: truncated item header".to_string(),
        ));
    }
    let item_type = bytes[0];
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let end = ITEM_HEADER_SIZE + len;
    if bytes.len() < end {
        return Err(MeridianError::Protocol(format!(
            "Collection particle: incomplete item (expected {}, got {})",
            len,
            bytes.len() - ITEM_HEADER_SIZE
        )));
    }
    let value = read_nested(item_type, &bytes[ITEM_HEADER_SIZE..end], depth)?;
    Ok((value, &bytes[end..]))
}

fn expect_consumed(rest: &[u8], what: &str) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(MeridianError::Protocol(format!(
            "{} particle: {} trailing bytes",
            what,
            rest.len()
        )))
    }
}
