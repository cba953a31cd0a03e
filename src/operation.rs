//! Operations
//!
//! An operate command bundles an ordered list of per-bin operations that the
//! server applies atomically to one record. Order is significant: repeated
//! operations on the same bin are sent as independent records and their
//! results come back in the same order.

use crate::error::{MeridianError, Result};
use crate::policy::{GenerationPolicy, Policy, RecordExistsAction};
use crate::protocol::codec::{
    INFO1_GET_ALL, INFO1_NOBINDATA, INFO1_READ, INFO2_CREATE_ONLY, INFO2_DELETE,
    INFO2_GENERATION, INFO2_RESPOND_ALL_OPS, INFO2_WRITE, INFO3_CREATE_OR_REPLACE,
    INFO3_REPLACE_ONLY, INFO3_UPDATE_ONLY, OP_HEADER_SIZE,
};
use crate::protocol::particle;
use crate::value::Value;

/// Longest bin name the protocol accepts
pub const BIN_NAME_MAX: usize = 15;

/// Operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Read one bin, or every bin when no name is given
    Read,

    /// Read record metadata only; never sent as an operation record
    ReadHeader,
    Write,
    CdtRead,
    CdtModify,
    Add,
    Append,
    Prepend,
    Touch,
    Delete,
}

impl OperationType {
    /// Byte used in an operation record. `ReadHeader` has none.
    pub fn wire_code(self) -> Option<u8> {
        match self {
            OperationType::Read => Some(1),
            OperationType::ReadHeader => None,
            OperationType::Write => Some(2),
            OperationType::CdtRead => Some(3),
            OperationType::CdtModify => Some(4),
            OperationType::Add => Some(5),
            OperationType::Append => Some(9),
            OperationType::Prepend => Some(10),
            OperationType::Touch => Some(11),
            OperationType::Delete => Some(14),
        }
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        let op = match code {
            1 => OperationType::Read,
            2 => OperationType::Write,
            3 => OperationType::CdtRead,
            4 => OperationType::CdtModify,
            5 => OperationType::Add,
            9 => OperationType::Append,
            10 => OperationType::Prepend,
            11 => OperationType::Touch,
            14 => OperationType::Delete,
            _ => return None,
        };
        Some(op)
    }

    /// True if the operation mutates the record
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            OperationType::Read | OperationType::ReadHeader | OperationType::CdtRead
        )
    }

    fn requires_bin(self) -> bool {
        matches!(
            self,
            OperationType::Write
                | OperationType::CdtRead
                | OperationType::CdtModify
                | OperationType::Add
                | OperationType::Append
                | OperationType::Prepend
        )
    }
}

/// A single operation within an operate command
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op_type: OperationType,
    pub bin_name: Option<String>,
    pub value: Value,
}

impl Operation {
    fn new(op_type: OperationType, bin_name: Option<&str>, value: Value) -> Self {
        Self {
            op_type,
            bin_name: bin_name.map(str::to_string),
            value,
        }
    }

    /// Read a single bin
    pub fn get(bin: &str) -> Self {
        Self::new(OperationType::Read, Some(bin), Value::Nil)
    }

    /// Read every bin of the record
    pub fn get_all() -> Self {
        Self::new(OperationType::Read, None, Value::Nil)
    }

    /// Read generation and expiration only
    pub fn get_header() -> Self {
        Self::new(OperationType::ReadHeader, None, Value::Nil)
    }

    pub fn put(bin: &str, value: impl Into<Value>) -> Self {
        Self::new(OperationType::Write, Some(bin), value.into())
    }

    /// Increment a numeric bin; the result is the post-increment value
    pub fn add(bin: &str, delta: impl Into<Value>) -> Self {
        Self::new(OperationType::Add, Some(bin), delta.into())
    }

    pub fn append(bin: &str, value: impl Into<Value>) -> Self {
        Self::new(OperationType::Append, Some(bin), value.into())
    }

    pub fn prepend(bin: &str, value: impl Into<Value>) -> Self {
        Self::new(OperationType::Prepend, Some(bin), value.into())
    }

    /// Reset the record's time-to-live
    pub fn touch() -> Self {
        Self::new(OperationType::Touch, None, Value::Nil)
    }

    /// Delete the whole record
    pub fn delete() -> Self {
        Self::new(OperationType::Delete, None, Value::Nil)
    }

    /// Size of this operation's wire record
    pub fn encoded_size(&self) -> usize {
        if self.op_type.wire_code().is_none() {
            return 0;
        }
        OP_HEADER_SIZE
            + self.bin_name.as_ref().map_or(0, |n| n.len())
            + particle::encoded_len(&self.value)
    }

    fn validate(&self) -> Result<()> {
        match &self.bin_name {
            Some(name) if name.is_empty() => {
                return Err(MeridianError::InvalidOperation(format!(
                    "{:?}: empty bin name",
                    self.op_type
                )));
            }
            Some(name) if name.len() > BIN_NAME_MAX => {
                return Err(MeridianError::InvalidOperation(format!(
                    "{:?}: bin name {:?} exceeds {} bytes",
                    self.op_type, name, BIN_NAME_MAX
                )));
            }
            None if self.op_type.requires_bin() => {
                return Err(MeridianError::InvalidOperation(format!(
                    "{:?}: bin name required",
                    self.op_type
                )));
            }
            Some(_)
                if matches!(
                    self.op_type,
                    OperationType::Touch | OperationType::Delete | OperationType::ReadHeader
                ) =>
            {
                return Err(MeridianError::InvalidOperation(format!(
                    "{:?}: operation does not take a bin name",
                    self.op_type
                )));
            }
            _ => {}
        }

        match (self.op_type, &self.value) {
            (OperationType::Add, Value::Int(_) | Value::Float(_)) => Ok(()),
            (OperationType::Add, other) => Err(MeridianError::InvalidOperation(format!(
                "Add: numeric value required, got {}",
                other
            ))),
            (OperationType::Append | OperationType::Prepend, Value::Str(_) | Value::Blob(_)) => Ok(()),
            (OperationType::Append | OperationType::Prepend, other) => {
                Err(MeridianError::InvalidOperation(format!(
                    "{:?}: string or blob value required, got {}",
                    self.op_type, other
                )))
            }
            (OperationType::CdtRead | OperationType::CdtModify, Value::List(args))
                if matches!(args.first(), Some(Value::Int(_))) =>
            {
                Ok(())
            }
            (OperationType::CdtRead | OperationType::CdtModify, _) => Err(
                MeridianError::InvalidOperation("Collection operation: missing sub-op code".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// List / Map Sub-operations
// =============================================================================

/// Sub-operation codes carried as the first element of a collection operation
pub mod cdt {
    pub const LIST_APPEND: i64 = 1;
    pub const LIST_INSERT: i64 = 2;
    pub const LIST_CLEAR: i64 = 7;
    pub const LIST_GET: i64 = 10;
    pub const LIST_POP: i64 = 12;
    pub const LIST_SIZE: i64 = 16;

    pub const MAP_PUT: i64 = 67;
    pub const MAP_CLEAR: i64 = 75;
    pub const MAP_REMOVE_BY_KEY: i64 = 76;
    pub const MAP_SIZE: i64 = 96;
    pub const MAP_GET_BY_KEY: i64 = 97;
}

fn cdt(op_type: OperationType, bin: &str, code: i64, args: Vec<Value>) -> Operation {
    let mut payload = Vec::with_capacity(1 + args.len());
    payload.push(Value::Int(code));
    payload.extend(args);
    Operation::new(op_type, Some(bin), Value::List(payload))
}

/// List bin operations
pub struct ListOperation;

impl ListOperation {
    /// Append an item; the result is the new list size
    pub fn append(bin: &str, value: impl Into<Value>) -> Operation {
        cdt(OperationType::CdtModify, bin, cdt::LIST_APPEND, vec![value.into()])
    }

    /// Insert an item at `index`; the result is the new list size
    pub fn insert(bin: &str, index: i64, value: impl Into<Value>) -> Operation {
        cdt(
            OperationType::CdtModify,
            bin,
            cdt::LIST_INSERT,
            vec![Value::Int(index), value.into()],
        )
    }

    /// Remove and return the item at `index`
    pub fn pop(bin: &str, index: i64) -> Operation {
        cdt(OperationType::CdtModify, bin, cdt::LIST_POP, vec![Value::Int(index)])
    }

    pub fn clear(bin: &str) -> Operation {
        cdt(OperationType::CdtModify, bin, cdt::LIST_CLEAR, Vec::new())
    }

    /// Negative indexes count from the end
    pub fn get(bin: &str, index: i64) -> Operation {
        cdt(OperationType::CdtRead, bin, cdt::LIST_GET, vec![Value::Int(index)])
    }

    pub fn size(bin: &str) -> Operation {
        cdt(OperationType::CdtRead, bin, cdt::LIST_SIZE, Vec::new())
    }
}

/// Map bin operations
pub struct MapOperation;

impl MapOperation {
    /// Insert or overwrite an entry; the result is the new map size
    pub fn put(bin: &str, key: impl Into<Value>, value: impl Into<Value>) -> Operation {
        cdt(
            OperationType::CdtModify,
            bin,
            cdt::MAP_PUT,
            vec![key.into(), value.into()],
        )
    }

    /// Remove an entry and return its value
    pub fn remove_by_key(bin: &str, key: impl Into<Value>) -> Operation {
        cdt(OperationType::CdtModify, bin, cdt::MAP_REMOVE_BY_KEY, vec![key.into()])
    }

    pub fn clear(bin: &str) -> Operation {
        cdt(OperationType::CdtModify, bin, cdt::MAP_CLEAR, Vec::new())
    }

    pub fn get_by_key(bin: &str, key: impl Into<Value>) -> Operation {
        cdt(OperationType::CdtRead, bin, cdt::MAP_GET_BY_KEY, vec![key.into()])
    }

    pub fn size(bin: &str) -> Operation {
        cdt(OperationType::CdtRead, bin, cdt::MAP_SIZE, Vec::new())
    }
}

// =============================================================================
// Operate Arguments
// =============================================================================

/// Attributes derived once from an operation list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperateArgs {
    /// True if any operation mutates the record
    pub has_write: bool,

    pub read_attr: u8,
    pub write_attr: u8,
    pub info_attr: u8,

    /// Total size of the operation records
    pub size: usize,
}

impl OperateArgs {
    /// Classify an operation list, rejecting malformed ones
    pub fn new(operations: &[Operation], policy: &Policy) -> Result<Self> {
        if operations.is_empty() {
            return Err(MeridianError::InvalidOperation(
                "Operation list is empty".to_string(),
            ));
        }

        let mut read_attr = 0u8;
        let mut write_attr = 0u8;
        let mut read_bin = false;
        let mut read_header = false;
        let mut size = 0usize;

        for op in operations {
            op.validate()?;
            size += op.encoded_size();

            match op.op_type {
                OperationType::Read => {
                    read_attr |= INFO1_READ;
                    if op.bin_name.is_none() {
                        read_attr |= INFO1_GET_ALL;
                    }
                    read_bin = true;
                }
                OperationType::ReadHeader => {
                    read_attr |= INFO1_READ;
                    read_header = true;
                }
                OperationType::CdtRead => {
                    read_attr |= INFO1_READ;
                    read_bin = true;
                }
                OperationType::Delete => {
                    write_attr |= INFO2_WRITE | INFO2_DELETE;
                }
                _ => {
                    write_attr |= INFO2_WRITE;
                }
            }
        }

        if read_header && !read_bin {
            read_attr |= INFO1_NOBINDATA;
        }

        let has_write = write_attr & INFO2_WRITE != 0;
        let mut info_attr = 0u8;

        if has_write {
            if policy.respond_all_ops {
                write_attr |= INFO2_RESPOND_ALL_OPS;
            }
            if policy.generation_policy == GenerationPolicy::ExpectGenEqual {
                write_attr |= INFO2_GENERATION;
            }
            match policy.record_exists_action {
                RecordExistsAction::Update => {}
                RecordExistsAction::UpdateOnly => info_attr |= INFO3_UPDATE_ONLY,
                RecordExistsAction::Replace => info_attr |= INFO3_CREATE_OR_REPLACE,
                RecordExistsAction::ReplaceOnly => info_attr |= INFO3_REPLACE_ONLY,
                RecordExistsAction::CreateOnly => write_attr |= INFO2_CREATE_ONLY,
            }
        }

        Ok(Self {
            has_write,
            read_attr,
            write_attr,
            info_attr,
            size,
        })
    }
}
