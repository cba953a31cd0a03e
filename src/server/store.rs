//! In-memory record store
//!
//! Applies decoded requests to a map of records. Every request is applied to
//! a working copy of the record and committed only if all of its operations
//! succeed, so an operate command is atomic.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::key::Digest;
use crate::operation::{cdt, OperationType};
use crate::protocol::codec::{
    INFO1_NOBINDATA, INFO2_CREATE_ONLY, INFO2_GENERATION, INFO2_RESPOND_ALL_OPS, INFO2_WRITE,
    INFO3_CREATE_OR_REPLACE, INFO3_REPLACE_ONLY, INFO3_UPDATE_ONLY,
};
use crate::protocol::{particle, Request, Response, ResultCode};
use crate::value::Value;

/// Default limit on the encoded size of a record's bins (1 MB)
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;

type OpResult<T> = std::result::Result<T, ResultCode>;

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    bins: BTreeMap<String, Value>,
    generation: u32,
    expiration: u32,
    user_key: Option<Value>,
}

impl StoredRecord {
    fn size(&self) -> usize {
        self.bins
            .iter()
            .map(|(name, value)| name.len() + particle::encoded_len(value))
            .sum()
    }
}

/// Records of every namespace a node serves
pub struct MemStore {
    namespaces: Vec<String>,
    max_record_size: usize,
    records: RwLock<HashMap<(String, Digest), StoredRecord>>,
}

impl MemStore {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Apply a request and build its response
    pub fn apply(&self, request: &Request) -> Response {
        if !self.namespaces.iter().any(|ns| *ns == request.namespace) {
            return Response::error(ResultCode::InvalidNamespace);
        }

        let id = (request.namespace.clone(), request.digest);
        let result = if request.header.info2 & INFO2_WRITE != 0 {
            self.apply_write(id, request)
        } else {
            self.apply_read(&id, request)
        };

        result.unwrap_or_else(Response::error)
    }

    fn apply_read(&self, id: &(String, Digest), request: &Request) -> OpResult<Response> {
        let records = self.records.read();
        let record = records.get(id).ok_or(ResultCode::KeyNotFound)?;

        let mut bins = Vec::new();
        if request.header.info1 & INFO1_NOBINDATA == 0 {
            let mut working = record.clone();
            for op in &request.operations {
                apply_op(&mut working, op.op_type, op.bin_name.as_deref(), &op.value, false, &mut bins)?;
            }
        }

        Ok(Response::ok(record.generation, record.expiration, bins))
    }

    fn apply_write(&self, id: (String, Digest), request: &Request) -> OpResult<Response> {
        let header = &request.header;
        let mut records = self.records.write();
        let existing = records.get(&id);

        let must_exist = header.info3 & (INFO3_UPDATE_ONLY | INFO3_REPLACE_ONLY) != 0;
        if must_exist && existing.is_none() {
            return Err(ResultCode::KeyNotFound);
        }
        if header.info2 & INFO2_CREATE_ONLY != 0 && existing.is_some() {
            return Err(ResultCode::KeyExists);
        }
        if header.info2 & INFO2_GENERATION != 0
            && existing.map_or(0, |r| r.generation) != header.generation
        {
            return Err(ResultCode::GenerationError);
        }

        let existed = existing.is_some();
        let mut working = existing.cloned().unwrap_or_default();
        if header.info3 & (INFO3_CREATE_OR_REPLACE | INFO3_REPLACE_ONLY) != 0 {
            working.bins.clear();
        }
        if working.user_key.is_none() {
            working.user_key = request.user_key.clone();
        }

        let respond_all = header.info2 & INFO2_RESPOND_ALL_OPS != 0;
        let mut bins = Vec::new();
        let mut deleted = false;

        for op in &request.operations {
            match op.op_type {
                OperationType::Delete => {
                    if !existed && !deleted {
                        return Err(ResultCode::KeyNotFound);
                    }
                    working.bins.clear();
                    deleted = true;
                }
                OperationType::Touch if !existed => return Err(ResultCode::KeyNotFound),
                op_type => {
                    apply_op(&mut working, op_type, op.bin_name.as_deref(), &op.value, respond_all, &mut bins)?;
                    if op_type.is_write() {
                        deleted = false;
                    }
                }
            }
        }

        if working.size() > self.max_record_size {
            return Err(ResultCode::RecordTooBig);
        }

        working.generation = working.generation.wrapping_add(1).max(1);
        if header.expiration != 0 {
            working.expiration = header.expiration;
        }
        let (generation, expiration) = (working.generation, working.expiration);

        if deleted && working.bins.is_empty() {
            records.remove(&id);
        } else {
            records.insert(id, working);
        }

        Ok(Response::ok(generation, expiration, bins))
    }
}

/// Apply one non-delete operation to a working record
fn apply_op(
    record: &mut StoredRecord,
    op_type: OperationType,
    bin: Option<&str>,
    value: &Value,
    respond_all: bool,
    out: &mut Vec<(String, Value)>,
) -> OpResult<()> {
    match (op_type, bin) {
        (OperationType::Read, Some(name)) => {
            if let Some(v) = record.bins.get(name) {
                out.push((name.to_string(), v.clone()));
            }
        }
        (OperationType::Read, None) => {
            out.extend(record.bins.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        (OperationType::ReadHeader, _) | (OperationType::Touch, _) => {}
        (OperationType::Write, Some(name)) => {
            if value.is_nil() {
                record.bins.remove(name);
            } else {
                record.bins.insert(name.to_string(), value.clone());
            }
            if respond_all {
                out.push((name.to_string(), Value::Nil));
            }
        }
        (OperationType::Add, Some(name)) => {
            let current = record.bins.get(name).cloned().unwrap_or(Value::Int(0));
            let sum = match (&current, value) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
                (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                (Value::Int(a), Value::Float(b)) if !record.bins.contains_key(name) => {
                    Value::Float(*a as f64 + b)
                }
                _ => return Err(ResultCode::BinTypeError),
            };
            record.bins.insert(name.to_string(), sum.clone());
            out.push((name.to_string(), sum));
        }
        (OperationType::Append | OperationType::Prepend, Some(name)) => {
            let prepend = op_type == OperationType::Prepend;
            let joined = match (record.bins.get(name), value) {
                (None, v) => v.clone(),
                (Some(Value::Str(a)), Value::Str(b)) => {
                    Value::Str(if prepend { format!("{}{}", b, a) } else { format!("{}{}", a, b) })
                }
                (Some(Value::Blob(a)), Value::Blob(b)) => {
                    let (first, second) = if prepend { (b, a) } else { (a, b) };
                    Value::Blob([first.as_slice(), second.as_slice()].concat())
                }
                _ => return Err(ResultCode::BinTypeError),
            };
            record.bins.insert(name.to_string(), joined);
            if respond_all {
                out.push((name.to_string(), Value::Nil));
            }
        }
        (OperationType::CdtRead | OperationType::CdtModify, Some(name)) => {
            let args = value.as_list().ok_or(ResultCode::ParameterError)?;
            let (code, args) = match args.split_first() {
                Some((Value::Int(code), rest)) => (*code, rest),
                _ => return Err(ResultCode::ParameterError),
            };
            if let Some(result) = apply_cdt(record, name, code, args)? {
                out.push((name.to_string(), result));
            }
        }
        _ => return Err(ResultCode::ParameterError),
    }
    Ok(())
}

/// Resolve a possibly negative index against a collection length
fn resolve_index(index: &Value, len: usize) -> OpResult<usize> {
    let i = index.as_int().ok_or(ResultCode::ParameterError)?;
    let resolved = if i < 0 { len as i64 + i } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ResultCode::ElementNotFound);
    }
    Ok(resolved as usize)
}

fn apply_cdt(record: &mut StoredRecord, bin: &str, code: i64, args: &[Value]) -> OpResult<Option<Value>> {
    match code {
        cdt::LIST_APPEND | cdt::LIST_INSERT | cdt::LIST_POP | cdt::LIST_CLEAR => {
            let list = match record
                .bins
                .entry(bin.to_string())
                .or_insert_with(|| Value::List(Vec::new()))
            {
                Value::List(items) => items,
                _ => return Err(ResultCode::BinTypeError),
            };
            match (code, args) {
                (cdt::LIST_APPEND, [item]) => {
                    list.push(item.clone());
                    Ok(Some(Value::Int(list.len() as i64)))
                }
                (cdt::LIST_INSERT, [index, item]) => {
                    let i = index.as_int().ok_or(ResultCode::ParameterError)?;
                    let at = if i < 0 { list.len() as i64 + i } else { i };
                    if at < 0 || at > list.len() as i64 {
                        return Err(ResultCode::ElementNotFound);
                    }
                    list.insert(at as usize, item.clone());
                    Ok(Some(Value::Int(list.len() as i64)))
                }
                (cdt::LIST_POP, [index]) => {
                    let at = resolve_index(index, list.len())?;
                    Ok(Some(list.remove(at)))
                }
                (cdt::LIST_CLEAR, []) => {
                    list.clear();
                    Ok(None)
                }
                _ => Err(ResultCode::ParameterError),
            }
        }
        cdt::LIST_GET | cdt::LIST_SIZE => {
            let items = match record.bins.get(bin) {
                None => return Ok(Some(Value::Nil)),
                Some(Value::List(items)) => items,
                Some(_) => return Err(ResultCode::BinTypeError),
            };
            match (code, args) {
                (cdt::LIST_GET, [index]) => Ok(Some(items[resolve_index(index, items.len())?].clone())),
                (cdt::LIST_SIZE, []) => Ok(Some(Value::Int(items.len() as i64))),
                _ => Err(ResultCode::ParameterError),
            }
        }
        cdt::MAP_PUT | cdt::MAP_REMOVE_BY_KEY | cdt::MAP_CLEAR => {
            let map = match record
                .bins
                .entry(bin.to_string())
                .or_insert_with(|| Value::Map(Vec::new()))
            {
                Value::Map(entries) => entries,
                _ => return Err(ResultCode::BinTypeError),
            };
            match (code, args) {
                (cdt::MAP_PUT, [key, value]) => {
                    match map.iter_mut().find(|(k, _)| k == key) {
                        Some(entry) => entry.1 = value.clone(),
                        None => map.push((key.clone(), value.clone())),
                    }
                    Ok(Some(Value::Int(map.len() as i64)))
                }
                (cdt::MAP_REMOVE_BY_KEY, [key]) => {
                    let at = map
                        .iter()
                        .position(|(k, _)| k == key)
                        .ok_or(ResultCode::ElementNotFound)?;
                    Ok(Some(map.remove(at).1))
                }
                (cdt::MAP_CLEAR, []) => {
                    map.clear();
                    Ok(None)
                }
                _ => Err(ResultCode::ParameterError),
            }
        }
        cdt::MAP_GET_BY_KEY | cdt::MAP_SIZE => {
            let entries = match record.bins.get(bin) {
                None => return Ok(Some(Value::Nil)),
                Some(Value::Map(entries)) => entries,
                Some(_) => return Err(ResultCode::BinTypeError),
            };
            match (code, args) {
                (cdt::MAP_GET_BY_KEY, [key]) => Ok(Some(
                    entries
                        .iter()
                        .find(|(k, _)| k == key)
                        .map_or(Value::Nil, |(_, v)| v.clone()),
                )),
                (cdt::MAP_SIZE, []) => Ok(Some(Value::Int(entries.len() as i64))),
                _ => Err(ResultCode::ParameterError),
            }
        }
        _ => Err(ResultCode::Unsupported),
    }
}
