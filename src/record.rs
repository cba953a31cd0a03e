//! Records
//!
//! The result set of a command: bins keyed by name. A bin that received one
//! value holds it as [`BinValue::Single`]; a second value for the same name
//! promotes the entry to [`BinValue::Multi`], keeping wire order.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::value::Value;

/// One bin's result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BinValue {
    Single(Value),
    Multi(Vec<Value>),
}

impl BinValue {
    /// Single value, if the bin received exactly one
    pub fn as_single(&self) -> Option<&Value> {
        match self {
            BinValue::Single(v) => Some(v),
            BinValue::Multi(_) => None,
        }
    }

    /// Every value the bin received, in order
    pub fn values(&self) -> &[Value] {
        match self {
            BinValue::Single(v) => std::slice::from_ref(v),
            BinValue::Multi(vs) => vs,
        }
    }

    /// The value produced by the last operation on this bin
    pub fn last(&self) -> &Value {
        match self {
            BinValue::Single(v) => v,
            BinValue::Multi(vs) => vs.last().unwrap_or(&Value::Nil),
        }
    }
}

/// A decoded record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    pub bins: BTreeMap<String, BinValue>,
    pub generation: u32,
    pub expiration: u32,
}

impl Record {
    pub fn new(generation: u32, expiration: u32) -> Self {
        Self {
            bins: BTreeMap::new(),
            generation,
            expiration,
        }
    }

    /// Insert a bin value, merging with any earlier value for the same name
    pub fn add_bin(&mut self, name: String, value: Value) {
        use std::collections::btree_map::Entry;

        match self.bins.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(BinValue::Single(value));
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                BinValue::Multi(values) => values.push(value),
                BinValue::Single(prev) => {
                    let prev = std::mem::take(prev);
                    slot.insert(BinValue::Multi(vec![prev, value]));
                }
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<&BinValue> {
        self.bins.get(name)
    }

    /// Single value of a bin; `None` if absent or multi-valued
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.bins.get(name).and_then(BinValue::as_single)
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }
}
