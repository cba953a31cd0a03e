//! Per-partition error streaks
//!
//! Counters are shared by every command routed to a partition. Updates are
//! relaxed atomics: a lost increment or reset only weakens the routing
//! heuristic, it never affects correctness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Partition, PartitionState};

/// Error streak counters, one per (namespace, partition)
///
/// Only registered namespaces have counters; every other partition reads as
/// a zero streak and ignores updates.
pub struct StreakTable {
    partition_count: usize,
    namespaces: RwLock<HashMap<String, Arc<[AtomicU32]>>>,
}

impl StreakTable {
    pub fn new(partition_count: usize) -> Self {
        Self {
            partition_count,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate counters for a namespace; existing streaks are kept
    pub fn register(&self, namespace: &str) {
        if self.namespaces.read().contains_key(namespace) {
            return;
        }
        let count = self.partition_count;
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_insert_with(|| (0..count).map(|_| AtomicU32::new(0)).collect());
    }

    pub fn is_registered(&self, namespace: &str) -> bool {
        self.namespaces.read().contains_key(namespace)
    }

    fn counters(&self, namespace: &str) -> Option<Arc<[AtomicU32]>> {
        self.namespaces.read().get(namespace).map(Arc::clone)
    }

    /// Current streak; zero for unknown partitions
    pub fn get(&self, partition: &Partition) -> u32 {
        self.counters(&partition.namespace)
            .and_then(|c| c.get(partition.id as usize).map(|c| c.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    /// Count a transport failure and return the new streak
    pub fn record_failure(&self, partition: &Partition) -> u32 {
        self.counters(&partition.namespace)
            .and_then(|c| {
                c.get(partition.id as usize)
                    .map(|c| c.fetch_add(1, Ordering::Relaxed).saturating_add(1))
            })
            .unwrap_or(0)
    }

    /// A successful response resets the streak
    pub fn record_success(&self, partition: &Partition) {
        if let Some(counters) = self.counters(&partition.namespace) {
            if let Some(c) = counters.get(partition.id as usize) {
                c.store(0, Ordering::Relaxed);
            }
        }
    }

    pub fn state(&self, partition: &Partition, threshold: u32) -> PartitionState {
        PartitionState::from_streak(self.get(partition), threshold)
    }
}
