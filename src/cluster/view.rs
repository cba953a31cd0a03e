//! Cluster View
//!
//! Holds the current partition map generation and the known nodes.
//!
//! ## Concurrency:
//! - `map`: the whole snapshot is swapped under a short write lock; commands
//!   clone the `Arc` and route against it without further locking
//! - `streaks`: atomic counters shared by concurrent commands, registered for
//!   each namespace a map generation introduces
//! - `next_index`: atomic round-robin cursor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{MeridianError, Result};

use super::{Node, PartitionMap, StreakTable};

/// Process-wide view of the cluster
pub struct ClusterView {
    map: RwLock<Arc<PartitionMap>>,
    nodes: RwLock<Vec<Arc<Node>>>,
    streaks: StreakTable,
    next_index: AtomicUsize,
}

impl ClusterView {
    pub fn new(map: PartitionMap, nodes: Vec<Arc<Node>>) -> Self {
        let streaks = StreakTable::new(map.partition_count());
        for namespace in map.namespaces() {
            streaks.register(namespace);
        }
        Self {
            map: RwLock::new(Arc::new(map)),
            nodes: RwLock::new(nodes),
            streaks,
            next_index: AtomicUsize::new(0),
        }
    }

    /// Current partition map snapshot
    pub fn partition_map(&self) -> Arc<PartitionMap> {
        Arc::clone(&self.map.read())
    }

    /// Install a newer partition map generation
    ///
    /// Returns false, leaving the current map in place, if `map` is not newer.
    pub fn update_partition_map(&self, map: PartitionMap) -> bool {
        let mut current = self.map.write();
        if map.generation() <= current.generation() {
            return false;
        }
        tracing::debug!(
            "Partition map generation {} -> {}",
            current.generation(),
            map.generation()
        );
        for namespace in map.namespaces() {
            self.streaks.register(namespace);
        }
        *current = Arc::new(map);
        true
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn set_nodes(&self, nodes: Vec<Arc<Node>>) {
        *self.nodes.write() = nodes;
    }

    pub fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.name() == name).cloned()
    }

    /// Next active node in round-robin order, for commands not bound to a partition
    pub fn next_node(&self) -> Result<Arc<Node>> {
        let nodes = self.nodes.read();
        let len = nodes.len();
        for _ in 0..len {
            let index = self.next_index.fetch_add(1, Ordering::Relaxed) % len;
            if nodes[index].is_active() {
                return Ok(Arc::clone(&nodes[index]));
            }
        }
        Err(MeridianError::Config("cluster has no active nodes".to_string()))
    }

    pub fn streaks(&self) -> &StreakTable {
        &self.streaks
    }
}
