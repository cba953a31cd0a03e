//! Partition Map
//!
//! Immutable, per-generation mapping from (namespace, partition id) to the
//! nodes owning that partition. A new generation replaces the old one as a
//! whole; readers never see a partially updated map.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MeridianError, Result};

use super::Node;

/// Partitions per namespace unless configured otherwise
pub const DEFAULT_PARTITION_COUNT: usize = 4096;

/// Owners of one partition
#[derive(Debug, Clone, Default)]
pub struct PartitionOwners {
    pub master: Option<Arc<Node>>,
    pub replicas: Vec<Arc<Node>>,
}

/// Snapshot of partition ownership
#[derive(Debug)]
pub struct PartitionMap {
    generation: u64,
    partition_count: usize,
    namespaces: HashMap<String, Vec<PartitionOwners>>,
}

impl PartitionMap {
    /// Create a new builder
    pub fn builder(generation: u64, partition_count: usize) -> PartitionMapBuilder {
        PartitionMapBuilder {
            generation,
            partition_count,
            namespaces: HashMap::new(),
        }
    }

    /// Assign partitions to nodes round-robin
    ///
    /// Partition `p` gets `nodes[p % n]` as master and the following
    /// `replication_factor - 1` nodes as replicas.
    pub fn uniform<S: AsRef<str>>(
        generation: u64,
        namespaces: &[S],
        nodes: &[Arc<Node>],
        replication_factor: usize,
        partition_count: usize,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(MeridianError::Config("partition map needs at least one node".to_string()));
        }
        if replication_factor == 0 || replication_factor > nodes.len() {
            return Err(MeridianError::Config(format!(
                "replication factor {} invalid for {} node(s)",
                replication_factor,
                nodes.len()
            )));
        }

        let mut builder = Self::builder(generation, partition_count);
        for namespace in namespaces {
            for partition in 0..partition_count {
                let master = Arc::clone(&nodes[partition % nodes.len()]);
                let replicas = (1..replication_factor)
                    .map(|offset| Arc::clone(&nodes[(partition + offset) % nodes.len()]))
                    .collect();
                builder = builder.owners(namespace.as_ref(), partition as u32, Some(master), replicas);
            }
        }
        builder.build()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn contains_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    pub fn owners(&self, namespace: &str, partition: u32) -> Option<&PartitionOwners> {
        self.namespaces
            .get(namespace)
            .and_then(|partitions| partitions.get(partition as usize))
    }
}

/// Builder for PartitionMap
pub struct PartitionMapBuilder {
    generation: u64,
    partition_count: usize,
    namespaces: HashMap<String, Vec<PartitionOwners>>,
}

impl PartitionMapBuilder {
    /// Set the owners of one partition. Out-of-range ids are rejected by `build`.
    pub fn owners(
        mut self,
        namespace: &str,
        partition: u32,
        master: Option<Arc<Node>>,
        replicas: Vec<Arc<Node>>,
    ) -> Self {
        let count = self.partition_count;
        let partitions = self
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| vec![PartitionOwners::default(); count]);
        let index = partition as usize;
        if index >= partitions.len() {
            partitions.resize(index + 1, PartitionOwners::default());
        }
        partitions[index] = PartitionOwners { master, replicas };
        self
    }

    pub fn build(self) -> Result<PartitionMap> {
        if self.partition_count == 0 {
            return Err(MeridianError::Config("partition count must be positive".to_string()));
        }
        for (namespace, partitions) in &self.namespaces {
            if partitions.len() > self.partition_count {
                return Err(MeridianError::Config(format!(
                    "namespace {} has partition id {} beyond count {}",
                    namespace,
                    partitions.len() - 1,
                    self.partition_count
                )));
            }
        }
        Ok(PartitionMap {
            generation: self.generation,
            partition_count: self.partition_count,
            namespaces: self.namespaces,
        })
    }
}
