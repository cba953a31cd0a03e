//! Partition routing
//!
//! Resolves a key to its partition and picks the node that should serve a
//! command. Node choice is a pure function of the partition map snapshot,
//! the policy, and the partition's shared error streak.

use std::sync::Arc;

use crate::error::{MeridianError, Result};
use crate::key::Key;
use crate::policy::ReadConsistency;

use super::{Node, PartitionMap};

/// Routing health of a partition, derived from its error streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Use the preferred node
    Stable,

    /// Streak reached the threshold; reads move to an alternate node
    Degraded,
}

impl PartitionState {
    pub fn from_streak(streak: u32, threshold: u32) -> Self {
        if streak >= threshold.max(1) {
            PartitionState::Degraded
        } else {
            PartitionState::Stable
        }
    }
}

/// A key's partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub namespace: String,
    pub id: u32,

    /// Digest-derived offset used to spread `AllReplicas` reads
    spread: u32,
}

impl Partition {
    /// Partition id = first four digest bytes (little-endian) modulo partition count
    pub fn resolve(key: &Key, partition_count: usize) -> Self {
        let d = key.digest();
        let hash = u32::from_le_bytes([d[0], d[1], d[2], d[3]]);
        Self {
            namespace: key.namespace().to_string(),
            id: hash % partition_count.max(1) as u32,
            spread: u32::from_le_bytes([d[4], d[5], d[6], d[7]]),
        }
    }

    fn unavailable(&self) -> MeridianError {
        MeridianError::NoNodeAvailable {
            namespace: self.namespace.clone(),
            partition: self.id,
        }
    }

    /// Writes always go to the master
    pub fn write_node(&self, map: &PartitionMap) -> Result<Arc<Node>> {
        map.owners(&self.namespace, self.id)
            .and_then(|owners| owners.master.as_ref())
            .filter(|node| node.is_active())
            .cloned()
            .ok_or_else(|| self.unavailable())
    }

    /// Pick a read node
    ///
    /// Candidates are the master followed by the replicas. `Master` only ever
    /// considers the master. The others start at their preferred candidate
    /// (the master for `MasterOrReplica`, a digest-derived replica for
    /// `AllReplicas`) and shift one candidate further for every failure past
    /// the threshold. Inactive nodes are skipped.
    pub fn read_node(
        &self,
        map: &PartitionMap,
        consistency: ReadConsistency,
        streak: u32,
        threshold: u32,
    ) -> Result<Arc<Node>> {
        if consistency == ReadConsistency::Master {
            return self.write_node(map);
        }

        let owners = map
            .owners(&self.namespace, self.id)
            .ok_or_else(|| self.unavailable())?;
        let candidates: Vec<&Arc<Node>> = owners.master.iter().chain(owners.replicas.iter()).collect();
        if candidates.is_empty() {
            return Err(self.unavailable());
        }

        let len = candidates.len();
        let start = match consistency {
            ReadConsistency::AllReplicas => self.spread as usize % len,
            _ => 0,
        };
        let shift = degraded_shift(streak, threshold) as usize;

        (0..len)
            .map(|i| candidates[(start + shift + i) % len])
            .find(|node| node.is_active())
            .cloned()
            .ok_or_else(|| self.unavailable())
    }
}

/// How many candidates past the preferred one a degraded partition moves
pub fn degraded_shift(streak: u32, threshold: u32) -> u32 {
    let threshold = threshold.max(1);
    if streak >= threshold {
        streak - threshold + 1
    } else {
        0
    }
}
