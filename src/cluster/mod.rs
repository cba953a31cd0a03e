//! Cluster Module
//!
//! Routing state consumed by the command executor.
//!
//! ## Responsibilities
//! - Hold the current partition map snapshot (swapped whole by the tender)
//! - Resolve keys to partitions and partitions to nodes
//! - Track per-partition error streaks shared across commands
//!
//! Cluster discovery and health checking live outside this crate; they feed
//! [`ClusterView::update_partition_map`].

mod node;
mod partition;
mod partition_map;
mod streak;
mod view;

pub use node::Node;
pub use partition::{degraded_shift, Partition, PartitionState};
pub use partition_map::{PartitionMap, PartitionMapBuilder, PartitionOwners, DEFAULT_PARTITION_COUNT};
pub use streak::StreakTable;
pub use view::ClusterView;
