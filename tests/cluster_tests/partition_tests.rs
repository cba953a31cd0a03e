//! Partition Tests
//!
//! Tests for partition resolution, node selection and error streaks.

use std::net::SocketAddr;
use std::sync::Arc;

use meridian::cluster::{
    degraded_shift, ClusterView, Node, Partition, PartitionMap, PartitionState, StreakTable,
};
use meridian::{Digest, Key, MeridianError, ReadConsistency};

fn nodes(count: usize) -> Vec<Arc<Node>> {
    (0..count)
        .map(|i| {
            let addr: SocketAddr = format!("127.0.0.1:{}", 4000 + i).parse().unwrap();
            Arc::new(Node::new(format!("node-{}", i), addr))
        })
        .collect()
}

/// Key whose digest starts with the given partition hash and spread
fn key_with(hash: u32, spread: u32) -> Key {
    let mut digest: Digest = [0u8; 20];
    digest[0..4].copy_from_slice(&hash.to_le_bytes());
    digest[4..8].copy_from_slice(&spread.to_le_bytes());
    Key::with_digest("test", "", digest)
}

fn names(selected: &[Arc<Node>]) -> Vec<&str> {
    selected.iter().map(|n| n.name()).collect()
}

// =============================================================================
// Partition Resolution
// =============================================================================

#[test]
fn test_partition_id_from_digest() {
    assert_eq!(Partition::resolve(&key_with(5, 0), 16).id, 5);
    assert_eq!(Partition::resolve(&key_with(21, 0), 16).id, 5);
    assert_eq!(Partition::resolve(&key_with(4095, 0), 4096).id, 4095);

    let partition = Partition::resolve(&Key::new("test", "users", "alice"), 4096);
    assert_eq!(partition.namespace, "test");
    assert!(partition.id < 4096);
}

#[test]
fn test_uniform_map_assignment() {
    let nodes = nodes(3);
    let map = PartitionMap::uniform(7, &["test"], &nodes, 2, 8).unwrap();

    assert_eq!(map.generation(), 7);
    assert_eq!(map.partition_count(), 8);
    assert!(map.contains_namespace("test"));
    assert!(!map.contains_namespace("other"));

    let owners = map.owners("test", 4).unwrap();
    assert_eq!(owners.master.as_ref().unwrap().name(), "node-1");
    assert_eq!(names(&owners.replicas), vec!["node-2"]);
    assert!(map.owners("test", 8).is_none());
}

#[test]
fn test_invalid_maps_rejected() {
    let nodes = nodes(2);

    assert!(matches!(
        PartitionMap::uniform(1, &["test"], &nodes, 3, 8),
        Err(MeridianError::Config(_))
    ));
    assert!(PartitionMap::uniform(1, &["test"], &[], 1, 8).is_err());

    let built = PartitionMap::builder(1, 4)
        .owners("test", 9, Some(Arc::clone(&nodes[0])), vec![])
        .build();
    assert!(built.is_err());
}

// =============================================================================
// Node Selection
// =============================================================================

#[test]
fn test_write_node_is_master() {
    let nodes = nodes(3);
    let map = PartitionMap::uniform(1, &["test"], &nodes, 3, 8).unwrap();
    let partition = Partition::resolve(&key_with(2, 0), 8);

    assert_eq!(partition.write_node(&map).unwrap().name(), "node-2");
}

#[test]
fn test_write_never_falls_back_to_replica() {
    let nodes = nodes(3);
    let map = PartitionMap::uniform(1, &["test"], &nodes, 3, 8).unwrap();
    let partition = Partition::resolve(&key_with(0, 0), 8);
    nodes[0].set_active(false);

    let err = partition.write_node(&map).unwrap_err();
    assert!(matches!(err, MeridianError::NoNodeAvailable { partition: 0, .. }));
}

#[test]
fn test_read_node_shifts_with_streak() {
    let nodes = nodes(3);
    let map = PartitionMap::uniform(1, &["test"], &nodes, 3, 8).unwrap();
    let partition = Partition::resolve(&key_with(0, 0), 8);
    let pick = |streak| {
        partition
            .read_node(&map, ReadConsistency::MasterOrReplica, streak, 1)
            .unwrap()
            .name()
            .to_string()
    };

    assert_eq!(pick(0), "node-0");
    assert_eq!(pick(1), "node-1");
    assert_eq!(pick(2), "node-2");
    assert_eq!(pick(3), "node-0");
}

#[test]
fn test_read_node_respects_threshold() {
    let nodes = nodes(2);
    let map = PartitionMap::uniform(1, &["test"], &nodes, 2, 8).unwrap();
    let partition = Partition::resolve(&key_with(0, 0), 8);

    let read = |streak| {
        partition
            .read_node(&map, ReadConsistency::MasterOrReplica, streak, 3)
            .unwrap()
    };
    assert_eq!(read(2).name(), "node-0");
    assert_eq!(read(3).name(), "node-1");
}

#[test]
fn test_master_consistency_ignores_streak() {
    let nodes = nodes(3);
    let map = PartitionMap::uniform(1, &["test"], &nodes, 3, 8).unwrap();
    let partition = Partition::resolve(&key_with(0, 0), 8);

    for streak in 0..5 {
        let node = partition
            .read_node(&map, ReadConsistency::Master, streak, 1)
            .unwrap();
        assert_eq!(node.name(), "node-0");
    }
}

#[test]
fn test_all_replicas_spreads_by_digest() {
    let nodes = nodes(3);
    let map = PartitionMap::uniform(1, &["test"], &nodes, 3, 8).unwrap();

    let pick = |spread| {
        Partition::resolve(&key_with(0, spread), 8)
            .read_node(&map, ReadConsistency::AllReplicas, 0, 1)
            .unwrap()
            .name()
            .to_string()
    };
    assert_eq!(pick(0), "node-0");
    assert_eq!(pick(1), "node-1");
    assert_eq!(pick(5), "node-2");
}

#[test]
fn test_read_skips_inactive_nodes() {
    let nodes = nodes(3);
    let map = PartitionMap::uniform(1, &["test"], &nodes, 3, 8).unwrap();
    let partition = Partition::resolve(&key_with(0, 0), 8);
    nodes[0].set_active(false);
    nodes[1].set_active(false);

    let node = partition
        .read_node(&map, ReadConsistency::MasterOrReplica, 0, 1)
        .unwrap();
    assert_eq!(node.name(), "node-2");

    nodes[2].set_active(false);
    assert!(partition
        .read_node(&map, ReadConsistency::MasterOrReplica, 0, 1)
        .is_err());
}

#[test]
fn test_unknown_namespace_unavailable() {
    let nodes = nodes(1);
    let map = PartitionMap::uniform(1, &["test"], &nodes, 1, 8).unwrap();
    let partition = Partition::resolve(&Key::with_digest("other", "", [0u8; 20]), 8);

    assert!(partition.write_node(&map).is_err());
    assert!(partition
        .read_node(&map, ReadConsistency::MasterOrReplica, 0, 1)
        .is_err());
}

// =============================================================================
// Error Streaks
// =============================================================================

#[test]
fn test_degraded_shift() {
    assert_eq!(degraded_shift(0, 1), 0);
    assert_eq!(degraded_shift(1, 1), 1);
    assert_eq!(degraded_shift(4, 1), 4);
    assert_eq!(degraded_shift(2, 3), 0);
    assert_eq!(degraded_shift(3, 3), 1);
    // A zero threshold behaves like one
    assert_eq!(degraded_shift(1, 0), 1);
}

#[test]
fn test_streak_counts_and_resets() {
    let table = StreakTable::new(8);
    table.register("test");
    let partition = Partition::resolve(&key_with(3, 0), 8);
    let other = Partition::resolve(&key_with(4, 0), 8);

    assert_eq!(table.get(&partition), 0);
    assert_eq!(table.record_failure(&partition), 1);
    assert_eq!(table.record_failure(&partition), 2);
    assert_eq!(table.get(&other), 0);
    assert_eq!(table.state(&partition, 2), PartitionState::Degraded);
    assert_eq!(table.state(&partition, 3), PartitionState::Stable);

    table.record_success(&partition);
    assert_eq!(table.get(&partition), 0);
}

#[test]
fn test_unregistered_namespace_has_no_streak() {
    let table = StreakTable::new(8);
    let partition = Partition::resolve(&Key::with_digest("other", "", [0u8; 20]), 8);

    assert_eq!(table.record_failure(&partition), 0);
    assert_eq!(table.get(&partition), 0);
    table.record_success(&partition);
    assert!(!table.is_registered("other"));
}

#[test]
fn test_streaks_follow_partition_map_namespaces() {
    let nodes = nodes(2);
    let view = ClusterView::new(
        PartitionMap::uniform(1, &["test"], &nodes, 1, 8).unwrap(),
        nodes.clone(),
    );
    assert!(view.streaks().is_registered("test"));
    assert!(!view.streaks().is_registered("other"));

    let other = Partition::resolve(&Key::with_digest("other", "", [0u8; 20]), 8);
    assert_eq!(view.streaks().get(&other), 0);
    assert!(!view.streaks().is_registered("other"));

    let test = Partition::resolve(&key_with(2, 0), 8);
    view.streaks().record_failure(&test);

    view.update_partition_map(PartitionMap::uniform(2, &["test", "other"], &nodes, 1, 8).unwrap());
    assert!(view.streaks().is_registered("other"));
    assert_eq!(view.streaks().record_failure(&other), 1);
    // Streaks of known namespaces survive a map update
    assert_eq!(view.streaks().get(&test), 1);
}

#[test]
fn test_streaks_shared_across_threads() {
    let table = Arc::new(StreakTable::new(8));
    table.register("test");
    let partition = Partition::resolve(&key_with(1, 0), 8);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            let partition = partition.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    table.record_failure(&partition);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.get(&partition), 400);
}

// =============================================================================
// Cluster View
// =============================================================================

#[test]
fn test_only_newer_map_installed() {
    let nodes = nodes(2);
    let view = ClusterView::new(
        PartitionMap::uniform(5, &["test"], &nodes, 1, 8).unwrap(),
        nodes.clone(),
    );

    assert!(!view.update_partition_map(PartitionMap::uniform(5, &["test"], &nodes, 2, 8).unwrap()));
    assert!(!view.update_partition_map(PartitionMap::uniform(4, &["test"], &nodes, 2, 8).unwrap()));
    assert!(view.partition_map().owners("test", 0).unwrap().replicas.is_empty());

    assert!(view.update_partition_map(PartitionMap::uniform(6, &["test"], &nodes, 2, 8).unwrap()));
    assert_eq!(view.partition_map().generation(), 6);
    assert_eq!(view.partition_map().owners("test", 0).unwrap().replicas.len(), 1);
}

#[test]
fn test_snapshot_survives_update() {
    let nodes = nodes(2);
    let view = ClusterView::new(
        PartitionMap::uniform(1, &["test"], &nodes, 1, 8).unwrap(),
        nodes.clone(),
    );

    let snapshot = view.partition_map();
    view.update_partition_map(PartitionMap::uniform(2, &["test"], &nodes, 2, 8).unwrap());

    assert_eq!(snapshot.generation(), 1);
    assert_eq!(view.partition_map().generation(), 2);
}

#[test]
fn test_next_node_round_robin_skips_inactive() {
    let nodes = nodes(3);
    let view = ClusterView::new(
        PartitionMap::uniform(1, &["test"], &nodes, 1, 8).unwrap(),
        nodes.clone(),
    );
    nodes[1].set_active(false);

    let picked: Vec<String> = (0..4)
        .map(|_| view.next_node().unwrap().name().to_string())
        .collect();
    assert!(!picked.iter().any(|n| n == "node-1"));
    assert!(picked.iter().any(|n| n == "node-0"));
    assert!(picked.iter().any(|n| n == "node-2"));

    assert_eq!(view.get_node("node-2").unwrap().address().port(), 4002);
    assert!(view.get_node("missing").is_none());
}
