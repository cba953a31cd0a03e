//! Client
//!
//! Convenience facade over [`CommandExecutor`]: builds operation lists for
//! the common single-record commands and picks the default read or write
//! policy from [`Config`].

use std::sync::Arc;

use crate::cluster::{ClusterView, Node, PartitionMap};
use crate::command::{CancelToken, CommandExecutor, CommandKind};
use crate::config::Config;
use crate::error::Result;
use crate::key::Key;
use crate::network::{ConnectionPool, TcpConnectionPool};
use crate::operation::Operation;
use crate::policy::Policy;
use crate::record::Record;
use crate::value::Value;

/// Client for a Meridian cluster
pub struct Client {
    config: Config,
    executor: CommandExecutor,
}

impl Client {
    /// Create a client over an existing cluster view and pool
    pub fn new(config: Config, cluster: Arc<ClusterView>, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            config,
            executor: CommandExecutor::new(cluster, pool),
        }
    }

    /// Create a client with a static cluster view built from `config.nodes`
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        let nodes: Vec<Arc<Node>> = config
            .nodes
            .iter()
            .map(|n| Arc::new(Node::new(n.name.clone(), n.address)))
            .collect();
        let map = PartitionMap::uniform(
            1,
            &config.namespaces,
            &nodes,
            config.replication_factor,
            config.partition_count,
        )?;
        let cluster = Arc::new(ClusterView::new(map, nodes));
        let pool = Arc::new(TcpConnectionPool::new(
            config.max_connections_per_node,
            config.connect_timeout,
        ));

        tracing::info!(
            "Client ready: {} node(s), namespaces {:?}",
            config.nodes.len(),
            config.namespaces
        );
        Ok(Self::new(config, cluster, pool))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn cluster(&self) -> &Arc<ClusterView> {
        self.executor.cluster()
    }

    /// Default policy for an operation list
    fn policy_for(&self, operations: &[Operation]) -> &Policy {
        if operations.iter().any(|op| op.op_type.is_write()) {
            &self.config.write_policy
        } else {
            &self.config.read_policy
        }
    }

    // =========================================================================
    // Operate
    // =========================================================================

    /// Execute an operation list with the default policy
    pub fn operate(&self, key: &Key, operations: &[Operation]) -> Result<Option<Record>> {
        self.executor.execute(key, operations, self.policy_for(operations))
    }

    pub fn operate_with_policy(
        &self,
        policy: &Policy,
        key: &Key,
        operations: &[Operation],
    ) -> Result<Option<Record>> {
        self.executor.execute(key, operations, policy)
    }

    pub fn operate_with_cancel(
        &self,
        policy: &Policy,
        key: &Key,
        operations: &[Operation],
        cancel: &CancelToken,
    ) -> Result<Option<Record>> {
        self.executor.execute_with_cancel(key, operations, policy, cancel)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read every bin
    pub fn get(&self, key: &Key) -> Result<Option<Record>> {
        self.operate(key, &[Operation::get_all()])
    }

    /// Read selected bins
    pub fn get_bins(&self, key: &Key, bins: &[&str]) -> Result<Option<Record>> {
        let ops: Vec<Operation> = bins.iter().map(|b| Operation::get(b)).collect();
        self.operate(key, &ops)
    }

    /// Read generation and expiration only
    pub fn get_header(&self, key: &Key) -> Result<Option<Record>> {
        self.operate(key, &[Operation::get_header()])
    }

    pub fn exists(&self, key: &Key) -> Result<bool> {
        let ops = [Operation::get_header()];
        self.executor
            .run(CommandKind::Exists, key, &ops, &self.config.read_policy, None)
            .map(|outcome| outcome.is_found())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write bins
    pub fn put(&self, key: &Key, bins: &[(&str, Value)]) -> Result<()> {
        let ops: Vec<Operation> = bins
            .iter()
            .map(|(name, value)| Operation::put(name, value.clone()))
            .collect();
        self.operate(key, &ops).map(|_| ())
    }

    /// Increment a bin and return the record with its new value
    pub fn add(&self, key: &Key, bin: &str, delta: i64) -> Result<Option<Record>> {
        self.operate(key, &[Operation::add(bin, delta)])
    }

    pub fn append(&self, key: &Key, bin: &str, value: &str) -> Result<()> {
        self.operate(key, &[Operation::append(bin, value)]).map(|_| ())
    }

    pub fn prepend(&self, key: &Key, bin: &str, value: &str) -> Result<()> {
        self.operate(key, &[Operation::prepend(bin, value)]).map(|_| ())
    }

    pub fn touch(&self, key: &Key) -> Result<()> {
        self.operate(key, &[Operation::touch()]).map(|_| ())
    }

    /// Delete a record; returns whether it existed
    pub fn delete(&self, key: &Key) -> Result<bool> {
        let ops = [Operation::delete()];
        self.executor
            .run(CommandKind::Delete, key, &ops, &self.config.write_policy, None)
            .map(|outcome| outcome.is_found())
    }
}
