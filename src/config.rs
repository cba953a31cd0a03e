//! Configuration for Meridian
//!
//! Centralized client configuration with sensible defaults.

use std::net::SocketAddr;
use std::time::Duration;

use crate::cluster::DEFAULT_PARTITION_COUNT;
use crate::error::{MeridianError, Result};
use crate::policy::Policy;

/// A node to bootstrap the static cluster view from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub address: SocketAddr,
}

/// Main configuration for a Meridian client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Cluster Configuration
    // -------------------------------------------------------------------------
    /// Nodes of the cluster, in partition assignment order
    pub nodes: Vec<NodeConfig>,

    /// Namespaces served by the cluster
    pub namespaces: Vec<String>,

    /// Copies of each partition (master included)
    pub replication_factor: usize,

    /// Partitions per namespace
    pub partition_count: usize,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Max open connections per node
    pub max_connections_per_node: usize,

    /// Connect timeout for new connections
    pub connect_timeout: Duration,

    // -------------------------------------------------------------------------
    // Default Policies
    // -------------------------------------------------------------------------
    /// Policy for commands without writes
    pub read_policy: Policy,

    /// Policy for commands with at least one write
    pub write_policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            namespaces: vec!["test".to_string()],
            replication_factor: 2,
            partition_count: DEFAULT_PARTITION_COUNT,
            max_connections_per_node: 100,
            connect_timeout: Duration::from_millis(1000),
            read_policy: Policy::default(),
            write_policy: Policy::builder().max_retries(0).build(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(MeridianError::Config("at least one node is required".to_string()));
        }
        if self.namespaces.is_empty() {
            return Err(MeridianError::Config("at least one namespace is required".to_string()));
        }
        if self.replication_factor == 0 || self.replication_factor > self.nodes.len() {
            return Err(MeridianError::Config(format!(
                "replication factor {} invalid for {} node(s)",
                self.replication_factor,
                self.nodes.len()
            )));
        }
        if self.partition_count == 0 {
            return Err(MeridianError::Config("partition count must be positive".to_string()));
        }
        self.read_policy.validate()?;
        self.write_policy.validate()?;
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Add a cluster node
    pub fn node(mut self, name: impl Into<String>, address: SocketAddr) -> Self {
        self.config.nodes.push(NodeConfig {
            name: name.into(),
            address,
        });
        self
    }

    /// Set the namespaces served by the cluster
    pub fn namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Set the replication factor
    pub fn replication_factor(mut self, factor: usize) -> Self {
        self.config.replication_factor = factor;
        self
    }

    /// Set the partition count per namespace
    pub fn partition_count(mut self, count: usize) -> Self {
        self.config.partition_count = count;
        self
    }

    /// Set the maximum number of connections per node
    pub fn max_connections_per_node(mut self, count: usize) -> Self {
        self.config.max_connections_per_node = count;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the default read policy
    pub fn read_policy(mut self, policy: Policy) -> Self {
        self.config.read_policy = policy;
        self
    }

    /// Set the default write policy
    pub fn write_policy(mut self, policy: Policy) -> Self {
        self.config.write_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
