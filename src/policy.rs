//! Command policies
//!
//! Per-command options recognised by the executor, with sensible defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MeridianError, Result};

/// Which node of a partition may serve a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadConsistency {
    /// Always read from the master
    Master,

    /// Prefer the master; rotate into replicas once the partition is degraded
    MasterOrReplica,

    /// Spread reads over every replica; rotate once the partition is degraded
    AllReplicas,
}

/// How a write treats an existing (or missing) record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordExistsAction {
    /// Create or merge bins into the existing record
    Update,

    /// Merge bins; the record must already exist
    UpdateOnly,

    /// Create or replace all bins
    Replace,

    /// Replace all bins; the record must already exist
    ReplaceOnly,

    /// Create; the record must not exist
    CreateOnly,
}

/// Optimistic concurrency check on record generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationPolicy {
    None,
    ExpectGenEqual,
}

/// Options for a single command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    // -------------------------------------------------------------------------
    // Routing
    // -------------------------------------------------------------------------
    pub read_consistency: ReadConsistency,

    /// Consecutive transport failures on a partition before reads move off
    /// the preferred node
    pub error_streak_threshold: u32,

    // -------------------------------------------------------------------------
    // Retry budget
    // -------------------------------------------------------------------------
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Deadline across all attempts. Zero means no deadline.
    pub total_timeout: Duration,

    /// Per-attempt socket timeout. Zero means no timeout.
    pub socket_timeout: Duration,

    pub sleep_between_retries: Duration,

    /// Allow retrying writes whose request may already have reached the server
    pub retry_in_doubt_writes: bool,

    // -------------------------------------------------------------------------
    // Write semantics
    // -------------------------------------------------------------------------
    /// Send the user key along with the digest
    pub send_key: bool,

    pub record_exists_action: RecordExistsAction,

    pub generation_policy: GenerationPolicy,

    /// Expected generation when `generation_policy` is `ExpectGenEqual`
    pub generation: u32,

    /// Record time-to-live in seconds; 0 keeps the server default
    pub expiration: u32,

    /// Return a result for every operation, including writes
    pub respond_all_ops: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            read_consistency: ReadConsistency::MasterOrReplica,
            error_streak_threshold: 1,
            max_retries: 2,
            total_timeout: Duration::from_millis(1000),
            socket_timeout: Duration::from_millis(30_000),
            sleep_between_retries: Duration::ZERO,
            retry_in_doubt_writes: false,
            send_key: false,
            record_exists_action: RecordExistsAction::Update,
            generation_policy: GenerationPolicy::None,
            generation: 0,
            expiration: 0,
            respond_all_ops: false,
        }
    }
}

impl Policy {
    /// Create a new policy builder
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.error_streak_threshold == 0 {
            return Err(MeridianError::Config(
                "error_streak_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket timeout for one attempt, clamped by what is left of the deadline
    pub fn attempt_timeout(&self, remaining: Option<Duration>) -> Option<Duration> {
        let socket = (!self.socket_timeout.is_zero()).then_some(self.socket_timeout);
        match (socket, remaining) {
            (Some(s), Some(r)) => Some(s.min(r)),
            (s, r) => s.or(r),
        }
    }
}

/// Builder for Policy
#[derive(Default)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    pub fn read_consistency(mut self, consistency: ReadConsistency) -> Self {
        self.policy.read_consistency = consistency;
        self
    }

    pub fn error_streak_threshold(mut self, threshold: u32) -> Self {
        self.policy.error_streak_threshold = threshold;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.policy.total_timeout = timeout;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.policy.socket_timeout = timeout;
        self
    }

    pub fn sleep_between_retries(mut self, sleep: Duration) -> Self {
        self.policy.sleep_between_retries = sleep;
        self
    }

    pub fn retry_in_doubt_writes(mut self, enabled: bool) -> Self {
        self.policy.retry_in_doubt_writes = enabled;
        self
    }

    pub fn send_key(mut self, send: bool) -> Self {
        self.policy.send_key = send;
        self
    }

    pub fn record_exists_action(mut self, action: RecordExistsAction) -> Self {
        self.policy.record_exists_action = action;
        self
    }

    /// Require the record's generation to equal `generation`
    pub fn expect_generation(mut self, generation: u32) -> Self {
        self.policy.generation_policy = GenerationPolicy::ExpectGenEqual;
        self.policy.generation = generation;
        self
    }

    pub fn expiration(mut self, seconds: u32) -> Self {
        self.policy.expiration = seconds;
        self
    }

    pub fn respond_all_ops(mut self, enabled: bool) -> Self {
        self.policy.respond_all_ops = enabled;
        self
    }

    pub fn build(self) -> Policy {
        self.policy
    }
}
