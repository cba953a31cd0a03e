//! Retry policy
//!
//! Each attempt is described by an immutable [`RoutingAttempt`]; a failed
//! attempt produces the next record through `prepare_retry_read` or
//! `prepare_retry_write`. The only state that outlives a command is the
//! partition's shared error streak.
//!
//! ## Read / Write Asymmetry
//! - Reads have no side effect: any retryable failure may be retried, on
//!   whichever node the degraded partition now prefers.
//! - Writes are pinned to the master and retried only when the server cannot
//!   have applied them. A failure after the request left the client is in
//!   doubt and is surfaced as such unless the policy opts in to retrying.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cluster::{Node, Partition, PartitionMap};
use crate::error::MeridianError;
use crate::policy::Policy;

/// Where in the attempt a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Nothing was sent: no node, no connection, connect refused
    BeforeSend,

    /// The request may have reached the server
    AfterSend,

    /// The server reported it did not apply the request
    ServerRetryable,

    /// The server received the request but timed out processing it
    ServerTimeout,

    /// Never retried
    Fatal,
}

/// A failed attempt
#[derive(Debug)]
pub struct AttemptFailure {
    pub error: MeridianError,
    pub class: FailureClass,
}

impl AttemptFailure {
    pub fn new(error: MeridianError, class: FailureClass) -> Self {
        Self { error, class }
    }

    pub fn before_send(error: MeridianError) -> Self {
        Self::new(error, FailureClass::BeforeSend)
    }

    pub fn after_send(error: MeridianError) -> Self {
        Self::new(error, FailureClass::AfterSend)
    }

    pub fn fatal(error: MeridianError) -> Self {
        Self::new(error, FailureClass::Fatal)
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.error, MeridianError::SocketTimeout { .. })
            || self.class == FailureClass::ServerTimeout
    }

    /// Connection and socket failures count against the node serving the partition
    pub fn counts_toward_streak(&self) -> bool {
        match self.class {
            FailureClass::AfterSend => true,
            FailureClass::BeforeSend => matches!(
                self.error,
                MeridianError::Connection { .. } | MeridianError::SocketTimeout { .. }
            ),
            _ => false,
        }
    }
}

/// What the executor does with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    InDoubt,
    Fatal,
}

/// Decide how to proceed after a failure
pub fn classify(failure: &AttemptFailure, has_write: bool, policy: &Policy) -> RetryDecision {
    match failure.class {
        FailureClass::Fatal => RetryDecision::Fatal,
        FailureClass::BeforeSend | FailureClass::ServerRetryable => RetryDecision::Retry,
        FailureClass::AfterSend | FailureClass::ServerTimeout => {
            if !has_write || policy.retry_in_doubt_writes {
                RetryDecision::Retry
            } else {
                RetryDecision::InDoubt
            }
        }
    }
}

/// Routing record for one attempt
#[derive(Debug, Clone)]
pub struct RoutingAttempt {
    pub partition: Partition,

    /// Zero for the first attempt
    pub iteration: u32,

    /// Writes never leave the master
    pub pinned_to_master: bool,

    /// A timed-out read retries the same node; the streak still records it
    pub last_failure_timed_out: bool,
}

impl RoutingAttempt {
    pub fn first(partition: Partition, has_write: bool) -> Self {
        Self {
            partition,
            iteration: 0,
            pinned_to_master: has_write,
            last_failure_timed_out: false,
        }
    }

    /// Next read attempt; node choice follows the partition's updated streak
    pub fn prepare_retry_read(&self, timed_out: bool) -> Self {
        Self {
            partition: self.partition.clone(),
            iteration: self.iteration + 1,
            pinned_to_master: false,
            last_failure_timed_out: timed_out,
        }
    }

    /// Next write attempt; always the master again
    pub fn prepare_retry_write(&self, timed_out: bool) -> Self {
        Self {
            partition: self.partition.clone(),
            iteration: self.iteration + 1,
            pinned_to_master: true,
            last_failure_timed_out: timed_out,
        }
    }

    pub fn select_node(
        &self,
        map: &PartitionMap,
        policy: &Policy,
        streak: u32,
    ) -> crate::Result<Arc<Node>> {
        if self.pinned_to_master {
            return self.partition.write_node(map);
        }
        // Discount the increment the timed-out attempt itself added
        let streak = if self.last_failure_timed_out {
            streak.saturating_sub(1)
        } else {
            streak
        };
        self.partition.read_node(
            map,
            policy.read_consistency,
            streak,
            policy.error_streak_threshold,
        )
    }
}

/// Attempt and deadline budget for one command
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    max_retries: u32,
    deadline: Option<Instant>,
}

impl RetryBudget {
    pub fn start(policy: &Policy) -> Self {
        Self {
            max_retries: policy.max_retries,
            deadline: (!policy.total_timeout.is_zero()).then(|| Instant::now() + policy.total_timeout),
        }
    }

    /// Time left before the deadline, if there is one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// True if another attempt is allowed after `attempts` have been made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }
}
