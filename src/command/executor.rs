//! Command Executor
//!
//! Drives one logical command through
//! build request → select node → send/receive → decode or classify → retry or finish.
//!
//! ## Lifecycle
//! 1. Classify the operation list once (`OperateArgs::has_write`)
//! 2. Resolve the partition; pick master (writes) or a read node
//! 3. Encode the request (size pass, then write pass)
//! 4. Send, read the header, stream the bin records
//! 5. Map the result code to an outcome or a retryable failure
//! 6. Retry per [`super::retry`] or return the terminal result

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::cluster::{ClusterView, Node, Partition};
use crate::error::{MeridianError, Result};
use crate::key::Key;
use crate::network::{ConnectionPool, Lease};
use crate::operation::{OperateArgs, Operation};
use crate::policy::Policy;
use crate::protocol::{encode_operate, read_response_header, RecordReader, ResultCode};
use crate::record::Record;

use super::cancel::CancelToken;
use super::retry::{classify, AttemptFailure, FailureClass, RetryBudget, RetryDecision, RoutingAttempt};

/// Response-decoding strategy of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Operate: decode bins; not-found is an error only for writes
    Operate,

    /// Header-only read; not-found means the record does not exist
    Exists,

    /// Record delete; not-found means there was nothing to delete
    Delete,
}

impl CommandKind {
    fn not_found_is_empty(self, has_write: bool) -> bool {
        match self {
            CommandKind::Operate => !has_write,
            CommandKind::Exists | CommandKind::Delete => true,
        }
    }
}

/// Result of a successful command
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The server returned a record
    Record(Record),

    /// No record, and that is not an error for this command
    Empty,
}

impl Outcome {
    pub fn into_record(self) -> Option<Record> {
        match self {
            Outcome::Record(record) => Some(record),
            Outcome::Empty => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Record(_))
    }
}

/// Tagged result of one attempt
enum AttemptOutcome {
    Record(Record),
    Empty,
    Semantic(ResultCode),
}

/// Per-invocation state, discarded when the command finishes
struct CommandState<'a> {
    kind: CommandKind,
    key: &'a Key,
    args: OperateArgs,
    policy: &'a Policy,
    buffer: Bytes,
    budget: RetryBudget,
    last_node: Option<Arc<Node>>,

    /// Some attempt of a write may have reached the server
    in_doubt: bool,
}

/// Executes single-key commands against the cluster
pub struct CommandExecutor {
    cluster: Arc<ClusterView>,
    pool: Arc<dyn ConnectionPool>,
}

impl CommandExecutor {
    pub fn new(cluster: Arc<ClusterView>, pool: Arc<dyn ConnectionPool>) -> Self {
        Self { cluster, pool }
    }

    pub fn cluster(&self) -> &Arc<ClusterView> {
        &self.cluster
    }

    /// Execute an operate command
    ///
    /// Returns `None` when a read-only command finds no record.
    pub fn execute(&self, key: &Key, operations: &[Operation], policy: &Policy) -> Result<Option<Record>> {
        self.run(CommandKind::Operate, key, operations, policy, None)
            .map(Outcome::into_record)
    }

    /// Execute an operate command that the caller may cancel
    pub fn execute_with_cancel(
        &self,
        key: &Key,
        operations: &[Operation],
        policy: &Policy,
        cancel: &CancelToken,
    ) -> Result<Option<Record>> {
        self.run(CommandKind::Operate, key, operations, policy, Some(cancel))
            .map(Outcome::into_record)
    }

    /// Execute a command of any kind
    pub fn run(
        &self,
        kind: CommandKind,
        key: &Key,
        operations: &[Operation],
        policy: &Policy,
        cancel: Option<&CancelToken>,
    ) -> Result<Outcome> {
        policy.validate()?;

        // Step 1: Classify
        let args = OperateArgs::new(operations, policy)?;

        // Step 2: Encode once; the header carries the command's total timeout
        let server_timeout = if policy.total_timeout.is_zero() {
            policy.attempt_timeout(None)
        } else {
            Some(policy.total_timeout)
        };
        let buffer = encode_operate(key, operations, &args, policy, server_timeout)?;

        let partition = Partition::resolve(key, self.cluster.partition_map().partition_count());
        let mut routing = RoutingAttempt::first(partition, args.has_write);

        let mut state = CommandState {
            kind,
            key,
            args,
            policy,
            buffer,
            budget: RetryBudget::start(policy),
            last_node: None,
            in_doubt: false,
        };

        loop {
            if cancel.map_or(false, CancelToken::is_cancelled) {
                let node_name = state.last_node.as_ref().map(|n| n.name().to_string());
                return Err(self.tag_in_doubt(
                    &state,
                    node_name,
                    routing.iteration,
                    MeridianError::Cancelled,
                ));
            }

            let failure = match self.attempt(&mut state, &routing, cancel) {
                Ok(outcome) => {
                    self.cluster.streaks().record_success(&routing.partition);
                    return self.finish(&state, &routing, outcome);
                }
                Err(failure) => failure,
            };

            if cancel.map_or(false, CancelToken::is_cancelled) {
                tracing::debug!("Command on {} cancelled: {}", key, failure.error);
                if state.args.has_write && failure.class == FailureClass::AfterSend {
                    state.in_doubt = true;
                }
                let node_name = state.last_node.as_ref().map(|n| n.name().to_string());
                return Err(self.tag_in_doubt(
                    &state,
                    node_name,
                    routing.iteration + 1,
                    MeridianError::Cancelled,
                ));
            }

            if failure.counts_toward_streak() {
                let streak = self.cluster.streaks().record_failure(&routing.partition);
                tracing::trace!(
                    "Partition {}/{} error streak {}",
                    routing.partition.namespace,
                    routing.partition.id,
                    streak
                );
            }

            let attempts = routing.iteration + 1;
            let node_name = state.last_node.as_ref().map(|n| n.name().to_string());
            let maybe_applied = matches!(
                failure.class,
                FailureClass::AfterSend | FailureClass::ServerTimeout
            );

            match classify(&failure, state.args.has_write, policy) {
                RetryDecision::Fatal => return Err(failure.error),
                RetryDecision::InDoubt => {
                    tracing::warn!(
                        "Write to {} in doubt on {:?}: {}",
                        key,
                        node_name,
                        failure.error
                    );
                    return Err(MeridianError::InDoubt {
                        node: node_name.unwrap_or_default(),
                        attempts,
                        source: Box::new(failure.error),
                    });
                }
                RetryDecision::Retry => {}
            }

            if state.args.has_write && maybe_applied {
                state.in_doubt = true;
            }

            if !state.budget.allows_retry(attempts) {
                tracing::warn!(
                    "Command on {} failed after {} attempt(s): {}",
                    key,
                    attempts,
                    failure.error
                );
                return Err(MeridianError::RetriesExhausted {
                    attempts,
                    last_node: node_name.clone(),
                    source: Box::new(self.tag_in_doubt(&state, node_name, attempts, failure.error)),
                });
            }

            if !policy.sleep_between_retries.is_zero() {
                let sleep = state
                    .budget
                    .remaining()
                    .map_or(policy.sleep_between_retries, |r| r.min(policy.sleep_between_retries));
                std::thread::sleep(sleep);
            }

            if state.budget.expired() {
                tracing::warn!(
                    "Command on {} exceeded total timeout after {} attempt(s): {}",
                    key,
                    attempts,
                    failure.error
                );
                return Err(MeridianError::TotalTimeout {
                    attempts,
                    last_node: node_name.clone(),
                    source: Box::new(self.tag_in_doubt(&state, node_name, attempts, failure.error)),
                });
            }

            tracing::debug!(
                "Retrying command on {} (attempt {} failed on {:?}): {}",
                key,
                attempts,
                node_name,
                failure.error
            );

            routing = if state.args.has_write {
                routing.prepare_retry_write(failure.timed_out())
            } else {
                routing.prepare_retry_read(failure.timed_out())
            };
        }
    }

    fn tag_in_doubt(
        &self,
        state: &CommandState<'_>,
        node: Option<String>,
        attempts: u32,
        error: MeridianError,
    ) -> MeridianError {
        if state.in_doubt {
            MeridianError::InDoubt {
                node: node.unwrap_or_default(),
                attempts,
                source: Box::new(error),
            }
        } else {
            error
        }
    }

    /// Map a terminal attempt outcome to the command result
    fn finish(
        &self,
        state: &CommandState<'_>,
        routing: &RoutingAttempt,
        outcome: AttemptOutcome,
    ) -> Result<Outcome> {
        match outcome {
            AttemptOutcome::Record(record) => Ok(Outcome::Record(record)),
            AttemptOutcome::Empty => Ok(Outcome::Empty),
            AttemptOutcome::Semantic(code) => Err(MeridianError::Server {
                code,
                node: state
                    .last_node
                    .as_ref()
                    .map(|n| n.name().to_string())
                    .unwrap_or_default(),
                attempts: routing.iteration + 1,
            }),
        }
    }

    /// One round trip: select node, send, receive, decode
    fn attempt(
        &self,
        state: &mut CommandState<'_>,
        routing: &RoutingAttempt,
        cancel: Option<&CancelToken>,
    ) -> std::result::Result<AttemptOutcome, AttemptFailure> {
        let timeout = state.policy.attempt_timeout(state.budget.remaining());

        // Step 2: Route
        let map = self.cluster.partition_map();
        let streak = self.cluster.streaks().get(&routing.partition);
        let node = routing
            .select_node(&map, state.policy, streak)
            .map_err(AttemptFailure::before_send)?;
        state.last_node = Some(Arc::clone(&node));

        tracing::trace!(
            "Attempt {} for {} on {} (streak {}, timeout {:?})",
            routing.iteration + 1,
            state.key,
            node,
            streak,
            timeout
        );

        // Step 4: Send / receive on a leased connection
        let mut lease = Lease::acquire(self.pool.as_ref(), Arc::clone(&node), timeout)
            .map_err(|e| AttemptFailure::before_send(transport_error(&node, timeout, e)))?;
        let _in_flight = cancel.map(|c| c.register(lease.connection().abort_handle()));

        let connection = lease.connection();
        connection
            .set_timeout(timeout)
            .map_err(|e| AttemptFailure::before_send(transport_error(&node, timeout, e.into())))?;
        connection
            .write_all(&state.buffer)
            .and_then(|_| connection.flush())
            .map_err(|e| AttemptFailure::after_send(transport_error(&node, timeout, e.into())))?;

        let (code, header) = read_response_header(connection).map_err(|e| match e {
            MeridianError::Protocol(_) => AttemptFailure::fatal(e),
            other => AttemptFailure::after_send(transport_error(&node, timeout, other)),
        })?;

        // Step 8: Decode & merge, even for error codes, so the connection stays in sync
        let mut record = Record::new(header.generation, header.expiration);
        for item in RecordReader::new(connection.as_mut(), &header) {
            let (name, value) = item.map_err(|e| match e {
                MeridianError::Protocol(_) => AttemptFailure::fatal(e),
                other => AttemptFailure::after_send(transport_error(&node, timeout, other)),
            })?;
            record.add_bin(name, value);
        }
        lease.mark_healthy();

        // Step 5/6: Classify response
        match code {
            ResultCode::Ok => Ok(AttemptOutcome::Record(record)),
            ResultCode::KeyNotFound if state.kind.not_found_is_empty(state.args.has_write) => {
                Ok(AttemptOutcome::Empty)
            }
            code if code.is_retryable() => Err(AttemptFailure::new(
                server_error(&node, code, routing),
                FailureClass::ServerRetryable,
            )),
            code if code.is_timeout() => Err(AttemptFailure::new(
                server_error(&node, code, routing),
                FailureClass::ServerTimeout,
            )),
            code => Ok(AttemptOutcome::Semantic(code)),
        }
    }
}

fn server_error(node: &Node, code: ResultCode, routing: &RoutingAttempt) -> MeridianError {
    MeridianError::Server {
        code,
        node: node.name().to_string(),
        attempts: routing.iteration + 1,
    }
}

/// Normalise I/O failures into the transport taxonomy
fn transport_error(node: &Node, timeout: Option<Duration>, err: MeridianError) -> MeridianError {
    match err {
        MeridianError::Io(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            MeridianError::SocketTimeout {
                node: node.name().to_string(),
                timeout: timeout.unwrap_or_default(),
            }
        }
        MeridianError::Io(e) => MeridianError::Connection {
            node: node.name().to_string(),
            source: e,
        },
        MeridianError::Connection { node, source }
            if matches!(
                source.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            MeridianError::SocketTimeout {
                node,
                timeout: timeout.unwrap_or_default(),
            }
        }
        other => other,
    }
}
