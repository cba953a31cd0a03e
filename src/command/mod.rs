//! Command Module
//!
//! Single-key command execution with routing-aware retries.
//!
//! ## Responsibilities
//! - Turn an operation list into one request and route it by partition
//! - Decode and merge the response into a [`crate::Record`]
//! - Retry recoverable failures within the policy's attempt and time budget
//! - Keep read retries and write retries apart (writes never leave the master)

mod cancel;
mod executor;
pub mod retry;

pub use cancel::CancelToken;
pub use executor::{CommandExecutor, CommandKind, Outcome};
pub use retry::{AttemptFailure, FailureClass, RetryBudget, RetryDecision, RoutingAttempt};
