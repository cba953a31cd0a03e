//! Error types for Meridian
//!
//! Provides a unified error type for all command operations. Callers only
//! ever see terminal errors: retryable conditions are consumed inside the
//! executor and surface, if at all, wrapped in `RetriesExhausted` or
//! `TotalTimeout`.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ResultCode;

/// Result type alias using MeridianError
pub type Result<T> = std::result::Result<T, MeridianError>;

/// Unified error type for Meridian operations
#[derive(Debug, Error)]
pub enum MeridianError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Semantic Errors (server reported a defined outcome)
    // -------------------------------------------------------------------------
    #[error("Server error on {node} after {attempts} attempt(s): {code}")]
    Server {
        code: ResultCode,
        node: String,
        attempts: u32,
    },

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Connection to {node} failed: {source}")]
    Connection {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket timeout on {node} after {timeout:?}")]
    SocketTimeout { node: String, timeout: Duration },

    #[error("No more connections available for {node}")]
    NoMoreConnections { node: String },

    #[error("No node available for {namespace} partition {partition}")]
    NoNodeAvailable { namespace: String, partition: u32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A write failed after its request may have reached the server.
    #[error("Write outcome in doubt on {node} after {attempts} attempt(s): {source}")]
    InDoubt {
        node: String,
        attempts: u32,
        #[source]
        source: Box<MeridianError>,
    },

    // -------------------------------------------------------------------------
    // Policy Exhaustion Errors
    // -------------------------------------------------------------------------
    #[error("Max retries exceeded after {attempts} attempt(s), last node {last_node:?}: {source}")]
    RetriesExhausted {
        attempts: u32,
        last_node: Option<String>,
        #[source]
        source: Box<MeridianError>,
    },

    #[error("Total timeout exceeded after {attempts} attempt(s), last node {last_node:?}: {source}")]
    TotalTimeout {
        attempts: u32,
        last_node: Option<String>,
        #[source]
        source: Box<MeridianError>,
    },

    #[error("Command cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Fatal / Programmer Errors
    // -------------------------------------------------------------------------
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Buffer overflow: message of {size} bytes exceeds {max}")]
    BufferOverflow { size: usize, max: usize },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MeridianError {
    /// The server result code behind this error, looking through retry wrappers.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            MeridianError::Server { code, .. } => Some(*code),
            MeridianError::InDoubt { source, .. }
            | MeridianError::RetriesExhausted { source, .. }
            | MeridianError::TotalTimeout { source, .. } => source.result_code(),
            _ => None,
        }
    }

    /// True when a write may or may not have been applied by the server.
    pub fn in_doubt(&self) -> bool {
        match self {
            MeridianError::InDoubt { .. } => true,
            MeridianError::RetriesExhausted { source, .. }
            | MeridianError::TotalTimeout { source, .. } => source.in_doubt(),
            _ => false,
        }
    }

    /// Is this error worth another attempt at the transport level?
    pub fn is_retryable(&self) -> bool {
        match self {
            MeridianError::Io(_)
            | MeridianError::Connection { .. }
            | MeridianError::SocketTimeout { .. }
            | MeridianError::NoMoreConnections { .. }
            | MeridianError::NoNodeAvailable { .. } => true,
            MeridianError::Server { code, .. } => code.is_retryable(),
            _ => false,
        }
    }

    /// Attempt count recorded on a terminal error, when known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            MeridianError::Server { attempts, .. }
            | MeridianError::InDoubt { attempts, .. }
            | MeridianError::RetriesExhausted { attempts, .. }
            | MeridianError::TotalTimeout { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
