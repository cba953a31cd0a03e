//! Development Node
//!
//! A single-process node that speaks the wire protocol and keeps records in
//! memory. Used by the `meridian-node` binary and the end-to-end tests.
//!
//! ## Architecture
//! - `MemStore`: applies requests atomically per record
//! - `ConnectionHandler`: request/response loop for one client
//! - `Server`: accept loop, thread per connection

mod handler;
mod listener;
mod store;

pub use handler::ConnectionHandler;
pub use listener::{Server, ServerHandle, ShutdownHandle};
pub use store::{MemStore, DEFAULT_MAX_RECORD_SIZE};
