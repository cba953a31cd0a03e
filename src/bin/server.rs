//! Meridian Development Node
//!
//! Serves the wire protocol from an in-memory store.

use std::sync::Arc;

use clap::Parser;
use meridian::server::{MemStore, Server};
use tracing_subscriber::{fmt, EnvFilter};

/// Meridian development node
#[derive(Parser, Debug)]
#[command(name = "meridian-node")]
#[command(about = "In-memory Meridian node for local development")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    listen: String,

    /// Namespaces to serve
    #[arg(short, long, default_value = "test", value_delimiter = ',')]
    namespace: Vec<String>,

    /// Maximum record size in KB
    #[arg(long, default_value = "1024")]
    max_record_kb: usize,

    /// Idle read timeout per connection in ms (0 = none)
    #[arg(long, default_value = "0")]
    read_timeout_ms: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meridian=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("Meridian node v{}", meridian::VERSION);
    tracing::info!("Namespaces: {:?}", args.namespace);

    let store = Arc::new(
        MemStore::new(args.namespace.iter().cloned())
            .with_max_record_size(args.max_record_kb * 1024),
    );

    let server = match Server::bind(&args.listen, store) {
        Ok(server) => server.with_timeouts(args.read_timeout_ms, 0),
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
