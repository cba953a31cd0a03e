//! Meridian CLI Client
//!
//! Command-line interface for single-record commands. Results are printed
//! as JSON.

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use meridian::{
    Client, Config, Key, ListOperation, MapOperation, MeridianError, Operation, Policy, Record,
    Value,
};
use tracing_subscriber::{fmt, EnvFilter};

/// Meridian CLI
#[derive(Parser, Debug)]
#[command(name = "meridian-cli")]
#[command(about = "CLI for a Meridian cluster")]
#[command(version)]
struct Args {
    /// Node addresses, in partition assignment order
    #[arg(short = 'H', long, default_value = "127.0.0.1:3000", value_delimiter = ',')]
    hosts: Vec<SocketAddr>,

    /// Namespace
    #[arg(short, long, default_value = "test")]
    namespace: String,

    /// Set name
    #[arg(short, long, default_value = "")]
    set: String,

    /// Replication factor of the cluster
    #[arg(long, default_value = "1")]
    replication_factor: usize,

    /// Total timeout per command in ms (0 = none)
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,

    /// Retries after the first attempt
    #[arg(long, default_value = "2")]
    max_retries: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a record (all bins, or the named ones)
    Get {
        key: String,
        bins: Vec<String>,
    },

    /// Write a bin; VALUE is parsed as JSON, falling back to a string
    Put {
        key: String,
        bin: String,
        value: String,
    },

    /// Increment an integer bin
    Add {
        key: String,
        bin: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },

    /// Append to a string bin
    Append {
        key: String,
        bin: String,
        value: String,
    },

    /// Delete a record
    Del { key: String },

    /// Check whether a record exists
    Exists { key: String },

    /// Run several operations atomically
    ///
    /// OPS are `get[:bin]`, `header`, `put:bin:value`, `add:bin:n`,
    /// `append:bin:s`, `prepend:bin:s`, `touch`, `delete`,
    /// `list-append:bin:value`, `list-pop:bin:index`, `list-size:bin`,
    /// `map-put:bin:key:value`, `map-get:bin:key`.
    Operate {
        key: String,
        #[arg(required = true)]
        ops: Vec<String>,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> meridian::Result<()> {
    let policy = Policy::builder()
        .total_timeout(Duration::from_millis(args.timeout_ms))
        .max_retries(args.max_retries)
        .build();

    let mut builder = Config::builder()
        .namespaces([args.namespace.clone()])
        .replication_factor(args.replication_factor)
        .read_policy(policy.clone())
        .write_policy(policy);
    for (i, host) in args.hosts.iter().enumerate() {
        builder = builder.node(format!("node-{}", i), *host);
    }
    let client = Client::connect(builder.build())?;

    let key_for = |k: &str| Key::new(args.namespace.clone(), args.set.clone(), parse_value(k));

    match &args.command {
        Commands::Get { key, bins } => {
            let key = key_for(key);
            let record = if bins.is_empty() {
                client.get(&key)?
            } else {
                let names: Vec<&str> = bins.iter().map(String::as_str).collect();
                client.get_bins(&key, &names)?
            };
            print_record(record.as_ref())
        }
        Commands::Put { key, bin, value } => {
            client.put(&key_for(key), &[(bin.as_str(), parse_value(value))])?;
            print_json(&serde_json::json!({ "status": "ok" }))
        }
        Commands::Add { key, bin, delta } => {
            let record = client.add(&key_for(key), bin, *delta)?;
            print_record(record.as_ref())
        }
        Commands::Append { key, bin, value } => {
            client.append(&key_for(key), bin, value)?;
            print_json(&serde_json::json!({ "status": "ok" }))
        }
        Commands::Del { key } => {
            let existed = client.delete(&key_for(key))?;
            print_json(&serde_json::json!({ "deleted": existed }))
        }
        Commands::Exists { key } => {
            let exists = client.exists(&key_for(key))?;
            print_json(&serde_json::json!({ "exists": exists }))
        }
        Commands::Operate { key, ops } => {
            let operations = ops
                .iter()
                .map(|text| parse_operation(text))
                .collect::<meridian::Result<Vec<_>>>()?;
            let record = client.operate(&key_for(key), &operations)?;
            print_record(record.as_ref())
        }
    }
}

/// JSON if it parses, otherwise the raw string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Str(raw.to_string()))
}

fn parse_index(raw: &str) -> meridian::Result<i64> {
    raw.parse()
        .map_err(|_| MeridianError::InvalidOperation(format!("Invalid index: {}", raw)))
}

fn parse_operation(text: &str) -> meridian::Result<Operation> {
    let parts: Vec<&str> = text.splitn(4, ':').collect();
    let op = match parts.as_slice() {
        ["get"] => Operation::get_all(),
        ["get", bin] => Operation::get(bin),
        ["header"] => Operation::get_header(),
        ["put", bin, value] => Operation::put(bin, parse_value(value)),
        ["add", bin, delta] => Operation::add(bin, parse_value(delta)),
        ["append", bin, value] => Operation::append(bin, *value),
        ["prepend", bin, value] => Operation::prepend(bin, *value),
        ["touch"] => Operation::touch(),
        ["delete"] => Operation::delete(),
        ["list-append", bin, value] => ListOperation::append(bin, parse_value(value)),
        ["list-pop", bin, index] => ListOperation::pop(bin, parse_index(index)?),
        ["list-size", bin] => ListOperation::size(bin),
        ["map-put", bin, key, value] => MapOperation::put(bin, parse_value(key), parse_value(value)),
        ["map-get", bin, key] => MapOperation::get_by_key(bin, parse_value(key)),
        _ => {
            return Err(MeridianError::InvalidOperation(format!(
                "Unrecognized operation: {}",
                text
            )))
        }
    };
    Ok(op)
}

fn print_record(record: Option<&Record>) -> meridian::Result<()> {
    match record {
        Some(record) => print_json(&serde_json::to_value(record).map_err(json_error)?),
        None => print_json(&serde_json::Value::Null),
    }
}

fn print_json(value: &serde_json::Value) -> meridian::Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(json_error)?;
    println!("{}", text);
    Ok(())
}

fn json_error(e: serde_json::Error) -> MeridianError {
    MeridianError::Protocol(format!("JSON encoding failed: {}", e))
}
