//! tlogkv CLI
//!
//! Runs one key-value operation against a transaction log: replay, apply,
//! append, shut down.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tlogkv::{replay, Config, DbParams, Result, Service, TlogError};
use tracing_subscriber::{fmt, EnvFilter};

/// tlogkv
#[derive(Parser, Debug)]
#[command(name = "tlogkv")]
#[command(about = "Key-value store made durable by a transaction log")]
#[command(version)]
struct Args {
    /// Durability backend
    #[arg(short, long, value_enum, default_value = "file")]
    backend: BackendKind,

    /// Log file (file backend) or database file (sql backend)
    #[arg(short, long, default_value = "transactions.log")]
    path: PathBuf,

    /// Append queue capacity
    #[arg(short, long, default_value = "16")]
    queue_capacity: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    File,
    Sql,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// The key to read
        key: String,
    },

    /// Store a value under a key
    Put {
        /// The key to set
        key: String,

        /// The value to store
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Print every record in the log
    Dump,

    /// Replay the log and report what it contains
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tlogkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::debug!("tlogkv v{}", tlogkv::VERSION);
    tracing::debug!("Backend: {:?}, path: {}", args.backend, args.path.display());

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let builder = Config::builder().queue_capacity(args.queue_capacity);
    let config = match args.backend {
        BackendKind::File => builder.file(&args.path).build(),
        BackendKind::Sql => builder.sql(DbParams::new(&args.path)).build(),
    };

    match args.command {
        Commands::Dump => dump(&config),
        Commands::Stats => {
            let service = Service::open(&config)?;
            let stats = service.replay_stats().clone();
            service.close()?;

            println!("events:        {}", stats.events);
            println!("puts:          {}", stats.puts);
            println!("deletes:       {}", stats.deletes);
            println!("last sequence: {}", stats.last_sequence);
            Ok(())
        }
        Commands::Get { key } => {
            let service = Service::open(&config)?;
            let value = service.get(&key);
            service.close()?;

            println!("{}", value?);
            Ok(())
        }
        Commands::Put { key, value } => mutate(&config, |service| service.put(&key, &value)),
        Commands::Delete { key } => mutate(&config, |service| service.delete(&key)),
    }
}

/// Apply one mutation and make sure it reached the log before exiting
fn mutate(config: &Config, op: impl FnOnce(&Service) -> Result<()>) -> Result<()> {
    let service = Service::open(config)?;
    let outcome = op(&service);
    service.close()?;
    outcome?;

    match service.append_failures() {
        0 => Ok(()),
        n => Err(TlogError::InvalidState(format!(
            "{} append(s) failed to reach the log",
            n
        ))),
    }
}

/// Print every readable record; fail if the log had unreadable ones
fn dump(config: &Config) -> Result<()> {
    let logger = tlogkv::logger::open(config)?;
    let (events, errors) = replay::scan(logger.as_ref());
    logger.shutdown()?;

    for event in &events {
        println!("{}", event);
    }

    for err in &errors {
        eprintln!("error: {}", err);
    }

    match errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
