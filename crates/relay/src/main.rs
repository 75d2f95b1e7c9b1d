// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tm-relay: local HTTP relay for the telemed clinic contexts.
//!
//! Accepts queued outbox items when no remote store is configured, records
//! role notifications, SMS, chat messages, schedules and sign-ins in a SQLite
//! database under the data directory.

mod error;
mod server;
mod state;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Lock filename for single instance guarantee.
const LOCK_NAME: &str = "relay.lock";

/// tm-relay: telemed local relay
#[derive(Parser, Debug)]
#[command(name = "tm-relay")]
#[command(about = "Local HTTP relay for the telemed clinic contexts")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "127.0.0.1:4000")]
    bind: SocketAddr,

    /// Directory for the relay database
    #[arg(short, long, default_value = "data")]
    data: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting tm-relay");
    info!("  Bind address: {}", args.bind);
    info!("  Data directory: {}", args.data.display());

    fs::create_dir_all(&args.data)?;
    let _lock = acquire_lock(&args.data.join(LOCK_NAME))?;

    let state = state::RelayState::new(&args.data)?;
    server::run(args.bind, state).await?;

    Ok(())
}

/// Holds the data directory for this process until the returned file drops.
fn acquire_lock(lock_path: &Path) -> std::io::Result<fs::File> {
    use fs2::FileExt;

    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(lock_path)?;
    file.try_lock_exclusive().map_err(|_| {
        std::io::Error::other(format!(
            "another relay is already using {}",
            lock_path.display()
        ))
    })?;
    Ok(file)
}
