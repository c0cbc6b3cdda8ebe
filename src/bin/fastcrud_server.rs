//! fastcrud HTTP server
//!
//! Serves one or more schemaless collections over REST.
//!
//! Usage:
//!   fastcrud-server --addr 127.0.0.1:8000 --collection notes --collection tags
//!
//! Each collection is mounted at `/<name>`. Records are stored under
//! `--data-dir` unless `--memory` is given.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fastcrud::http::{CrudApp, CrudRouter};
use fastcrud::{Dispatcher, Document, LocalStorage, MemoryStorage, StorageOptions};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "fastcrud-server")]
#[command(about = "REST CRUD endpoints over local or in-memory storage", version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    addr: SocketAddr,

    /// Directory holding the collection files
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Collection to serve (repeatable)
    #[arg(short, long = "collection", default_value = "documents")]
    collections: Vec<String>,

    /// Keep records in memory only
    #[arg(long)]
    memory: bool,

    /// Extra backend option as key=value (repeatable)
    #[arg(long = "storage-opt", value_name = "KEY=VALUE")]
    storage_opts: Vec<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn storage_options(&self) -> Result<StorageOptions> {
        let mut options = StorageOptions::new();
        if !self.memory {
            options.insert("base_dir", self.data_dir.to_string_lossy());
        }
        for pair in &self.storage_opts {
            options
                .insert_pair(pair)
                .with_context(|| format!("invalid --storage-opt '{pair}'"))?;
        }
        Ok(options)
    }
}

fn build_app(args: &Args) -> Result<CrudApp> {
    let options = args.storage_options()?;
    let mut app = CrudApp::new();
    for name in &args.collections {
        if args.collections.iter().filter(|other| *other == name).count() > 1 {
            bail!("collection '{name}' given more than once");
        }
        app = if args.memory {
            let storage = MemoryStorage::<Document>::from_options(name.as_str(), &options)
                .with_context(|| format!("failed to configure collection '{name}'"))?;
            app.mount(CrudRouter::new(Dispatcher::blocking(storage)).with_prefix(name))
        } else {
            let storage = LocalStorage::<Document>::from_options(name.as_str(), &options)
                .with_context(|| format!("failed to configure collection '{name}'"))?;
            app.mount(CrudRouter::new(Dispatcher::blocking(storage)).with_prefix(name))
        };
        info!(collection = %name, memory = args.memory, "collection mounted");
    }
    Ok(app)
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "fastcrud server starting");
    let app = build_app(&args)?;

    let listener = TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;

    app.serve(listener, shutdown_signal()).await?;
    info!("shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["fastcrud-server"]);
        assert_eq!(args.addr, "127.0.0.1:8000".parse().unwrap());
        assert_eq!(args.collections, vec!["documents".to_string()]);
        assert!(!args.memory);
    }

    #[test]
    fn test_storage_options_from_args() {
        let args = Args::parse_from([
            "fastcrud-server",
            "--data-dir",
            "/tmp/crud",
            "--storage-opt",
            "sync_on_write=false",
        ]);
        let options = args.storage_options().unwrap();
        assert_eq!(options.get("base_dir"), Some("/tmp/crud"));
        assert_eq!(options.get("sync_on_write"), Some("false"));
    }

    #[test]
    fn test_memory_rejects_local_options() {
        let args = Args::parse_from(["fastcrud-server", "--memory", "--storage-opt", "sync_on_write=false"]);
        assert!(build_app(&args).is_err());
    }

    #[test]
    fn test_duplicate_collection_rejected() {
        let args = Args::parse_from(["fastcrud-server", "--memory", "-c", "a", "-c", "a"]);
        assert!(build_app(&args).is_err());
    }
}
