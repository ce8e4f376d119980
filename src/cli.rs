use crate::agent::{Agent, AppDirectory, MemoryAgent};
use crate::buffer_pool::BufferPool;
use crate::config::{AppsConfig, RuntimeConfig};
use crate::dispatcher::Dispatcher;
use crate::logging::{init_logging, LogConfig};
use crate::runner::Runner;
use crate::server::{AppService, HttpServer, ServerHandle};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Command-line interface for fnrunner
#[derive(Parser)]
#[command(name = "fnrunner", version)]
#[command(about = "Function runner: sync and async function calls over HTTP", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the applications declared in a YAML file
    Serve {
        /// Applications file
        #[arg(short, long, env = "FNR_CONFIG")]
        config: PathBuf,

        /// Listen address
        #[arg(short, long, env = "FNR_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,
    },
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, addr } => {
            let _log_guard = init_logging(&LogConfig::from_env())?;
            let handle = start(&config, &addr, &RuntimeConfig::from_env())?;
            wait_for_shutdown()?;
            info!("Shutting down");
            handle.stop();
            Ok(())
        }
    }
}

/// Build the engine and the listener for `apps_file` and start serving
///
/// # Errors
///
/// Fails on an invalid apps file or when the address cannot be bound.
pub fn start(apps_file: &Path, addr: &str, runtime: &RuntimeConfig) -> Result<ServerHandle> {
    let apps = AppsConfig::load(apps_file)?;

    let agent = Arc::new(MemoryAgent::new(
        runtime.sync_pool.clone(),
        runtime.async_pool.clone(),
    ));
    apps.install(&agent, runtime.default_timeout)?;

    let pool = BufferPool::new(runtime.buffer_pool);
    let dispatcher = Dispatcher::new(Arc::clone(&agent) as Arc<dyn Agent>, pool);
    let runner = Arc::new(Runner::new(dispatcher));

    let mut service = AppService::new(runner, Arc::clone(&agent) as Arc<dyn AppDirectory>);
    service.register_pool_metrics("sync", Arc::clone(agent.sync_metrics()));
    service.register_pool_metrics("async", Arc::clone(agent.async_metrics()));

    info!(
        apps = apps.apps.len(),
        addr = %addr,
        http_threads = runtime.http_threads,
        "Starting fnrunner"
    );
    HttpServer(service)
        .start(addr, runtime.http_threads)
        .with_context(|| format!("Failed to bind {addr}"))
}

#[cfg(unix)]
fn wait_for_shutdown() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    let mut signals = signal_hook::iterator::Signals::new([SIGINT, SIGTERM])
        .context("Failed to install signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Received shutdown signal");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> Result<()> {
    loop {
        std::thread::park();
    }
}
