//! Tether device server entry point.
//!
//! Loads the configuration, builds the method table, and serves the main
//! channel until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! tether-device [OPTIONS]
//!
//! Options:
//!   --config <PATH>   TOML configuration file [default: tether.toml]
//!   --port <PORT>     Override server.control_port
//!   --bind <ADDR>     Override server.bind_address
//! ```
//!
//! A missing configuration file is not an error: every setting has a default.
//! `RUST_LOG` takes precedence over the configured `log_level`.
//!
//! # Native services
//!
//! This build serves the in-memory backend from
//! `infrastructure::native::memory`.  A device build supplies OS-backed
//! implementations of the same traits through `Services`.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_device::application::methods::build_dispatch_table;
use tether_device::infrastructure::native::memory::MemoryBackend;
use tether_device::infrastructure::network::server::DeviceServer;
use tether_device::infrastructure::storage::config::{load_config, DeviceConfig};

/// Serves native OS services to a remote peer over the Tether protocol.
#[derive(Debug, Parser)]
#[command(name = "tether-device", about = "Tether device-side RPC server", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "tether.toml", env = "TETHER_CONFIG")]
    config: PathBuf,

    /// TCP port of the main channel; the controller stream uses this plus
    /// `streaming.port_offset`.
    #[arg(long, env = "TETHER_PORT")]
    port: Option<u16>,

    /// IP address to bind both channels to.
    #[arg(long, env = "TETHER_BIND")]
    bind: Option<String>,
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    fn into_config(self) -> anyhow::Result<DeviceConfig> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(port) = self.port {
            config.server.control_port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.into_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!(
        "Tether device server starting: control port {}, stream port {}",
        config.server.control_port,
        config.stream_port()?
    );

    let table = Arc::new(build_dispatch_table().context("failed to build method table")?);
    let backend = MemoryBackend::demo();
    let server = DeviceServer::bind(&config, backend.services(), table).await?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    server.run(running).await?;

    info!("Tether device server stopped");
    Ok(())
}
