//! webssh-relay: browser terminal to SSH shell relay.
//!
//! Serves the front-end bundle over HTTP and, on `GET /socket`, upgrades to a
//! WebSocket through which the browser asks for an SSH session and then
//! exchanges terminal data with the remote shell.
//!
//! # Usage
//!
//! ```text
//! webssh-relay [OPTIONS]
//!
//! Options:
//!   --port <PORT>            HTTP/WebSocket port [default: 3000]
//!   --bind <IP>              Bind address [default: 0.0.0.0]
//!   --static-dir <DIR>       Front-end bundle [default: frontend/dist]
//!   --ready-timeout <SECS>   SSH connect + auth deadline [default: 20]
//!   --ping-interval <SECS>   WebSocket ping interval [default: 5]
//!   --ping-timeout <SECS>    Drop silent browsers after [default: 10]
//!   --config <FILE>          Optional TOML configuration file
//! ```
//!
//! # Precedence
//!
//! Built-in defaults, then the TOML file, then environment variables, then
//! CLI flags.  `clap` resolves the last two.
//!
//! | Variable              | Flag              |
//! |-----------------------|-------------------|
//! | `PORT`                | `--port`          |
//! | `RELAY_BIND`          | `--bind`          |
//! | `RELAY_STATIC_DIR`    | `--static-dir`    |
//! | `RELAY_READY_TIMEOUT` | `--ready-timeout` |
//! | `RELAY_PING_INTERVAL` | `--ping-interval` |
//! | `RELAY_PING_TIMEOUT`  | `--ping-timeout`  |
//! | `RELAY_CONFIG`        | `--config`        |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webssh_relay::domain::RelayConfig;
use webssh_relay::infrastructure::{run_server, FileConfig, RusshConnector};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Browser-to-SSH terminal relay.
///
/// Every option is optional so that unset flags leave the value from the
/// configuration file (or the built-in default) in place.
#[derive(Debug, Parser)]
#[command(
    name = "webssh-relay",
    about = "Relays browser terminals to SSH shells over WebSocket",
    version
)]
struct Cli {
    /// TCP port for the HTTP/WebSocket server.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// IP address to bind to.
    ///
    /// `0.0.0.0` accepts connections on every interface, `127.0.0.1` only
    /// from this machine.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<String>,

    /// Directory with the built front-end (`index.html` and assets).
    #[arg(long, env = "RELAY_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Seconds allowed for TCP connect, SSH handshake and authentication.
    #[arg(long, env = "RELAY_READY_TIMEOUT")]
    ready_timeout: Option<u64>,

    /// Seconds between WebSocket pings.
    #[arg(long, env = "RELAY_PING_INTERVAL")]
    ping_interval: Option<u64>,

    /// Seconds of browser silence before the connection is dropped.
    #[arg(long, env = "RELAY_PING_TIMEOUT")]
    ping_timeout: Option<u64>,

    /// Path to a TOML configuration file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Builds the effective [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded, `--bind`
    /// is not an IP address, or the merged configuration fails validation.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = RelayConfig::default();

        if let Some(path) = &self.config {
            FileConfig::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?
                .apply(&mut config);
        }

        self.apply_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies flags (and their environment variables) on top of `config`.
    fn apply_overrides(&self, config: &mut RelayConfig) -> anyhow::Result<()> {
        if let Some(bind) = &self.bind {
            let ip: IpAddr = bind
                .parse()
                .with_context(|| format!("invalid bind address: '{bind}'"))?;
            config.bind_addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            config.bind_addr.set_port(port);
        }
        if let Some(dir) = &self.static_dir {
            config.static_dir = dir.clone();
        }
        if let Some(secs) = self.ready_timeout {
            config.ssh.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.ping_interval {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.ping_timeout {
            config.ping_timeout = Duration::from_secs(secs);
        }
        Ok(())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config()?;

    info!(
        "webssh-relay starting: bind={}, static_dir={}, ready_timeout={}s",
        config.bind_addr,
        config.static_dir.display(),
        config.ssh.ready_timeout.as_secs()
    );

    let connector = Arc::new(RusshConnector::new(&config.ssh));

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C; shutting down"),
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    run_server(config, connector, shutdown).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
