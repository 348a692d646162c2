//! Echo server configuration.
//!
//! # Environment Variables
//!
//! - `SHED_ADDR`: Bind address (`host:port` or socket path). Default: `127.0.0.1:9000`
//! - `SHED_DRAIN_TIMEOUT_SECS`: Seconds to wait for in-flight connections on exit. Default: `30`
//!
//! Command-line flags override the environment.

use clap::Parser;
use std::time::Duration;
use tracing::info;

const DEFAULT_ADDR: &str = "127.0.0.1:9000";
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// shed-echo - line echo server with zero-downtime restarts
///
/// SIGHUP hands the listener to a new process and retires this one,
/// SIGUSR2 adds a process next to this one, SIGINT/SIGQUIT stop.
#[derive(Parser, Debug, Default)]
#[command(name = "shed-echo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Bind address, e.g. 127.0.0.1:9000 or /run/echo.sock
    #[arg(short, long)]
    pub addr: Option<String>,

    /// Seconds to wait for in-flight connections before exiting
    #[arg(long)]
    pub drain_timeout_secs: Option<u64>,
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoConfig {
    pub addr: String,
    pub drain_timeout: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

impl EchoConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let addr = std::env::var("SHED_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());

        let timeout_secs: u64 = std::env::var("SHED_DRAIN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS);

        Self {
            addr,
            drain_timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Apply command-line overrides.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(addr) = &cli.addr {
            self.addr = addr.clone();
        }
        if let Some(secs) = cli.drain_timeout_secs {
            self.drain_timeout = Duration::from_secs(secs);
        }
        self
    }

    pub fn log_config(&self) {
        info!("Bind address: {}", self.addr);
        info!("Drain timeout: {}s", self.drain_timeout.as_secs());
    }
}
