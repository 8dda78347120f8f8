//! Agent entry point: load config, connect to the Manager, serve RPCs
//! until the connection drops, then reconnect with exponential backoff.
//! CLI parsing follows the teacher's hand-rolled `std::env::args()` style
//! (config path plus `key=value` overrides) rather than a pulled-in
//! argument-parsing crate.

mod config;
mod connection;
mod runtime;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use config::AgentConfig;
use gw_wire::rpc::Rpc;

const DEFAULT_CONFIG_PATH: &str = "/etc/gridwatch/agent.yml";
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(64);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gw_agent=debug,gw_wire=info,gw_ops=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut overrides = Vec::new();
    for arg in args {
        if arg.contains('=') {
            overrides.push(arg);
        } else {
            config_path = arg;
        }
    }

    let config = AgentConfig::load(std::path::Path::new(&config_path), &overrides)
        .with_context(|| format!("loading agent config from {config_path}"))?;
    let config = Arc::new(config);

    let mut backoff = INITIAL_BACKOFF;
    loop {
        match run_once(&config).await {
            Ok(()) => {
                info!("connection closed cleanly, reconnecting");
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                error!(error = %e, "connection attempt failed");
            }
        }

        warn!(backoff_secs = backoff.as_secs(), "reconnecting after backoff");
        tokio::time::sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
    }
}

/// One connect-handshake-serve cycle. Returns once the connection's
/// background tasks (reader/keepalive) have ended; the caller decides
/// whether and how long to wait before reconnecting.
async fn run_once(config: &Arc<AgentConfig>) -> Result<()> {
    let rpc = Arc::new(Rpc::new(true));
    let conn = connection::connect(config, rpc.clone()).await?;
    runtime::register(&rpc, conn.clone(), config.clone());

    while !conn.is_closed() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    conn.close().await;
    Ok(())
}
