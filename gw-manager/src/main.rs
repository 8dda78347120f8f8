//! Manager entry point: load config, bind the agent-facing mTLS listener,
//! and run until asked to shut down. CLI parsing follows the same
//! hand-rolled `std::env::args()` style as the Agent binary (config path
//! plus `key=value` overrides) rather than a pulled-in argument-parsing
//! crate.

mod commandlog;
mod config;
mod manager;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use commandlog::CommandLog;
use config::ManagerConfig;
use gw_common::events::EventBus;
use gw_data::DataManager;
use gw_wire::Connection;
use manager::Manager;

const DEFAULT_CONFIG_PATH: &str = "/etc/gridwatch/manager.yml";

/// The concrete `Connection` type for an agent-facing mTLS socket, split
/// into independent read/write halves by `tokio::io::split`.
pub type AgentConn = Connection<tokio::io::WriteHalf<tokio_rustls::server::TlsStream<tokio::net::TcpStream>>>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gw_manager=debug,gw_wire=info,gw_data=info".into()),
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

    let config = ManagerConfig::load(std::path::Path::new(&config_path), &overrides)
        .with_context(|| format!("loading manager config from {config_path}"))?;
    let config = Arc::new(config);

    let events = Arc::new(EventBus::new());
    let commandlog = Arc::new(CommandLog::open(&config.command_log_file)?);
    let data = Arc::new(DataManager::new(config.data_base_dir.clone()));
    let manager = Arc::new(Manager::new(
        events,
        commandlog.clone(),
        data,
        config.command_ack_timeout(),
    ));

    let acceptor = server::build_acceptor(&config)?;
    spawn_purge_task(config.clone(), commandlog);

    info!(bind_host = %config.bind_host, bind_port = config.bind_port, "gridwatch manager starting");
    server::run(config, manager, acceptor).await?;
    Ok(())
}

/// Periodically drop command-log rows older than `command_log_max_age`.
/// `command_log_purge_interval == 0` disables the task entirely.
fn spawn_purge_task(config: Arc<ManagerConfig>, commandlog: Arc<CommandLog>) {
    if config.command_log_purge_interval <= 0.0 {
        return;
    }
    tokio::spawn(async move {
        let interval = config.command_log_purge_interval();
        loop {
            tokio::time::sleep(interval).await;
            let commandlog = commandlog.clone();
            let max_age = config.command_log_max_age();
            let result = tokio::task::spawn_blocking(move || {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64();
                commandlog.purge_older_than(now, max_age.as_secs_f64())
            })
            .await;
            match result {
                Ok(Ok(deleted)) if deleted > 0 => info!(deleted, "purged old command log rows"),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "command log purge failed"),
                Err(e) => warn!(error = %e, "command log purge task panicked"),
            }
        }
    });
}
