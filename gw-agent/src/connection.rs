//! TLS connect to the Manager and the framed-stream handshake. Grounded
//! in the teacher's (ex-`hr-agent`) `connection.rs` shape: a free
//! function that establishes transport, authenticates, and hands back a
//! connection object the caller drives until it closes.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::split;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::info;

use gw_common::error::{Error, Result};
use gw_common::tls::{self, TlsFiles, VerifyMode};
use gw_wire::connection::agent_handshake;
use gw_wire::rpc::Rpc;
use gw_wire::Connection;

use crate::config::AgentConfig;

/// Connect, TLS-handshake, authenticate with `AgentHello`/`ManagerHello`,
/// and return an established `Connection` plus the still-unconsumed read
/// half for the caller to hand to `spawn_reader`.
pub async fn connect(
    config: &AgentConfig,
    rpc: Arc<Rpc>,
) -> Result<Arc<Connection<tokio_rustls::client::TlsStream<TcpStream>>>> {
    tls::install_crypto_provider();
    let _ = VerifyMode::parse(&config.tls_verify_mode);

    let tls_config = tls::build_client_config(TlsFiles {
        cert_file: &config.tls_cert_file,
        key_file: &config.tls_key_file,
        ca_file: Some(&config.tls_ca_file),
    })?;
    let connector = TlsConnector::from(Arc::new(tls_config));

    let addr = format!("{}:{}", config.manager_host, config.manager_port);
    info!(addr, "connecting to manager");
    let tcp = TcpStream::connect(&addr).await.map_err(Error::Io)?;

    let server_name = ServerName::try_from(config.manager_host.clone())
        .map_err(|e| Error::config(format!("invalid manager_host '{}': {e}", config.manager_host)))?;
    let mut tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(Error::Io)?;

    agent_handshake(
        &mut tls_stream,
        &config.agent_id,
        &config.agent_secret,
        config.hello_timeout(),
        config.max_message_size,
    )
    .await?;
    info!(agent_id = %config.agent_id, "handshake complete, connection established");

    let (read_half, write_half) = split(tls_stream);
    let connection = Connection::new(write_half, rpc, config.max_message_size);
    connection.bind_agent_id(config.agent_id.clone()).await;
    connection.spawn_reader(read_half).await;
    connection
        .spawn_keepalive(config.ping_interval(), config.ping_timeout())
        .await;

    Ok(connection)
}
