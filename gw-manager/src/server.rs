//! The agent-facing TLS listener: accept, mTLS handshake, `AgentHello`
//! auth, then hand the established connection to the `Manager`. Grounded
//! in `examples/original_source/src/manager/redpepper/manager/server.py`'s
//! `Server.handle_connection` (hello/auth/dispatch loop), adapted to this
//! workspace's split handshake-then-`Connection` shape (see
//! `gw-wire::connection`'s doc comment).

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::io::split;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use gw_common::agent_id::is_valid_agent_id;
use gw_common::error::Result;
use gw_common::tls::VerifyMode;
use gw_data::AgentStore;
use gw_wire::connection::{accept_hello, await_agent_hello, reject_hello};
use gw_wire::rpc::Rpc;
use gw_wire::Connection;

use crate::config::ManagerConfig;
use crate::manager::Manager;
use crate::AgentConn;

/// Run the accept loop until the process is asked to shut down. Each
/// accepted connection is handled on its own task; a single bad peer
/// cannot block the listener.
pub async fn run(config: Arc<ManagerConfig>, manager: Arc<Manager>, tls_acceptor: TlsAcceptor) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port)
        .parse()
        .map_err(|e| gw_common::error::Error::config(format!("invalid bind address: {e}")))?;
    let listener = TcpListener::bind(addr).await.map_err(gw_common::error::Error::Io)?;
    info!(%addr, "agent listener bound");

    loop {
        let (tcp, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let config = config.clone();
        let manager = manager.clone();
        let acceptor = tls_acceptor.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(tcp, peer_addr, config, manager, acceptor).await {
                warn!(%peer_addr, error = %e, "agent connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    tcp: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ManagerConfig>,
    manager: Arc<Manager>,
    acceptor: TlsAcceptor,
) -> Result<()> {
    let tls_stream = acceptor.accept(tcp).await.map_err(gw_common::error::Error::Io)?;
    let (mut read_half, mut write_half) = split(tls_stream);

    let hello = match await_agent_hello(&mut read_half, config.hello_timeout(), config.max_message_size).await {
        Ok(hello) => hello,
        Err(e) => {
            warn!(%peer_addr, error = %e, "handshake failed before agent hello");
            return Err(e);
        }
    };

    if !is_valid_agent_id(&hello.id) {
        warn!(%peer_addr, agent_id = %hello.id, "rejecting malformed agent id before any lookup");
        reject_hello(&mut write_half, "invalid agent id").await?;
        return Err(gw_common::error::Error::authentication(format!(
            "agent id '{}' is not a valid identifier",
            hello.id
        )));
    }

    let agents = AgentStore::new(gw_data::agents::agents_path(&config.data_base_dir));
    let entry = agents.lookup(&hello.id)?;

    let authorized = match &entry {
        Some(entry) if AgentStore::ip_allowed(entry, peer_addr.ip()) && AgentStore::verify_secret(entry, &hello.credentials) => true,
        _ => false,
    };

    if !authorized {
        let mut fields = Map::new();
        fields.insert("ip".into(), Value::String(peer_addr.ip().to_string()));
        fields.insert(
            "secret_hash".into(),
            Value::String(entry.as_ref().map(|e| e.secret_hash.clone()).unwrap_or_default()),
        );
        manager.events.post("auth_failure", fields);
        reject_hello(&mut write_half, "authentication failed").await?;
        return Err(gw_common::error::Error::authentication(format!(
            "agent '{}' failed authentication",
            hello.id
        )));
    }

    let mut fields = Map::new();
    fields.insert("agent_id".into(), Value::String(hello.id.clone()));
    fields.insert("ip".into(), Value::String(peer_addr.ip().to_string()));
    manager.events.post("auth_success", fields);

    accept_hello(&mut write_half).await?;
    info!(agent_id = %hello.id, %peer_addr, "agent established");

    let rpc = Arc::new(Rpc::new(false));
    register_custom_handler(&rpc, manager.clone(), hello.id.clone());

    let conn: Arc<AgentConn> = Connection::new(write_half, rpc.clone(), config.max_message_size);
    conn.bind_agent_id(hello.id.clone()).await;

    register_notification_handlers(&rpc, manager.clone(), hello.id.clone());

    conn.spawn_reader(read_half).await;
    conn.spawn_keepalive(config.ping_interval(), config.ping_timeout()).await;

    manager.register(hello.id.clone(), conn.clone());

    while !conn.is_closed() {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
    manager.unregister(&hello.id);
    info!(agent_id = %hello.id, "agent disconnected");
    Ok(())
}

/// `custom(<name>, ...)` dispatch table: the subset of
/// `examples/original_source/src/manager/redpepper/manager/requests.py`
/// implemented as compiled-in handlers (see `gw-data::requests`), keyed
/// by a `"request"` kwarg rather than the method name itself (the wire
/// namespace consolidation recorded in DESIGN.md). `agent_id` is always
/// the id bound at handshake time, never read from the caller's kwargs —
/// an Agent may only ask about itself.
fn register_custom_handler(rpc: &Rpc, manager: Arc<Manager>, agent_id: String) {
    rpc.set_handler(
        "custom",
        Arc::new(move |_args, kwargs| {
            let manager = manager.clone();
            let agent_id = agent_id.clone();
            Box::pin(async move { handle_custom(manager, agent_id, kwargs).await })
        }),
    );
}

async fn handle_custom(
    manager: Arc<Manager>,
    agent_id: String,
    kwargs: Map<String, Value>,
) -> std::result::Result<Value, gw_common::error::Error> {
    let request = kwargs
        .get("request")
        .and_then(Value::as_str)
        .ok_or_else(|| gw_common::error::Error::request("custom call missing 'request'"))?
        .to_string();

    let data = manager.data.clone();
    tokio::task::spawn_blocking(move || match request.as_str() {
        "stateDefinition" => {
            let state_name = kwargs.get("state_name").and_then(Value::as_str);
            gw_data::requests::state_definition(&data, &agent_id, state_name)
        }
        "dataForAgent" => {
            let name = kwargs
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| gw_common::error::Error::request("dataForAgent requires 'name'"))?;
            gw_data::requests::data_for_agent(&data, &agent_id, name)
        }
        "dataFileStat" => {
            let relative = kwargs
                .get("relative")
                .and_then(Value::as_str)
                .ok_or_else(|| gw_common::error::Error::request("dataFileStat requires 'relative'"))?;
            gw_data::requests::data_file_stat(&data, &agent_id, relative)
        }
        "dataFile" => {
            let relative = kwargs
                .get("relative")
                .and_then(Value::as_str)
                .ok_or_else(|| gw_common::error::Error::request("dataFile requires 'relative'"))?;
            gw_data::requests::data_file(&data, &agent_id, relative)
        }
        "operationModule" => {
            let name = kwargs
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| gw_common::error::Error::request("operationModule requires 'name'"))?;
            let existing_mtime = kwargs.get("existing_mtime").and_then(Value::as_f64);
            let existing_size = kwargs.get("existing_size").and_then(Value::as_u64);
            gw_data::requests::operation_module(data.base_dir(), name, existing_mtime, existing_size)
        }
        other => Err(gw_common::error::Error::request(format!("unknown custom request '{other}'"))),
    })
    .await
    .map_err(|e| gw_common::error::Error::internal(format!("custom request worker panicked: {e}")))?
}

fn register_notification_handlers(rpc: &Rpc, manager: Arc<Manager>, agent_id: String) {
    let progress_manager = manager.clone();
    let progress_agent = agent_id.clone();
    rpc.set_notification_handler(
        "command_progress",
        Arc::new(move |payload| {
            let manager = progress_manager.clone();
            let agent_id = progress_agent.clone();
            tokio::spawn(async move { manager.handle_command_progress(&agent_id, payload).await });
        }),
    );

    let result_manager = manager;
    let result_agent = agent_id;
    rpc.set_notification_handler(
        "command_result",
        Arc::new(move |payload| {
            let manager = result_manager.clone();
            let agent_id = result_agent.clone();
            tokio::spawn(async move { manager.handle_command_result(&agent_id, payload).await });
        }),
    );
}

/// Build the server TLS acceptor from the configured mTLS material.
pub fn build_acceptor(config: &ManagerConfig) -> Result<TlsAcceptor> {
    gw_common::tls::install_crypto_provider();
    let verify_mode = VerifyMode::parse(&config.tls_verify_mode).unwrap_or_default();
    let tls_config = gw_common::tls::build_server_config(
        gw_common::tls::TlsFiles {
            cert_file: &config.tls_cert_file,
            key_file: &config.tls_key_file,
            ca_file: Some(&config.tls_ca_file),
        },
        verify_mode,
    )?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
