//! The connection state machine: a single reader task dispatching framed
//! messages to the RPC layer, writes serialized through a send mutex, a
//! keep-alive ping loop with at most one outstanding ping, and graceful
//! close. Grounded in `examples/original_source/src/common/redpepper/common/connection.py`'s
//! `Connection` class (`_reader_loop`, `_ping_loop`, `send`, `close`).
//!
//! Handshake (`AgentHello`/`ManagerHello`) is layered on top as free
//! functions operating on the raw stream before a `Connection` is built,
//! since auth decisions on the Manager side need to consult the agent
//! config store between receiving `AgentHello` and replying.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gw_common::error::{Error, Result};

use crate::framing::{read_message, write_message};
use crate::message::{AgentHello, Bye, ManagerHello, Message, Ping, Pong};
use crate::rpc::Rpc;
use crate::slot::Slot;
use crate::{parse_major_minor, PROTOCOL_VERSION};

/// Send `AgentHello` and await the Manager's reply within `hello_timeout`.
/// On success the stream is ready for normal framed traffic.
pub async fn agent_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    agent_id: &str,
    credentials: &str,
    hello_timeout: Duration,
    max_message_size: u32,
) -> Result<()> {
    write_message(
        stream,
        &Message::from(AgentHello::new(agent_id, PROTOCOL_VERSION, credentials)),
    )
    .await?;

    let message = tokio::time::timeout(hello_timeout, read_message(stream, max_message_size))
        .await
        .map_err(|_| Error::authentication("timed out waiting for manager hello"))??;

    match message {
        Some(Message::Bye(bye)) => Err(Error::authentication(bye.reason)),
        Some(Message::ManagerHello(hello)) => {
            let (their_major, their_minor) = parse_major_minor(&hello.version)
                .ok_or_else(|| Error::protocol(format!("malformed version '{}'", hello.version)))?;
            let (our_major, our_minor) = parse_major_minor(PROTOCOL_VERSION).expect("valid constant");
            if their_major != our_major {
                return Err(Error::authentication(format!(
                    "incompatible protocol major version: manager={their_major} agent={our_major}"
                )));
            }
            if their_minor != our_minor {
                warn!(
                    manager_version = %hello.version,
                    agent_version = PROTOCOL_VERSION,
                    "minor protocol version mismatch, proceeding"
                );
            }
            Ok(())
        }
        Some(_) => Err(Error::protocol("unexpected message during handshake")),
        None => Err(Error::authentication("connection closed before manager hello")),
    }
}

/// Await a single `AgentHello` within `hello_timeout`. The caller (the
/// Manager) then performs the auth decision and calls either
/// `accept_hello` or `reject_hello`.
pub async fn await_agent_hello<R: AsyncRead + Unpin>(
    reader: &mut R,
    hello_timeout: Duration,
    max_message_size: u32,
) -> Result<AgentHello> {
    let message = tokio::time::timeout(hello_timeout, read_message(reader, max_message_size))
        .await
        .map_err(|_| Error::protocol("timed out waiting for agent hello"))??;
    match message {
        Some(Message::AgentHello(hello)) => Ok(hello),
        Some(_) => Err(Error::protocol("expected AgentHello as first message")),
        None => Err(Error::protocol("connection closed before agent hello")),
    }
}

pub async fn accept_hello<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    write_message(writer, &Message::from(ManagerHello::new(PROTOCOL_VERSION))).await
}

pub async fn reject_hello<W: AsyncWrite + Unpin>(writer: &mut W, reason: &str) -> Result<()> {
    write_message(writer, &Message::from(Bye::new(reason))).await
}

/// An established connection: owns the write half behind a send mutex,
/// the shared `Rpc` tables, and the agent id once bound (§3 invariant:
/// null until hello, then immutable).
pub struct Connection<W> {
    agent_id: AsyncMutex<Option<String>>,
    writer: AsyncMutex<W>,
    pub rpc: Arc<Rpc>,
    max_message_size: u32,
    closed: AtomicBool,
    pending_ping: AsyncMutex<Option<(i64, Arc<Slot<()>>)>>,
    background: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<W> Connection<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W, rpc: Arc<Rpc>, max_message_size: u32) -> Arc<Self> {
        Arc::new(Self {
            agent_id: AsyncMutex::new(None),
            writer: AsyncMutex::new(writer),
            rpc,
            max_message_size,
            closed: AtomicBool::new(false),
            pending_ping: AsyncMutex::new(None),
            background: AsyncMutex::new(Vec::new()),
        })
    }

    pub async fn agent_id(&self) -> Option<String> {
        self.agent_id.lock().await.clone()
    }

    /// Bind the agent id on successful auth. Per §3, never changes once set.
    pub async fn bind_agent_id(&self, id: String) {
        let mut guard = self.agent_id.lock().await;
        if guard.is_none() {
            *guard = Some(id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let message = message.into();
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, &message).await
    }

    /// `call(method, args, kwargs)`: generate a request id, install a
    /// Slot, send, and await with `timeout`.
    pub async fn call(
        &self,
        method: impl Into<String>,
        args: Vec<serde_json::Value>,
        kwargs: serde_json::Map<String, serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let (request, pending) = self.rpc.prepare_call(method, args, kwargs);
        self.send(request).await?;
        pending.wait(timeout).await
    }

    async fn handle_pong(&self, pong: Pong) {
        let mut guard = self.pending_ping.lock().await;
        if let Some((expected, slot)) = guard.take() {
            if expected == pong.data {
                slot.set(());
            } else {
                warn!(expected, got = pong.data, "pong data mismatch, closing connection");
                *guard = None;
            }
        }
    }

    /// Spawn the keep-alive loop: every `ping_interval`, send a Ping with
    /// fresh random data and require its Pong within `ping_timeout`.
    pub async fn spawn_keepalive(self: &Arc<Self>, ping_interval: Duration, ping_timeout: Duration) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(ping_interval).await;
                if this.is_closed() {
                    break;
                }

                let data: i64 = rand::rng().random();
                let slot = Arc::new(Slot::new());
                *this.pending_ping.lock().await = Some((data, slot.clone()));

                if this.send(Ping::new(data)).await.is_err() {
                    break;
                }

                match slot.get(ping_timeout).await {
                    Ok(()) => debug!("keep-alive pong received"),
                    Err(_) => {
                        warn!("keep-alive timed out, closing connection");
                        this.close().await;
                        break;
                    }
                }
            }
        });
        self.background.lock().await.push(handle);
    }

    /// Spawn the reader loop over `reader`, dispatching each decoded
    /// message to the RPC layer or handling it inline (Ping/Pong/Bye).
    /// Request handling runs in its own task so a slow handler can't
    /// stall the reader, per §4.1's concurrency contract.
    pub async fn spawn_reader<R>(self: &Arc<Self>, mut reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let message = match read_message(&mut reader, this.max_message_size).await {
                    Ok(Some(m)) => m,
                    Ok(None) => {
                        info!("peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "closing connection after framing error");
                        break;
                    }
                };

                match message {
                    Message::Ping(ping) => {
                        if this.send(Pong::new(ping.data)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(pong) => this.handle_pong(pong).await,
                    Message::Bye(bye) => {
                        info!(reason = %bye.reason, "peer sent bye");
                        break;
                    }
                    Message::Response(response) => this.rpc.handle_response(response),
                    Message::Notification(notification) => {
                        this.rpc.dispatch_notification(notification)
                    }
                    Message::Request(request) => {
                        let this = this.clone();
                        tokio::spawn(async move {
                            let response = this.rpc.handle_request(request).await;
                            let _ = this.send(response).await;
                        });
                    }
                    Message::AgentHello(_) | Message::ManagerHello(_) => {
                        warn!("unexpected hello message after handshake, closing connection");
                        break;
                    }
                }
            }
            this.close().await;
        });
        self.background.lock().await.push(handle);
    }

    /// Idempotent close: send a best-effort Bye, cancel all outstanding
    /// RPC slots, and abort any tracked background tasks.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut writer = self.writer.lock().await;
            let _ = write_message(&mut *writer, &Message::from(Bye::new("closing"))).await;
            let _ = writer.shutdown().await;
        }
        self.rpc.cancel_all();
        if let Some((_, slot)) = self.pending_ping.lock().await.take() {
            slot.cancel();
        }
        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn agent_handshake_succeeds_on_matching_major_version() {
        let mut reply = Vec::new();
        write_message(&mut reply, &Message::from(ManagerHello::new("1.0")))
            .await
            .unwrap();

        let mut combined = Vec::new();
        let mut stream = FakeStream {
            read: Cursor::new(reply),
            write: &mut combined,
        };

        agent_handshake(&mut stream, "agent-1", "secret", Duration::from_secs(1), 1024)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn agent_handshake_rejects_major_version_mismatch() {
        let mut reply = Vec::new();
        write_message(&mut reply, &Message::from(ManagerHello::new("2.0")))
            .await
            .unwrap();

        let mut combined = Vec::new();
        let mut stream = FakeStream {
            read: Cursor::new(reply),
            write: &mut combined,
        };

        let err = agent_handshake(&mut stream, "agent-1", "secret", Duration::from_secs(1), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn agent_handshake_surfaces_bye_reason() {
        let mut reply = Vec::new();
        write_message(&mut reply, &Message::from(Bye::new("bad credentials")))
            .await
            .unwrap();

        let mut combined = Vec::new();
        let mut stream = FakeStream {
            read: Cursor::new(reply),
            write: &mut combined,
        };

        let err = agent_handshake(&mut stream, "agent-1", "secret", Duration::from_secs(1), 1024)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad credentials"));
    }

    /// A single in-memory stream combining a fixed read buffer with a
    /// growable write buffer, enough to drive the handshake functions in
    /// a test without a real socket.
    struct FakeStream<'a> {
        read: Cursor<Vec<u8>>,
        write: &'a mut Vec<u8>,
    }

    impl AsyncRead for FakeStream<'_> {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.read).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for FakeStream<'_> {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut *self.get_mut().write).poll_write(cx, buf)
        }
        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut *self.get_mut().write).poll_flush(cx)
        }
        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut *self.get_mut().write).poll_shutdown(cx)
        }
    }
}
