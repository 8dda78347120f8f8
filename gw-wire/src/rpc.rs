//! Bidirectional RPC layer: request/response correlation by id, a
//! registered method table, and a separate notification dispatch table.
//!
//! Grounded in `examples/original_source/src/common/redpepper/common/connection.py`'s
//! `init_rpc`/`_rpc_call`/`_rpc_handle_request`/`_rpc_handle_response`.
//! The transport-facing send/receive loop lives on the connection types in
//! `gw-agent`/`gw-manager`, which own the framed stream; this module holds
//! the method/notification tables and the response-correlation Slots,
//! independent of any particular transport.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::RngCore;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::message::{Notification, Request, Response};
use crate::slot::Slot;
use gw_common::error::{Error, Result};

pub type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, Error>> + Send>>;
pub type Handler = Arc<dyn Fn(Vec<Value>, Map<String, Value>) -> HandlerFuture + Send + Sync>;
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// A pending call awaiting its `Response`.
pub struct PendingCall {
    pub id: String,
    slot: Arc<Slot<Response>>,
}

impl PendingCall {
    pub async fn wait(&self, timeout: Duration) -> Result<Value> {
        let response = self.slot.get(timeout).await?;
        if response.success {
            Ok(response.data)
        } else {
            let message = response
                .data
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| response.data.to_string());
            Err(Error::rpc(message))
        }
    }
}

pub struct Rpc {
    methods: RwLock<HashMap<String, Handler>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    pending: Mutex<HashMap<String, Arc<Slot<Response>>>>,
    /// Whether handler-internal error text is allowed to cross the wire.
    /// Agent->Manager is true, Manager->Agent is false by default (§7).
    pub expose_error_info: bool,
}

impl Rpc {
    pub fn new(expose_error_info: bool) -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            expose_error_info,
        }
    }

    pub fn set_handler(&self, method: impl Into<String>, handler: Handler) {
        self.methods.write().unwrap().insert(method.into(), handler);
    }

    pub fn set_notification_handler(&self, kind: impl Into<String>, handler: NotificationHandler) {
        self.notification_handlers
            .write()
            .unwrap()
            .insert(kind.into(), handler);
    }

    /// Generate a fresh 128-bit hex request id and register a Slot for
    /// its eventual Response, producing the `Request` to send and a
    /// `PendingCall` to await.
    pub fn prepare_call(&self, method: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> (Request, PendingCall) {
        let id = generate_request_id();
        let slot = Arc::new(Slot::new());
        self.pending.lock().unwrap().insert(id.clone(), slot.clone());
        let request = Request::new(id.clone(), method, args, kwargs);
        (request, PendingCall { id, slot })
    }

    /// Handle an inbound `Request`: look up the method, invoke it, and
    /// build the `Response` to send back. Never panics or propagates —
    /// unhandled errors become a failed `Response` per §7.
    pub async fn handle_request(&self, request: Request) -> Response {
        let handler = self.methods.read().unwrap().get(&request.method).cloned();
        let Some(handler) = handler else {
            warn!(method = %request.method, "no RPC handler registered for method");
            return Response::err(request.id, format!("unknown method: {}", request.method));
        };
        match handler(request.args, request.kwargs).await {
            Ok(data) => Response::ok(request.id, data),
            Err(e @ (Error::Rpc(_) | Error::Request(_))) => Response::err(request.id, e.to_string()),
            Err(e) => {
                error!(error = %e, "RPC handler failed");
                let message = if self.expose_error_info {
                    e.to_string()
                } else {
                    "RPC call failed".to_string()
                };
                Response::err(request.id, message)
            }
        }
    }

    /// Resolve the Slot for an inbound `Response`. Per the "drop"
    /// resolution of the no-waiter Open Question, a Response with no
    /// registered waiter is logged and discarded.
    pub fn handle_response(&self, response: Response) {
        let slot = self.pending.lock().unwrap().remove(&response.id);
        match slot {
            Some(slot) => {
                slot.set(response);
            }
            None => warn!(id = %response.id, "no pending call for response id, dropping"),
        }
    }

    pub fn dispatch_notification(&self, notification: Notification) {
        let handler = self
            .notification_handlers
            .read()
            .unwrap()
            .get(&notification.kind)
            .cloned();
        match handler {
            Some(handler) => handler(notification.data),
            None => warn!(kind = %notification.kind, "no notification handler registered"),
        }
    }

    /// Cancel every outstanding call, e.g. on connection teardown. Any
    /// caller currently awaiting a `PendingCall` observes `Error::Closed`.
    pub fn cancel_all(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain().map(|(_, s)| s).collect();
        for slot in pending {
            slot.cancel();
        }
    }
}

fn generate_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_method_yields_error_response() {
        let rpc = Rpc::new(true);
        let response = rpc
            .handle_request(Request::new("id1", "no.Such", vec![], Map::new()))
            .await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn registered_method_returns_its_value() {
        let rpc = Rpc::new(true);
        rpc.set_handler(
            "echo",
            Arc::new(|args, _kwargs| Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })),
        );
        let response = rpc
            .handle_request(Request::new("id1", "echo", vec![Value::String("hi".into())], Map::new()))
            .await;
        assert!(response.success);
        assert_eq!(response.data, Value::String("hi".into()));
    }

    #[test]
    fn pending_call_id_matches_request_id() {
        let rpc = Rpc::new(true);
        let (request, pending) = rpc.prepare_call("command", vec![], Map::new());
        assert_eq!(request.id, pending.id);
    }

    #[tokio::test]
    async fn handle_response_resolves_matching_pending_call() {
        let rpc = Rpc::new(true);
        let (request, pending) = rpc.prepare_call("command", vec![], Map::new());
        rpc.handle_response(Response::ok(request.id.clone(), Value::Bool(true)));
        let value = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[tokio::test]
    async fn response_with_no_waiter_is_dropped_not_errored() {
        let rpc = Rpc::new(true);
        // No prepare_call happened; this must not panic.
        rpc.handle_response(Response::ok("ghost", Value::Null));
    }

    #[tokio::test]
    async fn cancel_all_fails_pending_waiters() {
        let rpc = Rpc::new(true);
        let (_request, pending) = rpc.prepare_call("command", vec![], Map::new());
        rpc.cancel_all();
        let result = pending.wait(Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_exposed_internal_error_is_redacted() {
        let rpc = Rpc::new(false);
        rpc.set_handler(
            "boom",
            Arc::new(|_args, _kwargs| Box::pin(async move { Err(Error::internal("secret detail")) })),
        );
        let response = rpc
            .handle_request(Request::new("id1", "boom", vec![], Map::new()))
            .await;
        assert!(!response.success);
        assert_eq!(response.data, Value::String("RPC call failed".into()));
    }
}
