//! The Manager's core: the connected-agent table, command dispatch, and
//! the command-result waiter table. Grounded in
//! `examples/original_source/src/manager/redpepper/manager/manager.py`'s
//! `Manager.send_command`/`await_command_result` and the console-facing
//! method set named in spec §6 (`connected_agents`, `send_command`,
//! `await_command_result`, `event_bus.subscribe`, command log reads).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::RngCore;
use serde_json::{json, Map, Value};
use tracing::warn;

use gw_common::error::{Error, Result};
use gw_common::events::EventBus;
use gw_data::DataManager;
use gw_wire::Slot;

use crate::commandlog::{CommandLog, CommandRecord};
use crate::AgentConn;

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub changed: bool,
    pub output: String,
}

pub struct Manager {
    connections: RwLock<HashMap<String, Arc<AgentConn>>>,
    pending_results: Mutex<HashMap<String, Arc<Slot<CommandOutcome>>>>,
    pub events: Arc<EventBus>,
    pub commandlog: Arc<CommandLog>,
    pub data: Arc<DataManager>,
    command_ack_timeout: Duration,
}

impl Manager {
    pub fn new(
        events: Arc<EventBus>,
        commandlog: Arc<CommandLog>,
        data: Arc<DataManager>,
        command_ack_timeout: Duration,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            pending_results: Mutex::new(HashMap::new()),
            events,
            commandlog,
            data,
            command_ack_timeout,
        }
    }

    pub fn register(&self, agent_id: String, conn: Arc<AgentConn>) {
        self.connections.write().unwrap().insert(agent_id, conn);
    }

    pub fn unregister(&self, agent_id: &str) {
        self.connections.write().unwrap().remove(agent_id);
    }

    /// A snapshot of currently connected agent ids. Per §5 the connection
    /// table is only mutated by the accept loop and teardown; readers see
    /// a point-in-time copy.
    pub fn connected_agents(&self) -> Vec<String> {
        self.connections.read().unwrap().keys().cloned().collect()
    }

    fn connection(&self, agent_id: &str) -> Option<Arc<AgentConn>> {
        self.connections.read().unwrap().get(agent_id).cloned()
    }

    /// `send_command(agent_id, command, args, kwargs) -> command_id | null`.
    pub async fn send_command(
        &self,
        agent_id: &str,
        command: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Option<String>> {
        let Some(conn) = self.connection(agent_id) else {
            return Ok(None);
        };

        let id = random_id();
        let started_at = now_unix();
        let record = json!({ "command": command, "args": args, "kwargs": kwargs });

        let commandlog = self.commandlog.clone();
        let id_for_log = id.clone();
        let agent_for_log = agent_id.to_string();
        let record_for_log = record.clone();
        tokio::task::spawn_blocking(move || {
            commandlog.start(&id_for_log, &agent_for_log, started_at, &record_for_log)
        })
        .await
        .map_err(|e| Error::internal(format!("command log worker panicked: {e}")))??;

        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(id.clone()));
        fields.insert("agent_id".into(), Value::String(agent_id.to_string()));
        fields.insert("command".into(), Value::String(command.to_string()));
        self.events.post("command", fields);

        self.pending_results
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::new(Slot::new()));

        let mut call_kwargs = Map::new();
        call_kwargs.insert("id".into(), Value::String(id.clone()));
        call_kwargs.insert("cmdtype".into(), Value::String(command.to_string()));
        call_kwargs.insert("args".into(), Value::Array(args));
        call_kwargs.insert("kwargs".into(), Value::Object(kwargs));

        // The call resolves as soon as the Agent's handler acknowledges
        // receipt (it schedules the work and returns immediately) — actual
        // progress/result travel separately as Notifications.
        conn.call("command", Vec::new(), call_kwargs, self.command_ack_timeout).await?;

        Ok(Some(id))
    }

    /// Block until `id`'s `command_result` notification has arrived, or
    /// `timeout` elapses (default 10 min, per §5).
    pub async fn await_command_result(&self, id: &str, timeout: Duration) -> Result<CommandOutcome> {
        let slot = self
            .pending_results
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::request(format!("unknown command id '{id}'")))?;
        slot.get(timeout).await
    }

    /// Dispatched from the per-connection `command_progress` notification
    /// handler: update the log and republish as an event.
    pub async fn handle_command_progress(&self, agent_id: &str, payload: Value) {
        let Some(id) = payload.get("command_id").and_then(Value::as_str) else {
            warn!(%agent_id, "command_progress missing command_id");
            return;
        };
        let current = payload.get("current").and_then(Value::as_i64).unwrap_or(0);
        let total = payload.get("total").and_then(Value::as_i64).unwrap_or(0);
        let message = payload.get("message").and_then(Value::as_str).unwrap_or_default();

        let commandlog = self.commandlog.clone();
        let id_owned = id.to_string();
        let message_owned = message.to_string();
        let result = tokio::task::spawn_blocking(move || {
            commandlog.update_progress(&id_owned, current, total, &message_owned)
        })
        .await;
        if let Ok(Err(e)) = result {
            warn!(%agent_id, error = %e, "failed to record command progress");
        }

        let mut fields = Map::new();
        fields.insert("command_id".into(), Value::String(id.to_string()));
        fields.insert("current".into(), json!(current));
        fields.insert("total".into(), json!(total));
        fields.insert("message".into(), Value::String(message.to_string()));
        self.events.post("command_progress", fields);
    }

    /// Dispatched from the per-connection `command_result` notification
    /// handler: update the log, publish the event, and fulfill any
    /// `await_command_result` waiter.
    pub async fn handle_command_result(&self, agent_id: &str, payload: Value) {
        let Some(id) = payload.get("id").and_then(Value::as_str) else {
            warn!(%agent_id, "command_result missing id");
            return;
        };
        let success = payload.get("success").and_then(Value::as_bool).unwrap_or(false);
        let changed = payload.get("changed").and_then(Value::as_bool).unwrap_or(false);
        let output = payload.get("output").and_then(Value::as_str).unwrap_or_default().to_string();
        let finished_at = now_unix();

        let commandlog = self.commandlog.clone();
        let id_owned = id.to_string();
        let output_owned = output.clone();
        let result = tokio::task::spawn_blocking(move || {
            commandlog.update_result(&id_owned, success, changed, &output_owned, finished_at)
        })
        .await;
        if let Ok(Err(e)) = result {
            warn!(%agent_id, error = %e, "failed to record command result");
        }

        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(id.to_string()));
        fields.insert("success".into(), Value::Bool(success));
        fields.insert("changed".into(), Value::Bool(changed));
        self.events.post("command_result", fields);

        if let Some(slot) = self.pending_results.lock().unwrap().remove(id) {
            slot.set(CommandOutcome { success, changed, output });
        }
    }

    pub fn last_commands(&self, n: u32) -> Result<Vec<CommandRecord>> {
        self.commandlog.last(n)
    }

    pub fn commands_since(&self, since: f64) -> Result<Vec<CommandRecord>> {
        self.commandlog.since(since)
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
