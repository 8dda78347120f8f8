//! SQLite-backed command history: one row per dispatched command, updated
//! in place as progress and the final result arrive. Grounded in the
//! teacher's `hr-auth::sessions::SessionStore` (`Mutex<rusqlite::Connection>`,
//! WAL mode, schema-on-open), adapted from sessions to commands per
//! spec §4.5's lifecycle and §6's `last(n)`/`since(t)` console contract.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use gw_common::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub id: String,
    pub agent_id: String,
    pub started_at: f64,
    pub command: Value,
    pub status: String,
    pub progress_current: Option<i64>,
    pub progress_total: Option<i64>,
    pub progress_message: Option<String>,
    pub changed: Option<bool>,
    pub output: Option<String>,
    pub finished_at: Option<f64>,
}

pub struct CommandLog {
    conn: Mutex<Connection>,
}

impl CommandLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let conn = Connection::open(path).map_err(|e| Error::Database(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS commands (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                started_at REAL NOT NULL,
                command TEXT NOT NULL,
                status TEXT NOT NULL,
                progress_current INTEGER,
                progress_total INTEGER,
                progress_message TEXT,
                changed INTEGER,
                output TEXT,
                finished_at REAL
            );
            CREATE INDEX IF NOT EXISTS idx_commands_started_at ON commands(started_at);
            CREATE INDEX IF NOT EXISTS idx_commands_agent_id ON commands(agent_id);",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// `command_started(id, now, agent, JSON{command,args,kwargs})`. Status
    /// starts as `pending` (the string form of the wire's `0`), per §3's
    /// `status (0=pending, SUCCESS, FAILED, CANCELLED)`.
    pub fn start(&self, id: &str, agent_id: &str, started_at: f64, command: &Value) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO commands (id, agent_id, started_at, command, status) VALUES (?1, ?2, ?3, ?4, 'pending')",
            params![id, agent_id, started_at, command.to_string()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    pub fn update_progress(&self, id: &str, current: i64, total: i64, message: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE commands SET progress_current = ?1, progress_total = ?2, progress_message = ?3 WHERE id = ?4",
            params![current, total, message, id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    pub fn update_result(&self, id: &str, success: bool, changed: bool, output: &str, finished_at: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let status = if success { "SUCCESS" } else { "FAILED" };
        conn.execute(
            "UPDATE commands SET status = ?1, changed = ?2, output = ?3, finished_at = ?4 WHERE id = ?5",
            params![status, changed as i64, output, finished_at, id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Most recent `n` commands, newest first.
    pub fn last(&self, n: u32) -> Result<Vec<CommandRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, started_at, command, status, progress_current, progress_total,
                        progress_message, changed, output, finished_at
                 FROM commands ORDER BY started_at DESC LIMIT ?1",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![n], row_to_record)
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows)
    }

    /// Commands started at or after `since`, oldest first.
    pub fn since(&self, since: f64) -> Result<Vec<CommandRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, started_at, command, status, progress_current, progress_total,
                        progress_message, changed, output, finished_at
                 FROM commands WHERE started_at >= ?1 ORDER BY started_at ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![since], row_to_record)
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows)
    }

    #[allow(dead_code)]
    fn get(&self, id: &str) -> Result<Option<CommandRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, agent_id, started_at, command, status, progress_current, progress_total,
                    progress_message, changed, output, finished_at
             FROM commands WHERE id = ?1",
            params![id],
            row_to_record,
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Delete rows older than `max_age` relative to `now`. Called from the
    /// background purge task; `0` `max_age` effectively means "never kept",
    /// but the loop that drives purging treats `command_log_purge_interval
    /// == 0` as "disabled" before ever calling this.
    pub fn purge_older_than(&self, now: f64, max_age: f64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute("DELETE FROM commands WHERE started_at < ?1", params![now - max_age])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(deleted as u64)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<CommandRecord> {
    let command_text: String = row.get(3)?;
    Ok(CommandRecord {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        started_at: row.get(2)?,
        command: serde_json::from_str(&command_text).unwrap_or(Value::Null),
        status: row.get(4)?,
        progress_current: row.get(5)?,
        progress_total: row.get(6)?,
        progress_message: row.get(7)?,
        changed: row.get::<_, Option<i64>>(8)?.map(|v| v != 0),
        output: row.get(9)?,
        finished_at: row.get(10)?,
    })
}
