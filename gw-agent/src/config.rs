//! Agent configuration: a YAML mapping loaded via `gw_common::config`,
//! deserialized into this struct. Grounded in the teacher's
//! `Deserialize`-struct-plus-loader idiom (`hr-agent/src/config.rs`),
//! adapted to this project's key set (spec.md §6).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use gw_common::error::{Error, Result};

fn default_hello_timeout() -> f64 {
    10.0
}

fn default_data_request_timeout() -> f64 {
    30.0
}

fn default_ping_interval() -> f64 {
    30.0
}

fn default_ping_timeout() -> f64 {
    10.0
}

fn default_max_message_size() -> u32 {
    1024 * 1024
}

fn default_manager_port() -> u16 {
    7051
}

fn default_tls_verify_mode() -> String {
    "required".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub manager_host: String,
    #[serde(default = "default_manager_port")]
    pub manager_port: u16,
    pub agent_id: String,
    pub agent_secret: String,

    pub tls_cert_file: PathBuf,
    pub tls_key_file: PathBuf,
    pub tls_ca_file: PathBuf,
    #[serde(default = "default_tls_verify_mode")]
    pub tls_verify_mode: String,

    #[serde(default = "default_hello_timeout")]
    pub hello_timeout: f64,
    #[serde(default = "default_data_request_timeout")]
    pub data_request_timeout: f64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: f64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: f64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u32,

    pub operation_modules_cache_dir: PathBuf,
}

impl AgentConfig {
    pub fn load(path: &Path, cli_overrides: &[String]) -> Result<Self> {
        let merged = gw_common::config::load_merged(path, cli_overrides)?;
        let json = serde_json::to_value(merged)
            .map_err(|e| Error::config(format!("converting config to JSON: {e}")))?;
        serde_json::from_value(json).map_err(|e| Error::config(format!("invalid agent config: {e}")))
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.hello_timeout)
    }

    pub fn data_request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.data_request_timeout)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ping_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yml");
        std::fs::write(
            &path,
            "manager_host: manager.example\n\
             agent_id: a1\n\
             agent_secret: s3cr3t\n\
             tls_cert_file: /etc/gridwatch/agent.crt\n\
             tls_key_file: /etc/gridwatch/agent.key\n\
             tls_ca_file: /etc/gridwatch/ca.crt\n\
             operation_modules_cache_dir: /var/cache/gridwatch\n",
        )
        .unwrap();
        let cfg = AgentConfig::load(&path, &[]).unwrap();
        assert_eq!(cfg.manager_port, 7051);
        assert_eq!(cfg.hello_timeout, 10.0);
        assert_eq!(cfg.max_message_size, 1024 * 1024);
    }

    #[test]
    fn cli_override_changes_manager_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yml");
        std::fs::write(
            &path,
            "manager_host: manager.example\n\
             agent_id: a1\n\
             agent_secret: s3cr3t\n\
             tls_cert_file: /etc/gridwatch/agent.crt\n\
             tls_key_file: /etc/gridwatch/agent.key\n\
             tls_ca_file: /etc/gridwatch/ca.crt\n\
             operation_modules_cache_dir: /var/cache/gridwatch\n",
        )
        .unwrap();
        let cfg = AgentConfig::load(&path, &["manager_port=7999".to_string()]).unwrap();
        assert_eq!(cfg.manager_port, 7999);
    }
}
