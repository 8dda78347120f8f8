//! Manager configuration: a YAML mapping loaded via `gw_common::config`,
//! matching the Agent's loader idiom. See spec §6's recognized key list.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use gw_common::error::{Error, Result};

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    7051
}

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

fn default_tls_verify_mode() -> String {
    "required".to_string()
}

fn default_command_log_max_age() -> f64 {
    30.0 * 24.0 * 3600.0
}

fn default_command_log_purge_interval() -> f64 {
    3600.0
}

fn default_command_result_timeout() -> f64 {
    600.0
}

fn default_command_ack_timeout() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    pub data_base_dir: PathBuf,
    pub command_log_file: PathBuf,
    #[serde(default = "default_command_log_max_age")]
    pub command_log_max_age: f64,
    #[serde(default = "default_command_log_purge_interval")]
    pub command_log_purge_interval: f64,
    #[serde(default = "default_command_result_timeout")]
    pub command_result_timeout: f64,
    #[serde(default = "default_command_ack_timeout")]
    pub command_ack_timeout: f64,

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
}

impl ManagerConfig {
    pub fn load(path: &Path, cli_overrides: &[String]) -> Result<Self> {
        let merged = gw_common::config::load_merged(path, cli_overrides)?;
        let json = serde_json::to_value(merged)
            .map_err(|e| Error::config(format!("converting config to JSON: {e}")))?;
        serde_json::from_value(json).map_err(|e| Error::config(format!("invalid manager config: {e}")))
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.hello_timeout)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ping_timeout)
    }

    pub fn command_log_max_age(&self) -> Duration {
        Duration::from_secs_f64(self.command_log_max_age)
    }

    pub fn command_log_purge_interval(&self) -> Duration {
        Duration::from_secs_f64(self.command_log_purge_interval)
    }

    pub fn command_result_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_result_timeout)
    }

    pub fn command_ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_ack_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.yml");
        std::fs::write(
            &path,
            "data_base_dir: /var/lib/gridwatch/data\n\
             command_log_file: /var/lib/gridwatch/commands.db\n\
             tls_cert_file: /etc/gridwatch/manager.crt\n\
             tls_key_file: /etc/gridwatch/manager.key\n\
             tls_ca_file: /etc/gridwatch/ca.crt\n",
        )
        .unwrap();
        let cfg = ManagerConfig::load(&path, &[]).unwrap();
        assert_eq!(cfg.bind_port, 7051);
        assert_eq!(cfg.tls_verify_mode, "required");
    }

    #[test]
    fn cli_override_changes_bind_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.yml");
        std::fs::write(
            &path,
            "data_base_dir: /var/lib/gridwatch/data\n\
             command_log_file: /var/lib/gridwatch/commands.db\n\
             tls_cert_file: /etc/gridwatch/manager.crt\n\
             tls_key_file: /etc/gridwatch/manager.key\n\
             tls_ca_file: /etc/gridwatch/ca.crt\n",
        )
        .unwrap();
        let cfg = ManagerConfig::load(&path, &["bind_port=9999".to_string()]).unwrap();
        assert_eq!(cfg.bind_port, 9999);
    }
}
