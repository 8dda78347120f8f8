//! `agents.yml`-backed agent registry: per-agent credential hash, allowed
//! source CIDRs, and inline data overrides. Grounded in
//! `examples/original_source/src/manager/redpepper/manager/data.py`'s
//! agent config loading and `examples/original_source/src/manager/redpepper/manager/server.py`'s
//! auth check.

use std::path::{Path, PathBuf};

use ipnet::IpNet;
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use gw_common::error::Result;

use crate::cache::YamlCache;

#[derive(Debug, Clone)]
pub struct AgentEntry {
    pub agent_id: String,
    pub secret_hash: String,
    pub allowed_ips: Vec<IpNet>,
    pub data: Value,
}

pub struct AgentStore {
    cache: YamlCache,
    path: PathBuf,
}

impl AgentStore {
    pub fn new(agents_yml_path: impl Into<PathBuf>) -> Self {
        Self {
            cache: YamlCache::new(),
            path: agents_yml_path.into(),
        }
    }

    fn load_all(&self) -> Result<Vec<AgentEntry>> {
        let Some(value) = self.cache.load(&self.path)? else {
            return Ok(Vec::new());
        };
        let mapping = value.as_mapping().cloned().unwrap_or_default();
        let mut out = Vec::new();
        for (k, v) in mapping {
            let Some(agent_id) = k.as_str() else { continue };
            let secret_hash = v
                .get("secret_hash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let allowed_ips = v
                .get("allowed_ips")
                .and_then(Value::as_sequence)
                .map(|seq| {
                    seq.iter()
                        .filter_map(Value::as_str)
                        .filter_map(|s| s.parse::<IpNet>().ok())
                        .collect()
                })
                .unwrap_or_default();
            let data = v.get("data").cloned().unwrap_or(Value::Mapping(Default::default()));
            out.push(AgentEntry {
                agent_id: agent_id.to_string(),
                secret_hash,
                allowed_ips,
                data,
            });
        }
        Ok(out)
    }

    pub fn lookup(&self, agent_id: &str) -> Result<Option<AgentEntry>> {
        let all = self.load_all()?;
        Ok(all.into_iter().find(|e| e.agent_id == agent_id))
    }

    /// Whether `addr` is permitted for `entry`. An empty `allowed_ips` list
    /// permits no address — an agent with no configured ranges cannot
    /// connect from anywhere until at least one is added.
    pub fn ip_allowed(entry: &AgentEntry, addr: std::net::IpAddr) -> bool {
        gw_common::agent_id::ip_allowed(addr, &entry.allowed_ips)
    }

    /// Verify `credential` against `entry.secret_hash` in constant time.
    /// The stored hash is the lowercase-hex SHA-256 digest of the shared
    /// secret; comparison is done on the hex bytes to avoid early-exit
    /// timing leaks proportional to matching prefix length.
    pub fn verify_secret(entry: &AgentEntry, credential: &str) -> bool {
        let mut hasher = Sha256::new();
        hasher.update(credential.as_bytes());
        let computed = hex::encode(hasher.finalize());
        computed.as_bytes().ct_eq(entry.secret_hash.as_bytes()).into()
    }
}

pub fn agents_path(data_base_dir: &Path) -> PathBuf {
    data_base_dir.join("agents.yml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_agents(dir: &Path) -> PathBuf {
        let path = dir.join("agents.yml");
        std::fs::write(
            &path,
            r#"
web-01:
  secret_hash: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
  allowed_ips: ["10.0.0.0/8"]
  data:
    role: web
"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn lookup_finds_entry_by_agent_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_agents(dir.path());
        let store = AgentStore::new(path);
        let entry = store.lookup("web-01").unwrap().unwrap();
        assert_eq!(entry.data["role"].as_str(), Some("web"));
        assert_eq!(entry.allowed_ips.len(), 1);
    }

    #[test]
    fn lookup_missing_agent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_agents(dir.path());
        let store = AgentStore::new(path);
        assert!(store.lookup("nope").unwrap().is_none());
    }

    #[test]
    fn ip_allowed_respects_cidr() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_agents(dir.path());
        let store = AgentStore::new(path);
        let entry = store.lookup("web-01").unwrap().unwrap();
        assert!(AgentStore::ip_allowed(&entry, "10.1.2.3".parse().unwrap()));
        assert!(!AgentStore::ip_allowed(&entry, "192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn verify_secret_checks_sha256_hash() {
        let mut hasher = Sha256::new();
        hasher.update(b"correct-horse");
        let hash = hex::encode(hasher.finalize());
        let entry = AgentEntry {
            agent_id: "a".into(),
            secret_hash: hash,
            allowed_ips: Vec::new(),
            data: Value::Null,
        };
        assert!(AgentStore::verify_secret(&entry, "correct-horse"));
        assert!(!AgentStore::verify_secret(&entry, "wrong"));
    }
}
