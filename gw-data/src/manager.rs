//! The data-resolution engine: agent -> groups -> data/state lookup with
//! wildcard matching and `${name}` interpolation (spec §4.6). Grounded in
//! `examples/original_source/src/manager/redpepper/manager/data.py`'s
//! `DataManager.get_data_for_agent` / `get_state_definition_for_agent` /
//! `get_data_file_path`.

use std::path::{Path, PathBuf};

use gw_common::error::{Error, Result};
use serde_yaml::Value;

use crate::agents::{AgentEntry, AgentStore};
use crate::cache::YamlCache;
use crate::groups::GroupResolver;
use crate::interpolate::{self, Lookup};
use crate::merge;

pub struct DataManager {
    base_dir: PathBuf,
    agents: AgentStore,
    groups: GroupResolver,
    yaml_cache: YamlCache,
}

impl DataManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            agents: AgentStore::new(crate::agents::agents_path(&base_dir)),
            groups: GroupResolver::new(crate::groups::groups_path(&base_dir)),
            yaml_cache: YamlCache::new(),
            base_dir,
        }
    }

    pub fn lookup_agent(&self, agent_id: &str) -> Result<Option<AgentEntry>> {
        self.agents.lookup(agent_id)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn groups_for_agent(&self, agent_id: &str) -> Result<Vec<String>> {
        self.groups.groups_for_agent(agent_id)
    }

    fn group_data_path(&self, group: &str) -> PathBuf {
        self.base_dir.join("data").join(format!("{group}.yml"))
    }

    fn group_state_path(&self, group: &str, state_id: Option<&str>) -> PathBuf {
        match state_id {
            Some(id) => self
                .base_dir
                .join("state")
                .join(group)
                .join(format!("{id}.yml")),
            None => self.base_dir.join("state").join(format!("{group}.yml")),
        }
    }

    /// `get_data_for_agent`: special names, then the agent's own `data`
    /// override, then its groups in reverse order (last group wins).
    pub fn get_data_for_agent(&self, agent_id: &str, name: &str) -> Result<Value> {
        let groups = self.groups_for_agent(agent_id)?;

        if name == "<agent_id>" {
            return Ok(Value::String(agent_id.to_string()));
        }
        if name == "<groups>" {
            return Ok(Value::Sequence(
                groups.iter().map(|g| Value::String(g.clone())).collect(),
            ));
        }

        if let Some(entry) = self.agents.lookup(agent_id)? {
            if let Some(found) = descend(&entry.data, name) {
                return Ok(found);
            }
        }

        for group in groups.iter().rev() {
            let path = self.group_data_path(group);
            if let Some(tree) = self.yaml_cache.load(&path)? {
                if let Some(found) = descend(&tree, name) {
                    return Ok(found);
                }
            }
        }

        Err(Error::request(format!(
            "no data named '{name}' for agent '{agent_id}'"
        )))
    }

    /// `get_state_definition_for_agent`: forward-order deep-merge across
    /// every group's state tree, then `${name}` interpolation.
    pub fn get_state_definition_for_agent(
        &self,
        agent_id: &str,
        state_id: Option<&str>,
    ) -> Result<Value> {
        if let Some(id) = state_id {
            validate_path_segment(id)?;
        }
        let groups = self.groups_for_agent(agent_id)?;

        let mut trees = Vec::new();
        for group in &groups {
            let path = self.group_state_path(group, state_id);
            if let Some(tree) = self.yaml_cache.load(&path)? {
                trees.push(tree);
            }
        }
        let merged = merge::deep_merge_all(trees);

        struct AgentLookup<'a> {
            manager: &'a DataManager,
            agent_id: &'a str,
        }
        impl Lookup for AgentLookup<'_> {
            fn resolve(&self, name: &str) -> Result<Option<Value>> {
                match self.manager.get_data_for_agent(self.agent_id, name) {
                    Ok(v) => Ok(Some(v)),
                    Err(Error::Request(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }

        interpolate::interpolate(&merged, &AgentLookup { manager: self, agent_id })
    }

    /// `get_data_file_path`: validated relative path searched across
    /// groups in reverse order, returning the first hit.
    pub fn get_data_file_path(&self, agent_id: &str, relative: &str) -> Result<PathBuf> {
        validate_relative_path(relative)?;
        let groups = self.groups_for_agent(agent_id)?;
        for group in groups.iter().rev() {
            let candidate = self.base_dir.join("data").join(group).join(relative);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(Error::request(format!(
            "no data file '{relative}' visible to agent '{agent_id}'"
        )))
    }
}

/// Dot-path descent into a YAML tree. Returns `None` on any missing
/// segment (the caller treats a miss across the whole chain as a
/// lookup error, matching the original's KeyError-on-miss semantics).
fn descend(tree: &Value, dotted: &str) -> Option<Value> {
    let mut current = tree.clone();
    for segment in dotted.split('.') {
        current = current.as_mapping()?.get(Value::String(segment.to_string()))?.clone();
    }
    Some(current)
}

fn validate_path_segment(segment: &str) -> Result<()> {
    if segment.starts_with('.') || segment.contains('\\') {
        return Err(Error::request(format!("invalid path segment '{segment}'")));
    }
    Ok(())
}

fn validate_relative_path(relative: &str) -> Result<()> {
    for segment in Path::new(relative).components() {
        let s = segment.as_os_str().to_string_lossy();
        validate_path_segment(&s)?;
    }
    if relative.contains('\\') {
        return Err(Error::request(format!("invalid path '{relative}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("agents.yml"),
            r#"
web-01:
  secret_hash: "x"
  allowed_ips: []
  data:
    role: primary
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("groups.yml"),
            "web-*: [webservers]\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(
            dir.path().join("data/webservers.yml"),
            "role: fallback\nport: 8080\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("state")).unwrap();
        fs::write(
            dir.path().join("state/webservers.yml"),
            "packages: [nginx]\nlisten: \"${port}\"\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn agent_data_override_wins_over_group() {
        let dir = setup();
        let dm = DataManager::new(dir.path());
        let role = dm.get_data_for_agent("web-01", "role").unwrap();
        assert_eq!(role.as_str(), Some("primary"));
    }

    #[test]
    fn falls_back_to_group_data_when_no_agent_override() {
        let dir = setup();
        let dm = DataManager::new(dir.path());
        let port = dm.get_data_for_agent("web-01", "port").unwrap();
        assert_eq!(port.as_i64(), Some(8080));
    }

    #[test]
    fn special_names_resolve_without_lookup() {
        let dir = setup();
        let dm = DataManager::new(dir.path());
        let id = dm.get_data_for_agent("web-01", "<agent_id>").unwrap();
        assert_eq!(id.as_str(), Some("web-01"));
        let groups = dm.get_data_for_agent("web-01", "<groups>").unwrap();
        assert_eq!(groups.as_sequence().unwrap().len(), 1);
    }

    #[test]
    fn missing_name_is_a_request_error() {
        let dir = setup();
        let dm = DataManager::new(dir.path());
        let err = dm.get_data_for_agent("web-01", "nonexistent").unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[test]
    fn state_definition_merges_and_interpolates() {
        let dir = setup();
        let dm = DataManager::new(dir.path());
        let state = dm.get_state_definition_for_agent("web-01", None).unwrap();
        assert_eq!(state["packages"][0].as_str(), Some("nginx"));
        assert_eq!(state["listen"].as_i64(), Some(8080));
    }

    #[test]
    fn data_file_path_rejects_traversal() {
        let dir = setup();
        let dm = DataManager::new(dir.path());
        assert!(dm.get_data_file_path("web-01", "../secret").is_err());
        assert!(dm.get_data_file_path("web-01", "a\\b").is_err());
    }
}
