//! Group resolution: `groups.yml` maps a literal agent id or a glob
//! pattern (`*` -> any run, `?` -> one char, `.` -> literal dot) to an
//! ordered list of group names. An agent's effective groups are the
//! concatenation of every matching key's group list, deduplicated
//! preserving first-seen order. Grounded in
//! `examples/original_source/src/manager/redpepper/manager/data.py`'s
//! group-pattern resolution.

use std::path::Path;

use gw_common::error::Result;

use crate::cache::YamlCache;

/// Translate the data model's restricted glob syntax into a match against
/// a concrete agent id, without pulling in a regex engine — `*` and `?`
/// are the only wildcards and `.` must match literally, so a direct
/// backtracking matcher is simple and exact.
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    matches_from(&p, 0, &t, 0)
}

fn matches_from(p: &[char], pi: usize, t: &[char], ti: usize) -> bool {
    if pi == p.len() {
        return ti == t.len();
    }
    match p[pi] {
        '*' => {
            // Try consuming zero or more characters of `t`.
            for skip in 0..=(t.len() - ti) {
                if matches_from(p, pi + 1, t, ti + skip) {
                    return true;
                }
            }
            false
        }
        '?' => ti < t.len() && matches_from(p, pi + 1, t, ti + 1),
        literal => ti < t.len() && t[ti] == literal && matches_from(p, pi + 1, t, ti + 1),
    }
}

pub struct GroupResolver {
    cache: YamlCache,
    path: std::path::PathBuf,
}

impl GroupResolver {
    pub fn new(groups_yml_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            cache: YamlCache::new(),
            path: groups_yml_path.into(),
        }
    }

    fn load_map(&self) -> Result<Vec<(String, Vec<String>)>> {
        let Some(value) = self.cache.load(&self.path)? else {
            return Ok(Vec::new());
        };
        let mapping = value.as_mapping().cloned().unwrap_or_default();
        let mut out = Vec::new();
        for (k, v) in mapping {
            let Some(pattern) = k.as_str() else { continue };
            let groups = match v {
                serde_yaml::Value::Sequence(items) => items
                    .into_iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect(),
                serde_yaml::Value::String(s) => vec![s],
                _ => Vec::new(),
            };
            out.push((pattern.to_string(), groups));
        }
        Ok(out)
    }

    /// Effective groups for `agent_id`: concatenation of every matching
    /// pattern's group list, in `groups.yml` key order, deduplicated
    /// preserving first-seen order.
    pub fn groups_for_agent(&self, agent_id: &str) -> Result<Vec<String>> {
        let entries = self.load_map()?;
        let mut result = Vec::new();
        for (pattern, groups) in entries {
            if glob_matches(&pattern, agent_id) {
                for g in groups {
                    if !result.contains(&g) {
                        result.push(g);
                    }
                }
            }
        }
        Ok(result)
    }
}

pub fn groups_path(data_base_dir: &Path) -> std::path::PathBuf {
    data_base_dir.join("groups.yml")
}
