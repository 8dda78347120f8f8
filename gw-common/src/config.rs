//! YAML configuration loading shared by the Agent and the Manager.
//!
//! A config file is a YAML mapping with an optional `include: [glob, ...]`
//! key; each matched file is loaded and merged in first, later files and
//! then the original file's own keys winning (so `include` acts like a
//! "load these defaults first" directive). `key=value` CLI overrides are
//! applied last, after all file merging. Grounded in the loader shape of
//! `examples/localplatform-homeroute/crates/hr-agent/src/config.rs`
//! (a `Deserialize` struct loaded from a single file), generalized to
//! support includes and CLI overrides per this project's config contract.

use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::{Error, Result};

/// Load a YAML config file, recursively resolving `include:` globs
/// (relative to the including file's directory), then applying
/// `key=value` CLI overrides. Returns the merged YAML value; callers
/// deserialize it into their own config struct.
pub fn load_merged(path: &Path, cli_overrides: &[String]) -> Result<Value> {
    let mut merged = load_with_includes(path)?;
    for kv in cli_overrides {
        let (key, value) = kv
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("invalid override, expected key=value: {kv}")))?;
        set_dotted(&mut merged, key, Value::String(value.to_string()));
    }
    Ok(merged)
}

fn load_with_includes(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    let mut doc: Value = serde_yaml::from_str(&text)
        .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;

    let includes = take_includes(&mut doc);
    if includes.is_empty() {
        return Ok(doc);
    }

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut base = Value::Mapping(Default::default());
    for pattern in includes {
        for included_path in expand_glob(base_dir, &pattern) {
            let included = load_with_includes(&included_path)?;
            base = merge(base, included);
        }
    }
    Ok(merge(base, doc))
}

fn take_includes(doc: &mut Value) -> Vec<String> {
    let Value::Mapping(map) = doc else {
        return Vec::new();
    };
    let Some(include_val) = map.remove(Value::String("include".to_string())) else {
        return Vec::new();
    };
    match include_val {
        Value::Sequence(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => vec![s],
        _ => Vec::new(),
    }
}

/// Deep-merge two YAML values: mappings recurse key-by-key, anything else
/// (including sequences) has `overlay` win outright. This mirrors the
/// scalar-later-wins half of the state-definition merge rule in `gw-data`,
/// but config merging does not append sequences — config lists are meant
/// to be replaced wholesale, not accumulated.
fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => merge(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn set_dotted(doc: &mut Value, dotted_key: &str, value: Value) {
    if !matches!(doc, Value::Mapping(_)) {
        *doc = Value::Mapping(Default::default());
    }
    let Value::Mapping(map) = doc else {
        unreachable!()
    };
    let mut parts = dotted_key.splitn(2, '.');
    let head = parts.next().unwrap();
    match parts.next() {
        None => {
            map.insert(Value::String(head.to_string()), value);
        }
        Some(rest) => {
            let entry = map
                .entry(Value::String(head.to_string()))
                .or_insert_with(|| Value::Mapping(Default::default()));
            set_dotted(entry, rest, value);
        }
    }
}

/// Hand-rolled glob expansion limited to the `*` wildcard within a single
/// path segment, matching the simplicity of this workspace's other
/// hand-rolled pattern matching (see `gw-data`'s group-pattern resolver)
/// rather than pulling in a dedicated glob crate for one config key.
fn expand_glob(base_dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        base_dir.join(pattern).to_string_lossy().to_string()
    };
    if !full.contains('*') {
        let p = PathBuf::from(&full);
        return if p.exists() { vec![p] } else { Vec::new() };
    }
    let path = Path::new(&full);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_pattern = path.file_name().and_then(|f| f.to_str()).unwrap_or("*");
    let (prefix, suffix) = file_pattern.split_once('*').unwrap_or((file_pattern, ""));

    let mut matches = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) && name.ends_with(suffix) {
                matches.push(entry.path());
            }
        }
    }
    matches.sort();
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_overlay_scalars_and_recurses_mappings() {
        let base: Value = serde_yaml::from_str("a: 1\nb:\n  x: 1\n  y: 2\n").unwrap();
        let overlay: Value = serde_yaml::from_str("a: 2\nb:\n  y: 3\n").unwrap();
        let merged = merge(base, overlay);
        let as_json = serde_json::to_value(&merged).unwrap();
        assert_eq!(as_json["a"], 2);
        assert_eq!(as_json["b"]["x"], 1);
        assert_eq!(as_json["b"]["y"], 3);
    }

    #[test]
    fn set_dotted_creates_nested_mappings() {
        let mut doc = Value::Mapping(Default::default());
        set_dotted(&mut doc, "manager.bind_port", Value::String("7051".into()));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["manager"]["bind_port"], "7051");
    }

    #[test]
    fn load_merged_resolves_includes_with_file_winning_over_include() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.yml"), "ping_interval: 30\nping_timeout: 10\n").unwrap();
        std::fs::write(
            dir.path().join("main.yml"),
            "include: [\"base.yml\"]\nping_interval: 60\n",
        )
        .unwrap();
        let merged = load_merged(&dir.path().join("main.yml"), &[]).unwrap();
        let json = serde_json::to_value(&merged).unwrap();
        assert_eq!(json["ping_interval"], 60);
        assert_eq!(json["ping_timeout"], 10);
    }

    #[test]
    fn cli_override_applies_last() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.yml"), "bind_port: 7051\n").unwrap();
        let merged =
            load_merged(&dir.path().join("main.yml"), &["bind_port=9999".to_string()]).unwrap();
        let json = serde_json::to_value(&merged).unwrap();
        assert_eq!(json["bind_port"], "9999");
    }
}
