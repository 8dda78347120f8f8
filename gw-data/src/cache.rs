//! A YAML-backed read-through cache: an entry is valid iff its stored
//! mtime equals the file's current mtime (§3 Invariants). Grounded in
//! `examples/original_source/src/manager/redpepper/manager/data.py`'s
//! file-backed caches for agents/groups/data/state YAML.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde_yaml::Value;

use gw_common::error::{Error, Result};

struct Entry {
    mtime: SystemTime,
    value: Value,
}

/// Single-writer read-through YAML cache. Readers may observe a value up
/// to one mtime tick stale (the file changed between the mtime check and
/// the read); this is accepted per §5 since agents tolerate transient
/// misses.
pub struct YamlCache {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl Default for YamlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl YamlCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Load and parse `path`, returning the cached value if its mtime is
    /// unchanged since last load. Missing files return `Ok(None)`.
    pub fn load(&self, path: &Path) -> Result<Option<Value>> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        let mtime = metadata
            .modified()
            .map_err(Error::Io)?;

        {
            let entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get(path) {
                if entry.mtime == mtime {
                    return Ok(Some(entry.value.clone()));
                }
            }
        }

        let text = std::fs::read_to_string(path).map_err(Error::Io)?;
        let value: Value = serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;

        self.entries.lock().unwrap().insert(
            path.to_path_buf(),
            Entry {
                mtime,
                value: value.clone(),
            },
        );
        Ok(Some(value))
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.lock().unwrap().remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reloads_after_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.yml");
        std::fs::write(&path, "x: 1\n").unwrap();
        let cache = YamlCache::new();
        let first = cache.load(&path).unwrap().unwrap();
        assert_eq!(first["x"].as_i64(), Some(1));

        // Force a distinct mtime: some filesystems have 1s resolution.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        std::fs::write(&path, "x: 2\n").unwrap();
        let second = cache.load(&path).unwrap().unwrap();
        assert_eq!(second["x"].as_i64(), Some(2));
    }

    #[test]
    fn missing_file_returns_none() {
        let cache = YamlCache::new();
        let result = cache.load(Path::new("/nonexistent/path.yml")).unwrap();
        assert!(result.is_none());
    }
}
