//! Built-in `custom(<name>, ...)` request handlers the Manager answers
//! directly, without consulting a `requests/<group>/<name>.py` module.
//! Grounded in `examples/original_source/src/manager/redpepper/manager/requests.py`
//! and `manager.py`'s dispatch table; consolidated onto the single
//! `custom` RPC method name (see the wire-format Open Question decision
//! in DESIGN.md).

use std::path::Path;

use base64::Engine as _;
use gw_common::error::{Error, Result};
use serde_json::{json, Value as JsonValue};

use crate::manager::DataManager;

/// `requests.dataForAgent(agent_id, name)`.
pub fn data_for_agent(dm: &DataManager, agent_id: &str, name: &str) -> Result<JsonValue> {
    let value = dm.get_data_for_agent(agent_id, name)?;
    yaml_to_json(&value)
}

/// `requests.stateDefinition(agent_id, state_id?)`.
pub fn state_definition(
    dm: &DataManager,
    agent_id: &str,
    state_id: Option<&str>,
) -> Result<JsonValue> {
    let value = dm.get_state_definition_for_agent(agent_id, state_id)?;
    yaml_to_json(&value)
}

/// `requests.dataFileStat(agent_id, relative)` — existence/size/mtime
/// without transferring content, used by the Agent to decide whether a
/// cached copy is still valid.
pub fn data_file_stat(dm: &DataManager, agent_id: &str, relative: &str) -> Result<JsonValue> {
    let path = dm.get_data_file_path(agent_id, relative)?;
    let metadata = std::fs::metadata(&path).map_err(Error::Io)?;
    let mtime = metadata
        .modified()
        .map_err(Error::Io)?
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| Error::internal(e.to_string()))?
        .as_secs_f64();
    Ok(json!({ "size": metadata.len(), "mtime": mtime }))
}

/// `requests.dataFile(agent_id, relative)` — base64-encoded file content.
pub fn data_file(dm: &DataManager, agent_id: &str, relative: &str) -> Result<JsonValue> {
    let path = dm.get_data_file_path(agent_id, relative)?;
    let bytes = std::fs::read(&path).map_err(Error::Io)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(json!({ "content": encoded }))
}

/// `requests.operationModule(name, existing_mtime?, existing_size?)` —
/// the Manager never executes the returned module; it is only cached and
/// shipped to the Agent, which is itself restricted to the compiled-in
/// operation registry (see DESIGN.md). The protocol is still honored
/// byte-for-byte so a stock Agent sees a `changed=false` response for a
/// module it has no builtin analog for, not a wire-level protocol error.
pub fn operation_module(
    base_dir: &Path,
    name: &str,
    existing_mtime: Option<f64>,
    existing_size: Option<u64>,
) -> Result<JsonValue> {
    let path = base_dir.join("operations").join(format!("{name}.py"));
    let metadata = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::request(format!("no operation module named '{name}'")));
        }
        Err(e) => return Err(Error::Io(e)),
    };
    let mtime = metadata
        .modified()
        .map_err(Error::Io)?
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| Error::internal(e.to_string()))?
        .as_secs_f64();
    let size = metadata.len();

    if existing_mtime == Some(mtime) && existing_size == Some(size) {
        return Ok(json!({ "changed": false }));
    }

    let bytes = std::fs::read(&path).map_err(Error::Io)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(json!({ "changed": true, "content": encoded, "mtime": mtime, "size": size }))
}

fn yaml_to_json(value: &serde_yaml::Value) -> Result<JsonValue> {
    serde_json::to_value(value).map_err(|e| Error::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("agents.yml"),
            "web-01:\n  secret_hash: x\n  allowed_ips: []\n  data: { role: primary }\n",
        )
        .unwrap();
        fs::write(dir.path().join("groups.yml"), "web-01: [webservers]\n").unwrap();
        fs::create_dir_all(dir.path().join("data/webservers")).unwrap();
        fs::write(dir.path().join("data/webservers/motd.txt"), b"hello").unwrap();
        dir
    }

    #[test]
    fn data_for_agent_returns_json() {
        let dir = setup();
        let dm = DataManager::new(dir.path());
        let result = data_for_agent(&dm, "web-01", "role").unwrap();
        assert_eq!(result, json!("primary"));
    }

    #[test]
    fn data_file_round_trips_content() {
        let dir = setup();
        let dm = DataManager::new(dir.path());
        let stat = data_file_stat(&dm, "web-01", "motd.txt").unwrap();
        assert_eq!(stat["size"], json!(5));
        let file = data_file(&dm, "web-01", "motd.txt").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(file["content"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn operation_module_reports_unchanged_when_mtime_and_size_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("operations")).unwrap();
        let path = dir.path().join("operations/custom.py");
        fs::write(&path, b"# noop").unwrap();
        let metadata = fs::metadata(&path).unwrap();
        let mtime = metadata
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();
        let size = metadata.len();

        let result =
            operation_module(&dir.path().to_path_buf(), "custom", Some(mtime), Some(size))
                .unwrap();
        assert_eq!(result["changed"], json!(false));
    }

    #[test]
    fn operation_module_missing_is_a_request_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = operation_module(&dir.path().to_path_buf(), "nope", None, None).unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }
}
