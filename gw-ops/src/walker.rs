//! Flattens a nested state-definition tree into an ordered task list by
//! pre-order traversal, threading a `changed` map through execution.
//! Grounded in `examples/original_source/src/agent/redpepper/agent/agent.py`'s
//! `Agent.run_state`, generalized from the original's flat
//! `{task_name: spec}` dict to the nested, explicit-stack pre-order walk
//! the distilled spec requires so that `name`/`onchange` sub-states
//! nest to arbitrary depth with `:`-joined task names.

use std::collections::HashMap;

use gw_common::error::Result;
use serde_json::{Map, Value};
use tracing::debug;

use crate::condition;
use crate::operation::{AgentContext, OperationRegistry};
use crate::result::OpResult;

/// One flattened leaf: its `:`-joined path name and the operation spec
/// (everything but `type`/`onchange`/`if`, which are extracted separately).
struct Task {
    name: String,
    op_type: String,
    onchange: Option<Value>,
    condition: Option<Value>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

/// Pre-order flatten: a state tree is a mapping of `name -> spec`, where
/// `spec` is either a leaf (a mapping with a `type` key) or a list of
/// leaves (numbered `name #N` sub-tasks), matching §4.4's state-walker
/// input shape.
fn flatten(tree: &Value, prefix: &str, out: &mut Vec<Task>) -> Result<()> {
    let mapping = tree
        .as_object()
        .ok_or_else(|| gw_common::error::Error::request("state definition must be a mapping"))?;

    for (key, value) in mapping.iter() {
        let name = join(prefix, key);
        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let task_name = format!("{name} #{}", i + 1);
                    out.push(leaf_task(&task_name, item)?);
                }
            }
            Value::Object(_) => {
                out.push(leaf_task(&name, value)?);
            }
            other => {
                return Err(gw_common::error::Error::request(format!(
                    "state entry '{name}' is not a mapping or list: {other}"
                )));
            }
        }
    }
    Ok(())
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

fn leaf_task(name: &str, spec: &Value) -> Result<Task> {
    let mut map = spec
        .as_object()
        .cloned()
        .ok_or_else(|| gw_common::error::Error::request(format!("task '{name}' is not a mapping")))?;
    let op_type = map
        .remove("type")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| gw_common::error::Error::request(format!("task '{name}' missing 'type'")))?;
    let onchange = map.remove("onchange");
    let condition = map.remove("if");
    let args = map
        .remove("args")
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default();
    Ok(Task {
        name: name.to_string(),
        op_type,
        onchange,
        condition,
        args,
        kwargs: map,
    })
}

/// Marks the leaf's own name and every ancestor `:`-joined prefix as
/// changed, per §4.4: "For every leaf also mark all ancestor path
/// prefixes as `changed=true` whenever the leaf changes."
fn mark_changed(changed: &mut HashMap<String, bool>, name: &str, value: bool) {
    changed.insert(name.to_string(), value);
    if !value {
        return;
    }
    let segments: Vec<&str> = name.split(':').collect();
    for i in 1..segments.len() {
        changed.insert(segments[..i].join(":"), true);
    }
}

/// Run every task in `tree` against `registry`, reporting progress
/// through `on_progress` and stopping at the first failure.
pub fn run_state(
    registry: &OperationRegistry,
    ctx: &AgentContext,
    state_name: &str,
    tree: &Value,
    mut on_progress: impl FnMut(usize, usize, &str) + Send,
) -> Result<OpResult> {
    let mut tasks = Vec::new();
    flatten(tree, "", &mut tasks)?;

    let total = tasks.len();
    let mut changed: HashMap<String, bool> = HashMap::new();
    let mut result = OpResult::new(state_name);

    on_progress(0, total, &format!("Starting {state_name}..."));

    for (i, task) in tasks.iter().enumerate() {
        result.add_line(&format!("Running state {}:", task.name));

        let run_this = match &task.condition {
            Some(cond) => condition::evaluate(cond, &changed)?,
            None => true,
        };

        let task_result = if !run_this {
            debug!(task = %task.name, "condition not met, skipping");
            OpResult::success(&task.name, "Condition not met", false)
        } else {
            match registry.construct(&task.op_type, task.args.clone(), task.kwargs.clone()) {
                Ok(operation) => match operation.ensure(ctx) {
                    Ok(r) => r,
                    Err(e) => OpResult::failure(&task.name, format!("operation failed: {e}")),
                },
                Err(e) => OpResult::failure(&task.name, format!("failed to load operation: {e}")),
            }
        };

        mark_changed(&mut changed, &task.name, task_result.changed);
        result.update(&task_result, false);

        if !result.succeeded {
            break;
        }

        if let Some(onchange) = &task.onchange {
            if task_result.changed {
                let onchange_name = format!("{} onchange", task.name);
                let mut onchange_tree = Map::new();
                onchange_tree.insert(onchange_name.clone(), onchange.clone());
                let onchange_result = run_state(
                    registry,
                    ctx,
                    &onchange_name,
                    &Value::Object(onchange_tree),
                    |_, _, _| {},
                )?;
                result.update(&onchange_result, true);
                if !result.succeeded {
                    break;
                }
            }
        }

        on_progress(i + 1, total, &format!("{} done", task.name));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> OperationRegistry {
        OperationRegistry::builtin()
    }

    #[test]
    fn flattens_nested_tree_with_colon_joined_names() {
        let tree = json!({
            "web": {
                "nginx": { "type": "echo.Echo", "message": "hi" }
            }
        });
        let mut tasks = Vec::new();
        flatten(&tree, "", &mut tasks).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "web:nginx");
    }

    #[test]
    fn list_entries_become_numbered_subtasks() {
        let tree = json!({
            "pkgs": [
                { "type": "echo.Echo", "message": "a" },
                { "type": "echo.Echo", "message": "b" }
            ]
        });
        let mut tasks = Vec::new();
        flatten(&tree, "", &mut tasks).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].name, "pkgs #1");
        assert_eq!(tasks[1].name, "pkgs #2");
    }

    #[test]
    fn stops_on_first_failure() {
        let tree = json!({
            "a": { "type": "command.Run", "command": "exit 1" },
            "b": { "type": "echo.Echo", "message": "never" }
        });
        let ctx = AgentContext { agent_id: "a1".into() };
        let result = run_state(&registry(), &ctx, "s", &tree, |_, _, _| {}).unwrap();
        assert!(!result.succeeded);
    }

    #[test]
    fn mark_changed_sets_ancestor_prefixes() {
        let mut changed = HashMap::new();
        mark_changed(&mut changed, "web:nginx:reload", true);
        assert_eq!(changed.get("web:nginx:reload"), Some(&true));
        assert_eq!(changed.get("web:nginx"), Some(&true));
        assert_eq!(changed.get("web"), Some(&true));
    }
}
