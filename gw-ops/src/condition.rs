//! The `if:` condition grammar: an interpreted (not compiled) mini
//! language over a JSON condition tree. Grounded in
//! `examples/original_source/src/agent/redpepper/agent/agent.py`'s
//! `Agent.evaluate_condition`; the `changed <task-name>` type is an
//! addition over the original (see DESIGN.md) feeding the state
//! walker's change-tracking map into condition evaluation.

use std::collections::HashMap;
use std::process::Command;

use gw_common::error::{Error, Result};
use serde_json::Value;

/// Evaluate a condition tree against the `changed` map accumulated by the
/// state walker so far. `null` is true; booleans and `"true"`/`"false"`
/// strings (case-insensitive) are literal; a list requires every entry
/// true; a single-key mapping selects a condition type.
pub fn evaluate(condition: &Value, changed: &HashMap<String, bool>) -> Result<bool> {
    match condition {
        Value::Null => Ok(true),
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(Error::request(format!("invalid standalone condition name: {other}"))),
        },
        Value::Array(items) => {
            for item in items {
                if !evaluate(item, changed)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Value::Object(map) => {
            if map.len() != 1 {
                return Err(Error::request("condition mapping must have exactly one key"));
            }
            let (key, value) = map.iter().next().unwrap();
            evaluate_keyed(key, value, changed)
        }
        other => Err(Error::request(format!("invalid condition value: {other}"))),
    }
}

fn evaluate_keyed(key: &str, value: &Value, changed: &HashMap<String, bool>) -> Result<bool> {
    // Bare `not` is itself a condition type: negate the sub-condition
    // given as the payload, distinct from the `not <type>` prefix below.
    if key == "not" {
        return Ok(!evaluate(value, changed)?);
    }

    let mut words: Vec<&str> = key.split_whitespace().collect();
    if words.is_empty() {
        return Err(Error::request("empty condition key"));
    }
    let negate = if words[0] == "not" {
        words.remove(0);
        true
    } else {
        false
    };
    if words.is_empty() {
        return Err(Error::request(format!("invalid condition key '{key}'")));
    }
    let ctype = words.remove(0);

    let result = match ctype {
        "true" => {
            require_no_args(&words, key)?;
            require_null(value, key)?;
            true
        }
        "false" => {
            require_no_args(&words, key)?;
            require_null(value, key)?;
            false
        }
        "all" => {
            require_no_args(&words, key)?;
            let items = value
                .as_array()
                .ok_or_else(|| Error::request("value for all condition must be a list"))?;
            items.iter().try_fold(true, |acc, c| Ok::<bool, Error>(acc && evaluate(c, changed)?))?
        }
        "any" => {
            require_no_args(&words, key)?;
            let items = value
                .as_array()
                .ok_or_else(|| Error::request("value for any condition must be a list"))?;
            let mut any = false;
            for c in items {
                if evaluate(c, changed)? {
                    any = true;
                    break;
                }
            }
            any
        }
        "py" => {
            require_no_args(&words, key)?;
            return Err(Error::request(
                "py conditions are not supported: host-language expression evaluation has no \
                 safe equivalent in this runtime",
            ));
        }
        "cmd" => {
            let retcodes: Vec<i32> = if let Some(w) = words.first() {
                w.split(',')
                    .map(|s| {
                        s.trim()
                            .parse::<i32>()
                            .map_err(|_| Error::request(format!("invalid return code '{s}' in '{key}'")))
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                vec![0]
            };
            let command = value
                .as_str()
                .ok_or_else(|| Error::request("cmd condition value must be a string"))?;
            let status = Command::new("sh").arg("-c").arg(command).status();
            match status {
                Ok(status) => retcodes.contains(&status.code().unwrap_or(-1)),
                Err(_) => false,
            }
        }
        "path" => {
            let verb = words.first().copied().unwrap_or("exists");
            let path = value
                .as_str()
                .ok_or_else(|| Error::request("path condition value must be a string"))?;
            let meta = std::fs::symlink_metadata(path);
            match verb {
                "exists" => std::path::Path::new(path).exists(),
                "isfile" => meta.map(|m| m.is_file()).unwrap_or(false),
                "isdir" => meta.map(|m| m.is_dir()).unwrap_or(false),
                "islink" => meta.map(|m| m.is_symlink()).unwrap_or(false),
                other => return Err(Error::request(format!("invalid path condition verb '{other}'"))),
            }
        }
        "changed" => {
            let name = words
                .first()
                .ok_or_else(|| Error::request("changed condition requires a task-name argument"))?;
            changed.get(*name).copied().unwrap_or(false)
                || changed
                    .iter()
                    .any(|(k, v)| *v && (k == name || k.ends_with(&format!(":{name}"))))
        }
        other => return Err(Error::request(format!("invalid condition type '{other}'"))),
    };

    Ok(if negate { !result } else { result })
}

fn require_no_args(words: &[&str], key: &str) -> Result<()> {
    if !words.is_empty() {
        return Err(Error::request(format!("invalid condition key '{key}'")));
    }
    Ok(())
}

fn require_null(value: &Value, key: &str) -> Result<()> {
    if !value.is_null() {
        return Err(Error::request(format!("condition '{key}' does not take a value")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_changes() -> HashMap<String, bool> {
        HashMap::new()
    }

    #[test]
    fn null_is_true() {
        assert!(evaluate(&Value::Null, &no_changes()).unwrap());
    }

    #[test]
    fn string_true_false_are_case_insensitive() {
        assert!(evaluate(&json!("TRUE"), &no_changes()).unwrap());
        assert!(!evaluate(&json!("False"), &no_changes()).unwrap());
    }

    #[test]
    fn list_requires_all_true() {
        assert!(evaluate(&json!([true, "true", null]), &no_changes()).unwrap());
        assert!(!evaluate(&json!([true, false]), &no_changes()).unwrap());
    }

    #[test]
    fn all_and_any_evaluate_sub_conditions() {
        assert!(evaluate(&json!({"all": [true, true]}), &no_changes()).unwrap());
        assert!(!evaluate(&json!({"all": [true, false]}), &no_changes()).unwrap());
        assert!(evaluate(&json!({"any": [false, true]}), &no_changes()).unwrap());
    }

    #[test]
    fn bare_not_negates_subcondition() {
        assert!(!evaluate(&json!({"not": true}), &no_changes()).unwrap());
        assert!(evaluate(&json!({"not": false}), &no_changes()).unwrap());
    }

    #[test]
    fn prefixed_not_negates_typed_condition() {
        assert!(!evaluate(&json!({"not true": null}), &no_changes()).unwrap());
    }

    #[test]
    fn cmd_checks_return_code_membership() {
        assert!(evaluate(&json!({"cmd": "exit 0"}), &no_changes()).unwrap());
        assert!(!evaluate(&json!({"cmd": "exit 1"}), &no_changes()).unwrap());
        assert!(evaluate(&json!({"cmd 0,1": "exit 1"}), &no_changes()).unwrap());
    }

    #[test]
    fn path_exists_checks_filesystem() {
        assert!(evaluate(&json!({"path exists": "/"}), &no_changes()).unwrap());
        assert!(!evaluate(&json!({"path exists": "/definitely/not/here"}), &no_changes()).unwrap());
    }

    #[test]
    fn changed_matches_exact_or_suffix() {
        let mut changed = HashMap::new();
        changed.insert("web:nginx".to_string(), true);
        assert!(evaluate(&json!({"changed nginx": null}), &changed).unwrap());
        assert!(evaluate(&json!({"changed web:nginx": null}), &changed).unwrap());
        assert!(!evaluate(&json!({"changed other": null}), &changed).unwrap());
    }

    #[test]
    fn changed_is_false_for_a_task_that_ran_without_changing() {
        let mut changed = HashMap::new();
        changed.insert("web:nginx".to_string(), false);
        assert!(!evaluate(&json!({"changed nginx": null}), &changed).unwrap());
    }
}
