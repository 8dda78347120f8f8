//! The `Result` value produced by running an operation or a state.
//!
//! Grounded in `examples/original_source/redpepper/operations/__init__.py`'s
//! `Result` class: monotonic failure, line-appended output, and an
//! `update()` that composes a child result into a parent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpResult {
    pub name: String,
    pub output: String,
    pub changed: bool,
    pub succeeded: bool,
}

impl OpResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: String::new(),
            changed: false,
            succeeded: true,
        }
    }

    pub fn success(name: impl Into<String>, output: impl Into<String>, changed: bool) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            changed,
            succeeded: true,
        }
    }

    pub fn failure(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            changed: false,
            succeeded: false,
        }
    }

    pub fn add_line(&mut self, line: impl AsRef<str>) {
        if !self.output.is_empty() {
            self.output.push('\n');
        }
        self.output.push_str(line.as_ref());
    }

    /// Compose `other` into `self`: output grows by line, `changed` is
    /// ORed, `succeeded` is ANDed — once false it stays false. When
    /// `raw_output` is false each appended line is prefixed with the
    /// child's name so a state's combined output reads like a log;
    /// `raw_output = true` appends the child's output unprefixed (used
    /// when the child IS the thing being reported, e.g. a single
    /// top-level operation dispatch).
    pub fn update(&mut self, other: &OpResult, raw_output: bool) {
        if raw_output {
            self.add_line(&other.output);
        } else {
            for line in other.output.lines() {
                self.add_line(format!("[{}] {}", other.name, line));
            }
            if other.output.is_empty() {
                self.add_line(format!("[{}] (no output)", other.name));
            }
        }
        self.changed = self.changed || other.changed;
        self.succeeded = self.succeeded && other.succeeded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_ors_changed_and_ands_succeeded() {
        let mut parent = OpResult::success("state", "", false);
        parent.update(&OpResult::success("a", "did a thing", true), false);
        assert!(parent.changed);
        assert!(parent.succeeded);

        parent.update(&OpResult::failure("b", "broke"), false);
        assert!(!parent.succeeded);

        // Once failed, a later success must not un-fail the parent.
        parent.update(&OpResult::success("c", "fine", false), false);
        assert!(!parent.succeeded);
    }

    #[test]
    fn raw_output_appends_without_name_prefix() {
        let mut parent = OpResult::new("op");
        parent.update(&OpResult::success("child", "hello", false), true);
        assert_eq!(parent.output, "hello");
    }

    #[test]
    fn non_raw_output_prefixes_each_line_with_child_name() {
        let mut parent = OpResult::new("state");
        parent.update(&OpResult::success("a:b", "line1\nline2", false), false);
        assert_eq!(parent.output, "[a:b] line1\n[a:b] line2");
    }
}
