use std::process::Command as ProcessCommand;

use crate::error::{OpError, Result};
use crate::operation::{required_string, AgentContext, Operation, OperationRegistry};
use crate::result::OpResult;

/// Runs a shell command. Has no natural `test`, so `ensure` always
/// invokes `run`. Grounded in
/// `examples/original_source/redpepper/operations/command.py`.
pub struct Run {
    command: String,
    shell: String,
}

impl Operation for Run {
    fn type_name(&self) -> &'static str {
        "command.Run"
    }

    fn test(&self, _ctx: &AgentContext) -> Result<bool> {
        Ok(false)
    }

    fn run(&self, _ctx: &AgentContext) -> Result<OpResult> {
        let output = ProcessCommand::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .output()
            .map_err(|e| OpError::ExecutionFailed(format!("spawning {}: {e}", self.shell)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
        }

        if output.status.success() {
            Ok(OpResult::success("command.Run", combined, true))
        } else {
            let code = output.status.code().unwrap_or(-1);
            Ok(OpResult::failure(
                "command.Run",
                format!("exit code {code}: {combined}"),
            ))
        }
    }
}

pub fn register(registry: &mut OperationRegistry) {
    registry.register("command.Run", |args, kwargs| {
        let command = required_string(&args, &kwargs, "command")?;
        let shell = kwargs
            .get("shell")
            .and_then(|v| v.as_str())
            .unwrap_or("/bin/sh")
            .to_string();
        Ok(Box::new(Run { command, shell }))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_reports_changed_and_output() {
        let op = Run {
            command: "echo hello".into(),
            shell: "/bin/sh".into(),
        };
        let ctx = AgentContext {
            agent_id: "a1".into(),
        };
        let result = op.ensure(&ctx).unwrap();
        assert!(result.succeeded);
        assert!(result.changed);
        assert_eq!(result.output.trim(), "hello");
    }

    #[test]
    fn failing_command_reports_not_succeeded() {
        let op = Run {
            command: "exit 3".into(),
            shell: "/bin/sh".into(),
        };
        let ctx = AgentContext {
            agent_id: "a1".into(),
        };
        let result = op.ensure(&ctx).unwrap();
        assert!(!result.succeeded);
        assert!(result.output.contains("exit code 3"));
    }
}
