use std::process::Command as ProcessCommand;

use crate::error::{OpError, Result};
use crate::operation::{required_string, AgentContext, Operation, OperationRegistry};
use crate::result::OpResult;

/// Linux systemd unit start/stop, `test` based on `systemctl is-active`.
/// Grounded in `examples/original_source/redpepper/operations/service.py`.
pub struct Running {
    unit: String,
    desired_active: bool,
}

fn is_active(unit: &str) -> Result<bool> {
    let output = ProcessCommand::new("systemctl")
        .arg("is-active")
        .arg("--quiet")
        .arg(unit)
        .status()
        .map_err(|e| OpError::ExecutionFailed(format!("running systemctl: {e}")))?;
    Ok(output.success())
}

impl Operation for Running {
    fn type_name(&self) -> &'static str {
        if self.desired_active {
            "service.Running"
        } else {
            "service.Stopped"
        }
    }

    fn test(&self, _ctx: &AgentContext) -> Result<bool> {
        Ok(is_active(&self.unit)? == self.desired_active)
    }

    fn run(&self, _ctx: &AgentContext) -> Result<OpResult> {
        let verb = if self.desired_active { "start" } else { "stop" };
        let status = ProcessCommand::new("systemctl")
            .arg(verb)
            .arg(&self.unit)
            .status()
            .map_err(|e| OpError::ExecutionFailed(format!("running systemctl {verb}: {e}")))?;
        if status.success() {
            Ok(OpResult::success(
                self.type_name(),
                format!("{} {}", self.unit, verb),
                true,
            ))
        } else {
            Ok(OpResult::failure(
                self.type_name(),
                format!("systemctl {verb} {} failed", self.unit),
            ))
        }
    }
}

pub fn register(registry: &mut OperationRegistry) {
    registry.register("service.Running", |args, kwargs| {
        let unit = required_string(&args, &kwargs, "name")?;
        Ok(Box::new(Running {
            unit,
            desired_active: true,
        }))
    });
    registry.register("service.Stopped", |args, kwargs| {
        let unit = required_string(&args, &kwargs, "name")?;
        Ok(Box::new(Running {
            unit,
            desired_active: false,
        }))
    });
}
