use std::process::Command as ProcessCommand;

use crate::error::{OpError, Result};
use crate::operation::{required_string, AgentContext, Operation, OperationRegistry};
use crate::result::OpResult;

/// Debian/`apt` package presence check and install. Grounded in
/// `examples/original_source/redpepper/operations/package.py`'s
/// platform-dispatch stub — this port targets the `apt` backend only,
/// since the runtime has no platform-detection layer of its own.
pub struct Installed {
    name: String,
}

fn is_installed(name: &str) -> Result<bool> {
    let status = ProcessCommand::new("dpkg-query")
        .arg("-W")
        .arg("-f=${Status}")
        .arg(name)
        .output()
        .map_err(|e| OpError::ExecutionFailed(format!("running dpkg-query: {e}")))?;
    Ok(status.status.success()
        && String::from_utf8_lossy(&status.stdout).contains("install ok installed"))
}

impl Operation for Installed {
    fn type_name(&self) -> &'static str {
        "package.Installed"
    }

    fn test(&self, _ctx: &AgentContext) -> Result<bool> {
        is_installed(&self.name)
    }

    fn run(&self, _ctx: &AgentContext) -> Result<OpResult> {
        let status = ProcessCommand::new("apt-get")
            .arg("install")
            .arg("-y")
            .arg(&self.name)
            .status()
            .map_err(|e| OpError::ExecutionFailed(format!("running apt-get install: {e}")))?;
        if status.success() {
            Ok(OpResult::success(
                "package.Installed",
                format!("installed {}", self.name),
                true,
            ))
        } else {
            Ok(OpResult::failure(
                "package.Installed",
                format!("apt-get install {} failed", self.name),
            ))
        }
    }
}

pub fn register(registry: &mut OperationRegistry) {
    registry.register("package.Installed", |args, kwargs| {
        let name = required_string(&args, &kwargs, "name")?;
        Ok(Box::new(Installed { name }))
    });
}
