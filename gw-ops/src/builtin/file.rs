use std::io::Write;
use std::path::PathBuf;

use crate::error::{OpError, Result};
use crate::operation::{required_string, AgentContext, Operation, OperationRegistry};
use crate::result::OpResult;

/// Idempotent file content sync: writes `content` to `path` if the
/// existing file's content differs, optionally setting the mode.
/// Grounded in `examples/original_source/redpepper/operations/file.py`'s
/// `Installed` operation (content/mode/owner management with a
/// hash-or-mtime comparison before rewriting).
pub struct Installed {
    path: PathBuf,
    content: String,
    mode: Option<u32>,
}

impl Installed {
    fn needs_write(&self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(existing) => existing != self.content,
            Err(_) => true,
        }
    }

    #[cfg(unix)]
    fn needs_mode_change(&self) -> bool {
        use std::os::unix::fs::PermissionsExt;
        let Some(mode) = self.mode else { return false };
        match std::fs::metadata(&self.path) {
            Ok(meta) => meta.permissions().mode() & 0o777 != mode,
            Err(_) => true,
        }
    }

    #[cfg(not(unix))]
    fn needs_mode_change(&self) -> bool {
        false
    }

    #[cfg(unix)]
    fn apply_mode(&self) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = self.mode {
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_mode(&self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Operation for Installed {
    fn type_name(&self) -> &'static str {
        "file.Installed"
    }

    fn test(&self, _ctx: &AgentContext) -> Result<bool> {
        Ok(!self.needs_write() && !self.needs_mode_change())
    }

    fn run(&self, _ctx: &AgentContext) -> Result<OpResult> {
        let mut changed = false;
        if self.needs_write() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut f = std::fs::File::create(&self.path)?;
            f.write_all(self.content.as_bytes())?;
            changed = true;
        }
        if self.needs_mode_change() {
            self.apply_mode()?;
            changed = true;
        }
        let output = if changed {
            format!("wrote {}", self.path.display())
        } else {
            format!("{} already up to date", self.path.display())
        };
        Ok(OpResult::success("file.Installed", output, changed))
    }

    fn ensure(&self, ctx: &AgentContext) -> Result<OpResult> {
        if self.test(ctx)? {
            Ok(OpResult::success(
                "file.Installed",
                format!("{} already up to date", self.path.display()),
                false,
            ))
        } else {
            self.run(ctx)
        }
    }
}

pub fn register(registry: &mut OperationRegistry) {
    registry.register("file.Installed", |args, kwargs| {
        let path = required_string(&args, &kwargs, "path")?;
        let content = kwargs
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let mode = kwargs
            .get("mode")
            .and_then(|v| {
                if let Some(s) = v.as_str() {
                    u32::from_str_radix(s, 8).ok()
                } else {
                    v.as_u64().map(|n| n as u32)
                }
            });
        if path.starts_with('.') || path.contains("..") {
            return Err(OpError::InvalidArgs(format!("unsafe path: {path}")));
        }
        Ok(Box::new(Installed {
            path: PathBuf::from(path),
            content,
            mode,
        }))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_new_content_and_reports_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        let op = Installed {
            path: path.clone(),
            content: "hello\n".into(),
            mode: None,
        };
        let ctx = AgentContext {
            agent_id: "a1".into(),
        };
        let result = op.ensure(&ctx).unwrap();
        assert!(result.changed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn unchanged_content_reports_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "same\n").unwrap();
        let op = Installed {
            path,
            content: "same\n".into(),
            mode: None,
        };
        let ctx = AgentContext {
            agent_id: "a1".into(),
        };
        let result = op.ensure(&ctx).unwrap();
        assert!(!result.changed);
    }
}
