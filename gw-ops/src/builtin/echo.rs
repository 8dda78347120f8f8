use crate::error::Result;
use crate::operation::{required_string, AgentContext, Operation, OperationRegistry};
use crate::result::OpResult;

/// Always reports changed; writes `message` to output. Grounded in
/// `examples/original_source/redpepper/operations/echo.py`.
pub struct Echo {
    message: String,
}

impl Operation for Echo {
    fn type_name(&self) -> &'static str {
        "echo.Echo"
    }

    fn test(&self, _ctx: &AgentContext) -> Result<bool> {
        Ok(false)
    }

    fn run(&self, _ctx: &AgentContext) -> Result<OpResult> {
        Ok(OpResult::success("echo.Echo", self.message.clone(), true))
    }
}

pub fn register(registry: &mut OperationRegistry) {
    registry.register("echo.Echo", |args, kwargs| {
        let message = required_string(&args, &kwargs, "message")?;
        Ok(Box::new(Echo { message }))
    });
}
