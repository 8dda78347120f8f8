pub mod builtin;
pub mod condition;
pub mod error;
pub mod operation;
pub mod result;
pub mod walker;

pub use error::OpError;
pub use operation::{AgentContext, Operation, OperationRegistry};
pub use result::OpResult;
pub use walker::run_state;
