use thiserror::Error;

pub type Result<T> = std::result::Result<T, OpError>;

/// Operation construction/execution failures. These are captured into an
/// `OpResult` (`succeeded = false`) by the command runtime — per §7,
/// `OperationFailure` never crosses the RPC boundary as a raised error.
#[derive(Error, Debug)]
pub enum OpError {
    #[error("unknown operation type: {0}")]
    UnknownType(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
