use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds per the connection/RPC/command design.
///
/// `Protocol` and `Authentication` close the connection and never propagate
/// to an RPC caller. `Rpc` and `Request` are public and cross the wire as a
/// failed `Response`. `Internal` is logged and only surfaced to the peer
/// when `expose_error_info` is set for that direction.
#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("request error: {0}")]
    Request(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("connection closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True if this error's text is always safe to send to the peer.
    /// Everything else is redacted unless `expose_error_info` is on for
    /// that direction (Agent->Manager yes, Manager->Agent no by default).
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Request(_))
    }
}
