pub mod agent_id;
pub mod config;
pub mod error;
pub mod events;
pub mod tls;

pub use error::{Error, Result};
