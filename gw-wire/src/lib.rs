pub mod connection;
pub mod framing;
pub mod message;
pub mod rpc;
pub mod slot;

pub use connection::Connection;
pub use message::{
    AgentHello, Bye, ManagerHello, Message, Notification, Ping, Pong, Request, Response,
};
pub use rpc::{PendingCall, Rpc};
pub use slot::Slot;

/// Protocol version advertised in `AgentHello`/`ManagerHello`. Major
/// version mismatches refuse the connection (§4.2); minor mismatches warn
/// and proceed.
pub const PROTOCOL_VERSION: &str = "1.0";

pub fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.splitn(2, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_minor() {
        assert_eq!(parse_major_minor("1.0"), Some((1, 0)));
        assert_eq!(parse_major_minor("2.3"), Some((2, 3)));
        assert_eq!(parse_major_minor("garbage"), None);
    }
}
