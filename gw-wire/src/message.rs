//! Wire message types: a tagged union discriminated by an integer `t`
//! field, per the data model (§3) and transport framing (§4.1).
//!
//! Grounded in `examples/original_source/src/common/redpepper/common/messages.py`
//! (Pydantic models with `Literal[t]` discriminants dispatched via
//! `TypeAdapter(..., discriminator="t")`) and in the tagged-enum style of
//! `examples/localplatform-homeroute/crates/hr-registry/src/protocol.rs`
//! (`#[serde(tag = "type")]` enums with per-variant rename). Serde's
//! built-in internally-tagged enum support only emits the tag as the
//! variant's *name* (a string); this spec requires a literal integer
//! discriminant, so `Message` carries a manual `Serialize`/`Deserialize`
//! pair that peeks the `t` field through `rmpv::Value` before dispatching
//! to the concrete per-variant struct via `rmpv::ext::from_value`.

use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap as Map;

pub const T_AGENT_HELLO: u8 = 10;
pub const T_MANAGER_HELLO: u8 = 11;
pub const T_PING: u8 = 12;
pub const T_PONG: u8 = 13;
pub const T_BYE: u8 = 14;
pub const T_REQUEST: u8 = 20;
pub const T_RESPONSE: u8 = 21;
pub const T_NOTIFICATION: u8 = 22;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHello {
    pub t: u8,
    pub id: String,
    pub version: String,
    pub credentials: String,
}

impl AgentHello {
    pub fn new(id: impl Into<String>, version: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            t: T_AGENT_HELLO,
            id: id.into(),
            version: version.into(),
            credentials: credentials.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerHello {
    pub t: u8,
    pub version: String,
}

impl ManagerHello {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            t: T_MANAGER_HELLO,
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub t: u8,
    pub data: i64,
}

impl Ping {
    pub fn new(data: i64) -> Self {
        Self { t: T_PING, data }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub t: u8,
    pub data: i64,
}

impl Pong {
    pub fn new(data: i64) -> Self {
        Self { t: T_PONG, data }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bye {
    pub t: u8,
    pub reason: String,
}

impl Bye {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            t: T_BYE,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub t: u8,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            t: T_REQUEST,
            id: id.into(),
            method: method.into(),
            args,
            kwargs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub t: u8,
    pub id: String,
    pub success: bool,
    pub data: Value,
}

impl Response {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self {
            t: T_RESPONSE,
            id: id.into(),
            success: true,
            data,
        }
    }

    pub fn err(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            t: T_RESPONSE,
            id: id.into(),
            success: false,
            data: Value::String(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub t: u8,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl Notification {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            t: T_NOTIFICATION,
            kind: kind.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    AgentHello(AgentHello),
    ManagerHello(ManagerHello),
    Ping(Ping),
    Pong(Pong),
    Bye(Bye),
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    pub fn type_code(&self) -> u8 {
        match self {
            Message::AgentHello(_) => T_AGENT_HELLO,
            Message::ManagerHello(_) => T_MANAGER_HELLO,
            Message::Ping(_) => T_PING,
            Message::Pong(_) => T_PONG,
            Message::Bye(_) => T_BYE,
            Message::Request(_) => T_REQUEST,
            Message::Response(_) => T_RESPONSE,
            Message::Notification(_) => T_NOTIFICATION,
        }
    }
}

impl From<AgentHello> for Message {
    fn from(v: AgentHello) -> Self {
        Message::AgentHello(v)
    }
}
impl From<ManagerHello> for Message {
    fn from(v: ManagerHello) -> Self {
        Message::ManagerHello(v)
    }
}
impl From<Ping> for Message {
    fn from(v: Ping) -> Self {
        Message::Ping(v)
    }
}
impl From<Pong> for Message {
    fn from(v: Pong) -> Self {
        Message::Pong(v)
    }
}
impl From<Bye> for Message {
    fn from(v: Bye) -> Self {
        Message::Bye(v)
    }
}
impl From<Request> for Message {
    fn from(v: Request) -> Self {
        Message::Request(v)
    }
}
impl From<Response> for Message {
    fn from(v: Response) -> Self {
        Message::Response(v)
    }
}
impl From<Notification> for Message {
    fn from(v: Notification) -> Self {
        Message::Notification(v)
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Message::AgentHello(m) => m.serialize(serializer),
            Message::ManagerHello(m) => m.serialize(serializer),
            Message::Ping(m) => m.serialize(serializer),
            Message::Pong(m) => m.serialize(serializer),
            Message::Bye(m) => m.serialize(serializer),
            Message::Request(m) => m.serialize(serializer),
            Message::Response(m) => m.serialize(serializer),
            Message::Notification(m) => m.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = rmpv::Value::deserialize(deserializer)?;
        let t = value
            .as_map()
            .and_then(|entries| {
                entries.iter().find_map(|(k, v)| {
                    if k.as_str() == Some("t") {
                        v.as_u64()
                    } else {
                        None
                    }
                })
            })
            .ok_or_else(|| D::Error::custom("message missing integer `t` field"))?;

        macro_rules! decode {
            ($variant:ident, $ty:ty) => {
                rmpv::ext::from_value::<$ty>(value)
                    .map(Message::$variant)
                    .map_err(|e| D::Error::custom(format!("decoding t={t}: {e}")))
            };
        }

        match t as u8 {
            T_AGENT_HELLO => decode!(AgentHello, AgentHello),
            T_MANAGER_HELLO => decode!(ManagerHello, ManagerHello),
            T_PING => decode!(Ping, Ping),
            T_PONG => decode!(Pong, Pong),
            T_BYE => decode!(Bye, Bye),
            T_REQUEST => decode!(Request, Request),
            T_RESPONSE => decode!(Response, Response),
            T_NOTIFICATION => decode!(Notification, Notification),
            other => Err(D::Error::custom(format!("unknown message type t={other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        let decoded: Message = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn round_trips_every_variant() {
        round_trip(Message::AgentHello(AgentHello::new("a1", "1.0", "secret")));
        round_trip(Message::ManagerHello(ManagerHello::new("1.0")));
        round_trip(Message::Ping(Ping::new(42)));
        round_trip(Message::Pong(Pong::new(42)));
        round_trip(Message::Bye(Bye::new("bye")));
        round_trip(Message::Request(Request::new(
            "abc123",
            "echo.Echo",
            vec![Value::String("hi".into())],
            Map::new(),
        )));
        round_trip(Message::Response(Response::ok("abc123", Value::Bool(true))));
        round_trip(Message::Response(Response::err("abc123", "nope")));
        round_trip(Message::Notification(Notification::new(
            "command_result",
            serde_json::json!({"id": "abc123", "success": true}),
        )));
    }

    #[test]
    fn rejects_unknown_type_code() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("t".to_string(), Value::from(99));
        let bytes = rmp_serde::to_vec_named(&map).unwrap();
        let err = rmp_serde::from_slice::<Message>(&bytes).unwrap_err();
        assert!(err.to_string().contains("unknown message type"));
    }

    #[test]
    fn type_code_matches_constant() {
        assert_eq!(Message::Ping(Ping::new(1)).type_code(), T_PING);
        assert_eq!(Message::Bye(Bye::new("x")).type_code(), T_BYE);
    }
}
