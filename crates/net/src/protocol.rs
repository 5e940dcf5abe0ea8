//! Network protocol message types
//!
//! Requests are typed envelopes serialized as one compact JSON line.
//! Replies and push events arrive as loosely-typed JSON: the server omits
//! optional fields freely, so they are read field by field from a
//! [`serde_json::Map`] instead of being deserialized into strict structs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Request command name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Host,
    Join,
    List,
    Game,
    Leave,
}

impl Command {
    pub fn from_cmd(cmd: &str) -> Option<Self> {
        match cmd {
            "host" => Some(Command::Host),
            "join" => Some(Command::Join),
            "list" => Some(Command::List),
            "game" => Some(Command::Game),
            "leave" => Some(Command::Leave),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Host => "host",
            Command::Join => "join",
            Command::List => "list",
            Command::Game => "game",
            Command::Leave => "leave",
        }
    }
}

/// Request envelope sent by the client
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<'a> {
    pub identifier: &'a str,
    pub cmd: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<&'a str>,
    pub data: Value,
}

impl<'a> Envelope<'a> {
    pub fn new(identifier: &'a str, cmd: Command, data: Option<&Value>) -> Self {
        Self {
            identifier,
            cmd,
            session: None,
            destination: None,
            data: object_or_empty(data),
        }
    }

    pub fn with_session(mut self, session: &'a str) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_destination(mut self, destination: Option<&'a str>) -> Self {
        self.destination = destination;
        self
    }
}

/// Deep copy of `data` when it is an object, a fresh empty object otherwise
pub fn object_or_empty(data: Option<&Value>) -> Value {
    match data {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Object(Map::new()),
    }
}

/// Parse a command reply and check that it echoes `expected`.
pub fn parse_reply(line: &[u8], expected: Command) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))?;

    let Value::Object(reply) = value else {
        return Err(Error::Protocol("Reply is not an object".into()));
    };

    match reply.get("cmd").and_then(Value::as_str) {
        Some(cmd) if cmd == expected.as_str() => Ok(reply),
        Some(cmd) => Err(Error::Protocol(format!(
            "Expected '{}' reply, got '{}'",
            expected.as_str(),
            cmd
        ))),
        None => Err(Error::Protocol("Reply has no cmd".into())),
    }
}

/// Extract `data.list` from a list reply
pub fn parse_list(reply: &Map<String, Value>) -> Result<Vec<Value>> {
    reply
        .get("data")
        .and_then(Value::as_object)
        .and_then(|data| data.get("list"))
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| Error::Protocol("List reply has no data.list array".into()))
}

/// Reason the server declined a join, if it did.
///
/// An `error` key of any type counts. So does `data.status == "error"`, which
/// is how the relay reports a full session or a bad session code.
pub fn rejection_reason(reply: &Map<String, Value>) -> Option<String> {
    if let Some(err) = reply.get("error") {
        return Some(match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }

    let data = reply.get("data")?.as_object()?;
    if data.get("status").and_then(Value::as_str) != Some("error") {
        return None;
    }

    Some(
        data.get("reason")
            .and_then(Value::as_str)
            .unwrap_or("rejected")
            .to_string(),
    )
}

/// Kind of server push event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A participant joined the session
    Joined,
    /// A participant left (legacy spelling)
    Leaved,
    /// A participant left
    Left,
    /// The session was closed by the server
    Closed,
    /// Relayed game message
    Game,
}

impl EventKind {
    pub fn from_cmd(cmd: &str) -> Option<Self> {
        match cmd {
            "joined" => Some(EventKind::Joined),
            "leaved" => Some(EventKind::Leaved),
            "left" => Some(EventKind::Left),
            "closed" => Some(EventKind::Closed),
            "game" => Some(EventKind::Game),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Joined => "joined",
            EventKind::Leaved => "leaved",
            EventKind::Left => "left",
            EventKind::Closed => "closed",
            EventKind::Game => "game",
        }
    }
}

/// Message pushed by the server outside the request/reply cycle
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub kind: EventKind,
    /// Sequential id assigned by the server, 0 if absent
    pub message_id: i64,
    /// Sender's client id
    pub client_id: Option<String>,
    pub data: Map<String, Value>,
}

impl PushEvent {
    /// Classify a received line. Anything that is not a recognised push
    /// event yields `None`.
    pub fn classify(line: &[u8]) -> Option<Self> {
        let Ok(Value::Object(mut root)) = serde_json::from_slice::<Value>(line) else {
            return None;
        };

        let kind = root
            .get("cmd")
            .and_then(Value::as_str)
            .and_then(EventKind::from_cmd)?;

        let message_id = root
            .get("messageId")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let client_id = root
            .get("clientId")
            .and_then(Value::as_str)
            .map(str::to_string);

        let data = match root.remove("data") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Some(PushEvent {
            kind,
            message_id,
            client_id,
            data,
        })
    }

    pub fn is_participant_left(&self) -> bool {
        matches!(self.kind, EventKind::Leaved | EventKind::Left)
    }
}
