//! Session record
//!
//! Written once, by the first successful host or join, and read-only after.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Length of identifiers and client ids (UUID text form)
pub const ID_LEN: usize = 36;

/// Maximum session display name length, in characters
pub const NAME_MAX_LEN: usize = 64;

/// Snapshot of the session this client hosts or has joined.
///
/// `Default` is the "no session" record: no id, empty strings, zero counts,
/// an empty roster and an empty payload object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Option<String>,
    pub client_id: String,
    pub host_id: String,
    pub name: String,
    pub max_clients: i64,
    pub host_migration: bool,
    pub is_host: bool,
    pub is_private: bool,
    /// Participant list as sent by the server (JSON array)
    pub clients: Value,
    /// Arbitrary session payload (JSON object)
    pub payload: Value,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: None,
            client_id: String::new(),
            host_id: String::new(),
            name: String::new(),
            max_clients: 0,
            host_migration: false,
            is_host: false,
            is_private: false,
            clients: Value::Array(Vec::new()),
            payload: Value::Object(Map::new()),
        }
    }
}

impl Session {
    pub fn is_established(&self) -> bool {
        self.id.is_some()
    }

    /// Build a session from a host or join reply.
    ///
    /// `session` and a 36-character `clientId` are required. Optional fields
    /// that are missing or of the wrong type fall back to their defaults.
    pub fn from_reply(reply: &Map<String, Value>, is_host: bool) -> Result<Self> {
        let id = reply
            .get("session")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("Reply has no session id".into()))?;

        let client_id = reply
            .get("clientId")
            .and_then(Value::as_str)
            .filter(|c| c.chars().count() == ID_LEN)
            .ok_or_else(|| Error::Protocol("Reply has no valid clientId".into()))?;

        let host_id = reply
            .get("host")
            .and_then(Value::as_str)
            .unwrap_or(client_id);

        let name = reply
            .get("name")
            .and_then(Value::as_str)
            .map(|n| n.chars().take(NAME_MAX_LEN).collect())
            .unwrap_or_default();

        let clients = match reply.get("clients") {
            Some(v @ Value::Array(_)) => v.clone(),
            _ => Value::Array(Vec::new()),
        };

        let payload = match reply.get("payload") {
            Some(v @ Value::Object(_)) => v.clone(),
            _ => Value::Object(Map::new()),
        };

        Ok(Session {
            id: Some(id.to_string()),
            client_id: client_id.to_string(),
            host_id: host_id.to_string(),
            name,
            max_clients: reply.get("maxClients").and_then(Value::as_i64).unwrap_or(0),
            host_migration: bool_field(reply, "hostMigration"),
            is_host,
            is_private: bool_field(reply, "isPrivate"),
            clients,
            payload,
        })
    }
}

fn bool_field(reply: &Map<String, Value>, key: &str) -> bool {
    reply.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Result of a successful host or join
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReply {
    pub session_id: String,
    pub client_id: String,
    /// Copy of the session payload
    pub data: Value,
}

impl SessionReply {
    pub(crate) fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone().unwrap_or_default(),
            client_id: session.client_id.clone(),
            data: session.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CLIENT: &str = "c2438167-831b-4bf7-8bdc-0489eaf98e25";

    fn reply(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_default_is_empty() {
        let s = Session::default();
        assert!(!s.is_established());
        assert_eq!(s.clients, json!([]));
        assert_eq!(s.payload, json!({}));
        assert_eq!(s.max_clients, 0);
    }

    #[test]
    fn test_from_reply_full() {
        let s = Session::from_reply(
            &reply(json!({
                "cmd": "join",
                "session": "HU2J7D",
                "clientId": CLIENT,
                "host": "11111111-2222-3333-4444-555555555555",
                "name": "My session",
                "maxClients": 4,
                "hostMigration": true,
                "isPrivate": true,
                "clients": ["a", "b"],
                "payload": {"map": "forest"}
            })),
            false,
        )
        .unwrap();

        assert_eq!(s.id.as_deref(), Some("HU2J7D"));
        assert_eq!(s.client_id, CLIENT);
        assert_eq!(s.host_id, "11111111-2222-3333-4444-555555555555");
        assert_eq!(s.name, "My session");
        assert_eq!(s.max_clients, 4);
        assert!(s.host_migration);
        assert!(s.is_private);
        assert!(!s.is_host);
        assert_eq!(s.clients, json!(["a", "b"]));
        assert_eq!(s.payload["map"], "forest");
    }

    #[test]
    fn test_from_reply_defaults_wrong_types() {
        let s = Session::from_reply(
            &reply(json!({
                "session": "ABC123",
                "clientId": CLIENT,
                "name": 5,
                "maxClients": "four",
                "hostMigration": "yes",
                "clients": {},
                "payload": []
            })),
            true,
        )
        .unwrap();

        assert!(s.is_host);
        assert_eq!(s.host_id, CLIENT);
        assert_eq!(s.name, "");
        assert_eq!(s.max_clients, 0);
        assert!(!s.host_migration);
        assert_eq!(s.clients, json!([]));
        assert_eq!(s.payload, json!({}));
    }

    #[test]
    fn test_from_reply_requires_session_and_client_id() {
        assert!(Session::from_reply(&reply(json!({"clientId": CLIENT})), true).is_err());
        assert!(Session::from_reply(&reply(json!({"session": "A", "clientId": "short"})), true).is_err());
        assert!(Session::from_reply(&reply(json!({"session": 1, "clientId": CLIENT})), true).is_err());
    }

    #[test]
    fn test_name_is_bounded() {
        let long = "n".repeat(NAME_MAX_LEN + 10);
        let s = Session::from_reply(
            &reply(json!({"session": "A", "clientId": CLIENT, "name": long})),
            true,
        )
        .unwrap();
        assert_eq!(s.name.chars().count(), NAME_MAX_LEN);
    }
}
