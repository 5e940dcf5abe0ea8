//! Session roster tracking
//!
//! Keeps the set of participants current from push events so the demo can
//! print join and leave notices.

use std::sync::{Mutex, PoisonError};

use mpapi_net::{EventKind, PushEvent, Session};
use serde_json::Value;

/// Known participants of the current session
#[derive(Debug, Default)]
pub struct Roster {
    members: Mutex<Vec<String>>,
}

impl Roster {
    /// Merge the session's client list and our own id into the roster
    pub fn seed(&self, session: &Session) {
        let mut members = self.members.lock().unwrap_or_else(PoisonError::into_inner);

        let listed = session.clients.as_array().into_iter().flatten();
        for id in listed
            .filter_map(Value::as_str)
            .chain(std::iter::once(session.client_id.as_str()))
        {
            if !id.is_empty() && !members.iter().any(|m| m == id) {
                members.push(id.to_string());
            }
        }
    }

    pub fn members(&self) -> Vec<String> {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Update from a push event and describe the change, if any
    pub fn apply(&self, event: &PushEvent) -> Option<String> {
        let mut members = self.members.lock().unwrap_or_else(PoisonError::into_inner);

        match event.kind {
            EventKind::Joined => {
                let id = event.client_id.clone()?;
                if members.contains(&id) {
                    return None;
                }
                members.push(id.clone());
                Some(format!("{} joined ({} in session)", id, members.len()))
            }
            EventKind::Leaved | EventKind::Left => {
                let id = event.client_id.as_deref()?;
                let before = members.len();
                members.retain(|m| m != id);
                (members.len() != before)
                    .then(|| format!("{} left ({} in session)", id, members.len()))
            }
            EventKind::Closed => {
                members.clear();
                let reason = event
                    .data
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Some(format!("Session closed: {}", reason))
            }
            EventKind::Game => None,
        }
    }
}
