//! TCP client for a session relay server
//!
//! One client owns one connection and at most one session. Commands are
//! request/reply exchanges on the caller's task until a session is
//! established; from then on a background receiver task owns all reads and
//! turns server pushes into listener callbacks.
//!
//! State: `Created` (no socket) -> `Connected` (socket, no session) ->
//! `SessionEstablished` (session set, receiver running). [`Client::shutdown`]
//! consumes the client from any state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{ClientConfig, DEFAULT_HOST};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::frame::{read_line, write_line};
use crate::listener::{Listener, ListenerId, ListenerRegistry};
use crate::protocol::{parse_list, parse_reply, rejection_reason, Command, Envelope};
use crate::receiver::{self, ReceiverHandle};
use crate::session::{Session, SessionReply, ID_LEN};
use crate::stats::{TrafficCounters, TrafficStats};

/// Lifecycle state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Connected,
    SessionEstablished,
}

/// Client handle for a single relay connection
pub struct Client {
    identifier: String,
    connection: Connection,
    session: Session,
    listeners: ListenerRegistry,
    receiver: Option<ReceiverHandle>,
    stats: Arc<TrafficCounters>,
    debug: Arc<AtomicBool>,
}

impl Client {
    /// Create a client. No connection is made until the first command.
    ///
    /// Fails with [`Error::Argument`] unless `identifier` is exactly 36
    /// characters. An empty `host` means [`DEFAULT_HOST`].
    pub fn new(host: impl Into<String>, port: u16, identifier: &str) -> Result<Self> {
        let len = identifier.chars().count();
        if len != ID_LEN {
            return Err(Error::Argument(format!(
                "Identifier must be {} characters, got {}",
                ID_LEN, len
            )));
        }

        let mut host = host.into();
        if host.is_empty() {
            host = DEFAULT_HOST.to_string();
        }

        Ok(Client {
            identifier: identifier.to_string(),
            connection: Connection::new(host, port),
            session: Session::default(),
            listeners: ListenerRegistry::new(),
            receiver: None,
            stats: Arc::new(TrafficCounters::default()),
            debug: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = Self::new(config.host.clone(), config.port, &config.identifier)?;
        client.set_debug(config.debug);
        Ok(client)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Toggle logging of raw wire traffic
    pub fn set_debug(&self, enable: bool) {
        self.debug.store(enable, Ordering::Relaxed);
    }

    pub fn state(&self) -> ClientState {
        if self.session.is_established() {
            ClientState::SessionEstablished
        } else if self.connection.is_connected() {
            ClientState::Connected
        } else {
            ClientState::Created
        }
    }

    /// Host a new session.
    ///
    /// `data` is copied into the request; non-object data is sent as `{}`.
    pub async fn host(&mut self, data: Option<&Value>) -> Result<SessionReply> {
        self.require_no_session()?;

        let reply = self.exchange(Command::Host, None, data).await?;
        self.establish(&reply, true)
    }

    /// Join an existing session by its code.
    ///
    /// A server refusal is reported as [`Error::Rejected`] and leaves the
    /// client without a session.
    pub async fn join(&mut self, session_id: &str, data: Option<&Value>) -> Result<SessionReply> {
        if session_id.is_empty() {
            return Err(Error::Argument("Session id is empty".into()));
        }
        self.require_no_session()?;

        let reply = self.exchange(Command::Join, Some(session_id), data).await?;

        if let Some(reason) = rejection_reason(&reply) {
            warn!(session_id = %session_id, reason = %reason, "Join rejected");
            return Err(Error::Rejected(reason));
        }

        self.establish(&reply, false)
    }

    /// Fetch the public sessions for this identifier.
    ///
    /// Only possible before a session is established; afterwards replies
    /// would arrive on the receiver task.
    pub async fn list(&mut self) -> Result<Vec<Value>> {
        if self.receiver.is_some() {
            return Err(Error::State(
                "Cannot list while a session is established".into(),
            ));
        }

        let reply = self.exchange(Command::List, None, None).await?;
        parse_list(&reply)
    }

    /// Send a game message to the session, or to one client if
    /// `destination` is set. Returns once the line is written; no reply is
    /// awaited.
    pub async fn game(&mut self, data: &Value, destination: Option<&str>) -> Result<()> {
        let Some(session_id) = self.session.id.as_deref() else {
            return Err(Error::State("No session established".into()));
        };

        let envelope = Envelope::new(&self.identifier, Command::Game, Some(data))
            .with_session(session_id)
            .with_destination(destination);

        let debug = self.debug.load(Ordering::Relaxed);
        let writer = self.connection.writer_mut()?;
        let n = write_line(writer, &envelope, debug).await?;
        self.stats.record_tx(n);
        Ok(())
    }

    /// Register a push event listener
    pub fn listen<L>(&self, listener: L) -> ListenerId
    where
        L: Listener + 'static,
    {
        self.listeners.listen(listener)
    }

    /// Remove a listener. Returns false if the id is unknown.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.unlisten(id)
    }

    /// Shared handle to the listener registry, usable from inside callbacks
    pub fn listeners(&self) -> ListenerRegistry {
        self.listeners.clone()
    }

    /// Independent copy of the session record (default if none)
    pub fn session_info(&self) -> Session {
        self.session.clone()
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats.snapshot()
    }

    /// Whether the receiver task is still delivering events
    pub fn is_receiving(&self) -> bool {
        self.receiver.as_ref().is_some_and(ReceiverHandle::is_running)
    }

    /// Close the connection, wait for the receiver task to exit and drop all
    /// listeners.
    pub async fn shutdown(mut self) {
        self.connection.shutdown().await;
        if let Some(receiver) = self.receiver.take() {
            receiver.shutdown().await;
        }
        self.listeners.clear();
        info!("Client shut down");
    }

    fn require_no_session(&self) -> Result<()> {
        if self.session.is_established() {
            return Err(Error::State("Session already established".into()));
        }
        Ok(())
    }

    /// Send one command and wait for its reply
    async fn exchange(
        &mut self,
        cmd: Command,
        session: Option<&str>,
        data: Option<&Value>,
    ) -> Result<Map<String, Value>> {
        self.connection.ensure_connected().await?;

        let debug = self.debug.load(Ordering::Relaxed);
        let mut envelope = Envelope::new(&self.identifier, cmd, data);
        envelope.session = session;

        let n = write_line(self.connection.writer_mut()?, &envelope, debug).await?;
        self.stats.record_tx(n);

        let line = read_line(self.connection.reader_mut()?, debug).await?;
        self.stats.record_rx(line.len() + 1);

        parse_reply(&line, cmd)
    }

    fn establish(&mut self, reply: &Map<String, Value>, is_host: bool) -> Result<SessionReply> {
        let session = Session::from_reply(reply, is_host)?;
        let result = SessionReply::from_session(&session);

        info!(
            session_id = %result.session_id,
            client_id = %result.client_id,
            is_host = is_host,
            "Session established"
        );

        self.session = session;
        self.start_receiver()?;
        Ok(result)
    }

    fn start_receiver(&mut self) -> Result<()> {
        if self.receiver.is_some() {
            return Ok(());
        }

        let reader = self
            .connection
            .take_reader()
            .ok_or_else(|| Error::State("Connection has no reader".into()))?;

        self.receiver = Some(receiver::spawn(
            reader,
            self.listeners.clone(),
            self.stats.clone(),
            self.debug.clone(),
        ));
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Listeners may hold registry clones; clearing breaks the cycle
        self.listeners.clear();
    }
}
