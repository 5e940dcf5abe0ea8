//! Embeddable relay server
//!
//! Speaks the same newline-delimited JSON protocol as [`Client`](crate::Client).
//! Every connection gets a fresh client id, a read loop, and a writer task
//! fed through a channel. Sessions are keyed by a six-character code.
//!
//! State changes happen under one lock; the messages they produce are
//! collected in an [`Outbox`] and delivered after the lock is released, so a
//! slow peer applies backpressure to its senders instead of losing messages.
//!
//! When the host of a `hostMigration` session disconnects, the `left` event
//! sent to the remaining members carries the new host's id in `data.host`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use serde_json::{json, Map, Value};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::frame::{write_line, LineFramer};
use crate::protocol::Command;

/// Alphabet for session codes
const SESSION_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a session code
const SESSION_CODE_LEN: usize = 6;

/// Outgoing queue depth per peer
const PEER_QUEUE: usize = 64;

/// Connected peer
struct Peer {
    tx: mpsc::Sender<Value>,
    session_id: Option<String>,
}

/// A hosted session
struct RelaySession {
    identifier: String,
    name: String,
    is_private: bool,
    max_clients: i64,
    host_migration: bool,
    payload: Value,
    host: Uuid,
    members: Vec<Uuid>,
    next_message_id: i64,
}

impl RelaySession {
    fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(Uuid::to_string).collect()
    }
}

/// Server state shared across connection tasks
#[derive(Default)]
struct RelayState {
    peers: HashMap<Uuid, Peer>,
    sessions: HashMap<String, RelaySession>,
}

/// Messages produced under the state lock, delivered once it is released
#[derive(Default)]
struct Outbox {
    queued: Vec<(Uuid, mpsc::Sender<Value>, Value)>,
}

impl Outbox {
    fn send(&mut self, peers: &HashMap<Uuid, Peer>, to: Uuid, msg: &Value) {
        if let Some(peer) = peers.get(&to) {
            self.queued.push((to, peer.tx.clone(), msg.clone()));
        }
    }

    fn send_all(&mut self, peers: &HashMap<Uuid, Peer>, to: &[Uuid], msg: &Value) {
        for &id in to {
            self.send(peers, id, msg);
        }
    }

    /// Deliver in order, waiting for room in each peer's queue
    async fn flush(self) {
        for (to, tx, msg) in self.queued {
            if tx.send(msg).await.is_err() {
                debug!(client_id = %to, "Peer gone, message dropped");
            }
        }
    }
}

impl RelayState {
    fn generate_session_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..SESSION_CODE_LEN)
                .map(|_| SESSION_CODE_CHARS[rng.gen_range(0..SESSION_CODE_CHARS.len())] as char)
                .collect();
            if !self.sessions.contains_key(&code) {
                return code;
            }
        }
    }

    fn host(
        &mut self,
        out: &mut Outbox,
        client_id: Uuid,
        identifier: &str,
        data: Map<String, Value>,
    ) {
        if self
            .peers
            .get(&client_id)
            .is_some_and(|p| p.session_id.is_some())
        {
            let reply = json!({
                "cmd": "host",
                "clientId": client_id.to_string(),
                "error": "already_in_session",
                "data": data,
            });
            out.send(&self.peers, client_id, &reply);
            return;
        }

        let code = self.generate_session_code();
        let session = RelaySession {
            identifier: identifier.to_string(),
            name: data
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Unnamed")
                .to_string(),
            is_private: data.get("private").and_then(Value::as_bool).unwrap_or(false),
            max_clients: data.get("maxClients").and_then(Value::as_i64).unwrap_or(0),
            host_migration: data
                .get("hostMigration")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            payload: match data.get("payload") {
                Some(v @ Value::Object(_)) => v.clone(),
                _ => json!({}),
            },
            host: client_id,
            members: vec![client_id],
            next_message_id: 0,
        };

        let reply = json!({
            "cmd": "host",
            "session": code,
            "clientId": client_id.to_string(),
            "host": client_id.to_string(),
            "name": session.name,
            "maxClients": session.max_clients,
            "hostMigration": session.host_migration,
            "isPrivate": session.is_private,
            "clients": session.member_ids(),
            "payload": session.payload,
            "data": data,
        });

        info!(session_id = %code, host = %client_id, "Session hosted");
        self.sessions.insert(code.clone(), session);
        if let Some(peer) = self.peers.get_mut(&client_id) {
            peer.session_id = Some(code);
        }
        out.send(&self.peers, client_id, &reply);
    }

    fn join(
        &mut self,
        out: &mut Outbox,
        client_id: Uuid,
        identifier: &str,
        session_id: Option<&str>,
        data: Map<String, Value>,
    ) {
        let session_id = session_id.unwrap_or_default();
        let in_session = self
            .peers
            .get(&client_id)
            .is_some_and(|p| p.session_id.is_some());

        let rejection = match self.sessions.get(session_id) {
            None => Some("session_not_found"),
            Some(s) if s.members.contains(&client_id) => Some("already_joined"),
            Some(_) if in_session => Some("already_in_session"),
            Some(s) if s.identifier != identifier => Some("identifier_mismatch"),
            Some(s) if s.max_clients > 0 && s.members.len() as i64 >= s.max_clients => {
                Some("session_full")
            }
            Some(_) => None,
        };

        if let Some(reason) = rejection {
            debug!(client_id = %client_id, session_id = %session_id, reason, "Join rejected");
            let reply = json!({
                "cmd": "join",
                "session": session_id,
                "clientId": client_id.to_string(),
                "error": reason,
                "data": {"status": "error", "reason": reason},
            });
            out.send(&self.peers, client_id, &reply);
            return;
        }

        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };

        let joined = json!({
            "cmd": "joined",
            "session": session_id,
            "clientId": client_id.to_string(),
            "data": data,
        });
        out.send_all(&self.peers, &session.members, &joined);

        let reply = json!({
            "cmd": "join",
            "session": session_id,
            "clientId": client_id.to_string(),
            "host": session.host.to_string(),
            "name": session.name,
            "maxClients": session.max_clients,
            "hostMigration": session.host_migration,
            "isPrivate": session.is_private,
            "clients": session.member_ids(),
            "payload": session.payload,
            "data": data,
        });

        session.members.push(client_id);
        info!(session_id = %session_id, client_id = %client_id, "Peer joined session");

        if let Some(peer) = self.peers.get_mut(&client_id) {
            peer.session_id = Some(session_id.to_string());
        }
        out.send(&self.peers, client_id, &reply);
    }

    fn list(&self, out: &mut Outbox, client_id: Uuid, identifier: &str) {
        let mut list: Vec<Value> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_private && s.identifier == identifier)
            .map(|(id, s)| {
                json!({
                    "id": id,
                    "name": s.name,
                    "clients": s.member_ids(),
                })
            })
            .collect();
        list.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));

        out.send(
            &self.peers,
            client_id,
            &json!({"cmd": "list", "data": {"list": list}}),
        );
    }

    fn game(
        &mut self,
        out: &mut Outbox,
        client_id: Uuid,
        session_id: Option<&str>,
        destination: Option<&str>,
        data: Map<String, Value>,
    ) {
        let Some(session) = session_id.and_then(|id| self.sessions.get_mut(id)) else {
            return;
        };
        if !session.members.contains(&client_id) {
            debug!(client_id = %client_id, "Game message from non-member ignored");
            return;
        }

        let msg = json!({
            "cmd": "game",
            "messageId": session.next_message_id,
            "clientId": client_id.to_string(),
            "broadcast": destination.is_none(),
            "data": data,
        });
        session.next_message_id += 1;

        match destination {
            Some(dest) => {
                if let Some(&target) = session.members.iter().find(|m| m.to_string() == dest) {
                    out.send(&self.peers, target, &msg);
                }
            }
            None => out.send_all(&self.peers, &session.members, &msg),
        }
    }

    /// Take `client_id` out of its session, migrating or closing the
    /// session if it was the host
    fn leave_session(&mut self, out: &mut Outbox, client_id: Uuid) {
        let Some(session_id) = self
            .peers
            .get_mut(&client_id)
            .and_then(|p| p.session_id.take())
        else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };

        session.members.retain(|&m| m != client_id);

        let mut left = json!({
            "cmd": "left",
            "clientId": client_id.to_string(),
            "data": {},
        });

        if session.host != client_id {
            out.send_all(&self.peers, &session.members, &left);
            return;
        }

        if session.host_migration && !session.members.is_empty() {
            session.host = session.members[0];
            info!(session_id = %session_id, host = %session.host, "Host migrated");
            left["data"] = json!({"host": session.host.to_string()});
            out.send_all(&self.peers, &session.members, &left);
            return;
        }

        let closed = json!({"cmd": "closed", "data": {"reason": "host_disconnected"}});
        let members = std::mem::take(&mut session.members);
        out.send_all(&self.peers, &members, &closed);
        for member in &members {
            if let Some(peer) = self.peers.get_mut(member) {
                peer.session_id = None;
            }
        }
        self.sessions.remove(&session_id);
        info!(session_id = %session_id, "Session closed");
    }
}

/// Relay server handle
pub struct RelayServer {
    addr: SocketAddr,
    state: Arc<RwLock<RelayState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Start a new server on the given port (0 picks a free port)
    pub async fn start(port: u16) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Relay server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(RelayState::default()));

        tokio::spawn(accept_loop(listener, state.clone(), shutdown_tx.clone()));

        Ok(RelayServer {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of open sessions
    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Relay server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<RelayState>>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            state.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<RelayState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let client_id = Uuid::new_v4();
    let (mut reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::channel(PEER_QUEUE);
    state.write().await.peers.insert(
        client_id,
        Peer {
            tx,
            session_id: None,
        },
    );
    let writer_handle = tokio::spawn(writer_task(writer, rx));

    info!(addr = %addr, client_id = %client_id, "Peer connected");

    let mut framer = LineFramer::new();
    let mut buf = [0u8; 4096];

    loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                let n = match result {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Read error");
                        break;
                    }
                };
                let lines = match framer.feed(&buf[..n]) {
                    Ok(lines) => lines,
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Dropping peer");
                        break;
                    }
                };
                for line in lines {
                    handle_message(&line, client_id, &state).await.flush().await;
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    let mut out = Outbox::default();
    {
        let mut s = state.write().await;
        s.leave_session(&mut out, client_id);
        s.peers.remove(&client_id);
    }
    writer_handle.abort();
    out.flush().await;

    info!(client_id = %client_id, "Peer disconnected");
}

/// Write queued messages to the socket
async fn writer_task(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Value>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_line(&mut writer, &msg, false).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Handle one request line, returning the messages it produced
async fn handle_message(line: &[u8], client_id: Uuid, state: &Arc<RwLock<RelayState>>) -> Outbox {
    let mut out = Outbox::default();

    let Ok(Value::Object(mut payload)) = serde_json::from_slice::<Value>(line) else {
        debug!(client_id = %client_id, "Ignoring malformed line");
        return out;
    };

    let mut s = state.write().await;

    let Some(identifier) = payload
        .get("identifier")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        let reply = json!({
            "cmd": "error",
            "clientId": client_id.to_string(),
            "data": {"reason": "missing_identifier"},
        });
        out.send(&s.peers, client_id, &reply);
        return out;
    };

    let data = match payload.remove("data") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let session_id = payload.get("session").and_then(Value::as_str);
    let destination = payload.get("destination").and_then(Value::as_str);
    let cmd = payload.get("cmd").and_then(Value::as_str);

    match cmd.and_then(Command::from_cmd) {
        Some(Command::Host) => s.host(&mut out, client_id, &identifier, data),
        Some(Command::Join) => s.join(&mut out, client_id, &identifier, session_id, data),
        Some(Command::List) => s.list(&mut out, client_id, &identifier),
        Some(Command::Game) => s.game(&mut out, client_id, session_id, destination, data),
        Some(Command::Leave) => s.leave_session(&mut out, client_id),
        None => debug!(client_id = %client_id, cmd = ?cmd, "Ignoring unknown command"),
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::{EventKind, PushEvent};
    use crate::Client;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::OwnedReadHalf;

    const IDENT: &str = "c2438167-831b-4bf7-8bdc-0489eaf98e25";

    fn client_for(server: &RelayServer) -> Client {
        Client::new("127.0.0.1", server.addr().port(), IDENT).unwrap()
    }

    fn collect_events(client: &Client) -> mpsc::UnboundedReceiver<PushEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.listen(move |event: &PushEvent| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<PushEvent>) -> PushEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Bare connection for requests `Client` never sends
    struct RawPeer {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl RawPeer {
        async fn connect(server: &RelayServer) -> Self {
            let stream = TcpStream::connect(("127.0.0.1", server.addr().port()))
                .await
                .unwrap();
            let (reader, writer) = stream.into_split();
            RawPeer {
                reader: BufReader::new(reader),
                writer,
            }
        }

        async fn send(&mut self, msg: Value) {
            let mut line = serde_json::to_vec(&msg).unwrap();
            line.push(b'\n');
            self.writer.write_all(&line).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let mut line = String::new();
            tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for reply")
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn join(&mut self, session_id: &str) -> Value {
            self.send(json!({"identifier": IDENT, "cmd": "join", "session": session_id, "data": {}}))
                .await;
            self.recv().await
        }
    }

    #[tokio::test]
    async fn test_host_list_join_game() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let mut host_events = collect_events(&host);
        let hosted = host
            .host(Some(&json!({"name": "My session", "payload": {"map": "forest"}})))
            .await
            .unwrap();
        assert_eq!(hosted.session_id.len(), SESSION_CODE_LEN);
        assert_eq!(hosted.data["map"], "forest");

        let mut guest = client_for(&server);
        let mut guest_events = collect_events(&guest);
        let list = guest.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], hosted.session_id.as_str());

        let joined = guest
            .join(&hosted.session_id, Some(&json!({"name": "Spelare 1"})))
            .await
            .unwrap();
        assert_eq!(joined.session_id, hosted.session_id);

        let info = guest.session_info();
        assert!(!info.is_host);
        assert_eq!(info.host_id, hosted.client_id);
        assert_eq!(info.name, "My session");

        let event = next_event(&mut host_events).await;
        assert_eq!(event.kind, EventKind::Joined);
        assert_eq!(event.client_id.as_deref(), Some(joined.client_id.as_str()));
        assert_eq!(event.data["name"], "Spelare 1");

        guest.game(&json!({"score": 100}), None).await.unwrap();
        let event = next_event(&mut host_events).await;
        assert_eq!(event.kind, EventKind::Game);
        assert_eq!(event.message_id, 0);
        assert_eq!(event.data["score"], 100);

        // The sender receives its own broadcast too
        let echo = next_event(&mut guest_events).await;
        assert_eq!(echo.kind, EventKind::Game);

        host.game(&json!({"turn": 2}), Some(joined.client_id.as_str()))
            .await
            .unwrap();
        let event = next_event(&mut guest_events).await;
        assert_eq!(event.message_id, 1);
        assert_eq!(event.data["turn"], 2);

        host.shutdown().await;
        guest.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_join_unknown_session_rejected() {
        let server = RelayServer::start(0).await.unwrap();
        let mut client = client_for(&server);

        let result = client.join("NOPE00", None).await;
        assert!(matches!(result, Err(Error::Rejected(ref r)) if r == "session_not_found"));
        assert!(!client.session_info().is_established());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_full_session_rejected() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let hosted = host.host(Some(&json!({"maxClients": 1}))).await.unwrap();

        let mut guest = client_for(&server);
        let result = guest.join(&hosted.session_id, None).await;
        assert!(matches!(result, Err(Error::Rejected(ref r)) if r == "session_full"));

        host.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_private_session_not_listed() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        host.host(Some(&json!({"private": true}))).await.unwrap();
        assert_eq!(server.session_count().await, 1);

        let mut other = client_for(&server);
        assert!(other.list().await.unwrap().is_empty());

        host.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_host_disconnect_closes_session() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let hosted = host.host(None).await.unwrap();

        let mut guest = client_for(&server);
        let mut guest_events = collect_events(&guest);
        guest.join(&hosted.session_id, None).await.unwrap();

        host.shutdown().await;

        let event = next_event(&mut guest_events).await;
        assert_eq!(event.kind, EventKind::Closed);
        assert_eq!(event.data["reason"], "host_disconnected");

        guest.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_guest_disconnect_notifies_left() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let mut host_events = collect_events(&host);
        let hosted = host.host(None).await.unwrap();

        let mut guest = client_for(&server);
        let joined = guest.join(&hosted.session_id, None).await.unwrap();
        assert_eq!(next_event(&mut host_events).await.kind, EventKind::Joined);

        guest.shutdown().await;

        let event = next_event(&mut host_events).await;
        assert!(event.is_participant_left());
        assert_eq!(event.client_id.as_deref(), Some(joined.client_id.as_str()));

        host.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_game_burst_is_not_dropped() {
        const COUNT: i64 = 2000;
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let hosted = host.host(None).await.unwrap();

        let mut guest = client_for(&server);
        let mut guest_events = collect_events(&guest);
        guest.join(&hosted.session_id, None).await.unwrap();

        for i in 0..COUNT {
            host.game(&json!({"seq": i}), None).await.unwrap();
        }

        for i in 0..COUNT {
            let event = tokio::time::timeout(Duration::from_secs(10), guest_events.recv())
                .await
                .expect("timed out waiting for game message")
                .unwrap();
            assert_eq!(event.kind, EventKind::Game);
            assert_eq!(event.message_id, i);
            assert_eq!(event.data["seq"], i);
        }

        host.shutdown().await;
        guest.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_host_disconnect_migrates_host() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let hosted = host.host(Some(&json!({"hostMigration": true}))).await.unwrap();

        let mut guest = client_for(&server);
        let mut guest_events = collect_events(&guest);
        let joined = guest.join(&hosted.session_id, None).await.unwrap();

        host.shutdown().await;

        let event = next_event(&mut guest_events).await;
        assert_eq!(event.kind, EventKind::Left);
        assert_eq!(event.client_id.as_deref(), Some(hosted.client_id.as_str()));
        assert_eq!(event.data["host"], joined.client_id.as_str());
        assert_eq!(server.session_count().await, 1);

        let mut other = client_for(&server);
        let list = other.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["clients"], json!([joined.client_id]));

        guest.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_leave_notifies_members() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let mut host_events = collect_events(&host);
        let hosted = host.host(None).await.unwrap();

        let mut peer = RawPeer::connect(&server).await;
        let reply = peer.join(&hosted.session_id).await;
        assert!(reply.get("error").is_none());
        let peer_id = reply["clientId"].as_str().unwrap().to_string();
        assert_eq!(next_event(&mut host_events).await.kind, EventKind::Joined);

        peer.send(json!({"identifier": IDENT, "cmd": "leave", "session": hosted.session_id}))
            .await;

        let event = next_event(&mut host_events).await;
        assert_eq!(event.kind, EventKind::Left);
        assert_eq!(event.client_id.as_deref(), Some(peer_id.as_str()));
        assert_eq!(server.session_count().await, 1);

        // Free to join again after leaving
        let reply = peer.join(&hosted.session_id).await;
        assert!(reply.get("error").is_none());

        host.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_join_identifier_mismatch_rejected() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let hosted = host.host(None).await.unwrap();

        let mut other_app = Client::new(
            "127.0.0.1",
            server.addr().port(),
            "0f8fad5b-d9cb-469f-a165-70867728950e",
        )
        .unwrap();
        let result = other_app.join(&hosted.session_id, None).await;
        assert!(matches!(result, Err(Error::Rejected(ref r)) if r == "identifier_mismatch"));

        host.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_join_twice_rejected() {
        let server = RelayServer::start(0).await.unwrap();

        let mut first = client_for(&server);
        let first_session = first.host(None).await.unwrap();
        let mut second = client_for(&server);
        let second_session = second.host(None).await.unwrap();

        let mut peer = RawPeer::connect(&server).await;
        let reply = peer.join(&first_session.session_id).await;
        assert!(reply.get("error").is_none());

        let reply = peer.join(&first_session.session_id).await;
        assert_eq!(reply["cmd"], "join");
        assert_eq!(reply["error"], "already_joined");
        assert_eq!(reply["data"]["status"], "error");

        let reply = peer.join(&second_session.session_id).await;
        assert_eq!(reply["error"], "already_in_session");

        first.shutdown().await;
        second.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_missing_identifier_gets_error_reply() {
        let server = RelayServer::start(0).await.unwrap();

        let mut peer = RawPeer::connect(&server).await;
        peer.send(json!({"cmd": "list", "data": {}})).await;

        let reply = peer.recv().await;
        assert_eq!(reply["cmd"], "error");
        assert_eq!(reply["data"]["reason"], "missing_identifier");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_destination_reaches_only_target() {
        let server = RelayServer::start(0).await.unwrap();

        let mut host = client_for(&server);
        let hosted = host.host(None).await.unwrap();

        let mut first = client_for(&server);
        let mut first_events = collect_events(&first);
        let first_joined = first.join(&hosted.session_id, None).await.unwrap();

        let mut second = client_for(&server);
        let mut second_events = collect_events(&second);
        second.join(&hosted.session_id, None).await.unwrap();
        assert_eq!(next_event(&mut first_events).await.kind, EventKind::Joined);

        host.game(&json!({"secret": true}), Some(first_joined.client_id.as_str()))
            .await
            .unwrap();
        host.game(&json!({"round": 1}), None).await.unwrap();

        let event = next_event(&mut first_events).await;
        assert_eq!(event.message_id, 0);
        assert_eq!(event.data["secret"], true);
        assert_eq!(next_event(&mut first_events).await.message_id, 1);

        // The targeted message never reached the other member
        let event = next_event(&mut second_events).await;
        assert_eq!(event.kind, EventKind::Game);
        assert_eq!(event.message_id, 1);
        assert_eq!(event.data["round"], 1);

        host.shutdown().await;
        first.shutdown().await;
        second.shutdown().await;
        server.shutdown();
    }
}
