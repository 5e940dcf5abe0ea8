//! mpapi network library
//!
//! Client for a multiplayer session relay: one TCP connection carrying
//! newline-delimited JSON, used to host, join and list sessions and to relay
//! game messages between the participants of a session.
//!
//! # Architecture
//!
//! - **Client**: lazy connection, request/reply commands, session record
//! - **Receiver**: background task that reads server pushes after a session
//!   is established and fans them out to registered listeners
//! - **Protocol**: compact JSON objects, one per line
//! - **Server**: embeddable relay speaking the same protocol
//!
//! # Usage
//!
//! ```ignore
//! let mut client = Client::new("localhost", DEFAULT_PORT, identifier)?;
//!
//! let id = client.listen(|event: &PushEvent| {
//!     println!("{} from {:?}", event.kind.as_str(), event.client_id);
//! });
//!
//! let sessions = client.list().await?;
//! let reply = client.host(Some(&json!({"name": "My session"}))).await?;
//! client.game(&json!({"score": 100}), None).await?;
//!
//! client.unlisten(id);
//! client.shutdown().await;
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod frame;
pub mod listener;
pub mod protocol;
mod receiver;
pub mod server;
pub mod session;
mod stats;

pub use client::{Client, ClientState};
pub use config::ClientConfig;
pub use error::{Error, ErrorKind, Result};
pub use listener::{Listener, ListenerId, ListenerRegistry};
pub use protocol::{EventKind, PushEvent};
pub use server::RelayServer;
pub use session::{Session, SessionReply};
pub use stats::TrafficStats;

/// Default relay server port
pub const DEFAULT_PORT: u16 = 9001;
