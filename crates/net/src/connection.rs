//! Lazily-opened TCP connection
//!
//! The socket is opened on the first command and split into owned halves.
//! The write half stays here for the lifetime of the client; the read half is
//! handed to the receiver task once a session is established.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub(crate) struct Connection {
    host: String,
    port: u16,
    reader: Option<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
}

impl Connection {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            reader: None,
            writer: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Open the connection if it is not open yet
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let stream = connect(&self.host, self.port).await?;
        let (reader, writer) = stream.into_split();
        self.reader = Some(reader);
        self.writer = Some(writer);
        Ok(())
    }

    pub fn writer_mut(&mut self) -> Result<&mut OwnedWriteHalf> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::State("Not connected".into()))
    }

    pub fn reader_mut(&mut self) -> Result<&mut OwnedReadHalf> {
        if !self.is_connected() {
            return Err(Error::State("Not connected".into()));
        }
        self.reader
            .as_mut()
            .ok_or_else(|| Error::State("Connection is owned by the receiver".into()))
    }

    pub fn take_reader(&mut self) -> Option<OwnedReadHalf> {
        self.reader.take()
    }

    /// Shut the write side down, signalling end of stream to the server
    pub async fn shutdown(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Shutdown of write half failed");
            }
        }
    }
}

/// Resolve `host` (IPv4 or IPv6) and connect to the first address that accepts
async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| Error::Connect(format!("Cannot resolve {}:{}: {}", host, port, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(Error::Connect(format!("No address for {}:{}", host, port)));
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!(addr = %addr, "Connected to server");
                return Ok(stream);
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(Error::Connect(match last_error {
        Some(e) => format!("{}:{}: {}", host, port, e),
        None => format!("{}:{}", host, port),
    }))
}
