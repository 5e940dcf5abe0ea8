//! Receiver task
//!
//! Owns every socket read after a session is established. Reads arrive in
//! fixed-size chunks, pass through a [`LineFramer`], and each complete line
//! that classifies as a push event is dispatched to the listener registry.
//!
//! A read error, a graceful close or a shutdown request ends the task. There
//! is no channel back to the client; delivery simply stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::frame::LineFramer;
use crate::listener::ListenerRegistry;
use crate::protocol::PushEvent;
use crate::stats::TrafficCounters;

/// Size of a single socket read
const READ_CHUNK: usize = 1024;

/// Handle to a running receiver task
pub(crate) struct ReceiverHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReceiverHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the task and wait for it to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Receiver task ended abnormally");
            }
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn the receiver task on the current runtime
pub(crate) fn spawn<R>(
    reader: R,
    registry: ListenerRegistry,
    stats: Arc<TrafficCounters>,
    debug: Arc<AtomicBool>,
) -> ReceiverHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(receiver_loop(reader, registry, stats, debug, shutdown_rx));

    ReceiverHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}

async fn receiver_loop<R>(
    mut reader: R,
    registry: ListenerRegistry,
    stats: Arc<TrafficCounters>,
    debug: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];

    info!("Receiver started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Receiver shutdown requested");
                break;
            }

            result = reader.read(&mut buf) => {
                let n = match result {
                    Ok(0) => {
                        debug!("Server closed connection");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                };

                let lines = match framer.feed(&buf[..n]) {
                    Ok(lines) => lines,
                    Err(e) => {
                        warn!(error = %e, "Dropping connection");
                        break;
                    }
                };

                for line in lines {
                    stats.record_rx(line.len() + 1);
                    if debug.load(Ordering::Relaxed) {
                        info!(target: "mpapi_net::wire", "RX: {}", String::from_utf8_lossy(&line));
                    }
                    handle_line(&line, &registry);
                }
            }
        }
    }

    info!("Receiver stopped");
}

fn handle_line(line: &[u8], registry: &ListenerRegistry) {
    match PushEvent::classify(line) {
        Some(event) => {
            let delivered = registry.dispatch(&event);
            debug!(
                event = event.kind.as_str(),
                message_id = event.message_id,
                listeners = delivered,
                "Dispatched push event"
            );
        }
        None => {
            debug!("Ignoring unrecognised line");
        }
    }
}
