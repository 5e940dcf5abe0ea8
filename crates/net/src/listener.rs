//! Listener registry
//!
//! Listeners live in an id-keyed map behind a mutex. Dispatch copies the
//! current set while holding the lock and invokes the copy after releasing
//! it, so a callback may register or remove listeners (itself included)
//! without deadlocking. Such changes take effect from the next dispatch on.
//!
//! Invocation order across listeners is unspecified.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::protocol::PushEvent;

/// Receiver of push events.
///
/// Implemented for any `Fn(&PushEvent) + Send + Sync` closure, which carries
/// its own context by capture.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &PushEvent);
}

impl<F> Listener for F
where
    F: Fn(&PushEvent) + Send + Sync,
{
    fn on_event(&self, event: &PushEvent) {
        self(event)
    }
}

/// Registration handle returned by [`ListenerRegistry::listen`]. Always >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct RegistryInner {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Arc<dyn Listener>>,
}

/// Shared, cloneable set of listeners.
///
/// Clones refer to the same registry; hand one to a callback that needs to
/// unregister itself.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 1,
                listeners: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Callbacks never run under the lock, so poisoning cannot leave the
        // map half-updated
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener and return its id
    pub fn listen<L>(&self, listener: L) -> ListenerId
    where
        L: Listener + 'static,
    {
        let mut inner = self.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.insert(id, Arc::new(listener));
        debug!(listener_id = %id, "Listener registered");
        id
    }

    /// Remove a listener. Returns false if the id was not registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let removed = self.lock().listeners.remove(&id).is_some();
        if removed {
            debug!(listener_id = %id, "Listener removed");
        }
        removed
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.lock().listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().listeners.is_empty()
    }

    /// Copy of the current listener set
    pub fn snapshot(&self) -> Vec<Arc<dyn Listener>> {
        self.lock().listeners.values().cloned().collect()
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// A panicking listener is logged and skipped. Returns how many listeners
    /// were invoked.
    pub fn dispatch(&self, event: &PushEvent) -> usize {
        let snapshot = self.snapshot();

        for listener in &snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if result.is_err() {
                warn!(event = event.kind.as_str(), "Listener panicked");
            }
        }

        snapshot.len()
    }
}
