//! Usage: Process-wide `auth:failed` notification (observer registration instead of a global event bus).

use crate::shared::error::ClientError;
use crate::shared::mutex_ext::MutexExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const AUTH_FAILED_EVENT: &str = "auth:failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthFailedEvent {
    pub name: &'static str,
    pub code: String,
    pub reason: String,
    pub at_unix_ms: u64,
}

impl AuthFailedEvent {
    pub fn from_error(err: &ClientError) -> Self {
        Self {
            name: AUTH_FAILED_EVENT,
            code: err.code().to_string(),
            reason: err.to_string(),
            at_unix_ms: crate::shared::time::now_unix_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&AuthFailedEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

/// Cloning shares the same listener registry.
#[derive(Clone, Default)]
pub struct AuthEvents {
    inner: Arc<Registry>,
}

impl std::fmt::Debug for AuthEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthEvents")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl AuthEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_auth_failed<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AuthFailedEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock_or_recover()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock_or_recover();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock_or_recover().len()
    }

    /// Notifies every listener; returns how many were called.
    pub fn emit(&self, event: &AuthFailedEvent) -> usize {
        // Snapshot so a callback may (un)register listeners without deadlocking.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock_or_recover()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        tracing::warn!(
            event = event.name,
            code = %event.code,
            listeners = listeners.len(),
            "authentication failed; notifying listeners"
        );

        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }
}
