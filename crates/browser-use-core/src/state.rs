use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Cooperative stop signal plus the last consistent state the agent reached.
///
/// Clones share the same flag: the coordinator keeps one handle, the running agent polls
/// another. The flag is binary; repeated stop requests are indistinguishable from one.
#[derive(Clone, Default)]
pub struct AgentState {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    stop_requested: AtomicBool,
    notify: Notify,
    last_valid_state: Mutex<Option<Value>>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Arm a fresh run: unset the flag and drop any stored snapshot.
    pub fn clear_stop(&self) {
        self.inner.stop_requested.store(false, Ordering::SeqCst);
        *self.snapshot_lock() = None;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested (immediately if it already was).
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent request_stop cannot be missed.
            notified.as_mut().enable();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    pub fn set_last_valid_state(&self, state: Value) {
        *self.snapshot_lock() = Some(state);
    }

    pub fn last_valid_state(&self) -> Option<Value> {
        self.snapshot_lock().clone()
    }

    /// True when both handles share one underlying flag.
    pub fn same_as(&self, other: &AgentState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn snapshot_lock(&self) -> MutexGuard<'_, Option<Value>> {
        self.inner
            .last_valid_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentState")
            .field("stop_requested", &self.is_stop_requested())
            .field("has_last_valid_state", &self.snapshot_lock().is_some())
            .finish()
    }
}
