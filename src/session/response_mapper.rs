//! Generic request/response correlation across tasks.
//!
//! A caller registers a pending request under a string key and awaits the
//! returned future; whichever task decodes the matching response resolves it
//! via [`ResponseMapper::register_response`]. Resolution is atomic per key:
//! a response is delivered to at most one waiter, and a waiter whose timeout
//! elapses first observes `None`, never both.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Correlation table of pending requests, keyed by an opaque string id.
pub struct ResponseMapper<V> {
    pending: DashMap<String, oneshot::Sender<V>>,
}

impl<V: Send + 'static> ResponseMapper<V> {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Register a pending request under `key`. The waiting slot is created
    /// immediately, before the returned future is first polled, so a response
    /// arriving between send and await cannot be lost.
    ///
    /// Awaiting the future yields the response value, or `None` if none was
    /// registered before `wait` elapsed. At most one pending request may
    /// exist per key; a duplicate registration is a caller error and
    /// replaces the previous slot.
    pub fn register_request(
        &self,
        key: impl Into<String>,
        wait: Duration,
    ) -> impl Future<Output = Option<V>> + Send + '_ {
        let key = key.into();
        let (sender, receiver) = oneshot::channel();
        let previous = self.pending.insert(key.clone(), sender);
        debug_assert!(
            previous.is_none(),
            "duplicate pending request registered for key {}",
            key
        );
        if previous.is_some() {
            warn!(
                "Replacing an existing pending request for key {}; the previous waiter will time out",
                key
            );
        }
        async move {
            match tokio::time::timeout(wait, receiver).await {
                Ok(Ok(value)) => Some(value),
                // sender dropped without a value, or the timeout elapsed
                _ => {
                    self.pending.remove(&key);
                    None
                }
            }
        }
    }

    /// Resolve the pending request for `key` with `value`. Late, duplicate,
    /// or unmatched responses are discarded without error.
    pub fn register_response(&self, key: &str, value: V) {
        match self.pending.remove(key) {
            Some((_, sender)) => {
                // the send fails if the waiter timed out in the meantime;
                // the value is discarded in that case
                let _ = sender.send(value);
            }
            None => {
                debug!("Discarding a response for key {} with no registered waiter", key);
            }
        }
    }

    /// Drop a pending request without resolving it, e.g. because sending the
    /// request itself failed. The associated waiter will observe a timeout.
    pub fn cancel_request(&self, key: &str) {
        self.pending.remove(key);
    }

    /// Number of currently pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl<V: Send + 'static> Default for ResponseMapper<V> {
    fn default() -> Self {
        Self::new()
    }
}
