//! Materialization board for created objects.
//!
//! DESIGN
//! ======
//! `object:create` replies with nothing but the new id; the object itself
//! arrives later through the `object:update` push path. Creation flows park
//! a waiter here and the update path resolves it, with an explicit timeout
//! instead of open-ended polling. Arrivals are also recorded so a
//! notification that beats the waiter still resolves it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

/// A created object never showed up on the push path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("object {id} did not materialize within {timeout_ms} ms")]
pub struct MaterializeTimeout {
    pub id: String,
    pub timeout_ms: u64,
}

#[derive(Default)]
struct Inner {
    arrived: HashSet<String>,
    waiters: HashMap<String, Vec<oneshot::Sender<()>>>,
}

#[derive(Clone, Default)]
pub struct MaterializeBoard {
    inner: Arc<Mutex<Inner>>,
}

impl MaterializeBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an object was built locally, resolving any waiters.
    pub fn notify(&self, id: &str) {
        let Ok(mut inner) = self.inner.lock() else { return };
        if let Some(waiters) = inner.waiters.remove(id) {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        } else {
            inner.arrived.insert(id.to_string());
        }
    }

    /// Wait until `notify` has seen `id`, up to `timeout`.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<(), MaterializeTimeout> {
        let receiver = {
            let Ok(mut inner) = self.inner.lock() else {
                return Err(self.timeout_error(id, timeout));
            };
            if inner.arrived.remove(id) {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(id.to_string()).or_default().push(tx);
            rx
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => {
                if let Ok(mut inner) = self.inner.lock() {
                    inner.waiters.remove(id);
                }
                Err(self.timeout_error(id, timeout))
            }
        }
    }

    /// Forget recorded arrivals. Called when a viewport is evicted so stale
    /// ids from the previous room cannot satisfy future waits.
    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.arrived.clear();
        }
    }

    fn timeout_error(&self, id: &str, timeout: Duration) -> MaterializeTimeout {
        MaterializeTimeout {
            id: id.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
#[path = "materialize_test.rs"]
mod tests;
