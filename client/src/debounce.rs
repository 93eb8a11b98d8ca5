//! Debounced attribute persistence.
//!
//! DESIGN
//! ======
//! Attribute writes are chatty: a drag produces dozens of `x`/`y` updates a
//! second. Each `(object, attribute)` pair owns one scheduled send; a new
//! write for the same pair cancels the scheduled task and starts a fresh
//! delay, so only the last value within the window reaches the server.
//! Forced writes bypass the window entirely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frames::{Data, Frame};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;

const SAVE_DELAY: Duration = Duration::from_millis(1000);

type PendingKey = (String, String);

struct PendingWrite {
    handle: JoinHandle<()>,
    room_id: Option<String>,
    value: Value,
}

pub struct DebouncedSaver {
    dispatcher: Arc<dyn Dispatcher>,
    delay: Duration,
    pending: Arc<Mutex<HashMap<PendingKey, PendingWrite>>>,
}

impl DebouncedSaver {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_delay(dispatcher, SAVE_DELAY)
    }

    pub fn with_delay(dispatcher: Arc<dyn Dispatcher>, delay: Duration) -> Self {
        Self { dispatcher, delay, pending: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Schedule a persisted attribute write. A later write for the same
    /// `(object, attribute)` supersedes the pending one; `forced` sends
    /// immediately.
    pub fn schedule(
        &self,
        room_id: Option<&str>,
        object_id: &str,
        attribute: &str,
        value: Value,
        forced: bool,
    ) {
        let key = (object_id.to_string(), attribute.to_string());
        let room_id = room_id.map(String::from);

        if let Ok(mut pending) = self.pending.lock() {
            if let Some(write) = pending.remove(&key) {
                write.handle.abort();
            }
            if forced {
                drop(pending);
                send(&*self.dispatcher, room_id.as_deref(), object_id, attribute, value);
                return;
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let table = Arc::clone(&self.pending);
            let delay = self.delay;
            let task_key = key.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(write) =
                    table.lock().ok().and_then(|mut pending| pending.remove(&task_key))
                else {
                    return;
                };
                send(&*dispatcher, write.room_id.as_deref(), &task_key.0, &task_key.1, write.value);
            });
            pending.insert(key, PendingWrite { handle, room_id, value });
        }
    }

    /// Send everything still pending, now. Used on shutdown and before a
    /// room is evicted.
    pub fn flush(&self) {
        let drained: Vec<(PendingKey, PendingWrite)> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => return,
        };
        for (key, write) in drained {
            write.handle.abort();
            send(&*self.dispatcher, write.room_id.as_deref(), &key.0, &key.1, write.value);
        }
    }

    /// Drop pending writes for one object without sending them. Used when
    /// the object is deleted while writes are still queued.
    pub fn discard(&self, object_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|(id, _), write| {
                if id == object_id {
                    write.handle.abort();
                    false
                } else {
                    true
                }
            });
        }
    }
}

fn send(
    dispatcher: &dyn Dispatcher,
    room_id: Option<&str>,
    object_id: &str,
    attribute: &str,
    value: Value,
) {
    let mut data = Data::new();
    data.insert("id".to_string(), Value::from(object_id));
    data.insert("attribute".to_string(), Value::from(attribute));
    data.insert("value".to_string(), value);
    let mut frame = Frame::request("object:set", data);
    if let Some(room_id) = room_id {
        frame = frame.with_room_id(room_id);
    }
    dispatcher.call(frame);
}

#[cfg(test)]
#[path = "debounce_test.rs"]
mod tests;
