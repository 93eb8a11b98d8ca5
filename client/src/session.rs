//! Async drivers for the flows that wait on the server: login, room loads,
//! object creation, and batch duplication. Everything here locks the shared
//! [`ObjectManager`] only around synchronous state changes, never across an
//! await on the wire.

use std::sync::Arc;
use std::time::Duration;

use frames::{Data, FRAME_CODE, FRAME_INDEX, FRAME_MESSAGE, Frame, Status, Viewport};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::warn;

use crate::bridge::ViewBridge;
use crate::dispatcher::Dispatcher;
use crate::manager::{ObjectManager, RoomLoadError};
use crate::materialize::MaterializeTimeout;

/// Quiet period after a room load before the settle callback fires.
const ROOM_SETTLE: Duration = Duration::from_millis(1200);

/// How long a created object may take to materialize on the push path.
const CREATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-object slack added to the batch materialization deadline.
const BATCH_SLACK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("server rejected {syscall}: {message}")]
    Server { syscall: String, code: Option<String>, message: String },
    #[error("connection closed during {0}")]
    ConnectionClosed(String),
    #[error(transparent)]
    RoomLoad(#[from] RoomLoadError),
    #[error(transparent)]
    Materialize(#[from] MaterializeTimeout),
    #[error("malformed reply to {0}")]
    MalformedReply(String),
}

/// One connected client session over a shared manager.
#[derive(Clone)]
pub struct Session {
    manager: Arc<Mutex<ObjectManager>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Session {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, bridge: Box<dyn ViewBridge>) -> Self {
        let manager = ObjectManager::new(Arc::clone(&dispatcher), bridge);
        Self { manager: Arc::new(Mutex::new(manager)), dispatcher }
    }

    pub fn manager(&self) -> Arc<Mutex<ObjectManager>> {
        Arc::clone(&self.manager)
    }

    /// Route an inbound push frame. Terminal replies are correlated by the
    /// transport's query path and never arrive here.
    pub async fn handle_push(&self, frame: &Frame) {
        self.manager.lock().await.handle_event(frame);
    }

    async fn query(&self, frame: Frame) -> Result<Frame, ClientError> {
        let syscall = frame.syscall.clone();
        let receiver = self.dispatcher.query(frame);
        let reply = receiver.await.map_err(|_| ClientError::ConnectionClosed(syscall.clone()))?;
        if reply.status == Status::Error {
            return Err(ClientError::Server {
                syscall,
                code: reply.str_field(FRAME_CODE).map(String::from),
                message: reply.str_field(FRAME_MESSAGE).unwrap_or("unknown error").to_string(),
            });
        }
        Ok(reply)
    }

    // =========================================================================
    // SESSION
    // =========================================================================

    /// Authenticate. The `session:logged_in` push carries the identity and
    /// updates the manager.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let mut data = Data::new();
        data.insert("username".to_string(), Value::from(username));
        data.insert("password".to_string(), Value::from(password));
        self.query(Frame::request("session:login", data)).await?;
        Ok(())
    }

    // =========================================================================
    // ROOMS
    // =========================================================================

    /// Load a room into a viewport: enter server-side, evict the viewport,
    /// then fire the settle callback once the object burst has quieted.
    pub async fn load_room(
        &self,
        viewport: Viewport,
        room_id: &str,
        from_browser: bool,
    ) -> Result<(), ClientError> {
        let request = self.manager.lock().await.begin_room_load(viewport, room_id)?;
        let room_id = request.room_id.clone().unwrap_or_default();
        self.query(request).await?;
        self.manager.lock().await.complete_room_load(viewport, &room_id, from_browser);

        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            tokio::time::sleep(ROOM_SETTLE).await;
            manager.lock().await.room_settled(viewport);
        });
        Ok(())
    }

    /// Leave the room shown in a viewport, telling the server.
    pub async fn leave_room(&self, viewport: Viewport) {
        self.manager.lock().await.leave_room(viewport, true);
    }

    /// Subscribe to a room for write access before entering it.
    pub async fn subscribe(&self, room_id: &str) -> Result<(), ClientError> {
        let frame = Frame::request("room:subscribe", Data::new()).with_room_id(room_id);
        self.query(frame).await?;
        Ok(())
    }

    /// Navigate to the parent of the viewport's current room.
    pub async fn go_parent(&self, viewport: Viewport) -> Result<(), ClientError> {
        let parent = {
            let manager = self.manager.lock().await;
            manager
                .view(viewport)
                .room
                .as_ref()
                .and_then(|room| room.data.get("parent"))
                .and_then(Value::as_str)
                .map(String::from)
        };
        match parent {
            Some(parent) if !parent.is_empty() => {
                self.load_room(viewport, &parent, false).await
            }
            _ => Ok(()),
        }
    }

    /// Navigate to the logged-in user's home room.
    pub async fn go_home(&self, viewport: Viewport) -> Result<(), ClientError> {
        let home = {
            let manager = self.manager.lock().await;
            manager.session_info().map(|info| info.home.clone())
        };
        match home {
            Some(home) => self.load_room(viewport, &home, false).await,
            None => Ok(()),
        }
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Create an object. The reply carries only the id; the object itself
    /// arrives on the push path, awaited on the materialization board.
    pub async fn create_object(
        &self,
        viewport: Viewport,
        type_tag: &str,
        attributes: Map<String, Value>,
        content: Option<Value>,
    ) -> Result<String, ClientError> {
        let (request, board) = {
            let manager = self.manager.lock().await;
            let mut data = Data::new();
            data.insert("type".to_string(), Value::from(type_tag));
            data.insert("attributes".to_string(), Value::Object(attributes));
            if let Some(content) = content {
                data.insert("content".to_string(), content);
            }
            let request = Frame::request("object:create", data)
                .with_room_id(manager.view(viewport).room_id.clone())
                .with_data(FRAME_INDEX, viewport.as_str());
            (request, manager.materialize_board())
        };

        let reply = self.query(request).await?;
        let Some(id) = reply.str_field("id").map(String::from) else {
            return Err(ClientError::MalformedReply("object:create".to_string()));
        };

        if let Err(err) = board.wait(&id, CREATE_TIMEOUT).await {
            warn!(%err, "created object never materialized");
            return Err(err.into());
        }

        self.manager.lock().await.finish_creation(viewport, &id);
        Ok(id)
    }

    // =========================================================================
    // BATCHES
    // =========================================================================

    /// Paste the clipboard into a viewport.
    pub async fn paste(
        &self,
        viewport: Viewport,
        position: Option<(i64, i64)>,
    ) -> Result<Vec<String>, ClientError> {
        let batch = self.manager.lock().await.prepare_paste(viewport, position);
        self.run_batch(batch).await
    }

    /// Duplicate objects in place.
    pub async fn duplicate_objects(
        &self,
        viewport: Viewport,
        ids: &[String],
    ) -> Result<Vec<String>, ClientError> {
        let batch = self.manager.lock().await.prepare_duplicate(viewport, ids);
        self.run_batch(batch).await
    }

    /// Move objects into the other viewport's room.
    pub async fn move_objects_to_other_room(
        &self,
        from: Viewport,
        ids: &[String],
    ) -> Result<Vec<String>, ClientError> {
        let batch = self.manager.lock().await.prepare_move_to_other_room(from, ids);
        self.run_batch(batch).await
    }

    /// Run a selection action. Duplicate is the one action that needs the
    /// wire; everything else applies synchronously.
    pub async fn perform_action_for_selected(&self, name: &str) -> Result<(), ClientError> {
        if name == "Duplicate" {
            let (viewport, ids) = {
                let manager = self.manager.lock().await;
                let selected = manager.selected();
                let viewport = selected.first().map_or(Viewport::Left, |(vp, _)| *vp);
                let ids: Vec<String> = selected
                    .into_iter()
                    .filter(|(vp, _)| *vp == viewport)
                    .map(|(_, id)| id)
                    .collect();
                (viewport, ids)
            };
            if !ids.is_empty() {
                self.duplicate_objects(viewport, &ids).await?;
            }
            return Ok(());
        }
        self.manager.lock().await.perform_action_for_selected(name);
        Ok(())
    }

    async fn run_batch(
        &self,
        batch: Option<crate::clipboard::PendingBatch>,
    ) -> Result<Vec<String>, ClientError> {
        let Some(batch) = batch else { return Ok(Vec::new()) };
        let board = self.manager.lock().await.materialize_board();

        let reply = self.query(batch.frame).await?;
        let new_ids: Vec<String> = reply
            .data
            .get("ids")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if new_ids.is_empty() {
            return Err(ClientError::MalformedReply("object:duplicate".to_string()));
        }

        // One deadline for the whole batch, scaled by its size.
        let slack = BATCH_SLACK.checked_mul(u32::try_from(batch.count).unwrap_or(u32::MAX));
        let deadline =
            tokio::time::Instant::now() + CREATE_TIMEOUT + slack.unwrap_or(Duration::ZERO);
        for id in &new_ids {
            let remaining =
                deadline.saturating_duration_since(tokio::time::Instant::now());
            if let Err(err) = board.wait(id, remaining).await {
                warn!(%err, "batch object never materialized");
                return Err(err.into());
            }
        }

        self.manager.lock().await.complete_batch(batch.viewport, &new_ids);
        Ok(new_ids)
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
