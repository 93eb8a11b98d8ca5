//! Room lifecycle. A room is hydrated from Postgres when the first client
//! enters, lives in memory while anyone is showing it, and is flushed and
//! evicted when the last client leaves.

use frames::{ErrorCode, Frame};
use objects::DomainObject;
use serde_json::{Map, Value, json};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::{persistence, user};
use crate::state::{AppState, LiveObject, RoomState};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("not logged in")]
    NotAuthenticated,
    #[error("room {0} is private")]
    Forbidden(String),
    #[error("room {0} is not loaded")]
    NotLoaded(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "E_NOT_AUTHENTICATED",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::NotLoaded(_) => "E_ROOM_NOT_LOADED",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<user::UserError> for RoomError {
    fn from(err: user::UserError) -> Self {
        match err {
            user::UserError::Database(e) => Self::Database(e),
            _ => Self::NotAuthenticated,
        }
    }
}

/// Access gate for `room:subscribe`. Entering runs the same check.
pub async fn may_subscribe(
    state: &AppState,
    conn_id: Uuid,
    room_id: &str,
) -> Result<(), RoomError> {
    let user = user::current_user(state, conn_id).await?;
    if state.connector.may_subscribe(&user.record(), room_id).await? {
        Ok(())
    } else {
        Err(RoomError::Forbidden(room_id.to_string()))
    }
}

/// Enter a room: gate, hydrate if this is the first client, register the
/// connection, and return the snapshot the client needs to materialize the
/// board. The room object itself is the first entry.
pub async fn enter(
    state: &AppState,
    conn_id: Uuid,
    room_id: &str,
) -> Result<Vec<frames::Data>, RoomError> {
    let user = user::current_user(state, conn_id).await?;
    if !state.connector.may_subscribe(&user.record(), room_id).await? {
        return Err(RoomError::Forbidden(room_id.to_string()));
    }

    let loaded = state.rooms.read().await.contains_key(room_id);
    if !loaded {
        let hydrated = hydrate(state, room_id, user.id).await?;
        let mut rooms = state.rooms.write().await;
        // Another client may have hydrated while we were reading the
        // database; keep whichever copy got there first.
        rooms.entry(room_id.to_string()).or_insert(hydrated);
    }

    let tx = {
        let table = state.connections.read().await;
        table
            .entries
            .get(&conn_id)
            .map(|conn| conn.tx.clone())
            .ok_or(RoomError::NotAuthenticated)?
    };

    let mut rooms = state.rooms.write().await;
    let room = rooms
        .get_mut(room_id)
        .ok_or_else(|| RoomError::NotLoaded(room_id.to_string()))?;
    room.clients.insert(conn_id, tx);

    let mut snapshot = vec![to_data(&room.room.data)];
    let mut objects: Vec<&LiveObject> = room.objects.values().collect();
    objects.sort_by(|a, b| {
        let la = a.object.raw("layer").as_i64().unwrap_or(0);
        let lb = b.object.raw("layer").as_i64().unwrap_or(0);
        la.cmp(&lb).then_with(|| a.object.id.cmp(&b.object.id))
    });
    snapshot.extend(objects.iter().map(|live| to_data(&live.object.data)));
    debug!(room_id, clients = room.clients.len(), objects = snapshot.len() - 1, "room entered");
    Ok(snapshot)
}

/// Remove a connection from a room. When the last one leaves, flush dirty
/// objects and evict the room from memory.
pub async fn leave(state: &AppState, conn_id: Uuid, room_id: &str) {
    let empty = {
        let mut rooms = state.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        room.clients.remove(&conn_id);
        room.clients.is_empty()
    };
    if !empty {
        return;
    }

    if let Err(err) = persistence::flush_room(state, room_id).await {
        warn!(room_id, error = %err, "final flush failed, keeping room in memory");
        return;
    }

    let mut rooms = state.rooms.write().await;
    if let Some(room) = rooms.get(room_id) {
        // A client may have entered or written during the flush.
        if room.clients.is_empty() && room.dirty.is_empty() && room.deleted.is_empty() {
            rooms.remove(room_id);
            debug!(room_id, "room evicted");
        }
    }
}

/// Push a frame to every client in the room, optionally skipping the
/// originator. Slow clients are skipped rather than awaited.
pub async fn broadcast(state: &AppState, room_id: &str, frame: &Frame, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(room_id) else {
        return;
    };
    for (client_id, tx) in &room.clients {
        if Some(*client_id) == exclude {
            continue;
        }
        if tx.try_send(frame.clone()).is_err() {
            warn!(room_id, client = %client_id, "client channel full, dropping frame");
        }
    }
}

/// Load a room and its objects from the database, creating the room row if
/// it does not exist yet.
async fn hydrate(state: &AppState, room_id: &str, owner: Uuid) -> Result<RoomState, RoomError> {
    let row = sqlx::query("SELECT id, name, parent, private FROM rooms WHERE id = $1")
        .bind(room_id)
        .fetch_optional(&state.pool)
        .await?;

    let mut room = DomainObject::new(room_id, "Room");
    room.data.insert("inRoom".into(), json!(room_id));
    match row {
        Some(row) => {
            let name: String = row.try_get("name")?;
            let parent: Option<String> = row.try_get("parent")?;
            room.data.insert("name".into(), json!(name));
            if let Some(parent) = parent {
                room.data.insert("parent".into(), json!(parent));
            }
        }
        None => {
            sqlx::query("INSERT INTO rooms (id, name, owner) VALUES ($1, $1, $2)")
                .bind(room_id)
                .bind(owner)
                .execute(&state.pool)
                .await?;
            room.data.insert("name".into(), json!(room_id));
        }
    }

    let mut room_state = RoomState::new(room);
    let rows = sqlx::query("SELECT id, type, data FROM room_objects WHERE room_id = $1")
        .bind(room_id)
        .fetch_all(&state.pool)
        .await?;
    for row in rows {
        let data: Value = row.try_get("data")?;
        let Value::Object(map) = data else {
            warn!(room_id, "skipping object with non-object data");
            continue;
        };
        let object = DomainObject::from_data(map);
        room_state
            .objects
            .insert(object.id.clone(), LiveObject { object, rev: 0 });
    }
    Ok(room_state)
}

pub(crate) fn to_data(map: &Map<String, Value>) -> frames::Data {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
