//! Connection registry and login. Every websocket gets an entry here at
//! upgrade time; identity is attached after a successful `session:login`.

use frames::{ErrorCode, Frame, Viewport};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connector::sha256_hex;
use crate::state::{AppState, Connection, SessionUser};

/// Length of the public user hash other clients address messages to.
const USER_HASH_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid username or password")]
    BadCredentials,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for UserError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::BadCredentials => "E_BAD_CREDENTIALS",
            Self::NotAuthenticated => "E_NOT_AUTHENTICATED",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Register a fresh, unauthenticated connection.
pub async fn register(state: &AppState, conn_id: Uuid, tx: mpsc::Sender<Frame>) {
    let mut table = state.connections.write().await;
    table.entries.insert(
        conn_id,
        Connection {
            tx,
            user: None,
            rooms: std::collections::HashMap::new(),
        },
    );
}

/// Drop a connection. Returns the rooms it was still showing so the caller
/// can run the room eviction path for each.
pub async fn disconnect(
    state: &AppState,
    conn_id: Uuid,
) -> (Option<SessionUser>, Vec<(Viewport, String)>) {
    let mut table = state.connections.write().await;
    let Some(conn) = table.entries.remove(&conn_id) else {
        return (None, Vec::new());
    };
    if let Some(user) = &conn.user {
        table.by_hash.remove(&user.hash);
    }
    (conn.user, conn.rooms.into_iter().collect())
}

/// Authenticate against the connector and attach the identity to the
/// connection. The user hash is derived from the connection id so the same
/// account logged in twice has two distinct handles.
pub async fn login(
    state: &AppState,
    conn_id: Uuid,
    username: &str,
    password: &str,
) -> Result<SessionUser, UserError> {
    let record = state
        .connector
        .login(username, password)
        .await?
        .ok_or(UserError::BadCredentials)?;

    let mut hash = sha256_hex(&format!("{conn_id}:{}", record.username));
    hash.truncate(USER_HASH_LEN);

    let user = SessionUser {
        id: record.id,
        username: record.username,
        color: record.color,
        home: record.home,
        hash,
    };

    let mut table = state.connections.write().await;
    let Some(conn) = table.entries.get_mut(&conn_id) else {
        return Err(UserError::NotAuthenticated);
    };
    if let Some(previous) = conn.user.replace(user.clone()) {
        table.by_hash.remove(&previous.hash);
    }
    table.by_hash.insert(user.hash.clone(), conn_id);
    Ok(user)
}

/// The identity of a connection, or `NotAuthenticated`.
pub async fn current_user(state: &AppState, conn_id: Uuid) -> Result<SessionUser, UserError> {
    let table = state.connections.read().await;
    table
        .user_of(conn_id)
        .cloned()
        .ok_or(UserError::NotAuthenticated)
}

/// Record which room a viewport of this connection is showing. Returns the
/// room the viewport showed before, if any.
pub async fn set_viewport_room(
    state: &AppState,
    conn_id: Uuid,
    viewport: Viewport,
    room_id: &str,
) -> Option<String> {
    let mut table = state.connections.write().await;
    let conn = table.entries.get_mut(&conn_id)?;
    conn.rooms.insert(viewport, room_id.to_string())
}

pub async fn clear_viewport_room(state: &AppState, conn_id: Uuid, viewport: Viewport) {
    let mut table = state.connections.write().await;
    if let Some(conn) = table.entries.get_mut(&conn_id) {
        conn.rooms.remove(&viewport);
    }
}

/// Outbound channel of the connection owning the given user hash.
pub async fn tx_by_hash(state: &AppState, hash: &str) -> Option<mpsc::Sender<Frame>> {
    let table = state.connections.read().await;
    table.by_hash(hash).map(|conn| conn.tx.clone())
}

#[cfg(test)]
#[path = "user_test.rs"]
mod tests;
