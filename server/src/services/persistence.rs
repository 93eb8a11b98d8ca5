//! Write-behind persistence. Object writes mark their room dirty in memory;
//! a background task flushes dirty rooms to Postgres on a short interval.
//! The same flush runs once more when a room is evicted, so nothing is lost
//! between the last client leaving and the next restart.

use std::time::Duration;

use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::state::AppState;

const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

pub struct FlushConfig {
    pub interval: Duration,
}

impl FlushConfig {
    pub fn from_env() -> Self {
        Self {
            interval: Duration::from_millis(env_parse(
                "OBJECT_FLUSH_INTERVAL_MS",
                DEFAULT_FLUSH_INTERVAL_MS,
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|value| value.parse().ok()).unwrap_or(default)
}

pub fn spawn_flush_task(state: AppState, config: FlushConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = flush_all(&state).await {
                error!(error = %err, "object flush failed");
            }
        }
    })
}

pub async fn flush_all(state: &AppState) -> Result<(), sqlx::Error> {
    let room_ids: Vec<String> = state.rooms.read().await.keys().cloned().collect();
    for room_id in room_ids {
        flush_room(state, &room_id).await?;
    }
    Ok(())
}

/// Flush one room's dirty objects and pending deletions. Snapshots under
/// the lock, writes without it, then clears only what the snapshot covered;
/// an object written again while IO was in flight stays dirty.
pub async fn flush_room(state: &AppState, room_id: &str) -> Result<(), sqlx::Error> {
    let (upserts, deletes) = {
        let rooms = state.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return Ok(());
        };
        let upserts: Vec<(String, String, Value, i64)> = room
            .dirty
            .iter()
            .filter_map(|id| {
                room.objects.get(id).map(|live| {
                    (
                        id.clone(),
                        live.object.type_tag.clone(),
                        Value::Object(live.object.data.clone()),
                        live.rev,
                    )
                })
            })
            .collect();
        let deletes: Vec<String> = room.deleted.iter().cloned().collect();
        (upserts, deletes)
    };
    if upserts.is_empty() && deletes.is_empty() {
        return Ok(());
    }

    for (id, type_tag, data, _rev) in &upserts {
        sqlx::query(
            "INSERT INTO room_objects (id, room_id, type, data) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE \
             SET type = EXCLUDED.type, data = EXCLUDED.data, updated_at = now()",
        )
        .bind(id)
        .bind(room_id)
        .bind(type_tag)
        .bind(data)
        .execute(&state.pool)
        .await?;
    }
    for id in &deletes {
        sqlx::query("DELETE FROM room_objects WHERE id = $1")
            .bind(id)
            .execute(&state.pool)
            .await?;
    }

    let mut rooms = state.rooms.write().await;
    if let Some(room) = rooms.get_mut(room_id) {
        for (id, _, _, rev) in &upserts {
            match room.objects.get(id) {
                Some(live) if live.rev != *rev => {}
                // Unchanged since the snapshot, or deleted meanwhile.
                _ => {
                    room.dirty.remove(id);
                }
            }
        }
        for id in &deletes {
            room.deleted.remove(id);
        }
    }
    debug!(room_id, flushed = upserts.len(), deleted = deletes.len(), "room flushed");
    Ok(())
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
