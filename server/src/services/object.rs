//! Object writes inside loaded rooms. All mutation happens in memory under
//! the rooms lock; the persistence task and the eviction path write the
//! dirty set back to Postgres.

use std::collections::HashMap;

use frames::ErrorCode;
use objects::{AttributeError, DomainObject, ObjectLookup, SetResult};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::services::room::to_data;
use crate::state::{AppState, LiveObject};

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("room {0} is not loaded")]
    RoomNotLoaded(String),
    #[error("object {0} not found")]
    NotFound(String),
    #[error("objects of type {0} cannot be created")]
    NotCreatable(String),
    #[error(transparent)]
    Rejected(#[from] AttributeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for ObjectError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotLoaded(_) => "E_ROOM_NOT_LOADED",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::NotCreatable(_) => "E_REJECTED",
            Self::Rejected(AttributeError::Unregistered(..)) => "E_UNREGISTERED",
            Self::Rejected(AttributeError::ReadOnly(..)) => "E_READONLY",
            Self::Rejected(AttributeError::CheckFailed(_)) => "E_REJECTED",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Lookup over the live objects of a room, for validation hooks.
struct LiveLookup<'a>(&'a HashMap<String, LiveObject>);

impl ObjectLookup for LiveLookup<'_> {
    fn object(&self, id: &str) -> Option<&DomainObject> {
        self.0.get(id).map(|live| &live.object)
    }

    fn object_ids(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

/// Create an object and return its full data map for broadcasting. Initial
/// attributes run through the same coercion pipeline as later writes;
/// rejected ones are dropped with a warning rather than failing the create.
pub async fn create(
    state: &AppState,
    room_id: &str,
    type_tag: &str,
    attributes: &frames::Data,
    content: Option<&str>,
) -> Result<frames::Data, ObjectError> {
    let entry = state.registry.resolve(type_tag);
    if !entry.behavior.creatable {
        return Err(ObjectError::NotCreatable(type_tag.to_string()));
    }
    let tag = entry.tag.clone();

    let mut rooms = state.rooms.write().await;
    let room = rooms
        .get_mut(room_id)
        .ok_or_else(|| ObjectError::RoomNotLoaded(room_id.to_string()))?;

    let id = Uuid::new_v4().to_string();
    let mut object = DomainObject::new(&id, &tag);
    object.data.insert("inRoom".into(), json!(room_id));
    object.data.insert("layer".into(), json!(room.next_layer()));

    let schema = state.registry.schema(&tag);
    for (name, value) in attributes {
        let result = schema.set(&mut object, name, value.clone(), &LiveLookup(&room.objects));
        if let SetResult::Rejected(err) = result {
            warn!(room_id, %id, attribute = name, error = %err, "dropping initial attribute");
        }
    }
    if let Some(content) = content {
        object.data.insert("content".into(), json!(content));
        object.data.insert("hasContent".into(), json!(true));
    }

    let data = to_data(&object.data);
    room.objects.insert(id.clone(), LiveObject { object, rev: 1 });
    room.dirty.insert(id);
    Ok(data)
}

/// Set one attribute. `Ok(Some(value))` is an applied write with the coerced
/// value, `Ok(None)` a no-op; rejections become errors for the wire.
pub async fn set(
    state: &AppState,
    room_id: &str,
    id: &str,
    attribute: &str,
    value: Value,
) -> Result<Option<Value>, ObjectError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms
        .get_mut(room_id)
        .ok_or_else(|| ObjectError::RoomNotLoaded(room_id.to_string()))?;
    // Take the object out so the validation lookup can borrow the rest of
    // the room.
    let mut live = room
        .objects
        .remove(id)
        .ok_or_else(|| ObjectError::NotFound(id.to_string()))?;

    let schema = state.registry.schema(&live.object.type_tag);
    let result = schema.set(&mut live.object, attribute, value, &LiveLookup(&room.objects));
    if result.applied() {
        live.rev += 1;
        room.dirty.insert(id.to_string());
    }
    room.objects.insert(id.to_string(), live);

    match result {
        SetResult::Applied(value) => Ok(Some(value)),
        SetResult::Unchanged => Ok(None),
        SetResult::Rejected(err) => Err(err.into()),
    }
}

/// Remove an object from the room. The database row goes away on the next
/// flush.
pub async fn delete(state: &AppState, room_id: &str, id: &str) -> Result<(), ObjectError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms
        .get_mut(room_id)
        .ok_or_else(|| ObjectError::RoomNotLoaded(room_id.to_string()))?;
    if room.objects.remove(id).is_none() {
        return Err(ObjectError::NotFound(id.to_string()));
    }
    room.dirty.remove(id);
    room.deleted.insert(id.to_string());
    Ok(())
}

/// Strip the given id from every link array in the room, ahead of a delete.
/// Returns one partial update per touched object.
pub async fn detach(
    state: &AppState,
    room_id: &str,
    id: &str,
) -> Result<Vec<frames::Data>, ObjectError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms
        .get_mut(room_id)
        .ok_or_else(|| ObjectError::RoomNotLoaded(room_id.to_string()))?;

    let mut updates = Vec::new();
    for live in room.objects.values_mut() {
        let links = live.object.link_ids();
        if !links.iter().any(|target| target == id) {
            continue;
        }
        let kept: Vec<Value> =
            links.into_iter().filter(|target| target != id).map(Value::from).collect();
        live.object.data.insert("link".into(), Value::Array(kept.clone()));
        live.rev += 1;
        room.dirty.insert(live.object.id.clone());

        let mut update = frames::Data::new();
        update.insert("id".into(), json!(live.object.id));
        update.insert("link".into(), Value::Array(kept));
        updates.push(update);
    }
    Ok(updates)
}

pub struct DuplicateOutcome {
    /// Full data maps of the new objects, in creation order.
    pub created: Vec<frames::Data>,
    pub new_ids: Vec<String>,
    /// Source ids removed because the batch was a cut.
    pub deleted: Vec<String>,
}

/// Duplicate a set of objects, possibly into another room and possibly as a
/// cut. Links between duplicated objects are rewritten to the new ids; links
/// to objects outside the set are kept as they are.
pub async fn duplicate(
    state: &AppState,
    source_room: &str,
    target_room: &str,
    ids: &[String],
    cut: bool,
    position: Option<(i64, i64)>,
) -> Result<DuplicateOutcome, ObjectError> {
    let mut deleted = Vec::new();
    let (created, new_ids) = {
        let mut rooms = state.rooms.write().await;
        let source = rooms
            .get(source_room)
            .ok_or_else(|| ObjectError::RoomNotLoaded(source_room.to_string()))?;

        let mut originals = Vec::new();
        for id in ids {
            match source.objects.get(id) {
                Some(live) => originals.push(live.object.clone()),
                None => warn!(source_room, %id, "skipping unknown object in duplicate"),
            }
        }
        if originals.is_empty() {
            return Err(ObjectError::NotFound(ids.join(",")));
        }

        // Paste position is the anchor for the first object; the rest keep
        // their offsets relative to it.
        let anchor = originals[0].position();
        let delta = position.map_or((0, 0), |(x, y)| (x - anchor.0, y - anchor.1));

        let translation: HashMap<String, String> = originals
            .iter()
            .map(|original| (original.id.clone(), Uuid::new_v4().to_string()))
            .collect();

        if cut {
            let source = rooms
                .get_mut(source_room)
                .ok_or_else(|| ObjectError::RoomNotLoaded(source_room.to_string()))?;
            for original in &originals {
                source.objects.remove(&original.id);
                source.dirty.remove(&original.id);
                source.deleted.insert(original.id.clone());
                deleted.push(original.id.clone());
            }
        }

        let target = rooms
            .get_mut(target_room)
            .ok_or_else(|| ObjectError::RoomNotLoaded(target_room.to_string()))?;
        let mut next_layer = target.next_layer();
        let mut created = Vec::new();
        let mut new_ids = Vec::new();
        for mut object in originals {
            let new_id = translation[&object.id].clone();
            object.id = new_id.clone();
            object.data.insert("id".into(), json!(new_id));
            object.data.insert("inRoom".into(), json!(target_room));
            object.data.insert("layer".into(), json!(next_layer));
            next_layer += 1;
            object.update_link_ids(&translation);

            let (x, y) = object.position();
            object.data.insert("x".into(), json!((x + delta.0).max(0)));
            object.data.insert("y".into(), json!((y + delta.1).max(0)));

            created.push(to_data(&object.data));
            target.dirty.insert(new_id.clone());
            target.objects.insert(new_id.clone(), LiveObject { object, rev: 1 });
            new_ids.push(new_id);
        }
        (created, new_ids)
    };
    Ok(DuplicateOutcome { created, new_ids, deleted })
}

/// Attach text content to an object and flag it for rendering.
pub async fn set_content(
    state: &AppState,
    room_id: &str,
    id: &str,
    content: &str,
) -> Result<(), ObjectError> {
    let mut rooms = state.rooms.write().await;
    let room = rooms
        .get_mut(room_id)
        .ok_or_else(|| ObjectError::RoomNotLoaded(room_id.to_string()))?;
    let live = room
        .objects
        .get_mut(id)
        .ok_or_else(|| ObjectError::NotFound(id.to_string()))?;
    live.object.data.insert("content".into(), json!(content));
    live.object.data.insert("hasContent".into(), json!(true));
    live.rev += 1;
    room.dirty.insert(id.to_string());
    Ok(())
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
