//! Clipboard and batch duplication.
//!
//! Copy, cut, paste, duplicate, and cross-room moves all reduce to one
//! `object:duplicate` request carrying the source ids, a cut flag, and
//! optional positional overrides. The server replies with the new ids;
//! the session layer awaits their materialization.

use frames::{Data, Frame, Viewport};
use serde_json::Value;

use crate::manager::ObjectManager;

/// Batches past this size ask the frontend for confirmation first.
const CONFIRM_THRESHOLD: usize = 5;

#[derive(Default)]
pub struct Clipboard {
    pub ids: Vec<String>,
    pub source_room: String,
    pub cut: bool,
}

impl Clipboard {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A prepared batch request the session layer must query and complete.
pub struct PendingBatch {
    pub frame: Frame,
    pub viewport: Viewport,
    pub count: usize,
}

impl ObjectManager {
    /// Expand a selection to include the link closure of types that
    /// duplicate their linked objects, dedupe, keep order.
    fn expand_for_duplication(&self, viewport: Viewport, ids: &[String]) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for id in ids {
            let Some(object) = self.object(viewport, id) else { continue };
            let expanded = if self.registry().behavior(&object.type_tag).duplicate_linked_objects {
                object.objects_to_duplicate(&ViewLookup { manager: self, viewport })
            } else {
                vec![id.clone()]
            };
            for id in expanded {
                if !result.contains(&id) {
                    result.push(id);
                }
            }
        }
        result
    }

    pub fn copy_objects(&mut self, viewport: Viewport, ids: &[String]) {
        self.clipboard = Clipboard {
            ids: self.expand_for_duplication(viewport, ids),
            source_room: self.view(viewport).room_id.clone(),
            cut: false,
        };
    }

    pub fn cut_objects(&mut self, viewport: Viewport, ids: &[String]) {
        self.clipboard = Clipboard {
            ids: self.expand_for_duplication(viewport, ids),
            source_room: self.view(viewport).room_id.clone(),
            cut: true,
        };
    }

    /// Build the paste request for the clipboard content. `None` when the
    /// clipboard is empty or the user declined the size confirmation. A cut
    /// clipboard is consumed by the paste.
    pub fn prepare_paste(
        &mut self,
        viewport: Viewport,
        position: Option<(i64, i64)>,
    ) -> Option<PendingBatch> {
        if self.clipboard.is_empty() {
            return None;
        }
        let count = self.clipboard.ids.len();
        if !self.confirm_batch(count) {
            return None;
        }

        let batch = self.duplicate_request(
            viewport,
            &self.clipboard.ids.clone(),
            &self.clipboard.source_room.clone(),
            self.clipboard.cut,
            position,
        );
        if self.clipboard.cut {
            self.clipboard = Clipboard::default();
        }
        Some(batch)
    }

    /// Build a duplicate request for objects of the current room, bypassing
    /// the clipboard.
    pub fn prepare_duplicate(&self, viewport: Viewport, ids: &[String]) -> Option<PendingBatch> {
        let ids = self.expand_for_duplication(viewport, ids);
        if ids.is_empty() || !self.confirm_batch(ids.len()) {
            return None;
        }
        let source_room = self.view(viewport).room_id.clone();
        Some(self.duplicate_request(viewport, &ids, &source_room, false, None))
    }

    /// Move objects into the room shown by the other viewport: a duplicate
    /// with the cut flag, keeping each object's position.
    pub fn prepare_move_to_other_room(
        &self,
        from: Viewport,
        ids: &[String],
    ) -> Option<PendingBatch> {
        let to = from.other();
        if self.view(to).room_id.is_empty() || ids.is_empty() {
            return None;
        }
        let source_room = self.view(from).room_id.clone();
        let mut batch = self.duplicate_request(to, ids, &source_room, true, None);
        batch.viewport = to;
        Some(batch)
    }

    fn confirm_batch(&self, count: usize) -> bool {
        count <= CONFIRM_THRESHOLD
            || self.bridge().confirm(&format!("This will affect {count} objects. Continue?"))
    }

    fn duplicate_request(
        &self,
        viewport: Viewport,
        ids: &[String],
        source_room: &str,
        cut: bool,
        position: Option<(i64, i64)>,
    ) -> PendingBatch {
        let mut data = Data::new();
        data.insert(
            "objects".to_string(),
            Value::Array(ids.iter().map(|id| Value::from(id.as_str())).collect()),
        );
        data.insert("cut".to_string(), Value::Bool(cut));
        data.insert("sourceRoom".to_string(), Value::from(source_room));
        data.insert("transaction".to_string(), Value::from(self.next_transaction()));
        if let Some((x, y)) = position {
            let mut attributes = serde_json::Map::new();
            attributes.insert("x".to_string(), Value::from(x));
            attributes.insert("y".to_string(), Value::from(y));
            data.insert("attributes".to_string(), Value::Object(attributes));
        }

        let frame = Frame::request("object:duplicate", data)
            .with_room_id(self.view(viewport).room_id.clone());
        PendingBatch { frame, viewport, count: ids.len() }
    }

    /// Install the result of a batch: restack and select the new objects.
    pub fn complete_batch(&mut self, viewport: Viewport, new_ids: &[String]) {
        self.renumber_layers(viewport, false);
        for target in Viewport::ALL {
            self.deselect_all(target);
        }
        for id in new_ids {
            self.select_object(viewport, id);
        }
    }
}

/// Lookup over one viewport, borrowed from the manager.
struct ViewLookup<'a> {
    manager: &'a ObjectManager,
    viewport: Viewport,
}

impl objects::ObjectLookup for ViewLookup<'_> {
    fn object(&self, id: &str) -> Option<&objects::DomainObject> {
        self.manager.object(self.viewport, id)
    }

    fn object_ids(&self) -> Vec<String> {
        self.manager.view(self.viewport).objects.keys().cloned().collect()
    }
}

#[cfg(test)]
#[path = "clipboard_test.rs"]
mod tests;
