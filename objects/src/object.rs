//! The shared object contract: identity, the raw data map, links, grouping,
//! and the bounded move lease.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::schema::{ObjectLookup, parse_int};

/// Direction of a link relative to the object asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// The other object lists this one in its `link` attribute.
    In,
    /// This object lists the other one.
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedObject {
    pub id: String,
    pub direction: LinkDirection,
}

/// One workspace object. The `data` map is the replicated state; everything
/// else is local session state that never leaves the process.
#[derive(Debug, Clone)]
pub struct DomainObject {
    pub id: String,
    pub type_tag: String,
    pub data: Map<String, Value>,
    selected: bool,
    move_lease: Option<Instant>,
}

impl DomainObject {
    #[must_use]
    pub fn new(id: &str, type_tag: &str) -> Self {
        let mut data = Map::new();
        data.insert("id".to_string(), Value::from(id));
        data.insert("type".to_string(), Value::from(type_tag));
        Self {
            id: id.to_string(),
            type_tag: type_tag.to_string(),
            data,
            selected: false,
            move_lease: None,
        }
    }

    /// Rebuild an object from a replicated data map. Identity comes from the
    /// map itself.
    #[must_use]
    pub fn from_data(data: Map<String, Value>) -> Self {
        let id = data.get("id").map(value_as_id).unwrap_or_default();
        let type_tag =
            data.get("type").and_then(Value::as_str).unwrap_or("UnknownObject").to_string();
        Self { id, type_tag, data, selected: false, move_lease: None }
    }

    #[must_use]
    pub fn raw(&self, name: &str) -> Value {
        self.data.get(name).cloned().unwrap_or(Value::Null)
    }

    /// The room this object belongs to.
    #[must_use]
    pub fn room_id(&self) -> Option<String> {
        self.data.get("inRoom").map(value_as_id).filter(|s| !s.is_empty())
    }

    // ===== GEOMETRY AND LOCKING =====

    #[must_use]
    pub fn position(&self) -> (i64, i64) {
        (
            self.data.get("x").and_then(|v| parse_int(v)).unwrap_or(0),
            self.data.get("y").and_then(|v| parse_int(v)).unwrap_or(0),
        )
    }

    #[must_use]
    pub fn dimensions(&self) -> (i64, i64) {
        (
            self.data.get("width").and_then(|v| parse_int(v)).unwrap_or(100),
            self.data.get("height").and_then(|v| parse_int(v)).unwrap_or(100),
        )
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.data.get("locked").is_some_and(truthy)
    }

    #[must_use]
    pub fn may_move(&self) -> bool {
        !self.is_locked()
    }

    #[must_use]
    pub fn may_resize(&self) -> bool {
        !self.is_locked()
    }

    // ===== SELECTION =====

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn select(&mut self) {
        self.selected = true;
    }

    pub fn deselect(&mut self) {
        self.selected = false;
    }

    // ===== MOVE LEASE =====

    /// Mark the object as being dragged. Remote position updates are skipped
    /// until the lease expires or [`Self::end_move`] runs; the deadline keeps
    /// a dropped drag from suppressing updates forever.
    pub fn begin_move(&mut self, lease: Duration) {
        self.move_lease = Some(Instant::now() + lease);
    }

    pub fn end_move(&mut self) {
        self.move_lease = None;
    }

    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.move_lease.is_some_and(|deadline| Instant::now() < deadline)
    }

    // ===== LINKS =====

    /// Outgoing link targets. The attribute is normally an array of ids but
    /// a bare string from older data is tolerated.
    #[must_use]
    pub fn link_ids(&self) -> Vec<String> {
        match self.data.get("link") {
            Some(Value::Array(items)) => items.iter().map(value_as_id).collect(),
            Some(value @ (Value::String(_) | Value::Number(_))) => vec![value_as_id(value)],
            _ => Vec::new(),
        }
    }

    /// Links in both directions: this object's `link` entries plus every
    /// object in the lookup that links back to this one.
    #[must_use]
    pub fn linked_objects(&self, lookup: &dyn ObjectLookup) -> Vec<LinkedObject> {
        let mut result: Vec<LinkedObject> = self
            .link_ids()
            .into_iter()
            .map(|id| LinkedObject { id, direction: LinkDirection::Out })
            .collect();

        for id in lookup.object_ids() {
            if id == self.id {
                continue;
            }
            let Some(other) = lookup.object(&id) else { continue };
            if other.link_ids().contains(&self.id)
                && !result.iter().any(|l| l.id == id)
            {
                result.push(LinkedObject { id, direction: LinkDirection::In });
            }
        }
        result
    }

    #[must_use]
    pub fn has_linked_objects(&self, lookup: &dyn ObjectLookup) -> bool {
        !self.linked_objects(lookup).is_empty()
    }

    /// Transitive closure over links starting at this object. Used when a
    /// type duplicates its linked objects along with itself.
    #[must_use]
    pub fn objects_to_duplicate(&self, lookup: &dyn ObjectLookup) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut result = Vec::new();

        seen.insert(self.id.clone());
        queue.push_back(self.id.clone());

        while let Some(id) = queue.pop_front() {
            result.push(id.clone());
            let linked = if id == self.id {
                self.linked_objects(lookup)
            } else {
                match lookup.object(&id) {
                    Some(obj) => obj.linked_objects(lookup),
                    None => Vec::new(),
                }
            };
            for link in linked {
                if seen.insert(link.id.clone()) {
                    queue.push_back(link.id);
                }
            }
        }
        result
    }

    /// Rewrite link targets after duplication, using the old-id to new-id
    /// translation map. Unknown targets are kept.
    pub fn update_link_ids(&mut self, translation: &HashMap<String, String>) {
        let updated: Vec<Value> = self
            .link_ids()
            .into_iter()
            .map(|id| Value::from(translation.get(&id).cloned().unwrap_or(id)))
            .collect();
        if !updated.is_empty() || self.data.contains_key("link") {
            self.data.insert("link".to_string(), Value::Array(updated));
        }
    }

    // ===== GROUPS =====

    /// Group membership. Zero means ungrouped.
    #[must_use]
    pub fn group(&self) -> i64 {
        self.data.get("group").and_then(|v| parse_int(v)).unwrap_or(0)
    }

    #[must_use]
    pub fn in_same_group(&self, other: &DomainObject) -> bool {
        let group = self.group();
        group != 0 && group == other.group()
    }
}

/// Boolean attributes arrive as booleans, numbers, or strings.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        _ => false,
    }
}

/// Ids appear as strings or numbers in replicated data; normalize to string.
fn value_as_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
