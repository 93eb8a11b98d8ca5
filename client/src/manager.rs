//! ObjectManager — per-viewport object caches and every local mutation.
//!
//! ARCHITECTURE
//! ============
//! Two viewports, each holding a room object plus the object cache for that
//! room. All attribute mutation goes through the shared schema engine, so
//! coercion and validation match the server exactly. Remote state arrives
//! through [`ObjectManager::object_update`], the single reconciliation
//! point: it builds missing objects, merges existing ones, and emits one
//! change notification per attribute that actually differed.
//!
//! Everything async (room loads, creation, batches) lives in
//! `session`; this module is synchronous and lock-free.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use frames::{Data, FRAME_INDEX, FRAME_MESSAGE, Frame, Viewport};
use objects::{
    DomainObject, ObjectLookup, SetResult, TypeRegistry, loosely_equal, parse_int, truthy,
};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::bridge::{RefreshMode, ViewBridge};
use crate::clipboard::Clipboard;
use crate::debounce::DebouncedSaver;
use crate::dispatcher::Dispatcher;
use crate::materialize::MaterializeBoard;

/// Room shown when none is named.
pub const DEFAULT_ROOM: &str = "public";

/// How long a drag suppresses remote position updates before the lease
/// expires on its own.
const MOVE_LEASE: Duration = Duration::from_secs(3);

/// Layer sentinel for to-front/to-back before renumbering.
const LAYER_SENTINEL: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomLoadError {
    /// Coupled viewports must show two different rooms.
    #[error("room {0} is already displayed in the other viewport")]
    AlreadyDisplayed(String),
}

/// One viewport's worth of state.
#[derive(Default)]
pub struct ViewState {
    pub room_id: String,
    pub room: Option<DomainObject>,
    pub objects: HashMap<String, DomainObject>,
}

/// Lookup over one viewport's cache.
struct CacheLookup<'a> {
    objects: &'a HashMap<String, DomainObject>,
}

impl ObjectLookup for CacheLookup<'_> {
    fn object(&self, id: &str) -> Option<&DomainObject> {
        self.objects.get(id)
    }

    fn object_ids(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }
}

/// Lookup spanning both viewports, for selection-wide predicates.
struct DualLookup<'a> {
    views: &'a [ViewState; 2],
}

impl ObjectLookup for DualLookup<'_> {
    fn object(&self, id: &str) -> Option<&DomainObject> {
        self.views.iter().find_map(|view| view.objects.get(id))
    }

    fn object_ids(&self) -> Vec<String> {
        self.views.iter().flat_map(|view| view.objects.keys().cloned()).collect()
    }
}

/// Identity of the logged-in user, from `session:logged_in`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub username: String,
    pub home: String,
    pub hash: String,
}

pub struct ObjectManager {
    registry: TypeRegistry,
    views: [ViewState; 2],
    coupled: bool,
    dispatcher: Arc<dyn Dispatcher>,
    saver: DebouncedSaver,
    materialize: MaterializeBoard,
    bridge: Box<dyn ViewBridge>,
    pub(crate) clipboard: Clipboard,
    session: Option<SessionInfo>,
    nonce: String,
    seq: AtomicU64,
}

impl ObjectManager {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, bridge: Box<dyn ViewBridge>) -> Self {
        let nonce: String =
            rand::rng().sample_iter(&Alphanumeric).take(8).map(char::from).collect();
        Self {
            registry: TypeRegistry::new(),
            views: [ViewState::default(), ViewState::default()],
            coupled: false,
            saver: DebouncedSaver::new(Arc::clone(&dispatcher)),
            dispatcher,
            materialize: MaterializeBoard::new(),
            bridge,
            clipboard: Clipboard::default(),
            session: None,
            nonce,
            seq: AtomicU64::new(0),
        }
    }

    fn slot(viewport: Viewport) -> usize {
        match viewport {
            Viewport::Left => 0,
            Viewport::Right => 1,
        }
    }

    pub fn view(&self, viewport: Viewport) -> &ViewState {
        &self.views[Self::slot(viewport)]
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn materialize_board(&self) -> MaterializeBoard {
        self.materialize.clone()
    }

    pub fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn session_info(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    pub(crate) fn bridge(&self) -> &dyn ViewBridge {
        self.bridge.as_ref()
    }

    /// Post-creation hook: the object materialized, so restack layers and
    /// hand it to the frontend.
    pub fn finish_creation(&mut self, viewport: Viewport, id: &str) {
        // The creation hands the full object over next, so no per-layer refresh.
        self.renumber_layers(viewport, true);
        self.bridge.object_created(viewport, id);
    }

    /// Couple the two viewports: they must show different rooms and view
    /// resets follow room changes.
    pub fn set_coupled(&mut self, coupled: bool) {
        self.coupled = coupled;
    }

    pub fn is_coupled(&self) -> bool {
        self.coupled
    }

    /// Client-unique monotonic transaction tag for multi-frame operations.
    pub fn next_transaction(&self) -> String {
        format!("{}:{}", self.nonce, self.seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    /// The viewport an object belongs to. Room ids win over cache content;
    /// an unknown id resolves to the primary viewport.
    pub fn index_of_object(&self, id: &str) -> Viewport {
        for viewport in Viewport::ALL {
            if self.view(viewport).room_id == id {
                return viewport;
            }
        }
        for viewport in Viewport::ALL {
            if self.view(viewport).objects.contains_key(id) {
                return viewport;
            }
        }
        Viewport::Left
    }

    pub fn object(&self, viewport: Viewport, id: &str) -> Option<&DomainObject> {
        self.view(viewport).objects.get(id)
    }

    pub fn object_anywhere(&self, id: &str) -> Option<&DomainObject> {
        self.views.iter().find_map(|view| view.objects.get(id))
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    /// Set an attribute through the schema engine. On success the raw
    /// (pre-coercion) value is persisted, debounced unless `forced`, and
    /// change notifications fire with `local = true`.
    pub fn set_attribute(
        &mut self,
        viewport: Viewport,
        id: &str,
        attribute: &str,
        value: Value,
        forced: bool,
    ) -> SetResult {
        self.set_attribute_inner(viewport, id, attribute, value, forced, true)
    }

    fn set_attribute_inner(
        &mut self,
        viewport: Viewport,
        id: &str,
        attribute: &str,
        value: Value,
        forced: bool,
        refresh: bool,
    ) -> SetResult {
        let slot = Self::slot(viewport);
        let raw = value.clone();

        let Some(mut object) = self.views[slot].objects.remove(id) else {
            return self.set_room_attribute(viewport, id, attribute, value, forced);
        };

        let result = {
            let schema = self.registry.schema(&object.type_tag);
            let lookup = CacheLookup { objects: &self.views[slot].objects };
            schema.set(&mut object, attribute, value, &lookup)
        };
        self.views[slot].objects.insert(id.to_string(), object);

        if let SetResult::Applied(coerced) = &result {
            let room_id = self.views[slot].room_id.clone();
            self.saver.schedule(Some(&room_id), id, attribute, raw, forced);
            self.notify_change(viewport, id, attribute, coerced, true);
            if refresh {
                self.bridge.refresh(viewport, id, RefreshMode::Delayed);
            }
        }
        result
    }

    /// Room objects hold attributes too (name, parent); they have no
    /// neighbors, so validation runs against an empty lookup.
    fn set_room_attribute(
        &mut self,
        viewport: Viewport,
        id: &str,
        attribute: &str,
        value: Value,
        forced: bool,
    ) -> SetResult {
        let slot = Self::slot(viewport);
        let raw = value.clone();
        if self.views[slot].room_id != id {
            warn!(%id, %viewport, "setting attribute on unknown object");
            return SetResult::Unchanged;
        }
        let Some(room) = self.views[slot].room.as_mut() else {
            return SetResult::Unchanged;
        };
        let result =
            self.registry.schema(&room.type_tag).set(room, attribute, value, &objects::EmptyLookup);
        if let SetResult::Applied(coerced) = &result {
            self.saver.schedule(Some(id), id, attribute, raw, forced);
            let coerced = coerced.clone();
            self.notify_change(viewport, id, attribute, &coerced, true);
        }
        result
    }

    pub fn get_attribute(&self, viewport: Viewport, id: &str, attribute: &str) -> Value {
        let view = self.view(viewport);
        if let Some(object) = view.objects.get(id) {
            return self.registry.schema(&object.type_tag).get(object, attribute);
        }
        if view.room_id == id {
            if let Some(room) = &view.room {
                return self.registry.schema(&room.type_tag).get(room, attribute);
            }
        }
        Value::Null
    }

    /// Run the attribute's changed hook, then the frontend sink.
    fn notify_change(
        &self,
        viewport: Viewport,
        id: &str,
        attribute: &str,
        value: &Value,
        local: bool,
    ) {
        let view = self.view(viewport);
        let object = view.objects.get(id).or(view.room.as_ref());
        if let Some(object) = object {
            let hook = self
                .registry
                .schema(&object.type_tag)
                .attribute(attribute)
                .and_then(|attr| attr.changed);
            if let Some(hook) = hook {
                hook(object, value, local);
            }
        }
        self.bridge.attribute_changed(id, attribute, value, local);
    }

    // =========================================================================
    // RECONCILIATION
    // =========================================================================

    /// Apply a replicated object state. Builds the object if it is new,
    /// merges and diffs if it exists, and skips entirely while a local drag
    /// holds the move lease.
    pub fn object_update(&mut self, data: Map<String, Value>) {
        let Some(id) = object_id(&data) else {
            warn!("object update without id");
            return;
        };

        let viewport = self.viewport_for_update(&data, &id);
        let slot = Self::slot(viewport);

        if self.views[slot].room_id == id {
            if let Some(room) = self.views[slot].room.as_mut() {
                for (key, value) in data {
                    room.data.insert(key, value);
                }
            } else {
                self.views[slot].room = Some(DomainObject::from_data(data));
            }
            return;
        }

        if self.views[slot].objects.contains_key(&id) {
            self.merge_update(viewport, &id, data);
        } else {
            self.build_object(viewport, data);
            let behavior = {
                let Some(object) = self.object_anywhere(&id) else { return };
                self.registry.behavior(&object.type_tag).clone()
            };
            if behavior.graphical {
                // Deferred text types wait for their content frame before
                // the first paint.
                let mode = if self.coupled && !behavior.defer_refresh {
                    RefreshMode::Immediate
                } else {
                    RefreshMode::Delayed
                };
                self.bridge.refresh(self.index_of_object(&id), &id, mode);
            }
            self.materialize.notify(&id);
        }
    }

    fn merge_update(&mut self, viewport: Viewport, id: &str, data: Map<String, Value>) {
        let slot = Self::slot(viewport);
        let mut changed: Vec<(String, Value)> = Vec::new();
        {
            let Some(object) = self.views[slot].objects.get_mut(id) else { return };
            if object.is_moving() {
                debug!(%id, "skipping update while move lease is held");
                return;
            }
            for (key, value) in data {
                let old = object.data.get(&key).cloned().unwrap_or(Value::Null);
                if !loosely_equal(&old, &value) {
                    changed.push((key.clone(), value.clone()));
                }
                object.data.insert(key, value);
            }
        }
        for (attribute, value) in &changed {
            self.notify_change(viewport, id, attribute, value, false);
        }
        if !changed.is_empty() {
            self.bridge.refresh(viewport, id, RefreshMode::Delayed);
        }
    }

    /// Pick the viewport for an incoming update: the room named by the data
    /// wins, then wherever the object already lives.
    fn viewport_for_update(&self, data: &Map<String, Value>, id: &str) -> Viewport {
        if let Some(room) = data.get("inRoom").and_then(Value::as_str) {
            for viewport in Viewport::ALL {
                if self.view(viewport).room_id == room {
                    return viewport;
                }
            }
        }
        self.index_of_object(id)
    }

    /// Instantiate an object from replicated data and install it: as the
    /// viewport's room object when its id matches the current room id,
    /// otherwise into the cache of the room it names.
    pub fn build_object(&mut self, viewport: Viewport, data: Map<String, Value>) -> String {
        let slot = Self::slot(viewport);
        let object = DomainObject::from_data(data);
        let id = object.id.clone();

        if id == self.views[slot].room_id {
            self.views[slot].room = Some(object);
            return id;
        }

        let target = match object.room_id() {
            Some(room) if self.view(viewport.other()).room_id == room => viewport.other(),
            _ => viewport,
        };
        self.views[Self::slot(target)].objects.insert(id.clone(), object);
        id
    }

    /// Tear down the local representation; no network traffic.
    pub fn remove_locally(&mut self, data: &Map<String, Value>) {
        let Some(id) = object_id(data) else { return };
        for viewport in Viewport::ALL {
            let slot = Self::slot(viewport);
            if self.views[slot].objects.remove(&id).is_some() {
                self.bridge.remove_representation(viewport, &id);
            }
        }
        self.saver.discard(&id);
    }

    /// Delete an object: detach it from every link list, then delete, both
    /// under one transaction tag.
    pub fn remove(&mut self, viewport: Viewport, id: &str) {
        let room_id = self.view(viewport).room_id.clone();
        let transaction = self.next_transaction();

        let mut detach = Data::new();
        detach.insert("id".to_string(), Value::from(id));
        detach.insert("transaction".to_string(), Value::from(transaction.clone()));
        self.dispatcher.call(Frame::request("object:detach", detach).with_room_id(&room_id));

        let mut delete = Data::new();
        delete.insert("id".to_string(), Value::from(id));
        delete.insert("transaction".to_string(), Value::from(transaction));
        self.dispatcher.call(Frame::request("object:delete", delete).with_room_id(&room_id));
    }

    // =========================================================================
    // ROOM LIFECYCLE
    // =========================================================================

    /// First phase of a room load: validate and build the `room:enter`
    /// request. The caller queries the server and, on success, calls
    /// [`Self::complete_room_load`].
    pub fn begin_room_load(
        &self,
        viewport: Viewport,
        room_id: &str,
    ) -> Result<Frame, RoomLoadError> {
        let room_id = normalize_room(room_id);
        if self.coupled && self.view(viewport.other()).room_id == room_id {
            return Err(RoomLoadError::AlreadyDisplayed(room_id));
        }
        Ok(Frame::request("room:enter", Data::new())
            .with_room_id(room_id)
            .with_data(FRAME_INDEX, viewport.as_str()))
    }

    /// Second phase: evict the viewport and install the new room id.
    pub fn complete_room_load(&mut self, viewport: Viewport, room_id: &str, from_browser: bool) {
        let room_id = normalize_room(room_id);
        self.saver.flush();
        self.evict(viewport);
        self.views[Self::slot(viewport)].room_id = room_id.clone();
        self.materialize.reset();

        if viewport == Viewport::Left && !from_browser {
            self.bridge.record_navigation(&room_id);
        }
        if self.coupled {
            self.bridge.reset_view(viewport);
        }
    }

    /// Leave a room. With `server_call` the server is told first; either
    /// way the viewport is evicted locally.
    pub fn leave_room(&mut self, viewport: Viewport, server_call: bool) {
        let room_id = self.view(viewport).room_id.clone();
        if server_call && !room_id.is_empty() {
            self.dispatcher.call(
                Frame::request("room:leave", Data::new())
                    .with_room_id(room_id)
                    .with_data(FRAME_INDEX, viewport.as_str()),
            );
        }
        self.saver.flush();
        self.evict(viewport);
        self.views[Self::slot(viewport)].room_id = String::new();
    }

    fn evict(&mut self, viewport: Viewport) {
        let slot = Self::slot(viewport);
        let ids: Vec<String> = self.views[slot].objects.keys().cloned().collect();
        for id in ids {
            self.bridge.remove_representation(viewport, &id);
        }
        self.views[slot].objects.clear();
        self.views[slot].room = None;
    }

    /// The post-load settle point, fired by the session driver after the
    /// initial object burst has quieted down.
    pub fn room_settled(&self, viewport: Viewport) {
        self.bridge.room_settled(viewport);
    }

    // =========================================================================
    // LAYERS
    // =========================================================================

    fn layer_of(&self, object: &DomainObject) -> i64 {
        parse_int(&self.registry.schema(&object.type_tag).get(object, "layer")).unwrap_or(0)
    }

    /// Object ids back-to-front. Total order: always-on-top types above
    /// everything, then layer, then id as the tiebreak.
    pub fn objects_by_layer(&self, viewport: Viewport, inverted: bool) -> Vec<String> {
        let view = self.view(viewport);
        let mut entries: Vec<(bool, i64, &String)> = view
            .objects
            .values()
            .map(|object| {
                let on_top = self.registry.behavior(&object.type_tag).always_on_top;
                (on_top, self.layer_of(object), &object.id)
            })
            .collect();
        entries.sort();
        let ids: Vec<String> = entries.into_iter().map(|(_, _, id)| id.clone()).collect();
        if inverted { ids.into_iter().rev().collect() } else { ids }
    }

    /// Reassign dense layer numbers 1..N by the current stacking order.
    /// With `no_update` the writes still persist and notify, but the
    /// frontend refresh is skipped (bulk restacks repaint once afterwards).
    pub fn renumber_layers(&mut self, viewport: Viewport, no_update: bool) {
        let ids = self.objects_by_layer(viewport, false);
        for (position, id) in ids.iter().enumerate() {
            let layer = i64::try_from(position).unwrap_or(0) + 1;
            self.set_attribute_inner(viewport, id, "layer", Value::from(layer), false, !no_update);
        }
    }

    pub fn bring_to_front(&mut self, viewport: Viewport, id: &str) {
        self.set_attribute(viewport, id, "layer", Value::from(LAYER_SENTINEL), false);
        self.renumber_layers(viewport, false);
    }

    pub fn send_to_back(&mut self, viewport: Viewport, id: &str) {
        self.set_attribute(viewport, id, "layer", Value::from(-LAYER_SENTINEL), false);
        self.renumber_layers(viewport, false);
    }

    // =========================================================================
    // MOVE LEASE
    // =========================================================================

    pub fn begin_object_move(&mut self, viewport: Viewport, id: &str) {
        let slot = Self::slot(viewport);
        if let Some(object) = self.views[slot].objects.get_mut(id) {
            if object.may_move() {
                object.begin_move(MOVE_LEASE);
            }
        }
    }

    pub fn end_object_move(&mut self, viewport: Viewport, id: &str) {
        let slot = Self::slot(viewport);
        if let Some(object) = self.views[slot].objects.get_mut(id) {
            object.end_move();
        }
    }

    // =========================================================================
    // SELECTION AND ACTIONS
    // =========================================================================

    pub fn select_object(&mut self, viewport: Viewport, id: &str) {
        let slot = Self::slot(viewport);
        if let Some(object) = self.views[slot].objects.get_mut(id) {
            object.select();
            self.inform_about_selection(viewport, id);
        }
    }

    pub fn deselect_object(&mut self, viewport: Viewport, id: &str) {
        let slot = Self::slot(viewport);
        if let Some(object) = self.views[slot].objects.get_mut(id) {
            object.deselect();
            self.inform_about_deselection(viewport, id);
        }
    }

    pub fn deselect_all(&mut self, viewport: Viewport) {
        let slot = Self::slot(viewport);
        let selected: Vec<String> = self.views[slot]
            .objects
            .values()
            .filter(|o| o.is_selected())
            .map(|o| o.id.clone())
            .collect();
        for id in selected {
            self.deselect_object(viewport, &id);
        }
    }

    /// Selected objects across both viewports.
    pub fn selected(&self) -> Vec<(Viewport, String)> {
        let mut result = Vec::new();
        for viewport in Viewport::ALL {
            let mut ids: Vec<String> = self
                .view(viewport)
                .objects
                .values()
                .filter(|object| object.is_selected())
                .map(|object| object.id.clone())
                .collect();
            ids.sort();
            result.extend(ids.into_iter().map(|id| (viewport, id)));
        }
        result
    }

    /// Action names valid for the whole selection: the intersection of each
    /// selected object's action list, with visibility predicates applied.
    pub fn actions_for_selected(&self) -> Vec<String> {
        let selected = self.selected();
        if selected.is_empty() {
            return Vec::new();
        }
        let selected_ids: Vec<String> = selected.iter().map(|(_, id)| id.clone()).collect();
        let lookup = DualLookup { views: &self.views };

        let mut common: Option<Vec<String>> = None;
        for (viewport, id) in &selected {
            let Some(object) = self.object(*viewport, id) else { continue };
            let names: Vec<String> = self
                .registry
                .actions(&object.type_tag)
                .iter()
                .filter(|action| {
                    action.visibility.is_none_or(|visible| visible(&lookup, &selected_ids))
                })
                .map(|action| action.name.to_string())
                .collect();
            common = Some(match common {
                None => names,
                Some(previous) => {
                    previous.into_iter().filter(|name| names.contains(name)).collect()
                }
            });
        }
        common.unwrap_or_default()
    }

    /// Execute a synchronous action across the selection. Returns false for
    /// actions the session layer must drive (Duplicate).
    pub fn perform_action_for_selected(&mut self, name: &str) -> bool {
        let selected = self.selected();
        match name {
            "Delete" => {
                for (viewport, id) in selected {
                    self.remove(viewport, &id);
                }
            }
            "Group" => {
                let group = self.next_group_number();
                for (viewport, id) in selected {
                    self.set_attribute(viewport, &id, "group", Value::from(group), false);
                }
            }
            "Ungroup" => {
                for (viewport, id) in selected {
                    self.set_attribute(viewport, &id, "group", Value::from(0), false);
                }
            }
            "Link" => self.link_selected(&selected),
            "ToFront" => {
                for (viewport, id) in selected {
                    self.bring_to_front(viewport, &id);
                }
            }
            "ToBack" => {
                for (viewport, id) in selected {
                    self.send_to_back(viewport, &id);
                }
            }
            _ => return false,
        }
        true
    }

    fn next_group_number(&self) -> i64 {
        self.views
            .iter()
            .flat_map(|view| view.objects.values())
            .map(DomainObject::group)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Link every selected object to the first one selected.
    fn link_selected(&mut self, selected: &[(Viewport, String)]) {
        let Some((_, hub)) = selected.first() else { return };
        let hub = hub.clone();
        for (viewport, id) in selected.iter().skip(1) {
            let Some(object) = self.object(*viewport, id) else { continue };
            let mut links = object.link_ids();
            if !links.contains(&hub) {
                links.push(hub.clone());
                let value = Value::Array(links.into_iter().map(Value::from).collect());
                self.set_attribute(*viewport, id, "link", value, false);
            }
        }
    }

    /// Make every hidden object in the viewport visible again.
    pub fn show_all(&mut self, viewport: Viewport) {
        let slot = Self::slot(viewport);
        let hidden: Vec<String> = self.views[slot]
            .objects
            .values()
            .filter(|object| object.data.get("visible").is_some_and(|v| !truthy(v)))
            .map(|object| object.id.clone())
            .collect();
        for id in hidden {
            self.set_attribute(viewport, &id, "visible", Value::Bool(true), false);
        }
    }

    // =========================================================================
    // AWARENESS
    // =========================================================================

    fn chat(&self, viewport: Viewport, data: Data) {
        let room_id = self.view(viewport).room_id.clone();
        if room_id.is_empty() {
            return;
        }
        self.dispatcher.call(Frame::request("chat:inform", data).with_room_id(room_id));
    }

    /// Broadcast a chat line to the primary viewport's room.
    pub fn inform(&self, text: &str) {
        let mut data = Data::new();
        data.insert("text".to_string(), Value::from(text));
        self.chat(Viewport::Left, data);
    }

    /// Send a chat line to one participant, addressed by user hash.
    pub fn tell_one(&self, user_hash: &str, text: &str) {
        let mut data = Data::new();
        data.insert("text".to_string(), Value::from(text));
        data.insert("to".to_string(), Value::from(user_hash));
        self.chat(Viewport::Left, data);
    }

    pub fn inform_about_selection(&self, viewport: Viewport, id: &str) {
        let mut data = Data::new();
        data.insert("selected".to_string(), Value::from(id));
        self.chat(viewport, data);
    }

    pub fn inform_about_deselection(&self, viewport: Viewport, id: &str) {
        let mut data = Data::new();
        data.insert("deselected".to_string(), Value::from(id));
        self.chat(viewport, data);
    }

    pub fn request_attention_to_object(&self, viewport: Viewport, id: &str) {
        let mut data = Data::new();
        data.insert("attention".to_string(), Value::from(id));
        self.chat(viewport, data);
    }

    pub fn report_bug(&self, text: &str) {
        let mut data = Data::new();
        data.insert("text".to_string(), Value::from(text));
        data.insert("room".to_string(), Value::from(self.view(Viewport::Left).room_id.clone()));
        self.dispatcher.call(Frame::request("report:bug", data));
    }

    // =========================================================================
    // PUSH EVENTS
    // =========================================================================

    /// Dispatch a server push frame.
    pub fn handle_event(&mut self, frame: &Frame) {
        match frame.syscall.as_str() {
            "object:update" => {
                let data: Map<String, Value> = frame.data.clone().into_iter().collect();
                self.object_update(data);
            }
            "object:delete" => {
                let data: Map<String, Value> = frame.data.clone().into_iter().collect();
                self.remove_locally(&data);
            }
            "object:content" => self.handle_content(frame),
            "container:new_object" => {
                if let Some(id) = frame.str_field("container") {
                    let viewport = self.index_of_object(id);
                    self.bridge.refresh(viewport, id, RefreshMode::Immediate);
                }
            }
            "session:logged_in" => {
                let info = SessionInfo {
                    username: frame.str_field("username").unwrap_or_default().to_string(),
                    home: frame.str_field("home").unwrap_or(DEFAULT_ROOM).to_string(),
                    hash: frame.str_field("hash").unwrap_or_default().to_string(),
                };
                self.bridge.logged_in(&info.username, &info.home);
                self.session = Some(info);
            }
            "session:login_failed" => {
                self.bridge.login_failed(frame.str_field(FRAME_MESSAGE).unwrap_or("login failed"));
            }
            "gateway:error" => {
                let message = frame.str_field(FRAME_MESSAGE).unwrap_or("unknown error");
                warn!(%message, "server error push");
                self.bridge.show_error(message);
            }
            "gateway:infotext" => {
                self.bridge.show_info(frame.str_field(FRAME_MESSAGE).unwrap_or_default());
            }
            "chat:inform" => self.handle_chat(frame),
            "paintings:update" => {
                let user = frame.str_field("user").or(frame.from.as_deref());
                if let Some(user) = user {
                    self.bridge.paintings_updated(user);
                }
            }
            "choice:ask" => self.handle_choice(frame),
            "room:entered" => {
                debug!(room_id = ?frame.room_id, "room entered");
            }
            other => {
                debug!(syscall = other, "unhandled push event");
            }
        }
    }

    fn handle_content(&mut self, frame: &Frame) {
        let Some(id) = frame.str_field("id").map(String::from) else { return };
        let viewport = self.index_of_object(&id);
        let slot = Self::slot(viewport);
        if let Some(object) = self.views[slot].objects.get_mut(&id) {
            object.data.insert("hasContent".to_string(), Value::Bool(true));
        }
        self.bridge.content_changed(viewport, &id);
        self.bridge.refresh(viewport, &id, RefreshMode::Delayed);
    }

    /// Chat frames multiplex text, presence, selection markers, and
    /// attention requests.
    fn handle_chat(&mut self, frame: &Frame) {
        let user = frame.from.as_deref().unwrap_or("unknown");
        if let Some(text) = frame.str_field("text") {
            self.bridge.chat_message(user, text);
        } else if let Some(id) = frame.str_field("selected") {
            self.bridge.selection_marker(id, user, true);
        } else if let Some(id) = frame.str_field("deselected") {
            self.bridge.selection_marker(id, user, false);
        } else if let Some(id) = frame.str_field("attention") {
            self.bridge.attention_requested(id, user);
        } else if let Some(joined) = frame.data.get("present").and_then(Value::as_bool) {
            self.bridge.presence_changed(user, joined);
        }
    }

    fn handle_choice(&mut self, frame: &Frame) {
        let question = frame.str_field("question").unwrap_or_default().to_string();
        let options: Vec<String> = frame
            .data
            .get("options")
            .and_then(Value::as_array)
            .map(|items| {
                items.iter().filter_map(Value::as_str).map(String::from).collect()
            })
            .unwrap_or_default();
        if let Some(choice) = self.bridge.ask_choice(&question, &options) {
            let mut data = Data::new();
            data.insert("choice".to_string(), Value::from(choice));
            self.dispatcher.call(frame.done_with(data));
        }
    }
}

/// Extract and normalize the id field of a replicated data map.
pub(crate) fn object_id(data: &Map<String, Value>) -> Option<String> {
    match data.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn normalize_room(room_id: &str) -> String {
    if room_id.is_empty() { DEFAULT_ROOM.to_string() } else { room_id.to_string() }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
