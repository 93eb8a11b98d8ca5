//! Test doubles for the wire and the frontend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use frames::{Frame, Viewport};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::bridge::{RefreshMode, ViewBridge};
use crate::dispatcher::Dispatcher;

/// Records every outbound frame; queries answer from a queue of canned
/// replies built against the outgoing request.
#[derive(Default)]
pub struct MockDispatcher {
    pub calls: Mutex<Vec<Frame>>,
    pub queries: Mutex<Vec<Frame>>,
    #[allow(clippy::type_complexity)]
    responses: Mutex<VecDeque<Box<dyn FnOnce(&Frame) -> Frame + Send>>>,
}

impl MockDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a reply builder for the next query, in order.
    pub fn push_response(&self, build: impl FnOnce(&Frame) -> Frame + Send + 'static) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Box::new(build));
        }
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn sent_syscalls(&self) -> Vec<String> {
        self.sent().into_iter().map(|frame| frame.syscall).collect()
    }
}

impl Dispatcher for MockDispatcher {
    fn call(&self, frame: Frame) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(frame);
        }
    }

    fn query(&self, frame: Frame) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        let reply = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .map(|build| build(&frame));
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(frame);
        }
        if let Some(reply) = reply {
            let _ = tx.send(reply);
        }
        rx
    }
}

/// Bridge that records every callback for assertions.
#[derive(Clone, Default)]
pub struct RecordingBridge {
    pub events: Arc<Mutex<Vec<String>>>,
    pub confirm_answer: Arc<Mutex<bool>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())), confirm_answer: Arc::new(Mutex::new(true)) }
    }

    fn record(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn recorded(&self) -> Vec<String> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn set_confirm_answer(&self, answer: bool) {
        if let Ok(mut confirm) = self.confirm_answer.lock() {
            *confirm = answer;
        }
    }
}

impl ViewBridge for RecordingBridge {
    fn refresh(&self, viewport: Viewport, id: &str, mode: RefreshMode) {
        self.record(format!("refresh {viewport} {id} {mode:?}"));
    }

    fn remove_representation(&self, viewport: Viewport, id: &str) {
        self.record(format!("remove {viewport} {id}"));
    }

    fn attribute_changed(&self, id: &str, attribute: &str, value: &Value, local: bool) {
        self.record(format!("changed {id} {attribute}={value} local={local}"));
    }

    fn content_changed(&self, viewport: Viewport, id: &str) {
        self.record(format!("content {viewport} {id}"));
    }

    fn object_created(&self, viewport: Viewport, id: &str) {
        self.record(format!("created {viewport} {id}"));
    }

    fn show_error(&self, message: &str) {
        self.record(format!("error {message}"));
    }

    fn show_info(&self, message: &str) {
        self.record(format!("info {message}"));
    }

    fn chat_message(&self, user: &str, text: &str) {
        self.record(format!("chat {user}: {text}"));
    }

    fn presence_changed(&self, user: &str, present: bool) {
        self.record(format!("presence {user} {present}"));
    }

    fn paintings_updated(&self, user: &str) {
        self.record(format!("paintings {user}"));
    }

    fn selection_marker(&self, id: &str, user: &str, selected: bool) {
        self.record(format!("marker {id} {user} {selected}"));
    }

    fn attention_requested(&self, id: &str, user: &str) {
        self.record(format!("attention {id} {user}"));
    }

    fn logged_in(&self, username: &str, home: &str) {
        self.record(format!("logged_in {username} {home}"));
    }

    fn login_failed(&self, message: &str) {
        self.record(format!("login_failed {message}"));
    }

    fn confirm(&self, message: &str) -> bool {
        self.record(format!("confirm {message}"));
        self.confirm_answer.lock().map(|answer| *answer).unwrap_or(true)
    }

    fn record_navigation(&self, room_id: &str) {
        self.record(format!("navigate {room_id}"));
    }

    fn reset_view(&self, viewport: Viewport) {
        self.record(format!("reset_view {viewport}"));
    }

    fn room_settled(&self, viewport: Viewport) {
        self.record(format!("settled {viewport}"));
    }
}
