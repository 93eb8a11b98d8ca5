//! The GUI seam. Everything the engine needs from a frontend is a method
//! here, with a no-op default so headless use (and tests) need nothing.

use frames::Viewport;
use serde_json::Value;

/// How urgently a representation must be redrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Redraw now.
    Immediate,
    /// Coalesce with other pending redraws.
    Delayed,
}

/// Frontend callbacks. The engine calls these; implementations render.
#[allow(unused_variables)]
pub trait ViewBridge: Send {
    fn refresh(&self, viewport: Viewport, id: &str, mode: RefreshMode) {}

    /// Tear down the on-canvas representation of an object.
    fn remove_representation(&self, viewport: Viewport, id: &str) {}

    /// Sink for every applied attribute change, local and remote.
    fn attribute_changed(&self, id: &str, attribute: &str, value: &Value, local: bool) {}

    /// An object's content payload changed (text types).
    fn content_changed(&self, viewport: Viewport, id: &str) {}

    fn object_created(&self, viewport: Viewport, id: &str) {}

    fn show_error(&self, message: &str) {}

    fn show_info(&self, message: &str) {}

    fn chat_message(&self, user: &str, text: &str) {}

    /// Another participant joined or left the room.
    fn presence_changed(&self, user: &str, present: bool) {}

    /// A user's painting set changed; rooms showing user paintings reload them.
    fn paintings_updated(&self, user: &str) {}

    /// Another participant selected or deselected an object.
    fn selection_marker(&self, id: &str, user: &str, selected: bool) {}

    /// Pull the viewers' attention to one object.
    fn attention_requested(&self, id: &str, user: &str) {}

    fn logged_in(&self, username: &str, home: &str) {}

    fn login_failed(&self, message: &str) {}

    /// Modal choice dialog. Returns the index of the chosen option, if any.
    fn ask_choice(&self, question: &str, options: &[String]) -> Option<usize> {
        None
    }

    /// Size-threshold confirmation for batch operations.
    fn confirm(&self, message: &str) -> bool {
        true
    }

    /// Record a left-viewport room change in the navigation history.
    fn record_navigation(&self, room_id: &str) {}

    /// Reset zoom and pan after a coupled-mode room change.
    fn reset_view(&self, viewport: Viewport) {}

    /// The room finished settling after a load.
    fn room_settled(&self, viewport: Viewport) {}
}

/// Bridge with every callback defaulted. For headless sessions.
pub struct NullBridge;

impl ViewBridge for NullBridge {}
