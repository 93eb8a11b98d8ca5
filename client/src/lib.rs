//! Client-side workspace engine.
//!
//! ARCHITECTURE
//! ============
//! The engine is GUI-free. [`ObjectManager`] owns the per-viewport object
//! caches and performs every mutation through the shared attribute engine;
//! rendering, dialogs, and navigation history sit behind the [`ViewBridge`]
//! trait, and the wire sits behind [`Dispatcher`]. The synchronous core
//! lives in `manager`/`clipboard`; the flows that must await the server
//! (room loads, creation, batch duplication) live in `session` and drive
//! the manager through an `Arc<Mutex<_>>`.

pub mod bridge;
pub mod clipboard;
pub mod debounce;
pub mod dispatcher;
pub mod manager;
pub mod materialize;
pub mod session;

#[cfg(test)]
pub mod test_support;

pub use bridge::{NullBridge, RefreshMode, ViewBridge};
pub use clipboard::{Clipboard, PendingBatch};
pub use debounce::DebouncedSaver;
pub use dispatcher::Dispatcher;
pub use manager::{DEFAULT_ROOM, ObjectManager, RoomLoadError, SessionInfo, ViewState};
pub use materialize::{MaterializeBoard, MaterializeTimeout};
pub use session::{ClientError, Session};
