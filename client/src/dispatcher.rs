//! The wire seam. The engine never touches a socket directly; it hands
//! frames to a [`Dispatcher`] and the transport layer does the rest.

use frames::Frame;
use tokio::sync::oneshot;

/// Outbound frame transport.
///
/// `call` is fire-and-forget; `query` returns a receiver that resolves with
/// the terminal response frame (done or error) correlated by `parent_id`.
/// A dropped sender means the connection went away mid-request.
pub trait Dispatcher: Send + Sync {
    fn call(&self, frame: Frame);

    fn query(&self, frame: Frame) -> oneshot::Receiver<Frame>;
}
