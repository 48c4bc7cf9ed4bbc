pub mod fs;

use std::sync::Arc;

use anyhow::Result;
use remora_common::frame::Frame;

/// Opens recording sessions.
pub trait SessionStore: Send + Sync {
    fn open(&self) -> Result<Arc<dyn SessionHandle>>;
}

/// An open, append-only recording of labelled frames.
pub trait SessionHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Appends one frame. Fails once the session is closed.
    fn put(&self, frame: &Frame, angle: f32, throttle: f32, milliseconds: f32) -> Result<()>;

    /// Finalizes the session. Waits for a `put` in progress; later `put`s fail.
    fn close(&self);
}
