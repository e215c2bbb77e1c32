//! Engine status notifications.
//!
//! The engine reports load progress and failures through an observer injected
//! at context creation rather than a hardcoded logging backend. Hosts that
//! want the lines elsewhere (a journal, a viewer connection) implement
//! [`EventSink`] themselves.

use std::sync::Arc;

/// Receiver for human-readable engine status lines.
pub trait EventSink: Send + Sync {
    /// A status line, e.g. "Load sound: horn.wav" or "File size: 176444".
    fn notify(&self, message: &str);

    /// A track-level failure line. Defaults to `notify`.
    fn error(&self, message: &str) {
        self.notify(message);
    }
}

/// Default sink: forwards status to `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, message: &str) {
        tracing::info!(target: "railsound", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::warn!(target: "railsound", "{message}");
    }
}

/// Sink that discards everything. Used by tests.
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _message: &str) {}
}

/// Convenience constructor for the default tracing-backed sink.
pub fn tracing_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}
