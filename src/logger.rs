//! Logging capability for producer-side threads.
//!
//! The realtime worker never logs directly; it parks static strings in the
//! sink's mailbox and a producer-side drain emits them through this trait.
//! Producer operations also use it for their own debug trail.

use tracing::{debug, info};

/// Sink-to-host logging interface, supplied at construction.
///
/// Implementations must be cheap and non-blocking enough to call from the
/// transport thread; they are never called from the playback worker.
pub trait SinkLogger: Send + Sync {
    /// Operationally interesting events (device opened, scheduling class,
    /// device errors).
    fn log(&self, message: &str);

    /// Chatty progress detail.
    fn debug(&self, message: &str);
}

/// Default logger backed by `tracing`.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl SinkLogger for TracingLogger {
    fn log(&self, message: &str) {
        info!(target: "platter::sink", "{}", message);
    }

    fn debug(&self, message: &str) {
        debug!(target: "platter::sink", "{}", message);
    }
}
