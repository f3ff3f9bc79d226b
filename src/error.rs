//! Error types for the playback sink.
//!
//! Producer-facing failures (invalid state, unsupported format) are returned
//! synchronously as `SinkError`. Device-level failures never surface as
//! `Err` from producer calls; they travel through the sink's `device_error`
//! slot instead (see `sink`).

use crate::device::DeviceError;
use crate::sink::SinkState;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Main error type for the playback sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// An operation was called in a state that does not permit it.
    #[error("{op}: invalid state {state}")]
    InvalidState { op: &'static str, state: SinkState },

    /// Only 16-bit signed samples are supported.
    #[error("only 2 bytes per sample supported, got {0}")]
    UnsupportedSampleWidth(u32),

    /// The device could not be opened at construction time.
    #[error("cannot open {card}: {source}")]
    DeviceOpen {
        card: String,
        #[source]
        source: DeviceError,
    },

    /// The playback worker thread could not be spawned.
    #[error("failed to spawn playback thread: {0}")]
    Thread(#[from] std::io::Error),

    /// Configuration file errors.
    #[error("configuration error: {0}")]
    Config(String),
}
