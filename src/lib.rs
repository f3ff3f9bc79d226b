//! # platter
//!
//! Realtime ALSA playback sink for a CD/music player daemon.
//!
//! **Purpose:** bridge a single-threaded transport and a blocking PCM
//! device: a ring buffer of packet-tagged 16-bit audio, a high-priority
//! playback worker with device error recovery and automatic reopen, and a
//! producer API that reports which packet is currently audible.
//!
//! **Architecture:** one mutex + condvar coordinate the transport thread,
//! the worker, and an optional log-drain thread; the device sits behind the
//! [`device::PcmDriver`] seam (ALSA in production, scripted in tests).

pub mod config;
pub mod device;
pub mod error;
pub mod logger;
pub mod perf;
pub mod sink;

pub use config::SinkConfig;
pub use error::{Result, SinkError};
pub use logger::{SinkLogger, TracingLogger};
pub use sink::{AlsaSink, DrainStatus, LogDrain, PacketStatus, SinkState};
