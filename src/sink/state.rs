//! Sink state machine values.

use std::fmt;

/// State of the playback sink.
///
/// `Starting`, `Pausing`, `Resume` and `Closing` are transient: the producer
/// requests them and the worker completes the device interaction before
/// moving on. The states in which the producer may deposit bytes are exactly
/// those where [`SinkState::accepts_data`] returns true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Idle; device closed.
    Closed,
    /// Worker is opening the device.
    Starting,
    /// Accepting data and writing periods to the device.
    Playing,
    /// Worker must pause the device.
    Pausing,
    /// Device paused; the buffer still accepts data.
    Paused,
    /// Worker must unpause the device.
    Resume,
    /// No more new data; playing out what is buffered.
    Draining,
    /// Worker must tear down the device and reset.
    Closing,
    /// Worker must exit.
    Shutdown,
}

impl SinkState {
    /// True when the producer may deposit bytes into the ring buffer.
    pub fn accepts_data(&self) -> bool {
        matches!(
            self,
            SinkState::Playing
                | SinkState::Pausing
                | SinkState::Paused
                | SinkState::Resume
                | SinkState::Draining
        )
    }
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkState::Closed => "closed",
            SinkState::Starting => "starting",
            SinkState::Playing => "playing",
            SinkState::Pausing => "pausing",
            SinkState::Paused => "paused",
            SinkState::Resume => "resume",
            SinkState::Draining => "draining",
            SinkState::Closing => "closing",
            SinkState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_states() {
        assert!(SinkState::Playing.accepts_data());
        assert!(SinkState::Pausing.accepts_data());
        assert!(SinkState::Paused.accepts_data());
        assert!(SinkState::Resume.accepts_data());
        assert!(SinkState::Draining.accepts_data());

        assert!(!SinkState::Closed.accepts_data());
        assert!(!SinkState::Starting.accepts_data());
        assert!(!SinkState::Closing.accepts_data());
        assert!(!SinkState::Shutdown.accepts_data());
    }
}
