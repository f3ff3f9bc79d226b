//! The realtime playback sink.
//!
//! One [`AlsaSink`] manages one card: a ring buffer of packet-tagged PCM
//! bytes, a high-priority worker thread that feeds the device, and a small
//! producer API for the transport. The transport is single-threaded against
//! the sink; the worker is the only other thread touching shared state, and
//! everything serializes on one mutex with one broadcast condvar.
//!
//! Producer calls that can block (`add_packet`, `drain`, `pause`, `resume`,
//! `stop`) return once something the transport cares about has happened:
//! bytes accepted, the audible packet changed, the device error changed, or
//! the sink closed.

pub mod ring;
pub mod state;
mod worker;

pub use state::SinkState;

use crate::config::SinkConfig;
use crate::device::alsa::AlsaDriver;
use crate::device::{PcmDriver, StreamSpec};
use crate::error::{Result, SinkError};
use crate::logger::SinkLogger;
use ring::PeriodRing;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use worker::Worker;

/// State shared between the producer and the worker, guarded by the sink
/// mutex. Byte positions live inside `ring`; everything else is the state
/// machine, the stream format, and the two static-string outboxes
/// (`device_error` and the log mailbox).
struct Shared<P> {
    state: SinkState,
    /// Which state a pause interrupted, so resume can restore it.
    paused_in_state: SinkState,
    /// Stream format from `start()`; `None` while closed.
    spec: Option<StreamSpec>,
    /// Negotiated period size in frames; zero until the device is opened.
    period_frames: usize,
    /// Deposits must byte-swap for the device.
    swap_bytes: bool,
    /// Last device-level failure, or `None` while the device is healthy.
    device_error: Option<&'static str>,
    /// One-slot mailbox for messages originating inside the worker. The
    /// worker may overwrite an undrained message; losing one is acceptable.
    log_message: Option<&'static str>,
    log_param: Option<&'static str>,
    ring: PeriodRing<P>,
    /// What the previous producer call observed, so `add_packet`/`drain`
    /// can detect changes across call boundaries.
    prev_playing: Option<Arc<P>>,
    prev_device_error: Option<&'static str>,
}

impl<P> Shared<P> {
    fn new() -> Self {
        Shared {
            state: SinkState::Closed,
            paused_in_state: SinkState::Playing,
            spec: None,
            period_frames: 0,
            swap_bytes: false,
            device_error: None,
            log_message: None,
            log_param: None,
            ring: PeriodRing::new(),
            prev_playing: None,
            prev_device_error: None,
        }
    }
}

struct SinkInner<P> {
    shared: Mutex<Shared<P>>,
    cond: Condvar,
}

impl<P> SinkInner<P> {
    fn lock(&self) -> MutexGuard<'_, Shared<P>> {
        self.shared.lock().unwrap()
    }

    /// Every wakeup is a broadcast: the producer and the worker wait on the
    /// same condvar for different predicates.
    fn notify(&self) {
        self.cond.notify_all();
    }
}

/// Result of one `add_packet` call.
#[derive(Debug, Clone)]
pub struct PacketStatus<P> {
    /// Bytes absorbed from the supplied slice; zero once the sink has
    /// closed. A partial count means the caller retries with the rest.
    pub stored: usize,
    /// Packet whose bytes are currently audible, if any.
    pub playing: Option<Arc<P>>,
    /// Last device failure, if any.
    pub device_error: Option<&'static str>,
}

/// Result of one non-terminal `drain` call.
#[derive(Debug, Clone)]
pub struct DrainStatus<P> {
    pub playing: Option<Arc<P>>,
    pub device_error: Option<&'static str>,
}

/// Outcome of one pass through the producer's wait loop.
enum Step<P> {
    /// The sink reached a closed state; the outer call returns its terminal
    /// shape.
    Closed {
        playing: Option<Arc<P>>,
        device_error: Option<&'static str>,
    },
    Progress {
        stored: usize,
        /// The audible packet or the device error differs from what the
        /// previous pass observed.
        changed: bool,
        playing: Option<Arc<P>>,
        device_error: Option<&'static str>,
    },
}

/// Realtime playback sink for one card.
///
/// Constructed with a card name (already translated, see
/// [`SinkConfig::device_name`]) and a logger capability. Construction probes
/// the device once and spawns the worker; dropping the sink shuts the worker
/// down and joins it.
///
/// `P` is the caller's packet identity type. The sink holds shared
/// references to packets through the ring's period slots and releases them
/// as periods are overwritten or the buffer resets.
pub struct AlsaSink<P> {
    inner: Arc<SinkInner<P>>,
    logger: Arc<dyn SinkLogger>,
    worker: Option<JoinHandle<()>>,
}

impl<P: Send + Sync + 'static> AlsaSink<P> {
    /// Open a sink on the real ALSA backend.
    pub fn new(config: &SinkConfig, logger: Arc<dyn SinkLogger>) -> Result<Self> {
        Self::with_driver(Arc::new(AlsaDriver), config, logger)
    }

    /// Open a sink on an arbitrary device driver (tests use a scripted one).
    pub fn with_driver(
        driver: Arc<dyn PcmDriver>,
        config: &SinkConfig,
        logger: Arc<dyn SinkLogger>,
    ) -> Result<Self> {
        let card = config.device_name();
        let inner = Arc::new(SinkInner {
            shared: Mutex::new(Shared::new()),
            cond: Condvar::new(),
        });

        // Probe the card up front to surface access problems at
        // construction time; the worker reopens it when playback starts.
        log_fmt(&*logger, false, "opening card", Some(&card));
        match driver.open(&card) {
            Ok(device) => drop(device),
            Err(err) => {
                if config.start_without_device {
                    log_fmt(&*logger, true, "error opening card", Some(err.description()));
                    log_fmt(&*logger, true, "proceeding since start_without_device is set", None);
                    inner.lock().device_error = Some(err.description());
                } else {
                    return Err(SinkError::DeviceOpen { card, source: err });
                }
            }
        }

        let worker = Worker::new(
            Arc::clone(&inner),
            driver,
            card,
            config.log_performance,
        );
        let handle = thread::Builder::new()
            .name("platter-sink".into())
            .spawn(move || worker.run())?;

        Ok(AlsaSink {
            inner,
            logger,
            worker: Some(handle),
        })
    }
}

impl<P> AlsaSink<P> {
    /// Begin a playback run.
    ///
    /// Valid only while closed; stores the stream format and hands control
    /// to the worker, which opens the device. Returns without waiting; the
    /// first `add_packet` blocks until the sink is ready (or reports the
    /// device error if it is not).
    pub fn start(
        &self,
        channels: u32,
        bytes_per_sample: u32,
        rate: u32,
        big_endian: bool,
    ) -> Result<()> {
        if bytes_per_sample != 2 {
            return Err(SinkError::UnsupportedSampleWidth(bytes_per_sample));
        }

        let mut shared = self.inner.lock();
        if shared.state != SinkState::Closed {
            return Err(SinkError::InvalidState {
                op: "start",
                state: shared.state,
            });
        }
        shared.spec = Some(StreamSpec {
            channels,
            rate,
            big_endian,
        });
        shared.state = SinkState::Starting;
        self.inner.notify();
        drop(shared);

        self.debug1("starting sink");
        Ok(())
    }

    /// Deposit bytes belonging to `packet`.
    ///
    /// Blocks until bytes are absorbed, the audible packet changes, the
    /// device error changes, or the sink closes. `stored` may be less than
    /// `data.len()`; the caller supplies the remainder on its next call.
    pub fn add_packet(&self, packet: &Arc<P>, data: &[u8]) -> PacketStatus<P> {
        loop {
            match self.playing_once(Some((packet, data))) {
                Step::Closed {
                    playing,
                    device_error,
                } => {
                    self.debug1("add_packet: sink closed");
                    return PacketStatus {
                        stored: 0,
                        playing,
                        device_error,
                    };
                }
                Step::Progress {
                    stored,
                    changed,
                    playing,
                    device_error,
                } => {
                    if stored > 0 || changed {
                        return PacketStatus {
                            stored,
                            playing,
                            device_error,
                        };
                    }
                }
            }
        }
    }

    /// End the stream and play out what is buffered.
    ///
    /// The first call in `Playing` pads the trailing partial period and
    /// switches to `Draining`. Each call then blocks like `add_packet` and
    /// returns the current status; `None` is the terminal marker, meaning
    /// the sink has closed and no further bytes will reach the device.
    pub fn drain(&self) -> Option<DrainStatus<P>> {
        let shared = self.inner.lock();
        match shared.state {
            SinkState::Playing => {
                let mut shared = shared;
                shared.ring.pad_partial_period();
                shared.state = SinkState::Draining;
                self.inner.notify();
                drop(shared);
                self.debug1("drain: switching to state draining");
            }
            SinkState::Draining => drop(shared),
            state if !state.accepts_data() => {
                drop(shared);
                self.debug2("drain: already drained in state", &state.to_string());
                return None;
            }
            _ => drop(shared),
        }

        loop {
            match self.playing_once(None) {
                Step::Closed { .. } => {
                    self.debug1("drain: sink closed");
                    return None;
                }
                Step::Progress {
                    changed,
                    playing,
                    device_error,
                    ..
                } => {
                    if changed {
                        return Some(DrainStatus {
                            playing,
                            device_error,
                        });
                    }
                }
            }
        }
    }

    /// Pause playback. Valid in `Playing` or `Draining`; blocks until the
    /// worker has paused the device. Returns true when the sink is paused.
    /// Sound has ceased either way, even if the device had to be closed.
    pub fn pause(&self) -> bool {
        let mut shared = self.inner.lock();
        match shared.state {
            SinkState::Playing | SinkState::Draining => {
                shared.paused_in_state = shared.state;
                shared.state = SinkState::Pausing;
                self.inner.notify();
                while shared.state == SinkState::Pausing {
                    shared = self.inner.cond.wait(shared).unwrap();
                }
                shared.state == SinkState::Paused
            }
            state => {
                drop(shared);
                self.debug2("pause: invalid state", &state.to_string());
                false
            }
        }
    }

    /// Resume a paused sink, restoring the state the pause interrupted.
    /// Blocks until the worker has acted. A no-op in any other state.
    pub fn resume(&self) {
        let mut shared = self.inner.lock();
        if shared.state != SinkState::Paused {
            let state = shared.state;
            drop(shared);
            self.debug2("resume: invalid state", &state.to_string());
            return;
        }
        shared.state = SinkState::Resume;
        self.inner.notify();
        while shared.state == SinkState::Resume {
            shared = self.inner.cond.wait(shared).unwrap();
        }
    }

    /// Tear down the device and reset the sink to `Closed`.
    ///
    /// Valid from any state; an immediate no-op when already closed. Blocks
    /// until the worker has dropped the device buffer, closed the handle,
    /// and reset all buffered state.
    pub fn stop(&self) {
        let mut shared = self.inner.lock();
        if matches!(shared.state, SinkState::Closed | SinkState::Shutdown) {
            return;
        }
        shared.state = SinkState::Closing;
        self.inner.notify();
        while !matches!(shared.state, SinkState::Closed | SinkState::Shutdown) {
            shared = self.inner.cond.wait(shared).unwrap();
        }
        drop(shared);
        self.debug1("sink stopped");
    }

    /// Handle for draining worker log messages on a producer-side thread.
    pub fn log_drain(&self) -> LogDrain<P> {
        LogDrain {
            inner: Arc::clone(&self.inner),
            logger: Arc::clone(&self.logger),
        }
    }

    /// One pass of the producer wait loop, entirely inside one critical
    /// section. Optionally deposits bytes; always comes back with the
    /// current (playing, device_error) pair and whether either differs from
    /// the previous pass (including passes from earlier calls; the memory
    /// lives on the sink).
    fn playing_once(&self, deposit: Option<(&Arc<P>, &[u8])>) -> Step<P> {
        let mut shared = self.inner.lock();

        // Sit out transient states instead of spinning through them.
        if matches!(shared.state, SinkState::Starting | SinkState::Closing) {
            shared = self.inner.cond.wait(shared).unwrap();
        }

        let mut stored = 0;
        if shared.state.accepts_data() {
            match deposit {
                Some((packet, data)) => {
                    // A zero-length deposit degenerates to a status wait.
                    if shared.ring.is_full() || data.is_empty() {
                        shared = self.inner.cond.wait(shared).unwrap();
                    }
                    // The wait released the lock; anything may have changed.
                    if shared.state.accepts_data() && !shared.ring.is_full() {
                        let swap = shared.swap_bytes;
                        stored = shared.ring.deposit(packet, data, swap);
                        if stored > 0 {
                            self.inner.notify();
                        }
                    }
                }
                None => {
                    // End of stream: top up the last period so the worker
                    // can write it, then just track status changes.
                    if shared.ring.pad_partial_period() > 0 {
                        self.inner.notify();
                    } else {
                        shared = self.inner.cond.wait(shared).unwrap();
                    }
                }
            }
        }

        let closed = matches!(shared.state, SinkState::Closed | SinkState::Shutdown);
        let playing = shared.ring.playing_packet();
        let device_error = shared.device_error;

        let changed = !same_packet(&playing, &shared.prev_playing)
            || device_error != shared.prev_device_error;
        shared.prev_playing = playing.clone();
        shared.prev_device_error = device_error;

        if closed {
            Step::Closed {
                playing,
                device_error,
            }
        } else {
            Step::Progress {
                stored,
                changed,
                playing,
                device_error,
            }
        }
    }

    fn debug1(&self, message: &str) {
        log_fmt(&*self.logger, false, message, None);
    }

    fn debug2(&self, message: &str, param: &str) {
        log_fmt(&*self.logger, false, message, Some(param));
    }
}

impl<P> Drop for AlsaSink<P> {
    fn drop(&mut self) {
        // Stop is safe in every state and gets rid of the device handle.
        self.stop();

        let mut shared = self.inner.lock();
        shared.state = SinkState::Shutdown;
        self.inner.notify();
        drop(shared);

        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Producer-side drain loop for the worker's log mailbox.
///
/// Holds only the sink internals, so the owning [`AlsaSink`] can be dropped
/// while a thread runs [`LogDrain::run`]; the loop exits once the sink
/// reaches shutdown.
pub struct LogDrain<P> {
    inner: Arc<SinkInner<P>>,
    logger: Arc<dyn SinkLogger>,
}

impl<P> LogDrain<P> {
    /// Block on the mailbox, emitting each message through the logger.
    /// Returns when the sink shuts down.
    pub fn run(self) {
        loop {
            let (message, param) = {
                let mut shared = self.inner.lock();
                while shared.log_message.is_none() && shared.state != SinkState::Shutdown {
                    shared = self.inner.cond.wait(shared).unwrap();
                }
                match shared.log_message.take() {
                    Some(message) => (message, shared.log_param.take()),
                    None => return,
                }
            };
            log_fmt(&*self.logger, true, message, param);
        }
    }
}

/// True when both options point at the same packet (or both are empty).
fn same_packet<P>(a: &Option<Arc<P>>, b: &Option<Arc<P>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Format a sink message for the logger capability. `important` selects
/// `log` over `debug`.
fn log_fmt(logger: &dyn SinkLogger, important: bool, message: &str, param: Option<&str>) {
    let line = match param {
        Some(param) => format!("alsa_sink: {}: {}", message, param),
        None => format!("alsa_sink: {}", message),
    };
    if important {
        logger.log(&line);
    } else {
        logger.debug(&line);
    }
}
