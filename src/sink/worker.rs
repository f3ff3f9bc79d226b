//! The playback worker thread.
//!
//! Runs at realtime round-robin priority when permitted, normal priority
//! otherwise, and drives every state transition that touches the device:
//! open and hardware-parameter negotiation, period writes, pause/resume,
//! drain and teardown. The sink mutex is held throughout except across
//! kernel-level blocking calls (open, write, pause, drain, discard, recover)
//! and condvar waits; any state read before such a release is re-checked
//! after the lock is retaken.
//!
//! Nothing on this thread allocates for error reporting or calls the logger
//! capability. Messages leave through the static-string mailbox in
//! `Shared`, drained by the producer-side `LogDrain`.

use super::{Shared, SinkInner, SinkState};
use crate::device::{DeviceError, PcmDevice, PcmDriver};
use crate::perf::PerfLog;
use crate::sink::ring::{BUFFER_SECONDS, MAX_PERIODS_PER_SECOND};
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

/// Backoff between attempts to open a failing device.
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(3);

/// How long to sit out a device that reports its buffer full; roughly one
/// period at the target configuration.
const FULL_DEVICE_WAIT: Duration = Duration::from_millis(100);

type Guard<'a, P> = MutexGuard<'a, Shared<P>>;

pub(super) struct Worker<P> {
    inner: Arc<SinkInner<P>>,
    driver: Arc<dyn PcmDriver>,
    card: String,
    /// The open device, if any. Thread-private: only the worker opens,
    /// writes, and closes it.
    device: Option<Box<dyn PcmDevice>>,
    /// Copy of the period being written, captured under the lock so the
    /// write can run without it.
    scratch: Vec<u8>,
    perf: Option<PerfLog>,
}

impl<P> Worker<P> {
    pub(super) fn new(
        inner: Arc<SinkInner<P>>,
        driver: Arc<dyn PcmDriver>,
        card: String,
        log_performance: bool,
    ) -> Self {
        Worker {
            inner,
            driver,
            card,
            device: None,
            scratch: Vec::new(),
            perf: if log_performance { PerfLog::open() } else { None },
        }
    }

    pub(super) fn run(mut self) {
        let inner = Arc::clone(&self.inner);

        post_log(&inner, apply_realtime_priority(), None);

        // If this thread unwinds outside shutdown, producers must find out.
        let _watch = DeathWatch {
            inner: Arc::clone(&self.inner),
        };

        self.thread_loop(&inner);
    }

    fn thread_loop(&mut self, inner: &SinkInner<P>) {
        let mut shared = inner.lock();
        loop {
            match shared.state {
                SinkState::Closed | SinkState::Paused => {
                    shared = inner.cond.wait(shared).unwrap();
                }
                SinkState::Starting | SinkState::Playing => {
                    shared = self.play_once(inner, shared);
                }
                SinkState::Pausing => {
                    shared = self.pause_device(inner, shared);
                }
                SinkState::Resume => {
                    shared = self.resume_device(inner, shared);
                }
                SinkState::Draining if shared.ring.data_size() > 0 => {
                    shared = self.play_once(inner, shared);
                }
                SinkState::Draining | SinkState::Closing | SinkState::Shutdown => {
                    // Close path. A drained sink lets the device play out;
                    // everything else discards.
                    let drain = shared.state == SinkState::Draining;
                    shared = self.teardown(inner, shared, drain);
                    if shared.state == SinkState::Shutdown {
                        return;
                    }
                    shared.ring.reset();
                    shared.spec = None;
                    shared.device_error = None;
                    shared.prev_playing = None;
                    shared.prev_device_error = None;
                    shared.state = SinkState::Closed;
                    inner.notify();
                }
            }
        }
    }

    /// One play step: make sure the device is open, then write as many
    /// whole periods as are buffered (or wait for data).
    fn play_once<'a>(&mut self, inner: &'a SinkInner<P>, mut shared: Guard<'a, P>) -> Guard<'a, P> {
        let mut dev = match self.device.take() {
            Some(dev) => dev,
            None => match self.open_device(inner, shared) {
                (s, Some(dev)) => {
                    shared = s;
                    dev
                }
                (s, None) => return s,
            },
        };

        // The open above (or a pause/stop racing the previous write) may
        // have changed the state while the lock was released.
        if !playable(shared.state) {
            self.device = Some(dev);
            return shared;
        }

        if shared.ring.data_size() < shared.ring.period_size() {
            let wait_start = self.perf.as_ref().map(|_| SystemTime::now());
            shared = inner.cond.wait(shared).unwrap();
            if let (Some(perf), Some(t0)) = (self.perf.as_mut(), wait_start) {
                perf.data(t0, SystemTime::now(), shared.ring.data_size());
            }
            self.device = Some(dev);
            return shared;
        }

        while playable(shared.state) && shared.ring.data_size() >= shared.ring.period_size() {
            self.scratch.clear();
            self.scratch.extend_from_slice(shared.ring.play_period());
            let frames = shared.period_frames;

            drop(shared);
            let write_start = self.perf.as_ref().map(|_| SystemTime::now());
            let result = dev.write_period(&self.scratch, frames);
            if let (Some(perf), Some(t0)) = (self.perf.as_mut(), write_start) {
                perf.write(t0, SystemTime::now());
            }
            shared = inner.lock();

            match result {
                Ok(frames_written) if frames_written > 0 => {
                    shared.ring.advance_period();
                    // Room opened up and the audible packet may have moved.
                    inner.notify();
                }
                Ok(_) | Err(DeviceError::Busy) => {
                    // Device buffer is full; give it about a period.
                    let (s, _) = inner.cond.wait_timeout(shared, FULL_DEVICE_WAIT).unwrap();
                    self.device = Some(dev);
                    return s;
                }
                Err(err) if err.is_recoverable() => {
                    drop(shared);
                    let recovered = dev.recover(err);
                    shared = inner.lock();
                    if let Err(err) = recovered {
                        return self.write_failed(inner, shared, err);
                    }
                    // Recovered; the same period is retried next pass.
                }
                Err(err) => {
                    return self.write_failed(inner, shared, err);
                }
            }
        }

        self.device = Some(dev);
        shared
    }

    /// Fatal write error: the device was already dropped by the caller
    /// taking it out of `self.device`; just make sure it stays closed and
    /// the producer hears about it.
    fn write_failed<'a>(
        &mut self,
        inner: &'a SinkInner<P>,
        mut shared: Guard<'a, P>,
        err: DeviceError,
    ) -> Guard<'a, P> {
        self.device = None;
        shared.log_message = Some("error writing to device");
        shared.log_param = Some(err.description());
        shared.device_error = Some(err.description());
        inner.notify();
        shared
    }

    /// Open and configure the device. On success the caller gets the handle
    /// and the ring is sized for the negotiated period; on failure the
    /// device error is posted and the worker backs off before the caller
    /// retries.
    fn open_device<'a>(
        &mut self,
        inner: &'a SinkInner<P>,
        mut shared: Guard<'a, P>,
    ) -> (Guard<'a, P>, Option<Box<dyn PcmDevice>>) {
        let spec = match shared.spec {
            Some(spec) => spec,
            // No format on file; nothing to open until the next start().
            None => {
                let s = inner.cond.wait(shared).unwrap();
                return (s, None);
            }
        };
        let starting = shared.state == SinkState::Starting;

        drop(shared);
        let opened = self
            .driver
            .open(&self.card)
            .and_then(|mut dev| dev.configure(&spec).map(|params| (dev, params)));
        shared = inner.lock();

        let (dev, params) = match opened {
            Ok(ok) => ok,
            Err(err) => {
                shared.device_error = Some(err.description());
                inner.notify();
                return (self.open_backoff(inner, shared), None);
            }
        };

        // A period smaller than this would outgrow the packet slot array.
        if params.period_frames == 0
            || spec.rate as usize / params.period_frames >= MAX_PERIODS_PER_SECOND
        {
            drop(dev);
            shared.device_error = Some("period set by device is too small");
            inner.notify();
            return (self.open_backoff(inner, shared), None);
        }

        let period_size = params.period_frames * spec.frame_bytes();
        let mut buffer_frames = spec.rate as usize * BUFFER_SECONDS;
        buffer_frames -= buffer_frames % params.period_frames;
        let buffer_size = buffer_frames * spec.frame_bytes();

        if period_size != shared.ring.period_size() || buffer_size != shared.ring.buffer_size() {
            if shared.ring.configure(period_size, buffer_size).is_err() {
                drop(dev);
                shared.log_message = Some("out of memory allocating buffer");
                shared.log_param = None;
                shared.device_error = Some("out of memory allocating buffer");
                inner.notify();
                return (self.open_backoff(inner, shared), None);
            }
        }

        shared.period_frames = params.period_frames;
        shared.swap_bytes = params.swap_bytes;
        shared.device_error = None;
        if shared.log_message.is_none() {
            shared.log_message = Some(if starting { "opened device" } else { "reopened device" });
            shared.log_param = Some(if params.swap_bytes {
                "swapping bytes"
            } else {
                "not swapping bytes"
            });
        }
        if shared.state == SinkState::Starting {
            // The transport may put frames into the buffer from here on.
            shared.state = SinkState::Playing;
        }
        inner.notify();

        (shared, Some(dev))
    }

    /// Interruptible sleep between open attempts, so a bad device is not
    /// busy-looped but stop() still gets through promptly.
    fn open_backoff<'a>(&self, inner: &'a SinkInner<P>, mut shared: Guard<'a, P>) -> Guard<'a, P> {
        let deadline = Instant::now() + OPEN_RETRY_DELAY;
        loop {
            if !playable(shared.state) {
                return shared;
            }
            let now = Instant::now();
            if now >= deadline {
                return shared;
            }
            let (s, _) = inner.cond.wait_timeout(shared, deadline - now).unwrap();
            shared = s;
        }
    }

    /// Pause the device. A pause failure closes the device (the next play
    /// step reopens it), but the sink still lands in `Paused`; sound has
    /// stopped either way.
    fn pause_device<'a>(
        &mut self,
        inner: &'a SinkInner<P>,
        mut shared: Guard<'a, P>,
    ) -> Guard<'a, P> {
        if let Some(mut dev) = self.device.take() {
            drop(shared);
            let res = dev.pause(true);
            match res {
                Ok(()) => {
                    shared = inner.lock();
                    self.device = Some(dev);
                }
                Err(err) => {
                    let _ = dev.discard();
                    drop(dev);
                    shared = inner.lock();
                    shared.log_message = Some("error pausing device");
                    shared.log_param = Some(err.description());
                    shared.device_error = Some(err.description());
                }
            }
        }
        // A stop() may have superseded the pause while the lock was
        // released; only complete the transition we were asked for.
        if shared.state == SinkState::Pausing {
            shared.state = SinkState::Paused;
        }
        inner.notify();
        shared
    }

    /// Unpause the device and restore the state the pause interrupted.
    /// Failure closes the device; the restored play state reopens it.
    fn resume_device<'a>(
        &mut self,
        inner: &'a SinkInner<P>,
        mut shared: Guard<'a, P>,
    ) -> Guard<'a, P> {
        if let Some(mut dev) = self.device.take() {
            drop(shared);
            let res = dev.pause(false);
            match res {
                Ok(()) => {
                    shared = inner.lock();
                    self.device = Some(dev);
                }
                Err(err) => {
                    let _ = dev.discard();
                    drop(dev);
                    shared = inner.lock();
                    shared.log_message = Some("error resuming device");
                    shared.log_param = Some(err.description());
                    shared.device_error = Some(err.description());
                }
            }
        }
        // As with pause: a racing stop() wins.
        if shared.state == SinkState::Resume {
            shared.state = shared.paused_in_state;
        }
        inner.notify();
        shared
    }

    /// Close the device, draining or discarding its internal buffer first.
    fn teardown<'a>(
        &mut self,
        inner: &'a SinkInner<P>,
        mut shared: Guard<'a, P>,
        drain: bool,
    ) -> Guard<'a, P> {
        if let Some(mut dev) = self.device.take() {
            drop(shared);
            let res = if drain { dev.drain() } else { dev.discard() };
            drop(dev);
            shared = inner.lock();
            match res {
                Err(err) => {
                    shared.log_message = Some(if drain {
                        "error draining device"
                    } else {
                        "error dropping device buffer"
                    });
                    shared.log_param = Some(err.description());
                }
                Ok(()) => {
                    if shared.log_message.is_none() {
                        shared.log_message = Some("closed device");
                        shared.log_param = None;
                    }
                }
            }
        }
        shared
    }
}

/// States in which the worker keeps feeding the device.
fn playable(state: SinkState) -> bool {
    matches!(
        state,
        SinkState::Starting | SinkState::Playing | SinkState::Draining
    )
}

fn post_log<P>(inner: &SinkInner<P>, message: &'static str, param: Option<&'static str>) {
    let mut shared = inner.lock();
    shared.log_message = Some(message);
    shared.log_param = param;
    inner.notify();
}

/// Ask for round-robin scheduling at the minimum RR priority; fall back to
/// whatever we were given when the kernel says no.
fn apply_realtime_priority() -> &'static str {
    unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_RR);
        if min >= 0 {
            let param = libc::sched_param {
                sched_priority: min,
            };
            if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) == 0 {
                return "running at SCHED_RR priority";
            }
        }
    }
    "running at normal priority"
}

/// Posted if the worker dies outside an orderly shutdown, so producer calls
/// observe the failure instead of blocking on a thread that is gone.
struct DeathWatch<P> {
    inner: Arc<SinkInner<P>>,
}

impl<P> Drop for DeathWatch<P> {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.inner.shared.lock() {
            if shared.state != SinkState::Shutdown {
                shared.device_error = Some("player thread died");
                shared.log_message = Some("player thread died");
                shared.log_param = None;
                shared.state = SinkState::Closed;
                self.inner.notify();
            }
        }
    }
}
