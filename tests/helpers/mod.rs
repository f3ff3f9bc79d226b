//! Scripted PCM device for exercising the sink without hardware.

use platter::device::{DeviceError, NegotiatedParams, PcmDevice, PcmDriver, StreamSpec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared script and observation state for a [`MockDriver`].
///
/// Everything is interior-mutable so a test can inject faults while the
/// worker is running. Empty fault queues mean "succeed".
pub struct MockScript {
    /// Outcomes for successive `open` calls; drained front-first.
    pub open_results: Mutex<VecDeque<Result<(), DeviceError>>>,
    /// Outcomes for successive `write_period` calls; `Ok(())` writes fully.
    pub write_results: Mutex<VecDeque<Result<(), DeviceError>>>,
    /// Error injected into the next `pause`/`resume` call.
    pub pause_result: Mutex<Option<DeviceError>>,
    /// Period size the device negotiates.
    pub period_frames: AtomicUsize,
    /// Which S16 byte orders the card accepts.
    pub accepts_big_endian: AtomicBool,
    pub accepts_little_endian: AtomicBool,

    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub recovers: AtomicUsize,
    pub drains: AtomicUsize,
    pub discards: AtomicUsize,
    /// Arguments of every successful pause/unpause call.
    pub pauses: Mutex<Vec<bool>>,
    /// Concatenation of every successfully written period.
    pub written: Mutex<Vec<u8>>,
}

impl MockScript {
    pub fn new() -> Arc<Self> {
        Arc::new(MockScript {
            open_results: Mutex::new(VecDeque::new()),
            write_results: Mutex::new(VecDeque::new()),
            pause_result: Mutex::new(None),
            period_frames: AtomicUsize::new(1024),
            accepts_big_endian: AtomicBool::new(true),
            accepts_little_endian: AtomicBool::new(true),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            recovers: AtomicUsize::new(0),
            drains: AtomicUsize::new(0),
            discards: AtomicUsize::new(0),
            pauses: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next_open(&self, err: DeviceError) {
        self.open_results.lock().unwrap().push_back(Err(err));
    }

    pub fn push_write(&self, result: Result<(), DeviceError>) {
        self.write_results.lock().unwrap().push_back(result);
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

pub struct MockDriver {
    pub script: Arc<MockScript>,
}

impl PcmDriver for MockDriver {
    fn open(&self, _card: &str) -> Result<Box<dyn PcmDevice>, DeviceError> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.script.open_results.lock().unwrap().pop_front() {
            result?;
        }
        Ok(Box::new(MockPcm {
            script: Arc::clone(&self.script),
        }))
    }
}

struct MockPcm {
    script: Arc<MockScript>,
}

impl Drop for MockPcm {
    fn drop(&mut self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl PcmDevice for MockPcm {
    fn configure(&mut self, spec: &StreamSpec) -> Result<NegotiatedParams, DeviceError> {
        let requested_ok = if spec.big_endian {
            self.script.accepts_big_endian.load(Ordering::SeqCst)
        } else {
            self.script.accepts_little_endian.load(Ordering::SeqCst)
        };
        let other_ok = if spec.big_endian {
            self.script.accepts_little_endian.load(Ordering::SeqCst)
        } else {
            self.script.accepts_big_endian.load(Ordering::SeqCst)
        };

        let swap_bytes = if requested_ok {
            false
        } else if other_ok {
            true
        } else {
            return Err(DeviceError::Failed("couldn't set device param: format"));
        };

        Ok(NegotiatedParams {
            period_frames: self.script.period_frames.load(Ordering::SeqCst),
            swap_bytes,
        })
    }

    fn write_period(&mut self, data: &[u8], frames: usize) -> Result<usize, DeviceError> {
        if let Some(result) = self.script.write_results.lock().unwrap().pop_front() {
            result?;
        }
        self.script.written.lock().unwrap().extend_from_slice(data);
        Ok(frames)
    }

    fn recover(&mut self, err: DeviceError) -> Result<(), DeviceError> {
        assert!(err.is_recoverable(), "recover called with {:?}", err);
        self.script.recovers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self, enable: bool) -> Result<(), DeviceError> {
        if let Some(err) = self.script.pause_result.lock().unwrap().take() {
            return Err(err);
        }
        self.script.pauses.lock().unwrap().push(enable);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        self.script.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn discard(&mut self) -> Result<(), DeviceError> {
        self.script.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
