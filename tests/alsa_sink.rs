//! End-to-end sink scenarios against a scripted device.
//!
//! Geometry used throughout: 8 kHz stereo 16-bit with a 1024-frame period,
//! so one period is 4096 bytes and the ring holds 39 periods.

mod helpers;

use helpers::{MockDriver, MockScript};
use platter::device::DeviceError;
use platter::{AlsaSink, SinkConfig, SinkError, SinkLogger, TracingLogger};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const RATE: u32 = 8000;
const PERIOD_BYTES: usize = 1024 * 2 * 2;

fn test_config() -> SinkConfig {
    SinkConfig {
        card: "default".into(),
        start_without_device: false,
        log_performance: false,
    }
}

fn make_sink(script: &Arc<MockScript>, config: &SinkConfig) -> AlsaSink<u32> {
    let driver = Arc::new(MockDriver {
        script: Arc::clone(script),
    });
    AlsaSink::with_driver(driver, config, Arc::new(TracingLogger)).expect("sink construction")
}

/// Push every byte of `data` into the sink, retrying partial stores.
fn feed(sink: &AlsaSink<u32>, packet: &Arc<u32>, mut data: &[u8]) {
    while !data.is_empty() {
        let status = sink.add_packet(packet, data);
        assert!(
            !(status.stored == 0 && status.playing.is_none() && status.device_error.is_none()),
            "sink closed while feeding"
        );
        data = &data[status.stored..];
    }
}

fn drain_all(sink: &AlsaSink<u32>) {
    for _ in 0..10_000 {
        if sink.drain().is_none() {
            return;
        }
    }
    panic!("drain did not reach the terminal marker");
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn happy_path_plays_and_drains() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();

    let data = pattern(2 * PERIOD_BYTES);
    let mut pending: &[u8] = &data;
    while !pending.is_empty() {
        let status = sink.add_packet(&p1, pending);
        if status.stored > 0 {
            // The deposit and the status snapshot share one critical
            // section, so freshly stored data makes its packet audible.
            assert!(Arc::ptr_eq(status.playing.as_ref().unwrap(), &p1));
        }
        pending = &pending[status.stored..];
    }

    drain_all(&sink);

    // Draining reaches Closed without stop(): the sink rejects new data.
    let status = sink.add_packet(&p1, &data);
    assert_eq!(status.stored, 0);
    assert!(status.playing.is_none());
    assert!(status.device_error.is_none());

    // Every accepted byte reached the device, unpadded (two whole periods),
    // and the device buffer was drained rather than dropped.
    assert_eq!(script.written_bytes(), data);
    assert_eq!(script.drains.load(Ordering::SeqCst), 1);
    assert_eq!(script.discards.load(Ordering::SeqCst), 0);
}

#[test]
fn drain_pads_the_trailing_partial_period() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();

    let data = pattern(6000);
    feed(&sink, &p1, &data);
    drain_all(&sink);

    let written = script.written_bytes();
    assert_eq!(written.len(), 2 * PERIOD_BYTES);
    assert_eq!(&written[..6000], &data[..]);
    assert!(written[6000..].iter().all(|&b| b == 0));
}

#[test]
fn start_rejects_unsupported_sample_width() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());

    match sink.start(2, 4, RATE, false) {
        Err(SinkError::UnsupportedSampleWidth(4)) => {}
        other => panic!("expected unsupported sample width, got {:?}", other.err()),
    }
}

#[test]
fn start_is_only_valid_while_closed() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());

    sink.start(2, 2, RATE, false).unwrap();
    match sink.start(2, 2, RATE, false) {
        Err(SinkError::InvalidState { op: "start", .. }) => {}
        other => panic!("expected invalid state, got {:?}", other.err()),
    }
    sink.stop();

    // Back in Closed, start works again.
    sink.start(2, 2, RATE, false).unwrap();
}

#[test]
fn stop_mid_play_resets_and_releases_the_device() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();
    feed(&sink, &p1, &pattern(2 * PERIOD_BYTES));
    sink.stop();

    // Device buffer dropped, handle closed (probe + playback handle).
    assert_eq!(script.discards.load(Ordering::SeqCst), 1);
    assert_eq!(script.drains.load(Ordering::SeqCst), 0);
    assert_eq!(script.closes.load(Ordering::SeqCst), 2);

    let status = sink.add_packet(&p1, &[0u8; 16]);
    assert_eq!(status.stored, 0);
    assert!(status.playing.is_none());
    assert!(status.device_error.is_none());
}

#[test]
fn stop_is_idempotent_from_closed() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());
    sink.stop();
    sink.stop();
}

#[test]
fn drain_without_start_is_terminal_immediately() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());
    assert!(sink.drain().is_none());
}

#[test]
fn pause_and_resume_round_trip() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();
    feed(&sink, &p1, &pattern(PERIOD_BYTES));

    assert!(sink.pause());
    assert_eq!(*script.pauses.lock().unwrap(), vec![true]);

    sink.resume();
    assert_eq!(*script.pauses.lock().unwrap(), vec![true, false]);

    // Back in Playing: deposits keep flowing.
    feed(&sink, &p1, &pattern(PERIOD_BYTES));
    sink.stop();
}

#[test]
fn pause_is_rejected_outside_playing_and_draining() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());
    assert!(!sink.pause());
}

#[test]
fn pause_failure_closes_the_device_but_still_pauses() {
    let script = MockScript::new();
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();
    feed(&sink, &p1, &pattern(PERIOD_BYTES));

    *script.pause_result.lock().unwrap() = Some(DeviceError::Failed("i/o error"));
    assert!(sink.pause());

    // The failed pause dropped and closed the playback handle.
    assert_eq!(script.discards.load(Ordering::SeqCst), 1);
    assert_eq!(script.closes.load(Ordering::SeqCst), 2);

    // The producer sees the error on its next status.
    let status = sink.add_packet(&p1, &pattern(16));
    assert_eq!(status.device_error, Some("i/o error"));

    // Resume restores Playing; the play step reopens the device and clears
    // the error once data flows again.
    sink.resume();
    feed(&sink, &p1, &pattern(PERIOD_BYTES));
    sink.stop();
    assert!(script.opens.load(Ordering::SeqCst) >= 3);
}

#[test]
fn endian_mismatch_negotiates_software_swap() {
    let script = MockScript::new();
    script.accepts_big_endian.store(false, Ordering::SeqCst);
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    // Producer supplies big-endian samples; the card only takes LE.
    sink.start(2, 2, RATE, true).unwrap();
    let data = pattern(PERIOD_BYTES);
    feed(&sink, &p1, &data);
    drain_all(&sink);

    let written = script.written_bytes();
    assert_eq!(written.len(), data.len());
    for (pair, expect) in written.chunks(2).zip(data.chunks(2)) {
        assert_eq!(pair[0], expect[1]);
        assert_eq!(pair[1], expect[0]);
    }
}

#[test]
fn underrun_is_recovered_without_losing_bytes() {
    let script = MockScript::new();
    script.push_write(Ok(()));
    script.push_write(Err(DeviceError::Underrun));
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();
    let data = pattern(2 * PERIOD_BYTES);
    feed(&sink, &p1, &data);
    drain_all(&sink);

    assert_eq!(script.recovers.load(Ordering::SeqCst), 1);
    // The failed write is retried; nothing is lost or duplicated.
    assert_eq!(script.written_bytes(), data);
}

#[test]
fn fatal_write_error_surfaces_and_closes_the_device() {
    let script = MockScript::new();
    script.push_write(Err(DeviceError::Failed("i/o error")));
    // The immediate reopen attempt fails too, so the error stays visible
    // until the worker's retry backoff elapses.
    script.fail_next_open(DeviceError::Failed("i/o error"));
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();

    // Keep feeding until the error comes back on a status.
    let data = pattern(PERIOD_BYTES);
    let mut saw_error = false;
    for _ in 0..100 {
        let status = sink.add_packet(&p1, &data);
        if status.device_error == Some("i/o error") {
            saw_error = true;
            break;
        }
    }
    assert!(saw_error, "device error never reported");
    sink.stop();
}

#[test]
fn too_small_device_period_is_rejected() {
    let script = MockScript::new();
    // 8000 / 128 = 62 periods per second, past the supported bound.
    script.period_frames.store(128, Ordering::SeqCst);
    let sink = make_sink(&script, &test_config());
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();
    let status = sink.add_packet(&p1, &pattern(16));
    assert_eq!(status.stored, 0);
    assert_eq!(
        status.device_error,
        Some("period set by device is too small")
    );
}

#[test]
fn construction_fails_without_device_unless_told_otherwise() {
    let script = MockScript::new();
    script.fail_next_open(DeviceError::Failed("no such device"));
    let driver = Arc::new(MockDriver {
        script: Arc::clone(&script),
    });

    match AlsaSink::<u32>::with_driver(driver, &test_config(), Arc::new(TracingLogger)) {
        Err(SinkError::DeviceOpen { .. }) => {}
        other => panic!("expected device open failure, got {:?}", other.err()),
    }
}

#[test]
fn open_failure_retries_until_the_device_appears() {
    let script = MockScript::new();
    // Probe and first worker attempt fail; later attempts succeed.
    script.fail_next_open(DeviceError::Failed("no such device"));
    script.fail_next_open(DeviceError::Failed("no such device"));

    let config = SinkConfig {
        start_without_device: true,
        ..test_config()
    };
    let sink = make_sink(&script, &config);
    let p1 = Arc::new(1u32);

    sink.start(2, 2, RATE, false).unwrap();

    // First status reports the recorded error with nothing stored.
    let status = sink.add_packet(&p1, &pattern(16));
    assert_eq!(status.stored, 0);
    assert_eq!(status.device_error, Some("no such device"));

    // The worker retries on its backoff schedule and comes up.
    let began = Instant::now();
    let data = pattern(PERIOD_BYTES);
    let mut pending: &[u8] = &data;
    while !pending.is_empty() {
        assert!(
            began.elapsed() < Duration::from_secs(30),
            "device never came back"
        );
        let status = sink.add_packet(&p1, pending);
        pending = &pending[status.stored..];
    }
    assert!(script.opens.load(Ordering::SeqCst) >= 3);
    sink.stop();
}

/// Logger that collects lines for inspection.
struct CollectLogger {
    lines: Mutex<Vec<String>>,
}

impl SinkLogger for CollectLogger {
    fn log(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn debug(&self, _message: &str) {}
}

#[test]
fn worker_messages_reach_the_log_drain() {
    let script = MockScript::new();
    let logger = Arc::new(CollectLogger {
        lines: Mutex::new(Vec::new()),
    });
    let driver = Arc::new(MockDriver {
        script: Arc::clone(&script),
    });
    let sink: AlsaSink<u32> =
        AlsaSink::with_driver(driver, &test_config(), Arc::clone(&logger) as Arc<dyn SinkLogger>)
            .unwrap();

    let drain = sink.log_drain();
    let drain_thread = std::thread::spawn(move || drain.run());

    // Let the drain clear the scheduling-class message; the mailbox is a
    // one-slot channel and the worker will not overwrite a pending entry
    // with its device-open report.
    std::thread::sleep(Duration::from_millis(100));

    let p1 = Arc::new(1u32);
    sink.start(2, 2, RATE, false).unwrap();
    feed(&sink, &p1, &pattern(PERIOD_BYTES));
    drain_all(&sink);
    drop(sink);

    drain_thread.join().unwrap();

    let lines = logger.lines.lock().unwrap();
    assert!(
        lines.iter().any(|l| l.contains("priority")),
        "scheduling class was not reported: {:?}",
        *lines
    );
    assert!(
        lines.iter().any(|l| l.contains("opened device")),
        "device open was not reported: {:?}",
        *lines
    );
}
