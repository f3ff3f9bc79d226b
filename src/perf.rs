//! Optional worker timing log.
//!
//! When enabled, the worker appends one record per wait-for-data interval
//! and one per device write, so stutters can be traced to the producer or
//! the hardware after the fact. Best-effort only; write failures are
//! silently dropped and nothing here affects playback.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed location of the performance log.
pub const PERF_LOG_PATH: &str = "/tmp/platter_sink.log";

/// Worker-private timing log. Records are `"<sec>.<usec> <sec>.<usec> data <n>"`
/// for data waits and `"<sec>.<usec> <sec>.<usec> write"` for device writes.
pub struct PerfLog {
    out: BufWriter<File>,
}

impl PerfLog {
    /// Open (truncating) the log at the fixed path. Returns `None` when the
    /// file cannot be created; the worker then runs without timing records.
    pub fn open() -> Option<PerfLog> {
        Self::open_at(Path::new(PERF_LOG_PATH))
    }

    pub fn open_at(path: &Path) -> Option<PerfLog> {
        File::create(path).ok().map(|f| PerfLog {
            out: BufWriter::new(f),
        })
    }

    /// Record the interval spent waiting for producer data, with the amount
    /// of data buffered once the wait ended.
    pub fn data(&mut self, start: SystemTime, end: SystemTime, buffered: usize) {
        let (ss, su) = stamp(start);
        let (es, eu) = stamp(end);
        let _ = writeln!(self.out, "{}.{:06} {}.{:06} data {}", ss, su, es, eu, buffered);
    }

    /// Record the interval spent inside a device write.
    pub fn write(&mut self, start: SystemTime, end: SystemTime) {
        let (ss, su) = stamp(start);
        let (es, eu) = stamp(end);
        let _ = writeln!(self.out, "{}.{:06} {}.{:06} write", ss, su, es, eu);
    }
}

fn stamp(t: SystemTime) -> (u64, u32) {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs(), d.subsec_micros()),
        Err(_) => (0, 0),
    }
}
