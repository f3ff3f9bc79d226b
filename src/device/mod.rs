//! Abstract playback device interface.
//!
//! The sink core only talks to the PCM layer through the [`PcmDriver`] and
//! [`PcmDevice`] traits, so the realtime worker can be exercised against a
//! scripted device in tests while production uses the ALSA backend in
//! [`alsa`](self::alsa).
//!
//! Error reporting is deliberately allocation-free: every failure collapses
//! to a [`DeviceError`] carrying a `&'static str` description, because the
//! worker publishes these strings from a realtime thread.

pub mod alsa;

use thiserror::Error;

/// Period size requested from the device, in frames. The device is free to
/// negotiate something else; the sink adopts whatever comes back.
pub const PERIOD_FRAMES: usize = 4096;

/// Number of periods requested for the device-internal buffer.
pub const DEVICE_PERIODS: u32 = 4;

/// Stream format requested by the transport via `start()`.
///
/// Sample width is fixed at 2 bytes (signed 16-bit PCM); `big_endian` is the
/// byte order of the samples the producer will deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub channels: u32,
    pub rate: u32,
    pub big_endian: bool,
}

impl StreamSpec {
    /// Bytes per frame (all channels, 2 bytes per sample).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * 2
    }
}

/// Hardware parameters actually accepted by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedParams {
    /// Period size in frames, as set by the card.
    pub period_frames: usize,
    /// True when the card only accepted the endian complement of the
    /// producer's byte order, so deposits must swap bytes.
    pub swap_bytes: bool,
}

/// Device-level failure, classified for the worker's retry logic.
///
/// `Interrupted`, `Underrun` and `Suspended` are recoverable through
/// [`PcmDevice::recover`]; `Busy` means the device-internal buffer cannot
/// accept a period right now; everything else closes the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("interrupted system call")]
    Interrupted,
    #[error("broken pipe")]
    Underrun,
    #[error("stream suspended")]
    Suspended,
    #[error("device busy")]
    Busy,
    #[error("{0}")]
    Failed(&'static str),
}

impl DeviceError {
    /// True for conditions the standard recover path can repair.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DeviceError::Interrupted | DeviceError::Underrun | DeviceError::Suspended
        )
    }

    /// Static description, suitable for the sink's `device_error` slot.
    pub fn description(&self) -> &'static str {
        match self {
            DeviceError::Interrupted => "interrupted system call",
            DeviceError::Underrun => "broken pipe",
            DeviceError::Suspended => "stream suspended",
            DeviceError::Busy => "device busy",
            DeviceError::Failed(msg) => msg,
        }
    }
}

/// Classify an OS errno into a [`DeviceError`].
///
/// The fallback table keeps descriptions static; uncommon errnos collapse to
/// a generic message rather than formatting a number at realtime priority.
pub fn classify_errno(errno: i32) -> DeviceError {
    match errno {
        libc::EINTR => DeviceError::Interrupted,
        libc::EPIPE => DeviceError::Underrun,
        libc::ESTRPIPE => DeviceError::Suspended,
        libc::EAGAIN => DeviceError::Busy,
        libc::ENOENT => DeviceError::Failed("no such device"),
        libc::ENODEV => DeviceError::Failed("no such device"),
        libc::EBUSY => DeviceError::Failed("device or resource busy"),
        libc::EACCES => DeviceError::Failed("permission denied"),
        libc::EPERM => DeviceError::Failed("operation not permitted"),
        libc::EINVAL => DeviceError::Failed("invalid argument"),
        libc::ENOMEM => DeviceError::Failed("out of memory"),
        libc::EIO => DeviceError::Failed("i/o error"),
        _ => DeviceError::Failed("device error"),
    }
}

/// Factory for playback devices. One driver serves all open attempts of a
/// sink, including reopen-after-failure retries.
pub trait PcmDriver: Send + Sync {
    /// Open a playback stream on the named card. Blocking.
    fn open(&self, card: &str) -> std::result::Result<Box<dyn PcmDevice>, DeviceError>;
}

/// An open playback stream.
///
/// Closing the stream is dropping the box. All calls are made by the worker
/// thread with the sink lock released.
pub trait PcmDevice: Send {
    /// Negotiate hardware parameters for `spec`, requesting
    /// [`PERIOD_FRAMES`] and [`DEVICE_PERIODS`]. Implementations retry once
    /// with the opposite S16 endianness before giving up, reporting the
    /// outcome in [`NegotiatedParams::swap_bytes`].
    fn configure(&mut self, spec: &StreamSpec) -> std::result::Result<NegotiatedParams, DeviceError>;

    /// Write one period. `data` holds exactly `frames` frames in the
    /// negotiated format. Blocks until the device accepts them; returns the
    /// number of frames written.
    fn write_period(&mut self, data: &[u8], frames: usize) -> std::result::Result<usize, DeviceError>;

    /// Standard recovery from underrun or suspend.
    fn recover(&mut self, err: DeviceError) -> std::result::Result<(), DeviceError>;

    /// Pause (`true`) or unpause (`false`) the stream.
    fn pause(&mut self, enable: bool) -> std::result::Result<(), DeviceError>;

    /// Block until the device-internal buffer has played out.
    fn drain(&mut self) -> std::result::Result<(), DeviceError>;

    /// Discard the device-internal buffer.
    fn discard(&mut self) -> std::result::Result<(), DeviceError>;
}
