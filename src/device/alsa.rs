//! ALSA backend for the abstract device interface.
//!
//! A thin facade over the `alsa` crate: blocking playback stream, one
//! endianness retry during hardware-parameter negotiation, and errno-level
//! classification of write failures so the worker can run the standard
//! recover path on underrun and suspend.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::Direction;

use super::{
    classify_errno, DeviceError, NegotiatedParams, PcmDevice, PcmDriver, StreamSpec,
    DEVICE_PERIODS, PERIOD_FRAMES,
};

impl From<alsa::Error> for DeviceError {
    fn from(err: alsa::Error) -> Self {
        classify_errno(err.errno())
    }
}

/// Driver producing blocking ALSA playback streams.
#[derive(Debug, Default)]
pub struct AlsaDriver;

impl PcmDriver for AlsaDriver {
    fn open(&self, card: &str) -> Result<Box<dyn PcmDevice>, DeviceError> {
        let pcm = PCM::new(card, Direction::Playback, false)?;
        Ok(Box::new(AlsaPcm { pcm }))
    }
}

/// An open ALSA playback stream. Closed by dropping (the `alsa` crate
/// closes the handle in its own `Drop`).
struct AlsaPcm {
    pcm: PCM,
}

/// Outcome of a single hw-params attempt: a format rejection is worth one
/// retry with the opposite endianness, anything else is final.
enum ParamsAttempt {
    Accepted(usize),
    FormatRejected,
    Failed(DeviceError),
}

impl AlsaPcm {
    fn try_hw_params(&self, spec: &StreamSpec, format: Format) -> ParamsAttempt {
        let attempt = (|| -> Result<ParamsAttempt, alsa::Error> {
            let hwp = HwParams::any(&self.pcm)?;
            hwp.set_access(Access::RWInterleaved)?;
            if hwp.set_format(format).is_err() {
                return Ok(ParamsAttempt::FormatRejected);
            }
            if hwp.set_channels(spec.channels).is_err() {
                return Ok(ParamsAttempt::Failed(DeviceError::Failed(
                    "couldn't set device param: channels",
                )));
            }
            if hwp.set_rate(spec.rate, alsa::ValueOr::Nearest).is_err() {
                return Ok(ParamsAttempt::Failed(DeviceError::Failed(
                    "couldn't set device param: rate",
                )));
            }
            hwp.set_period_size_near(PERIOD_FRAMES as Frames, alsa::ValueOr::Nearest)?;
            hwp.set_periods(DEVICE_PERIODS, alsa::ValueOr::Nearest)?;
            self.pcm.hw_params(&hwp)?;

            // Read back what the card actually accepted.
            let current = self.pcm.hw_params_current()?;
            if current.get_channels()? != spec.channels {
                return Ok(ParamsAttempt::Failed(DeviceError::Failed(
                    "couldn't set device param: channels",
                )));
            }
            if current.get_rate()? != spec.rate {
                return Ok(ParamsAttempt::Failed(DeviceError::Failed(
                    "couldn't set device param: rate",
                )));
            }
            if current.get_format()? != format {
                return Ok(ParamsAttempt::FormatRejected);
            }
            Ok(ParamsAttempt::Accepted(current.get_period_size()? as usize))
        })();

        match attempt {
            Ok(outcome) => outcome,
            Err(err) => ParamsAttempt::Failed(err.into()),
        }
    }
}

impl PcmDevice for AlsaPcm {
    fn configure(&mut self, spec: &StreamSpec) -> Result<NegotiatedParams, DeviceError> {
        let native = if spec.big_endian { Format::S16BE } else { Format::S16LE };
        let swapped = if spec.big_endian { Format::S16LE } else { Format::S16BE };

        match self.try_hw_params(spec, native) {
            ParamsAttempt::Accepted(period_frames) => Ok(NegotiatedParams {
                period_frames,
                swap_bytes: false,
            }),
            ParamsAttempt::Failed(err) => Err(err),
            // The card refused our byte order; accept the complement and
            // swap in software at deposit time.
            ParamsAttempt::FormatRejected => match self.try_hw_params(spec, swapped) {
                ParamsAttempt::Accepted(period_frames) => Ok(NegotiatedParams {
                    period_frames,
                    swap_bytes: true,
                }),
                ParamsAttempt::Failed(err) => Err(err),
                ParamsAttempt::FormatRejected => {
                    Err(DeviceError::Failed("couldn't set device param: format"))
                }
            },
        }
    }

    fn write_period(&mut self, data: &[u8], _frames: usize) -> Result<usize, DeviceError> {
        let io = self.pcm.io_bytes();
        io.writei(data).map_err(DeviceError::from)
    }

    fn recover(&mut self, err: DeviceError) -> Result<(), DeviceError> {
        let errno = match err {
            DeviceError::Interrupted => libc::EINTR,
            DeviceError::Underrun => libc::EPIPE,
            DeviceError::Suspended => libc::ESTRPIPE,
            _ => return Err(err),
        };
        self.pcm.recover(errno, true).map_err(DeviceError::from)
    }

    fn pause(&mut self, enable: bool) -> Result<(), DeviceError> {
        self.pcm.pause(enable).map_err(DeviceError::from)
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        self.pcm.drain().map_err(DeviceError::from)
    }

    fn discard(&mut self) -> Result<(), DeviceError> {
        self.pcm.drop().map_err(DeviceError::from)
    }
}
