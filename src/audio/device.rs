//! Device seams for the capture and playback loops.
//!
//! Each loop owns its device exclusively; dropping the device releases it.

use anyhow::Result;

use super::alsa_device::{self, AlsaCapture, AlsaPlayback};
use super::{CHANNELS, SAMPLE_RATE};

/// A microphone delivering little-endian S16 mono PCM.
pub trait CaptureDevice: Send {
    /// Size in bytes of one capture buffer as reported by the device.
    fn buffer_size(&self) -> usize;

    /// Fill `buf` with one buffer of samples. Blocks for a bounded time and
    /// returns `Ok(0)` when nothing arrived, so callers can look at their
    /// stop flag between reads.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// A speaker accepting little-endian S16 mono PCM.
pub trait PlaybackDevice: Send {
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
}

/// Opens the device pair for one session.
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>>;
    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>>;
}

/// ALSA device names and negotiation hints.
#[derive(Debug, Clone)]
pub struct AlsaBackend {
    pub capture_device: String,
    pub playback_device: String,
    /// 0 lets ALSA pick the period size.
    pub period_frames: usize,
    pub read_timeout_ms: u32,
}

impl AlsaBackend {
    fn period_hint(&self) -> Option<usize> {
        if self.period_frames > 0 {
            Some(self.period_frames)
        } else {
            None
        }
    }
}

impl AudioBackend for AlsaBackend {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>> {
        let (pcm, params) = alsa_device::open_capture(
            &self.capture_device,
            SAMPLE_RATE,
            CHANNELS,
            self.period_hint(),
        )?;
        Ok(Box::new(AlsaCapture::new(pcm, params, self.read_timeout_ms)?))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>> {
        let (pcm, params) = alsa_device::open_playback(
            &self.playback_device,
            SAMPLE_RATE,
            CHANNELS,
            self.period_hint(),
        )?;
        Ok(Box::new(AlsaPlayback::new(pcm, params)))
    }
}
