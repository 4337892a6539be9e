//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

use super::device::{CaptureDevice, PlaybackDevice};

/// ALSA recoveries attempted for one buffer before its remaining frames are dropped.
const MAX_WRITE_RECOVERIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, period_size, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)
            .with_context(|| format!("Failed to apply hw params on '{}'", device))?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    if actual_rate != sample_rate || actual_channels != channels {
        bail!(
            "ALSA {} device '{}' negotiated {}Hz/{}ch, need {}Hz/{}ch",
            dir_name,
            device,
            actual_rate,
            actual_channels,
            sample_rate,
            channels
        );
    }

    let params = AlsaParams {
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

// ======================== Capture ========================

/// Microphone backed by an ALSA capture PCM. One read is one period.
pub struct AlsaCapture {
    pcm: PCM,
    samples: Vec<i16>,
    wait_ms: u32,
}

impl AlsaCapture {
    pub fn new(pcm: PCM, params: AlsaParams, wait_ms: u32) -> Result<Self> {
        pcm.start().context("Failed to start PCM capture")?;
        Ok(Self {
            pcm,
            samples: vec![0i16; params.period_size * params.channels as usize],
            wait_ms,
        })
    }

    fn recover(&self, err: alsa::Error) -> Result<()> {
        log::warn!("ALSA capture error: {}, recovering...", err);
        self.pcm
            .prepare()
            .context("Failed to recover PCM capture")?;
        self.pcm.start().context("Failed to restart PCM capture")?;
        Ok(())
    }
}

impl CaptureDevice for AlsaCapture {
    fn buffer_size(&self) -> usize {
        self.samples.len() * 2
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Bounded wait keeps the stop flag responsive.
        match self.pcm.wait(Some(self.wait_ms)) {
            Ok(true) => {}
            Ok(false) => return Ok(0),
            Err(e) => {
                self.recover(e)?;
                return Ok(0);
            }
        }

        let max_samples = (buf.len() / 2).min(self.samples.len());
        let io = self.pcm.io_i16()?;
        match io.readi(&mut self.samples[..max_samples]) {
            Ok(frames) => {
                for (i, sample) in self.samples[..frames].iter().enumerate() {
                    buf[i * 2..i * 2 + 2].copy_from_slice(&sample.to_le_bytes());
                }
                Ok(frames * 2)
            }
            Err(e) => {
                self.recover(e)?;
                Ok(0)
            }
        }
    }
}

impl Drop for AlsaCapture {
    fn drop(&mut self) {
        if let Err(e) = self.pcm.drop() {
            log::debug!("ALSA capture drop: {}", e);
        }
        log::info!("Capture device released");
    }
}

// ======================== Playback ========================

/// Speaker backed by an ALSA playback PCM.
pub struct AlsaPlayback {
    pcm: PCM,
    samples: Vec<i16>,
}

impl AlsaPlayback {
    pub fn new(pcm: PCM, params: AlsaParams) -> Self {
        Self {
            pcm,
            samples: Vec::with_capacity(params.period_size),
        }
    }
}

impl PlaybackDevice for AlsaPlayback {
    fn write(&mut self, pcm_bytes: &[u8]) -> Result<()> {
        self.samples.clear();
        self.samples.extend(
            pcm_bytes
                .chunks_exact(2)
                .map(|p| i16::from_le_bytes([p[0], p[1]])),
        );

        let io = self.pcm.io_i16()?;
        // Mono: one sample per frame.
        let total_frames = self.samples.len();
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            match io.writei(&self.samples[frames_written..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    self.pcm
                        .prepare()
                        .context("Failed to recover PCM playback")?;

                    if retry_count >= MAX_WRITE_RECOVERIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for AlsaPlayback {
    fn drop(&mut self) {
        if let Err(e) = self.pcm.drop() {
            log::debug!("ALSA playback drop: {}", e);
        }
        log::info!("Playback device released");
    }
}
