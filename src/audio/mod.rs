//! audio - Capture, playback and G.711 μ-law transcoding
//!
//! Device I/O runs on dedicated OS threads (not tokio tasks): the capture
//! thread reads the microphone and hands μ-law frames to the transport, the
//! playback thread drains the [`PlaybackBuffer`] into the speaker.

mod alsa_device;
pub mod device;
pub mod g711;
pub mod gain;
pub mod play;
mod playback_buffer;
pub mod record;

pub use device::{AlsaBackend, AudioBackend, CaptureDevice, PlaybackDevice};
pub use playback_buffer::PlaybackBuffer;

/// Device and wire sample rate.
pub const SAMPLE_RATE: u32 = 8000;
/// Mono on both directions.
pub const CHANNELS: u32 = 1;
