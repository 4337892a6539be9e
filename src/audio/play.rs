use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;

use super::device::PlaybackDevice;
use super::playback_buffer::PlaybackBuffer;

/// Drain `buffer` into the speaker until `running` clears.
///
/// Each pop waits at most `pop_timeout`, which bounds how long a stop
/// request can go unnoticed when nothing is arriving.
pub fn play_loop(
    device: &mut dyn PlaybackDevice,
    buffer: &PlaybackBuffer,
    running: &AtomicBool,
    pop_timeout: Duration,
) -> Result<()> {
    log::info!("Playback started");

    while running.load(Ordering::Relaxed) {
        let Some(pcm) = buffer.pop_timeout(pop_timeout) else {
            continue;
        };
        device.write(&pcm)?;
    }

    log::info!("Playback stopped");
    Ok(())
}
