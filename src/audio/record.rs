use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use super::device::CaptureDevice;
use super::{g711, gain};
use crate::net_link::TransportHandle;
use crate::protocol::ClientMessage;

/// Microphone → gain → μ-law → `media` message, until `running` clears.
///
/// Returns an error only for device failures. A transport that has gone away
/// is logged once; the loop keeps going until the controller stops it.
pub fn record_loop(
    device: &mut dyn CaptureDevice,
    running: &AtomicBool,
    gain: f32,
    link: &TransportHandle,
) -> Result<()> {
    let mut buf = vec![0u8; device.buffer_size()];
    let mut link_down = false;

    log::info!("Recording started: buffer={} bytes, gain={}", buf.len(), gain);

    while running.load(Ordering::Relaxed) {
        let read = device.read(&mut buf)?;
        // Whole samples only.
        let read = read & !1;
        if read == 0 {
            continue;
        }

        let amplified = gain::amplify(&buf[..read], gain);
        let ulaw = g711::encode_buffer(&amplified);
        let msg = ClientMessage::media(&ulaw);

        match link.send(&msg) {
            Ok(()) => link_down = false,
            Err(e) if !link_down => {
                log::warn!("Dropping captured audio: {}", e);
                link_down = true;
            }
            Err(_) => {}
        }
    }

    log::info!("Recording stopped");
    Ok(())
}
