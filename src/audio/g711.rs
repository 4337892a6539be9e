//! G.711 μ-law companding between 16-bit linear PCM and 8-bit codes.
//!
//! Buffers are little-endian S16 on the PCM side and one byte per sample on
//! the μ-law side.

/// Bias added to the magnitude before segment lookup.
const BIAS: i32 = 0x84;
/// Largest magnitude that still fits the top segment once biased.
const CLIP: i32 = 32635;

/// Encode one linear sample to a μ-law code.
pub fn encode(sample: i16) -> u8 {
    let sample = sample as i32;
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = sample.abs().min(CLIP) + BIAS;

    // magnitude >> 7 is in 1..=255, so the highest set bit gives the segment.
    let exponent = (15 - ((magnitude >> 7) as u16).leading_zeros()).min(7) as u8;
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

/// Decode one μ-law code to a linear sample.
pub fn decode(code: u8) -> i16 {
    let code = !code;
    let exponent = ((code & 0x70) >> 4) as i32;
    let mantissa = (code & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;

    if code & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode a little-endian PCM buffer. A trailing odd byte is ignored.
pub fn encode_buffer(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|pair| encode(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Decode μ-law codes to a little-endian PCM buffer twice as long.
pub fn decode_buffer(ulaw: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(ulaw.len() * 2);
    for &code in ulaw {
        pcm.extend_from_slice(&decode(code).to_le_bytes());
    }
    pcm
}
