//! Fixed linear gain applied to little-endian S16 buffers.

/// Amplify every sample by `gain`, truncating toward zero and saturating at
/// the i16 range. The output has the same length as the input; a trailing
/// odd byte is copied through untouched.
pub fn amplify(pcm: &[u8], gain: f32) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm.len());
    let chunks = pcm.chunks_exact(2);
    let remainder = chunks.remainder();

    for pair in chunks {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        // `as i32` truncates toward zero and saturates on overflow.
        let amplified = (sample as f32 * gain) as i32;
        let clamped = amplified.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out.extend_from_slice(remainder);
    out
}
