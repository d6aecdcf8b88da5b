//! Raw PCM helpers for generated audio.
//!
//! The generation service returns headerless 16-bit little-endian PCM,
//! mono, at [`SAMPLE_RATE`] Hz. Playback lives outside the broker; this
//! module only turns the byte stream into samples.

/// Sample rate of generated audio, in Hz.
pub const SAMPLE_RATE: u32 = 22_050;

/// Channel count of generated audio.
pub const CHANNELS: u16 = 1;

/// Decode little-endian byte pairs into signed 16-bit samples.
///
/// A trailing odd byte is ignored.
pub fn to_samples(audio: &[u8]) -> Vec<i16> {
    audio
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Playback length of `audio` in seconds.
pub fn duration_secs(audio: &[u8]) -> f64 {
    (audio.len() / 2) as f64 / f64::from(SAMPLE_RATE * u32::from(CHANNELS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_pairs() {
        let samples = to_samples(&[0x01, 0x00, 0xff, 0xff, 0x00, 0x80]);
        assert_eq!(samples, vec![1, -1, i16::MIN]);
    }

    #[test]
    fn ignores_trailing_odd_byte() {
        assert_eq!(to_samples(&[0x02, 0x00, 0x7f]), vec![2]);
        assert!(to_samples(&[]).is_empty());
    }

    #[test]
    fn one_second_of_audio() {
        let audio = vec![0u8; SAMPLE_RATE as usize * 2];
        assert!((duration_secs(&audio) - 1.0).abs() < f64::EPSILON);
    }
}
