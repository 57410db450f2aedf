//! WAV fixture generation
//!
//! hound writes the canonical 44-byte header for 8/16-bit mono and stereo
//! PCM, which is exactly the layout wavplay reads. `write_raw_wav` covers the
//! malformed cases hound refuses to produce.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Write;
use std::path::Path;
use wavplay::Header;

/// Write `duration_ms` of 16-bit silence.
pub fn write_silent_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let frames = u64::from(sample_rate) * duration_ms / 1000;
    for _ in 0..frames * u64::from(channels) {
        writer.write_sample(0i16)?;
    }
    writer.finalize()
}

/// Write a 16-bit sine tone at half amplitude.
pub fn write_tone_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let frames = u64::from(sample_rate) * duration_ms / 1000;
    for n in 0..frames {
        let t = n as f32 / sample_rate as f32;
        let sample = ((2.0 * PI * frequency_hz * t).sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()
}

/// Write `header` followed by `payload` verbatim.
pub fn write_raw_wav<P: AsRef<Path>>(path: P, header: &Header, payload: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(&header.encode())?;
    file.write_all(payload)?;
    Ok(())
}

/// Write a raw 44-byte header with no payload.
pub fn write_header_only<P: AsRef<Path>>(path: P, raw: &[u8; 44]) -> std::io::Result<()> {
    std::fs::write(path, raw)
}
