//! 44-byte RIFF/WAVE header codec
//!
//! Field layout (all integers little-endian, tags in file order):
//!
//! | Offset | Size | Field                 |
//! |-------:|-----:|-----------------------|
//! |      0 |    4 | `"RIFF"`              |
//! |      4 |    4 | file size - 8         |
//! |      8 |    4 | `"WAVE"`              |
//! |     12 |    4 | `"fmt "`              |
//! |     16 |    4 | fmt block length (16) |
//! |     20 |    2 | format type (1 = PCM) |
//! |     22 |    2 | channel count         |
//! |     24 |    4 | sample rate           |
//! |     28 |    4 | byte rate             |
//! |     32 |    2 | block align           |
//! |     34 |    2 | bits per sample       |
//! |     36 |    4 | `"data"`              |
//! |     40 |    4 | data size             |
//!
//! Duration and bit rate are not stored in the file and are re-derived from
//! the byte rate on every decode.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Size of the canonical header; PCM payload starts right after it.
pub const HEADER_LEN: usize = 44;

/// `format_type` value for linear PCM
pub const FORMAT_PCM: u16 = 1;

const RIFF_TAG: [u8; 4] = *b"RIFF";
const WAVE_TAG: [u8; 4] = *b"WAVE";
const FMT_TAG: [u8; 4] = *b"fmt ";
const DATA_TAG: [u8; 4] = *b"data";

/// How strictly a decoded header is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Tag and format anomalies are logged, the header is still returned
    #[default]
    Lenient,
    /// Tag mismatches and non-PCM format types fail the decode
    Strict,
}

/// Something implausible found in a decoded header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderAnomaly {
    /// A 4-byte ASCII tag did not hold the expected value
    TagMismatch {
        field: &'static str,
        expected: [u8; 4],
        found: [u8; 4],
    },
    /// Format type other than linear PCM
    UnsupportedFormat(u16),
    /// Bit depth other than 8 or 16
    UnsupportedBitDepth(u16),
    /// Stored byte rate disagrees with sample rate * bits * channels / 8
    ByteRateMismatch { stored: u32, derived: u64 },
    /// Stored block align disagrees with bits * channels / 8
    BlockAlignMismatch { stored: u16, derived: u32 },
}

impl HeaderAnomaly {
    /// Anomalies that make the file something other than a PCM WAV.
    ///
    /// Only these fail a strict decode.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HeaderAnomaly::TagMismatch { .. } | HeaderAnomaly::UnsupportedFormat(_)
        )
    }
}

impl fmt::Display for HeaderAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderAnomaly::TagMismatch {
                field,
                expected,
                found,
            } => write!(
                f,
                "{} tag is {:?}, expected {:?}",
                field,
                tag_text(found),
                tag_text(expected)
            ),
            HeaderAnomaly::UnsupportedFormat(t) => write!(f, "format type {} is not PCM", t),
            HeaderAnomaly::UnsupportedBitDepth(b) => write!(f, "{} bits per sample", b),
            HeaderAnomaly::ByteRateMismatch { stored, derived } => {
                write!(f, "byte rate {} differs from derived {}", stored, derived)
            }
            HeaderAnomaly::BlockAlignMismatch { stored, derived } => {
                write!(f, "block align {} differs from derived {}", stored, derived)
            }
        }
    }
}

/// Decoded RIFF/WAVE header
///
/// Produced once per decode and never mutated. `duration_seconds` and
/// `bit_rate_kbps` are derived from `byte_rate` and are always consistent with
/// the stored fields of a value returned by this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub riff_tag: [u8; 4],
    pub file_size: u32,
    pub file_type_tag: [u8; 4],
    pub format_tag: [u8; 4],
    pub format_block_length: u32,
    pub format_type: u16,
    pub channel_count: u16,
    pub sample_rate_hz: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_tag: [u8; 4],
    pub data_size_bytes: u32,
    /// `data_size_bytes / byte_rate`, integer division
    pub duration_seconds: u32,
    /// `byte_rate * 8 / 1000`
    pub bit_rate_kbps: u32,
}

impl Header {
    /// Parse the first 44 bytes of `bytes`.
    ///
    /// Tags are not checked here; see [`Header::anomalies`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::TruncatedHeader {
                available: bytes.len(),
            })?;

        let byte_rate = le_u32(raw, 28);
        if byte_rate == 0 {
            return Err(Error::InvalidByteRate);
        }
        let data_size_bytes = le_u32(raw, 40);

        Ok(Header {
            riff_tag: tag(raw, 0),
            file_size: le_u32(raw, 4),
            file_type_tag: tag(raw, 8),
            format_tag: tag(raw, 12),
            format_block_length: le_u32(raw, 16),
            format_type: le_u16(raw, 20),
            channel_count: le_u16(raw, 22),
            sample_rate_hz: le_u32(raw, 24),
            byte_rate,
            block_align: le_u16(raw, 32),
            bits_per_sample: le_u16(raw, 34),
            data_tag: tag(raw, 36),
            data_size_bytes,
            duration_seconds: data_size_bytes / byte_rate,
            bit_rate_kbps: (u64::from(byte_rate) * 8 / 1000) as u32,
        })
    }

    /// Build a canonical PCM header for the given format and payload size.
    ///
    /// `byte_rate`, `block_align` and `file_size` are derived; fails with
    /// `InvalidByteRate` when the format yields a zero byte rate.
    pub fn pcm(
        sample_rate_hz: u32,
        channel_count: u16,
        bits_per_sample: u16,
        data_size_bytes: u32,
    ) -> Result<Self> {
        let byte_rate =
            u64::from(sample_rate_hz) * u64::from(bits_per_sample) * u64::from(channel_count) / 8;
        let block_align = u32::from(bits_per_sample) * u32::from(channel_count) / 8;

        let mut raw = [0u8; HEADER_LEN];
        raw[0..4].copy_from_slice(&RIFF_TAG);
        raw[4..8].copy_from_slice(&data_size_bytes.saturating_add(36).to_le_bytes());
        raw[8..12].copy_from_slice(&WAVE_TAG);
        raw[12..16].copy_from_slice(&FMT_TAG);
        raw[16..20].copy_from_slice(&16u32.to_le_bytes());
        raw[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
        raw[22..24].copy_from_slice(&channel_count.to_le_bytes());
        raw[24..28].copy_from_slice(&sample_rate_hz.to_le_bytes());
        raw[28..32].copy_from_slice(&(byte_rate as u32).to_le_bytes());
        raw[32..34].copy_from_slice(&(block_align as u16).to_le_bytes());
        raw[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
        raw[36..40].copy_from_slice(&DATA_TAG);
        raw[40..44].copy_from_slice(&data_size_bytes.to_le_bytes());

        Self::from_bytes(&raw)
    }

    /// Serialize back to the 44 on-disk bytes. Derived fields are not stored.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[0..4].copy_from_slice(&self.riff_tag);
        raw[4..8].copy_from_slice(&self.file_size.to_le_bytes());
        raw[8..12].copy_from_slice(&self.file_type_tag);
        raw[12..16].copy_from_slice(&self.format_tag);
        raw[16..20].copy_from_slice(&self.format_block_length.to_le_bytes());
        raw[20..22].copy_from_slice(&self.format_type.to_le_bytes());
        raw[22..24].copy_from_slice(&self.channel_count.to_le_bytes());
        raw[24..28].copy_from_slice(&self.sample_rate_hz.to_le_bytes());
        raw[28..32].copy_from_slice(&self.byte_rate.to_le_bytes());
        raw[32..34].copy_from_slice(&self.block_align.to_le_bytes());
        raw[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        raw[36..40].copy_from_slice(&self.data_tag);
        raw[40..44].copy_from_slice(&self.data_size_bytes.to_le_bytes());
        raw
    }

    /// Byte offset of the PCM payload
    pub fn payload_offset(&self) -> u64 {
        HEADER_LEN as u64
    }

    pub fn is_pcm(&self) -> bool {
        self.format_type == FORMAT_PCM
    }

    /// List everything implausible about this header.
    pub fn anomalies(&self) -> Vec<HeaderAnomaly> {
        let mut found = Vec::new();

        for (field, expected, actual) in [
            ("riff", RIFF_TAG, self.riff_tag),
            ("file type", WAVE_TAG, self.file_type_tag),
            ("format", FMT_TAG, self.format_tag),
            ("data", DATA_TAG, self.data_tag),
        ] {
            if actual != expected {
                found.push(HeaderAnomaly::TagMismatch {
                    field,
                    expected,
                    found: actual,
                });
            }
        }

        if !self.is_pcm() {
            found.push(HeaderAnomaly::UnsupportedFormat(self.format_type));
        }
        if !matches!(self.bits_per_sample, 8 | 16) {
            found.push(HeaderAnomaly::UnsupportedBitDepth(self.bits_per_sample));
        }

        let derived_rate = u64::from(self.sample_rate_hz)
            * u64::from(self.bits_per_sample)
            * u64::from(self.channel_count)
            / 8;
        if derived_rate != u64::from(self.byte_rate) {
            found.push(HeaderAnomaly::ByteRateMismatch {
                stored: self.byte_rate,
                derived: derived_rate,
            });
        }

        let derived_align = u32::from(self.bits_per_sample) * u32::from(self.channel_count) / 8;
        if derived_align != u32::from(self.block_align) {
            found.push(HeaderAnomaly::BlockAlignMismatch {
                stored: self.block_align,
                derived: derived_align,
            });
        }

        found
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "riff : {}", tag_text(&self.riff_tag))?;
        writeln!(f, "fileSize : {}", self.file_size)?;
        writeln!(f, "fileType : {}", tag_text(&self.file_type_tag))?;
        writeln!(f, "format : {}", tag_text(&self.format_tag))?;
        writeln!(f, "formatBlockLength : {}", self.format_block_length)?;
        writeln!(f, "formatType : {}", self.format_type)?;
        writeln!(f, "channelCount : {}", self.channel_count)?;
        writeln!(f, "sampleRate : {}", self.sample_rate_hz)?;
        writeln!(f, "byteRate : {}", self.byte_rate)?;
        writeln!(f, "blockAlign : {}", self.block_align)?;
        writeln!(f, "bitsPerSample : {}", self.bits_per_sample)?;
        writeln!(f, "dataTag : {}", tag_text(&self.data_tag))?;
        writeln!(f, "dataSize : {}", self.data_size_bytes)?;
        writeln!(f, "duration : {} s", self.duration_seconds)?;
        write!(f, "bitRate : {} kb/s", self.bit_rate_kbps)
    }
}

/// Decode the header of the WAV file at `path` in lenient mode.
pub fn decode_header(path: impl AsRef<Path>) -> Result<Header> {
    decode_header_with(path, ValidationMode::Lenient)
}

/// Decode the header of the WAV file at `path`.
///
/// Opens the file read-only and reads exactly 44 bytes; the handle is closed
/// before returning.
pub fn decode_header_with(path: impl AsRef<Path>, mode: ValidationMode) -> Result<Header> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;

    let header = decode_from_reader(&mut file, mode)?;
    debug!(
        "Decoded {}: {} Hz, {} ch, {} bit, {} bytes payload ({} s)",
        path.display(),
        header.sample_rate_hz,
        header.channel_count,
        header.bits_per_sample,
        header.data_size_bytes,
        header.duration_seconds
    );
    Ok(header)
}

/// Decode a header from the current position of `reader`.
///
/// Reads until 44 bytes are collected or the stream ends.
pub fn decode_from_reader<R: Read>(reader: &mut R, mode: ValidationMode) -> Result<Header> {
    let mut raw = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut raw[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    if filled < HEADER_LEN {
        return Err(Error::TruncatedHeader { available: filled });
    }

    let header = Header::from_bytes(&raw)?;
    let anomalies = header.anomalies();

    match mode {
        ValidationMode::Strict => {
            let structural: Vec<_> = anomalies.into_iter().filter(|a| a.is_structural()).collect();
            if !structural.is_empty() {
                return Err(Error::MalformedHeader(structural));
            }
        }
        ValidationMode::Lenient => {
            for anomaly in &anomalies {
                warn!("Suspicious WAV header: {}", anomaly);
            }
        }
    }

    Ok(header)
}

fn tag(raw: &[u8; HEADER_LEN], offset: usize) -> [u8; 4] {
    [raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]]
}

fn le_u16(raw: &[u8; HEADER_LEN], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn le_u32(raw: &[u8; HEADER_LEN], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

fn tag_text(tag: &[u8; 4]) -> String {
    tag.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// 16 kHz, mono, 16-bit, 320000 bytes of payload (10 seconds)
    fn speech_header_bytes() -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[0..4].copy_from_slice(b"RIFF");
        raw[4..8].copy_from_slice(&320_036u32.to_le_bytes());
        raw[8..12].copy_from_slice(b"WAVE");
        raw[12..16].copy_from_slice(b"fmt ");
        raw[16..20].copy_from_slice(&16u32.to_le_bytes());
        raw[20..22].copy_from_slice(&1u16.to_le_bytes());
        raw[22..24].copy_from_slice(&1u16.to_le_bytes());
        raw[24..28].copy_from_slice(&16_000u32.to_le_bytes());
        raw[28..32].copy_from_slice(&32_000u32.to_le_bytes());
        raw[32..34].copy_from_slice(&2u16.to_le_bytes());
        raw[34..36].copy_from_slice(&16u16.to_le_bytes());
        raw[36..40].copy_from_slice(b"data");
        raw[40..44].copy_from_slice(&320_000u32.to_le_bytes());
        raw
    }

    #[test]
    fn test_parse_fields_at_fixed_offsets() {
        let header = Header::from_bytes(&speech_header_bytes()).unwrap();

        assert_eq!(&header.riff_tag, b"RIFF");
        assert_eq!(header.file_size, 320_036);
        assert_eq!(&header.file_type_tag, b"WAVE");
        assert_eq!(&header.format_tag, b"fmt ");
        assert_eq!(header.format_block_length, 16);
        assert_eq!(header.format_type, FORMAT_PCM);
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.sample_rate_hz, 16_000);
        assert_eq!(header.byte_rate, 32_000);
        assert_eq!(header.block_align, 2);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(&header.data_tag, b"data");
        assert_eq!(header.data_size_bytes, 320_000);
        assert_eq!(header.duration_seconds, 10);
        assert_eq!(header.bit_rate_kbps, 256);
        assert!(header.anomalies().is_empty());
    }

    #[test]
    fn test_multibyte_fields_are_little_endian() {
        let mut raw = speech_header_bytes();
        raw[24..28].copy_from_slice(&[0x44, 0xAC, 0x00, 0x00]);
        let header = Header::from_bytes(&raw).unwrap();
        assert_eq!(header.sample_rate_hz, 44_100);
    }

    #[test]
    fn test_duration_uses_integer_division() {
        let mut raw = speech_header_bytes();
        raw[40..44].copy_from_slice(&63_999u32.to_le_bytes());
        let header = Header::from_bytes(&raw).unwrap();
        assert_eq!(header.duration_seconds, 1);
    }

    #[test]
    fn test_truncated_input() {
        let raw = speech_header_bytes();
        let err = decode_from_reader(&mut Cursor::new(&raw[..43]), ValidationMode::Lenient)
            .unwrap_err();
        assert!(matches!(err, Error::TruncatedHeader { available: 43 }));

        let err = decode_from_reader(&mut Cursor::new(Vec::new()), ValidationMode::Lenient)
            .unwrap_err();
        assert!(matches!(err, Error::TruncatedHeader { available: 0 }));
    }

    #[test]
    fn test_zero_byte_rate_is_rejected() {
        let mut raw = speech_header_bytes();
        raw[28..32].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(Header::from_bytes(&raw), Err(Error::InvalidByteRate)));
    }

    #[test]
    fn test_lenient_mode_tolerates_wrong_tags() {
        let mut raw = speech_header_bytes();
        raw[0..4].copy_from_slice(b"RIFX");
        raw[36..40].copy_from_slice(b"LIST");

        let header = decode_from_reader(&mut Cursor::new(raw), ValidationMode::Lenient).unwrap();
        assert_eq!(&header.riff_tag, b"RIFX");

        let anomalies = header.anomalies();
        assert_eq!(anomalies.len(), 2);
        assert!(anomalies.iter().all(HeaderAnomaly::is_structural));
    }

    #[test]
    fn test_strict_mode_rejects_wrong_tags() {
        let mut raw = speech_header_bytes();
        raw[8..12].copy_from_slice(b"AVI ");

        let err = decode_from_reader(&mut Cursor::new(raw), ValidationMode::Strict).unwrap_err();
        match err {
            Error::MalformedHeader(anomalies) => {
                assert_eq!(
                    anomalies,
                    vec![HeaderAnomaly::TagMismatch {
                        field: "file type",
                        expected: *b"WAVE",
                        found: *b"AVI ",
                    }]
                );
            }
            other => panic!("Expected MalformedHeader, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_mode_accepts_soft_anomalies() {
        // An inconsistent block align is still a PCM WAV
        let mut raw = speech_header_bytes();
        raw[32..34].copy_from_slice(&4u16.to_le_bytes());
        let header = decode_from_reader(&mut Cursor::new(raw), ValidationMode::Strict).unwrap();
        assert_eq!(
            header.anomalies(),
            vec![HeaderAnomaly::BlockAlignMismatch {
                stored: 4,
                derived: 2
            }]
        );
    }

    #[test]
    fn test_pcm_builder_derives_rates() {
        let header = Header::pcm(44_100, 2, 16, 176_400).unwrap();
        assert_eq!(header.byte_rate, 176_400);
        assert_eq!(header.block_align, 4);
        assert_eq!(header.file_size, 176_436);
        assert_eq!(header.duration_seconds, 1);
        assert_eq!(header.bit_rate_kbps, 1411);
        assert!(header.anomalies().is_empty());

        assert!(matches!(Header::pcm(0, 2, 16, 100), Err(Error::InvalidByteRate)));
    }

    #[test]
    fn test_encode_matches_source_bytes() {
        let raw = speech_header_bytes();
        let header = Header::from_bytes(&raw).unwrap();
        assert_eq!(header.encode(), raw);
    }

    #[test]
    fn test_display_lists_fields() {
        let header = Header::from_bytes(&speech_header_bytes()).unwrap();
        let text = header.to_string();
        assert!(text.starts_with("riff : RIFF\n"));
        assert!(text.contains("format : fmt \n"));
        assert!(text.contains("sampleRate : 16000\n"));
        assert!(text.ends_with("bitRate : 256 kb/s"));
    }

    #[test]
    fn test_missing_file() {
        let err = decode_header("/nonexistent/dir/clip.wav").unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }
}
