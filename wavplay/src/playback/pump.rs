//! Chunked PCM transfer from file to sink
//!
//! Reads the payload that follows the 44-byte header in fixed-size chunks and
//! writes each one to the output sink until the file is exhausted or the sink
//! leaves `Playing`. The pump never stops the sink itself.

use crate::audio::{OutputSink, SinkState};
use crate::error::{Error, Result};
use crate::wav::HEADER_LEN;
use serde::Serialize;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, trace};

/// Bytes read from the file per iteration
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Why a pump pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpEnd {
    /// End of file reached
    Exhausted,
    /// Sink left `Playing` (stopped or released)
    SinkStopped,
    /// Sink timed out on a chunk while still `Playing`
    Stalled,
}

/// Totals for one pump pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PumpOutcome {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub chunks: u64,
    pub end: PumpEnd,
}

/// Fill `buf` from `source`, stopping early only at end of file.
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Stream the PCM payload of `source` into `sink`.
///
/// Each chunk gets a fresh zeroed buffer and is written whole, so a short
/// final read goes out padded with silence. The sink only returns a short
/// count after its write timeout, so a partly written chunk ends the pass
/// rather than being skipped. I/O errors are returned as-is.
pub fn pump<R: Read + Seek>(
    mut source: R,
    sink: &OutputSink,
    chunk_size: usize,
) -> Result<PumpOutcome> {
    if chunk_size == 0 {
        return Err(Error::InvalidArgument("chunk size must be > 0".to_string()));
    }

    source.seek(SeekFrom::Start(HEADER_LEN as u64))?;

    let mut outcome = PumpOutcome {
        bytes_read: 0,
        bytes_written: 0,
        chunks: 0,
        end: PumpEnd::Exhausted,
    };

    loop {
        if sink.state() != SinkState::Playing {
            outcome.end = PumpEnd::SinkStopped;
            break;
        }

        let mut chunk = vec![0u8; chunk_size];
        let read = read_chunk(&mut source, &mut chunk)?;
        if read == 0 {
            outcome.end = PumpEnd::Exhausted;
            break;
        }
        outcome.bytes_read += read as u64;

        let written = sink.write(&chunk)?;
        outcome.bytes_written += written as u64;
        outcome.chunks += 1;
        trace!("chunk {}: read {} b, wrote {} b", outcome.chunks, read, written);

        if written < chunk.len() {
            outcome.end = if sink.state() == SinkState::Playing {
                PumpEnd::Stalled
            } else {
                PumpEnd::SinkStopped
            };
            break;
        }
    }

    debug!(
        "Pump finished ({:?}): {} chunks, {} b read, {} b written",
        outcome.end, outcome.chunks, outcome.bytes_read, outcome.bytes_written
    );
    Ok(outcome)
}

/// Open `path` and pump its payload into `sink`.
pub fn pump_path(path: &Path, sink: &OutputSink, chunk_size: usize) -> Result<PumpOutcome> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;
    pump(file, sink, chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::SimulatedDevice;
    use crate::audio::SinkParams;
    use crate::wav::Header;
    use std::io::Cursor;

    fn wav_bytes(payload: &[u8]) -> Vec<u8> {
        let header = Header::pcm(16_000, 1, 16, payload.len() as u32).unwrap();
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn playing_sink(device: &SimulatedDevice) -> OutputSink {
        let sink = OutputSink::create(SinkParams::new(16_000, 1, 16, 4096), device).unwrap();
        sink.play().unwrap();
        sink
    }

    #[test]
    fn test_pump_skips_header_and_pads_final_chunk() {
        let device = SimulatedDevice::default();
        device.probe().set_recording(true);
        let sink = playing_sink(&device);

        let payload: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        let outcome = pump(Cursor::new(wav_bytes(&payload)), &sink, 1024).unwrap();

        assert_eq!(outcome.end, PumpEnd::Exhausted);
        assert_eq!(outcome.chunks, 2);
        assert_eq!(outcome.bytes_read, 1500);
        assert_eq!(outcome.bytes_written, 2048);

        let recorded = device.probe().recorded();
        assert_eq!(&recorded[..1500], &payload[..]);
        assert!(recorded[1500..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pump_header_only_file() {
        let device = SimulatedDevice::default();
        let sink = playing_sink(&device);

        let outcome = pump(Cursor::new(wav_bytes(&[])), &sink, 1024).unwrap();
        assert_eq!(outcome.end, PumpEnd::Exhausted);
        assert_eq!(outcome.chunks, 0);
        assert_eq!(device.probe().bytes_accepted(), 0);
    }

    #[test]
    fn test_pump_does_nothing_when_sink_not_playing() {
        let device = SimulatedDevice::default();
        let sink = OutputSink::create(SinkParams::new(16_000, 1, 16, 4096), &device).unwrap();

        let outcome = pump(Cursor::new(wav_bytes(&[1u8; 4096])), &sink, 1024).unwrap();
        assert_eq!(outcome.end, PumpEnd::SinkStopped);
        assert_eq!(outcome.bytes_read, 0);
        assert_eq!(sink.state(), SinkState::Ready);
    }

    #[test]
    fn test_pump_reports_stall() {
        let device = SimulatedDevice::default();
        device.probe().set_accept_limit(1024);
        let sink = OutputSink::create(SinkParams::new(16_000, 1, 16, 4096), &device)
            .unwrap()
            .with_write_timeout(std::time::Duration::from_millis(10));
        sink.play().unwrap();

        let outcome = pump(Cursor::new(wav_bytes(&[1u8; 8192])), &sink, 1024).unwrap();
        assert_eq!(outcome.end, PumpEnd::Stalled);
        assert_eq!(outcome.bytes_written, 1024);
        // The pump never stops the sink
        assert_eq!(sink.state(), SinkState::Playing);
    }

    #[test]
    fn test_pump_partial_write_ends_pass() {
        let device = SimulatedDevice::default();
        device.probe().set_accept_limit(1536);
        let sink = OutputSink::create(SinkParams::new(16_000, 1, 16, 4096), &device)
            .unwrap()
            .with_write_timeout(std::time::Duration::from_millis(10));
        sink.play().unwrap();

        let outcome = pump(Cursor::new(wav_bytes(&[1u8; 8192])), &sink, 1024).unwrap();
        assert_eq!(outcome.end, PumpEnd::Stalled);
        assert_eq!(outcome.chunks, 2);
        assert_eq!(outcome.bytes_read, 2048);
        assert_eq!(outcome.bytes_written, 1536);
    }

    /// Cursor that fails every read once past `fail_at`
    struct FlakySource {
        inner: Cursor<Vec<u8>>,
        fail_at: u64,
    }

    impl Read for FlakySource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let position = self.inner.position();
            if position >= self.fail_at {
                return Err(std::io::Error::new(ErrorKind::Other, "read failed"));
            }
            let allowed = (self.fail_at - position).min(buf.len() as u64) as usize;
            self.inner.read(&mut buf[..allowed])
        }
    }

    impl Seek for FlakySource {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_pump_propagates_read_fault() {
        let device = SimulatedDevice::default();
        let sink = playing_sink(&device);
        let source = FlakySource {
            inner: Cursor::new(wav_bytes(&[3u8; 8192])),
            fail_at: (HEADER_LEN + 2048) as u64,
        };

        assert!(matches!(pump(source, &sink, 1024), Err(Error::Io(_))));
        assert_eq!(device.probe().bytes_accepted(), 2048);
        // Stopping is left to the caller
        assert_eq!(sink.state(), SinkState::Playing);
    }

    #[test]
    fn test_pump_rejects_zero_chunk() {
        let device = SimulatedDevice::default();
        let sink = playing_sink(&device);
        assert!(matches!(
            pump(Cursor::new(wav_bytes(&[])), &sink, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_pump_path_missing_file() {
        let device = SimulatedDevice::default();
        let sink = playing_sink(&device);
        assert!(matches!(
            pump_path(Path::new("/nonexistent/clip.wav"), &sink, 1024),
            Err(Error::FileNotFound(_))
        ));
    }
}
