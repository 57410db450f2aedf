//! A seekable reader whose underlying storage fails partway through

use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// Serves `bytes` until the read position reaches `fail_at`, then returns
/// `io::ErrorKind::Other` on every read.
pub struct FailingReader {
    inner: Cursor<Vec<u8>>,
    fail_at: u64,
}

impl FailingReader {
    pub fn new(bytes: Vec<u8>, fail_at: u64) -> Self {
        Self {
            inner: Cursor::new(bytes),
            fail_at,
        }
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.inner.position();
        if position >= self.fail_at {
            return Err(io::Error::new(io::ErrorKind::Other, "device unplugged"));
        }
        let allowed = (self.fail_at - position).min(buf.len() as u64) as usize;
        self.inner.read(&mut buf[..allowed])
    }
}

impl Seek for FailingReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
