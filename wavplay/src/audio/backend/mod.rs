//! Platform audio output primitives
//!
//! An `AudioBackend` is the raw device stream an `OutputSink` drives; a
//! `BackendFactory` reports the device minimum buffer size and opens streams.
//!
//! Backends:
//! - [`cpal_output::CpalDevice`]: the system output device via cpal
//! - [`simulated::SimulatedDevice`]: headless device for tests and `--null-output`

pub mod cpal_output;
pub mod simulated;

use crate::audio::sink::{ChannelLayout, SinkParams};
use crate::error::Result;

pub use cpal_output::CpalDevice;
pub use simulated::{Pacing, SimulatedDevice, SimulatedProbe};

/// Opens output streams on one device
pub trait BackendFactory: Send + Sync {
    /// Smallest streaming buffer, in bytes, the device accepts for this format.
    fn min_buffer_bytes(
        &self,
        sample_rate_hz: u32,
        layout: ChannelLayout,
        bits_per_sample: u16,
    ) -> Result<i64>;

    /// Open a stream with the given construction parameters.
    fn open(&self, params: &SinkParams) -> Result<Box<dyn AudioBackend>>;
}

/// One open output stream
///
/// Calls are serialized by the owning `OutputSink`; `write` must never block.
pub trait AudioBackend: Send {
    /// Start (or resume) rendering queued data
    fn play(&mut self) -> Result<()>;

    /// Stop rendering. May fail with `SinkStateFault` when the stream is not
    /// in a stoppable state.
    fn stop(&mut self) -> Result<()>;

    /// Queue as much of `data` as fits; returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Frames rendered since the stream was opened
    fn position_frames(&mut self) -> u64;

    /// Free the stream. No other call is valid afterwards.
    fn release(&mut self) -> Result<()>;
}
