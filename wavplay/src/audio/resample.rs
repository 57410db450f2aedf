//! Streaming sample rate conversion using rubato
//!
//! Used by the device backend when the output device cannot run at the
//! file's rate. Frames arrive one at a time from the writing thread and are
//! converted in fixed blocks of [`RESAMPLE_BLOCK_FRAMES`] input frames, so up
//! to one block stays queued inside the resampler.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

/// Input frames per conversion block
pub const RESAMPLE_BLOCK_FRAMES: usize = 256;

/// Output frames a block can produce between `input_rate` and `output_rate`,
/// with headroom for the resampler's rounding.
pub fn block_output_frames(input_rate: u32, output_rate: u32) -> usize {
    let scaled = RESAMPLE_BLOCK_FRAMES as u64 * u64::from(output_rate)
        / u64::from(input_rate.max(1));
    scaled as usize + 8
}

/// Converts interleaved `f32` frames from one rate to another
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    /// Planar input waiting for a full block
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot resample {} Hz -> {} Hz with {} channels",
                input_rate, output_rate, channels
            )));
        }

        let inner = FastFixedIn::<f32>::new(
            f64::from(output_rate) / f64::from(input_rate),
            1.0,
            PolynomialDegree::Septic,
            RESAMPLE_BLOCK_FRAMES,
            channels,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to create resampler: {}", e)))?;

        debug!(
            "Resampling {} Hz -> {} Hz ({} channels)",
            input_rate, output_rate, channels
        );

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            pending: vec![Vec::with_capacity(RESAMPLE_BLOCK_FRAMES); channels],
        })
    }

    pub fn channels(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    /// True when the next pushed frame completes a block
    pub fn block_due(&self) -> bool {
        self.pending_frames() + 1 >= self.inner.input_frames_next()
    }

    /// Interleaved samples the next block can produce at most
    pub fn max_block_samples(&self) -> usize {
        self.inner.output_frames_max() * self.channels()
    }

    /// Queue one interleaved input frame.
    ///
    /// When it completes a block, the converted frames are appended to `out`
    /// (interleaved). Returns the number of output frames appended.
    pub fn push_frame(&mut self, frame: &[f32], out: &mut Vec<f32>) -> Result<usize> {
        for (channel, &sample) in self.pending.iter_mut().zip(frame) {
            channel.push(sample);
        }
        if self.pending_frames() < self.inner.input_frames_next() {
            return Ok(0);
        }

        let planar = self
            .inner
            .process(self.pending.as_slice(), None)
            .map_err(|e| Error::AudioOutput(format!("Resampling failed: {}", e)))?;
        for channel in &mut self.pending {
            channel.clear();
        }

        let frames = planar.first().map_or(0, Vec::len);
        out.reserve(frames * planar.len());
        for index in 0..frames {
            for channel in &planar {
                out.push(channel[index]);
            }
        }
        Ok(frames)
    }

    /// Frames at the output rate expressed as input-rate frames
    pub fn to_input_frames(&self, output_frames: u64) -> u64 {
        output_frames * u64::from(self.input_rate) / u64::from(self.output_rate)
    }
}
