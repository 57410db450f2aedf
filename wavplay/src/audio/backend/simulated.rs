//! Headless output device
//!
//! Accepts PCM without touching audio hardware. Used by `--null-output` and
//! throughout the test suite, where a [`SimulatedProbe`] inspects what the
//! sink did and injects faults.

use super::{AudioBackend, BackendFactory};
use crate::audio::sink::{ChannelLayout, SinkParams};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Default minimum buffer size reported by the simulated device
pub const DEFAULT_SIMULATED_MIN_BUFFER: i64 = 4096;

/// How queued data leaves the simulated buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Data is rendered the moment it is written
    #[default]
    Instant,
    /// Data drains at the stream's byte rate while playing
    Realtime,
    /// Nothing drains; writes stop once the buffer is full
    Held,
}

#[derive(Default)]
struct ProbeState {
    bytes_accepted: AtomicU64,
    accept_limit: AtomicU64,
    has_accept_limit: AtomicBool,
    play_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    release_calls: AtomicUsize,
    open_calls: AtomicUsize,
    fail_stop: AtomicBool,
    fail_release: AtomicBool,
    recording: AtomicBool,
    recorded: Mutex<Vec<u8>>,
    last_params: Mutex<Option<SinkParams>>,
}

/// Shared view into every stream a `SimulatedDevice` opened
#[derive(Clone, Default)]
pub struct SimulatedProbe {
    state: Arc<ProbeState>,
}

impl SimulatedProbe {
    pub fn bytes_accepted(&self) -> u64 {
        self.state.bytes_accepted.load(Ordering::SeqCst)
    }

    pub fn play_calls(&self) -> usize {
        self.state.play_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.state.stop_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.state.release_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    /// Parameters of the most recently opened stream
    pub fn last_params(&self) -> Option<SinkParams> {
        self.state
            .last_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make backend `stop` fail with a state fault.
    pub fn set_fail_stop(&self, fail: bool) {
        self.state.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Make backend `release` fail.
    pub fn set_fail_release(&self, fail: bool) {
        self.state.fail_release.store(fail, Ordering::SeqCst);
    }

    /// Accept at most `limit` bytes in total, then report a full buffer forever.
    pub fn set_accept_limit(&self, limit: u64) {
        self.state.accept_limit.store(limit, Ordering::SeqCst);
        self.state.has_accept_limit.store(true, Ordering::SeqCst);
    }

    /// Keep a copy of every accepted byte.
    pub fn set_recording(&self, recording: bool) {
        self.state.recording.store(recording, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<u8> {
        self.state
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remaining_allowance(&self) -> u64 {
        if !self.state.has_accept_limit.load(Ordering::SeqCst) {
            return u64::MAX;
        }
        self.state
            .accept_limit
            .load(Ordering::SeqCst)
            .saturating_sub(self.bytes_accepted())
    }
}

/// Output device that renders into memory
#[derive(Clone)]
pub struct SimulatedDevice {
    min_buffer_bytes: i64,
    pacing: Pacing,
    probe: SimulatedProbe,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_MIN_BUFFER)
    }
}

impl SimulatedDevice {
    pub fn new(min_buffer_bytes: i64) -> Self {
        Self {
            min_buffer_bytes,
            pacing: Pacing::Instant,
            probe: SimulatedProbe::default(),
        }
    }

    /// Drain at the stream byte rate, as real hardware would.
    pub fn realtime(self) -> Self {
        self.with_pacing(Pacing::Realtime)
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn probe(&self) -> SimulatedProbe {
        self.probe.clone()
    }
}

impl BackendFactory for SimulatedDevice {
    fn min_buffer_bytes(
        &self,
        _sample_rate_hz: u32,
        _layout: ChannelLayout,
        _bits_per_sample: u16,
    ) -> Result<i64> {
        Ok(self.min_buffer_bytes)
    }

    fn open(&self, params: &SinkParams) -> Result<Box<dyn AudioBackend>> {
        let state = &self.probe.state;
        state.open_calls.fetch_add(1, Ordering::SeqCst);
        *state
            .last_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(params.clone());

        debug!(
            "Simulated stream opened ({:?} pacing, {} b buffer)",
            self.pacing, params.buffer_capacity_bytes
        );

        Ok(Box::new(SimulatedBackend {
            pacing: self.pacing,
            capacity: params.buffer_capacity_bytes as u64,
            frame_bytes: params.frame_bytes() as u64,
            byte_rate: params.byte_rate(),
            queued: 0,
            rendered: 0,
            drain_since: None,
            probe: self.probe.clone(),
        }))
    }
}

struct SimulatedBackend {
    pacing: Pacing,
    capacity: u64,
    frame_bytes: u64,
    byte_rate: u64,
    queued: u64,
    rendered: u64,
    /// Set while playing under realtime pacing
    drain_since: Option<Instant>,
    probe: SimulatedProbe,
}

impl SimulatedBackend {
    fn drain(&mut self) {
        let Some(since) = self.drain_since else {
            return;
        };
        let due = (since.elapsed().as_secs_f64() * self.byte_rate as f64) as u64;
        let drained = due.min(self.queued);
        // Keep sub-byte remainders by only advancing the clock by what drained
        if drained > 0 {
            self.queued -= drained;
            self.rendered += drained;
            self.drain_since = Some(Instant::now());
        } else if self.queued == 0 {
            self.drain_since = Some(Instant::now());
        }
    }
}

impl AudioBackend for SimulatedBackend {
    fn play(&mut self) -> Result<()> {
        self.probe.state.play_calls.fetch_add(1, Ordering::SeqCst);
        if self.pacing == Pacing::Realtime {
            self.drain_since = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.probe.state.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.drain();
        self.drain_since = None;
        if self.probe.state.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::SinkStateFault(
                "simulated stream refused to stop".to_string(),
            ));
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.drain();

        let space = match self.pacing {
            Pacing::Instant => u64::MAX,
            Pacing::Realtime | Pacing::Held => self.capacity.saturating_sub(self.queued),
        };
        let accepted = (data.len() as u64)
            .min(space)
            .min(self.probe.remaining_allowance()) as usize;
        if accepted == 0 {
            return Ok(0);
        }

        match self.pacing {
            Pacing::Instant => self.rendered += accepted as u64,
            Pacing::Realtime | Pacing::Held => self.queued += accepted as u64,
        }

        let state = &self.probe.state;
        state
            .bytes_accepted
            .fetch_add(accepted as u64, Ordering::SeqCst);
        if state.recording.load(Ordering::SeqCst) {
            state
                .recorded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&data[..accepted]);
        }
        Ok(accepted)
    }

    fn position_frames(&mut self) -> u64 {
        self.drain();
        self.rendered / self.frame_bytes.max(1)
    }

    fn release(&mut self) -> Result<()> {
        self.probe.state.release_calls.fetch_add(1, Ordering::SeqCst);
        self.drain_since = None;
        if self.probe.state.fail_release.load(Ordering::SeqCst) {
            return Err(Error::AudioOutput(
                "simulated stream failed to release".to_string(),
            ));
        }
        Ok(())
    }
}
