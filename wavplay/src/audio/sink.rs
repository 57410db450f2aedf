//! Output sink state machine
//!
//! Wraps one `AudioBackend` stream with the lifecycle
//! `Ready -> Playing <-> Stopped -> Released` and the start/stop/period
//! notifications observers subscribe to.
//!
//! The sink is shared between the controlling thread (play/stop/release) and
//! the pump worker (write). State lives behind one mutex; a blocked `write`
//! waits on a condvar so `stop()` wakes it immediately.

use crate::audio::backend::{AudioBackend, BackendFactory};
use crate::error::{Error, Result};
use crate::wav::Header;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// How long a `write` may go without progress before returning a short count
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

/// Re-check interval while a `write` waits for buffer space
const WRITE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Lifecycle state of an output sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkState {
    /// No sink has been created
    #[default]
    Uninitialized,
    Ready,
    Playing,
    Stopped,
    /// Terminal; the backend has been freed
    Released,
}

impl std::fmt::Display for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkState::Uninitialized => write!(f, "uninitialized"),
            SinkState::Ready => write!(f, "ready"),
            SinkState::Playing => write!(f, "playing"),
            SinkState::Stopped => write!(f, "stopped"),
            SinkState::Released => write!(f, "released"),
        }
    }
}

/// Output channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Mono,
    Stereo,
    /// Let the platform pick
    Default,
}

impl ChannelLayout {
    /// 1 → mono, 2 → stereo, anything else → platform default (not an error)
    pub fn from_channel_count(channel_count: u16) -> Self {
        match channel_count {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            _ => ChannelLayout::Default,
        }
    }

    /// Fixed output channel count, `None` for the platform default
    pub fn channel_count(&self) -> Option<u16> {
        match self {
            ChannelLayout::Mono => Some(1),
            ChannelLayout::Stereo => Some(2),
            ChannelLayout::Default => None,
        }
    }
}

/// How PCM reaches the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Caller pushes successive buffers
    #[default]
    Streaming,
    /// Whole payload handed over at once (not supported)
    Static,
}

/// Stream usage class passed to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageClass {
    Music,
    #[default]
    Media,
}

/// Construction parameters, fixed for the life of a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkParams {
    pub sample_rate_hz: u32,
    /// Channel count of the PCM source
    pub channel_count: u16,
    pub channel_layout: ChannelLayout,
    pub bits_per_sample: u16,
    pub buffer_capacity_bytes: usize,
    pub stream_mode: StreamMode,
    pub usage: UsageClass,
}

impl SinkParams {
    pub fn new(
        sample_rate_hz: u32,
        channel_count: u16,
        bits_per_sample: u16,
        buffer_capacity_bytes: usize,
    ) -> Self {
        Self {
            sample_rate_hz,
            channel_count,
            channel_layout: ChannelLayout::from_channel_count(channel_count),
            bits_per_sample,
            buffer_capacity_bytes,
            stream_mode: StreamMode::Streaming,
            usage: UsageClass::Media,
        }
    }

    pub fn from_header(header: &Header, buffer_capacity_bytes: usize) -> Self {
        Self::new(
            header.sample_rate_hz,
            header.channel_count,
            header.bits_per_sample,
            buffer_capacity_bytes,
        )
    }

    /// Bytes per sample, at least one
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8).max(1)
    }

    /// Bytes per multichannel frame, at least one
    pub fn frame_bytes(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channel_count.max(1))
    }

    pub fn byte_rate(&self) -> u64 {
        self.frame_bytes() as u64 * u64::from(self.sample_rate_hz)
    }
}

/// Observer of sink transitions
///
/// Callbacks run on whichever thread caused the transition (controller or
/// pump worker) and never while the sink's lock is held.
pub trait PlaybackListener: Send + Sync {
    /// Sink entered `Playing`
    fn on_start(&self);

    /// `stop()` was called
    fn on_stop(&self);

    /// Configured notification period was reached
    fn on_period_reached(&self, _position_frames: u64) {}
}

struct PeriodNotification {
    period_frames: u64,
    next_marker: u64,
    auto_stop: bool,
}

struct PeriodHit {
    position_frames: u64,
    auto_stop: bool,
    listener: Option<Arc<dyn PlaybackListener>>,
}

struct SinkInner {
    state: SinkState,
    backend: Option<Box<dyn AudioBackend>>,
    listener: Option<Arc<dyn PlaybackListener>>,
    period: Option<PeriodNotification>,
    bytes_written: u64,
}

/// Audio output sink
pub struct OutputSink {
    params: SinkParams,
    inner: Mutex<SinkInner>,
    wake: Condvar,
    write_timeout: Duration,
}

impl OutputSink {
    /// Open a backend stream and return a sink in `Ready`.
    pub fn create(params: SinkParams, factory: &dyn BackendFactory) -> Result<Self> {
        if params.stream_mode != StreamMode::Streaming {
            return Err(Error::AudioOutput(format!(
                "Unsupported stream mode: {:?}",
                params.stream_mode
            )));
        }
        if params.buffer_capacity_bytes == 0 {
            return Err(Error::InvalidBufferSize(0));
        }

        let backend = factory.open(&params)?;
        info!(
            "Output sink ready: {} Hz, {:?} ({} ch), {} bit, {} b buffer, {:?}",
            params.sample_rate_hz,
            params.channel_layout,
            params.channel_count,
            params.bits_per_sample,
            params.buffer_capacity_bytes,
            params.usage
        );

        Ok(Self {
            params,
            inner: Mutex::new(SinkInner {
                state: SinkState::Ready,
                backend: Some(backend),
                listener: None,
                period: None,
                bytes_written: 0,
            }),
            wake: Condvar::new(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Change how long `write` waits for buffer space before giving up.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn params(&self) -> &SinkParams {
        &self.params
    }

    pub fn state(&self) -> SinkState {
        self.lock().state
    }

    /// Total bytes accepted by the backend
    pub fn bytes_written(&self) -> u64 {
        self.lock().bytes_written
    }

    /// Frames rendered so far, 0 once released
    pub fn position_frames(&self) -> u64 {
        self.lock()
            .backend
            .as_mut()
            .map_or(0, |backend| backend.position_frames())
    }

    /// Register the observer, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn PlaybackListener>) {
        let mut inner = self.lock();
        if inner.state == SinkState::Released {
            warn!("Ignoring listener registration on released sink");
            return;
        }
        inner.listener = Some(listener);
    }

    pub fn clear_listener(&self) {
        self.lock().listener = None;
    }

    /// Fire `on_period_reached` every `period_frames` rendered frames.
    ///
    /// With `auto_stop` the sink stops itself at the first marker, which is
    /// how single-shot (non-looping) playback ends. `0` disables the period.
    pub fn set_notification_period(&self, period_frames: u64, auto_stop: bool) {
        let mut inner = self.lock();
        if period_frames == 0 {
            inner.period = None;
            return;
        }
        let position = inner
            .backend
            .as_mut()
            .map_or(0, |backend| backend.position_frames());
        inner.period = Some(PeriodNotification {
            period_frames,
            next_marker: position.saturating_add(period_frames),
            auto_stop,
        });
        debug!(
            "Notification period set to {} frames (auto stop: {})",
            period_frames, auto_stop
        );
    }

    /// `Ready | Stopped -> Playing`; fires `on_start` once per transition.
    pub fn play(&self) -> Result<()> {
        let listener = {
            let mut inner = self.lock();
            match inner.state {
                SinkState::Playing => return Ok(()),
                SinkState::Ready | SinkState::Stopped => {}
                state => {
                    return Err(Error::InvalidState(format!(
                        "Cannot play sink in state {}",
                        state
                    )))
                }
            }

            let Some(backend) = inner.backend.as_mut() else {
                return Err(Error::InvalidState("Sink has no backend".to_string()));
            };
            backend.play()?;
            let position = backend.position_frames();

            if let Some(period) = inner.period.as_mut() {
                period.next_marker = position.saturating_add(period.period_frames);
            }
            inner.state = SinkState::Playing;
            inner.listener.clone()
        };

        info!("Output sink playing");
        if let Some(listener) = listener {
            listener.on_start();
        }
        Ok(())
    }

    /// Write PCM bytes, blocking while the buffer is full.
    ///
    /// Returns the number of bytes accepted: fewer than `data.len()` (possibly
    /// 0) when the sink leaves `Playing` mid-write or no space frees up within
    /// the write timeout. Outside `Playing` nothing is written.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        let mut last_progress = Instant::now();
        let mut inner = self.lock();

        while written < data.len() {
            if inner.state != SinkState::Playing {
                break;
            }
            let Some(backend) = inner.backend.as_mut() else {
                break;
            };

            let accepted = backend.write(&data[written..])?;
            if accepted > 0 {
                written += accepted;
                inner.bytes_written += accepted as u64;
                last_progress = Instant::now();
                continue;
            }

            if last_progress.elapsed() >= self.write_timeout {
                warn!(
                    "Sink accepted no data for {:?}, returning short write ({}/{} b)",
                    self.write_timeout,
                    written,
                    data.len()
                );
                break;
            }

            inner = self
                .wake
                .wait_timeout(inner, WRITE_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        trace!("write: {} of {} b", written, data.len());
        let hit = Self::due_period(&mut inner);
        drop(inner);
        self.fire_period(hit);

        Ok(written)
    }

    /// Check the notification period against the current render position.
    ///
    /// `write` does this itself; call it while no data is being written
    /// (e.g. while queued audio drains) so markers still fire.
    pub fn poll_period(&self) {
        let hit = Self::due_period(&mut self.lock());
        self.fire_period(hit);
    }

    /// Stop playback.
    ///
    /// `on_stop` fires on every call, before the state-guarded backend call.
    /// Only `Playing` transitions to `Stopped`; other states are a no-op.
    /// Backend faults are logged, never returned.
    pub fn stop(&self) {
        let listener = self.lock().listener.clone();
        if let Some(listener) = listener {
            listener.on_stop();
        }

        let mut inner = self.lock();
        if inner.state == SinkState::Playing {
            if let Some(backend) = inner.backend.as_mut() {
                if let Err(e) = backend.stop() {
                    error!("stop: {}", e);
                }
            }
            inner.state = SinkState::Stopped;
            info!("Output sink stopped");
        } else {
            debug!("stop: sink is {}, nothing to stop", inner.state);
        }
        drop(inner);

        self.wake.notify_all();
    }

    /// Stop, free the backend and drop the listener. Terminal.
    ///
    /// Calling it again is a no-op.
    pub fn release(&self) {
        self.stop();

        let backend = {
            let mut inner = self.lock();
            if inner.state == SinkState::Released {
                return;
            }
            inner.listener = None;
            inner.period = None;
            inner.state = SinkState::Released;
            inner.backend.take()
        };
        self.wake.notify_all();

        if let Some(mut backend) = backend {
            if let Err(e) = backend.release() {
                error!("release: {}", e);
            }
        }
        info!("Output sink released");
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn due_period(inner: &mut SinkInner) -> Option<PeriodHit> {
        if inner.state != SinkState::Playing {
            return None;
        }
        let position_frames = inner.backend.as_mut()?.position_frames();
        let period = inner.period.as_mut()?;
        if position_frames < period.next_marker {
            return None;
        }

        period.next_marker = position_frames.saturating_add(period.period_frames);
        let auto_stop = period.auto_stop;
        Some(PeriodHit {
            position_frames,
            auto_stop,
            listener: inner.listener.clone(),
        })
    }

    fn fire_period(&self, hit: Option<PeriodHit>) {
        let Some(hit) = hit else {
            return;
        };
        debug!("Notification period reached at frame {}", hit.position_frames);
        if let Some(listener) = hit.listener {
            listener.on_period_reached(hit.position_frames);
        }
        if hit.auto_stop {
            self.stop();
        }
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut backend) = inner.backend.take() {
            if let Err(e) = backend.release() {
                warn!("Failed to release backend on drop: {}", e);
            }
        }
    }
}
