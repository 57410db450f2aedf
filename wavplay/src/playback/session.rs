//! Playback session
//!
//! Caller-owned controller for playing one WAV file at a time. A session
//! decodes the header, sizes and opens an output sink, then hands the file to
//! a worker thread that pumps PCM until the data runs out, waits a grace
//! period for queued audio to render, and stops the sink.
//!
//! Observers hear about transitions two ways: an optional
//! [`PlaybackListener`] called synchronously, and [`PlaybackEvent`]s
//! broadcast on the session's [`EventBus`].

use crate::audio::{
    BackendFactory, ChannelLayout, OutputSink, PlaybackListener, SinkParams, SinkState,
};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::playback::grace::{GraceOutcome, GraceSignal};
use crate::playback::pump::{pump, PumpEnd};
use crate::wav::{decode_from_reader, decode_header_with, Header};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use wavplay_common::events::{EventBus, PlaybackEvent, StopReason};

/// How often the grace wait re-checks the sink
const GRACE_TICK: Duration = Duration::from_millis(20);

/// Bridges sink callbacks to the caller's listener and the event bus
struct SessionNotifier {
    path: String,
    buffer_capacity_bytes: usize,
    period_auto_stop: bool,
    listener: Option<Arc<dyn PlaybackListener>>,
    events: EventBus,
    /// Reported with the next stop; reset to `Requested` once used
    next_stop_reason: Mutex<StopReason>,
}

impl SessionNotifier {
    fn set_stop_reason(&self, reason: StopReason) {
        *self
            .next_stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = reason;
    }

    fn take_stop_reason(&self) -> StopReason {
        std::mem::replace(
            &mut *self
                .next_stop_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            StopReason::Requested,
        )
    }
}

impl PlaybackListener for SessionNotifier {
    fn on_start(&self) {
        if let Some(listener) = &self.listener {
            listener.on_start();
        }
        self.events.emit_lossy(PlaybackEvent::PlaybackStarted {
            path: self.path.clone(),
            buffer_capacity_bytes: self.buffer_capacity_bytes,
            timestamp: chrono::Utc::now(),
        });
    }

    fn on_stop(&self) {
        let reason = self.take_stop_reason();
        info!("Playback stopped: {} ({})", self.path, reason);
        if let Some(listener) = &self.listener {
            listener.on_stop();
        }
        self.events.emit_lossy(PlaybackEvent::PlaybackStopped {
            path: self.path.clone(),
            reason,
            timestamp: chrono::Utc::now(),
        });
    }

    fn on_period_reached(&self, position_frames: u64) {
        if self.period_auto_stop {
            self.set_stop_reason(StopReason::PeriodReached);
        }
        if let Some(listener) = &self.listener {
            listener.on_period_reached(position_frames);
        }
        self.events.emit_lossy(PlaybackEvent::PeriodReached {
            path: self.path.clone(),
            position_frames,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// One playback pass: the sink and the worker feeding it
struct ActivePlayback {
    path: PathBuf,
    header: Header,
    sink: Arc<OutputSink>,
    grace: Arc<GraceSignal>,
    notifier: Arc<SessionNotifier>,
    worker: Option<JoinHandle<()>>,
}

impl ActivePlayback {
    fn worker_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Playback worker panicked");
            }
        }
    }
}

/// Plays WAV files through an output backend
pub struct PlaybackSession {
    config: PlayerConfig,
    backend: Arc<dyn BackendFactory>,
    events: EventBus,
    listener: Option<Arc<dyn PlaybackListener>>,
    active: Option<ActivePlayback>,
}

impl PlaybackSession {
    /// Create an idle session. Fails if `config` does not validate.
    pub fn new(
        config: PlayerConfig,
        backend: Arc<dyn BackendFactory>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            events,
            listener: None,
            active: None,
        })
    }

    /// Listener for passes started after this call.
    pub fn set_listener(&mut self, listener: Arc<dyn PlaybackListener>) {
        self.listener = Some(listener);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Decode a header using the configured validation mode.
    pub fn decode_header(&self, path: impl AsRef<Path>) -> Result<Header> {
        decode_header_with(path, self.config.validation)
    }

    /// Header of the current (or last) pass
    pub fn header(&self) -> Option<&Header> {
        self.active.as_ref().map(|a| &a.header)
    }

    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub fn is_playing(&self) -> bool {
        self.sink_state() == SinkState::Playing
    }

    /// `Uninitialized` when no pass has been started since the last release
    pub fn sink_state(&self) -> SinkState {
        self.active
            .as_ref()
            .map_or(SinkState::Uninitialized, |a| a.sink.state())
    }

    pub fn buffer_capacity_bytes(&self) -> Option<usize> {
        self.active
            .as_ref()
            .map(|a| a.sink.params().buffer_capacity_bytes)
    }

    /// Bytes accepted by the sink in the current (or last) pass
    pub fn bytes_written(&self) -> u64 {
        self.active.as_ref().map_or(0, |a| a.sink.bytes_written())
    }

    /// Start playing `path` in the background.
    ///
    /// Fails with `InvalidState` while a previous pass is still running.
    pub fn start_playback(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.retire_previous()?;

        let header = self.decode_header(path)?;
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        self.begin(path.to_path_buf(), header, file)
    }

    /// Start playing WAV data from `source` in the background.
    ///
    /// The header is decoded from the start of `source`; `label` names the
    /// pass in events and logs.
    pub fn start_playback_from<R>(&mut self, label: impl Into<PathBuf>, mut source: R) -> Result<()>
    where
        R: Read + Seek + Send + 'static,
    {
        let label = label.into();
        self.retire_previous()?;

        source.seek(SeekFrom::Start(0))?;
        let header = decode_from_reader(&mut source, self.config.validation)?;
        self.begin(label, header, source)
    }

    /// Reject a start while a pass runs; tear a finished pass down quietly.
    fn retire_previous(&mut self) -> Result<()> {
        if let Some(previous) = self.active.as_mut() {
            if previous.sink.state() == SinkState::Playing || previous.worker_running() {
                return Err(Error::InvalidState(format!(
                    "already playing {}",
                    previous.path.display()
                )));
            }
            // Finished pass: tear down quietly
            previous.sink.clear_listener();
            previous.sink.release();
            previous.join_worker();
        }
        self.active = None;
        Ok(())
    }

    fn begin<R>(&mut self, path: PathBuf, header: Header, source: R) -> Result<()>
    where
        R: Read + Seek + Send + 'static,
    {
        let path_str = path.display().to_string();
        self.events.emit_lossy(PlaybackEvent::HeaderDecoded {
            path: path_str.clone(),
            sample_rate_hz: header.sample_rate_hz,
            channel_count: header.channel_count,
            bits_per_sample: header.bits_per_sample,
            data_size_bytes: header.data_size_bytes,
            duration_seconds: header.duration_seconds,
            timestamp: chrono::Utc::now(),
        });

        let device_min = self.backend.min_buffer_bytes(
            header.sample_rate_hz,
            ChannelLayout::from_channel_count(header.channel_count),
            header.bits_per_sample,
        )?;
        let capacity = self
            .config
            .buffer_policy()?
            .compute(u64::from(header.data_size_bytes), device_min)?;

        let sink = OutputSink::create(
            SinkParams::from_header(&header, capacity),
            self.backend.as_ref(),
        )?
        .with_write_timeout(self.config.write_timeout());
        let sink = Arc::new(sink);

        let period_frames = if self.config.single_shot_period {
            u64::from(header.duration_seconds) * u64::from(header.sample_rate_hz)
        } else {
            0
        };

        let notifier = Arc::new(SessionNotifier {
            path: path_str,
            buffer_capacity_bytes: capacity,
            period_auto_stop: period_frames > 0,
            listener: self.listener.clone(),
            events: self.events.clone(),
            next_stop_reason: Mutex::new(StopReason::Requested),
        });
        sink.set_listener(notifier.clone());
        if period_frames > 0 {
            sink.set_notification_period(period_frames, true);
        }

        sink.play()?;
        info!(
            "Playing {} ({} s, {} b buffer)",
            path.display(),
            header.duration_seconds,
            capacity
        );

        let grace = Arc::new(GraceSignal::new());
        let worker = {
            let sink = Arc::clone(&sink);
            let grace = Arc::clone(&grace);
            let notifier = Arc::clone(&notifier);
            let chunk_size = self.config.chunk_size_bytes;
            let grace_period = self.config.grace_period();
            thread::Builder::new()
                .name("wavplay-pump".to_string())
                .spawn(move || {
                    run_worker(source, sink, grace, notifier, chunk_size, grace_period)
                })
        };
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                sink.release();
                return Err(Error::Io(e));
            }
        };

        self.active = Some(ActivePlayback {
            path,
            header,
            sink,
            grace,
            notifier,
            worker: Some(worker),
        });
        Ok(())
    }

    /// Stop the current pass and wait for its worker.
    ///
    /// `on_stop` fires on every call while a sink exists, even when it was
    /// already stopped.
    pub fn stop_playback(&mut self) {
        let Some(active) = self.active.as_mut() else {
            debug!("stop_playback: nothing to stop");
            return;
        };
        active.grace.cancel();
        active.notifier.set_stop_reason(StopReason::Requested);
        active.sink.stop();
        active.join_worker();
    }

    /// Stop and free the sink. Calling it again is a no-op.
    pub fn release(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.grace.cancel();
        active.notifier.set_stop_reason(StopReason::Requested);
        active.sink.release();
        active.join_worker();
        debug!("Session released {}", active.path.display());
    }

    /// Block until the worker of the current pass exits or `timeout` passes.
    ///
    /// Returns `true` when no worker is left running.
    pub fn wait_finished(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let running = self.active.as_ref().is_some_and(|a| a.worker_running());
            if !running {
                if let Some(active) = self.active.as_mut() {
                    active.join_worker();
                }
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_worker<R: Read + Seek>(
    source: R,
    sink: Arc<OutputSink>,
    grace: Arc<GraceSignal>,
    notifier: Arc<SessionNotifier>,
    chunk_size: usize,
    grace_period: Duration,
) {
    let reason = match pump(source, &sink, chunk_size) {
        Ok(outcome) => match outcome.end {
            PumpEnd::SinkStopped => {
                debug!("Sink left playing state, worker exiting");
                return;
            }
            PumpEnd::Exhausted => StopReason::EndOfData,
            PumpEnd::Stalled => {
                warn!(
                    "Output stalled after {} b, stopping after grace period",
                    outcome.bytes_written
                );
                StopReason::Stalled
            }
        },
        Err(e) => {
            warn!("Playback read failed, treating as end of data: {}", e);
            StopReason::IoFault
        }
    };

    debug!("Waiting {:?} for queued audio", grace_period);
    let outcome = grace.wait(grace_period, GRACE_TICK, || {
        sink.poll_period();
        sink.state() == SinkState::Playing
    });

    if outcome != GraceOutcome::Elapsed {
        debug!("Grace wait ended without stop: {:?}", outcome);
        return;
    }

    // A controller stop that got here first wins; one that arrives now waits
    let stopped = grace.claim(|| {
        if sink.state() == SinkState::Playing {
            notifier.set_stop_reason(reason);
            sink.stop();
        }
    });
    if !stopped {
        debug!("Stopped by controller before grace period ended");
    }
}
