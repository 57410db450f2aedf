//! Event types for the wavplay event system
//!
//! Provides the playback event definitions and the `EventBus` used to
//! broadcast them to any number of observers (CLI printers, UI layers, tests).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why playback left the playing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// All PCM payload was written and the grace period elapsed
    EndOfData,
    /// The sink stopped accepting data while still playing
    Stalled,
    /// Reading the file failed mid-stream
    IoFault,
    /// The single-shot notification period was reached
    PeriodReached,
    /// Caller asked to stop (or release)
    Requested,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::EndOfData => "end of data",
            StopReason::Stalled => "stalled",
            StopReason::IoFault => "I/O fault",
            StopReason::PeriodReached => "period reached",
            StopReason::Requested => "requested",
        };
        f.write_str(s)
    }
}

/// Playback events
///
/// Broadcast via `EventBus` and serializable for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlaybackEvent {
    /// A WAV header was decoded for playback
    HeaderDecoded {
        /// File the header came from
        path: String,
        sample_rate_hz: u32,
        channel_count: u16,
        bits_per_sample: u16,
        data_size_bytes: u32,
        duration_seconds: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output sink entered the playing state
    PlaybackStarted {
        path: String,
        /// Streaming buffer capacity chosen for the sink
        buffer_capacity_bytes: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output sink was stopped
    PlaybackStopped {
        path: String,
        reason: StopReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic position notification fired
    PeriodReached {
        path: String,
        position_frames: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// One-to-many event broadcaster
///
/// Thin wrapper over `tokio::sync::broadcast`. Sending never blocks and does
/// not need a running runtime, so the audio worker thread can emit directly.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlaybackEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Slow receivers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlaybackEvent,
    ) -> Result<usize, broadcast::error::SendError<PlaybackEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: PlaybackEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped(reason: StopReason) -> PlaybackEvent {
        PlaybackEvent::PlaybackStopped {
            path: "test.wav".to_string(),
            reason,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(16);
        assert_eq!(bus.capacity(), 16);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(16);
        assert!(bus.emit(stopped(StopReason::Requested)).is_err());
        bus.emit_lossy(stopped(StopReason::Requested));
    }

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(stopped(StopReason::EndOfData)).unwrap(), 1);

        match rx.recv().await.unwrap() {
            PlaybackEvent::PlaybackStopped { reason, .. } => {
                assert_eq!(reason, StopReason::EndOfData)
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(stopped(StopReason::IoFault)).unwrap();
        assert_eq!(json["type"], "PlaybackStopped");
        assert_eq!(json["reason"], "io_fault");
    }
}
