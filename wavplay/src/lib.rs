//! # wavplay
//!
//! Streams uncompressed PCM WAV files to an audio output device.
//!
//! **Pipeline:** decode the 44-byte RIFF/WAVE header, size a streaming buffer
//! from the payload and the device minimum, open an output sink, and pump the
//! payload to it in fixed-size chunks on a worker thread. After the data runs
//! out the worker waits a grace period for queued audio to render, then stops
//! the sink.
//!
//! The caller owns a [`PlaybackSession`] and observes it through a
//! [`audio::PlaybackListener`] or the broadcast [`EventBus`].

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod wav;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use playback::PlaybackSession;
pub use wav::{decode_header, decode_header_with, Header, ValidationMode};
pub use wavplay_common::events::{EventBus, PlaybackEvent, StopReason};
