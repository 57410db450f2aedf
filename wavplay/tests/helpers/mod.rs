//! Shared helpers for wavplay integration tests
//!
//! - `audio_generator`: write WAV fixtures with hound or from raw headers
//! - `failing_reader`: a source that errors after a set number of bytes
//! - `listener`: a `PlaybackListener` that records every callback

#![allow(dead_code)]

pub mod audio_generator;
pub mod failing_reader;
pub mod listener;

pub use audio_generator::{write_header_only, write_raw_wav, write_silent_wav, write_tone_wav};
pub use failing_reader::FailingReader;
pub use listener::RecordingListener;
