//! Error types for wavplay
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use crate::wav::HeaderAnomaly;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the wavplay library
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer than 44 bytes were available for the RIFF/WAVE header
    #[error("Truncated WAV header: {available} of 44 bytes available")]
    TruncatedHeader { available: usize },

    /// Header byte rate is zero, derived fields cannot be computed
    #[error("Invalid byte rate: 0")]
    InvalidByteRate,

    /// Device minimum buffer size was not positive
    #[error("Invalid device buffer size: {0}")]
    InvalidBufferSize(i64),

    /// Header failed strict validation
    #[error("Malformed WAV header: {}", join_anomalies(.0))]
    MalformedHeader(Vec<HeaderAnomaly>),

    /// Input file does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output backend rejected a stop/release call
    #[error("Audio sink state fault: {0}")]
    SinkStateFault(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid argument to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the shared library (config loading)
    #[error(transparent)]
    Common(#[from] wavplay_common::Error),
}

fn join_anomalies(anomalies: &[HeaderAnomaly]) -> String {
    anomalies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience Result type using the wavplay Error
pub type Result<T> = std::result::Result<T, Error>;
