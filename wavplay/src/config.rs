//! Player configuration
//!
//! Loaded from the TOML bootstrap file located by
//! `wavplay_common::config::resolve_config_path`; every field has a default so
//! partial files (or no file) work. Command-line flags are applied on top by
//! the binary.
//!
//! ```toml
//! chunk_size_bytes = 1024
//! grace_period_ms = 2000
//! validation = "strict"
//!
//! [logging]
//! level = "debug"
//! ```

use crate::audio::buffer_policy::{DEFAULT_MIN_MULTIPLIER, DEFAULT_PAYLOAD_FRACTION};
use crate::audio::sink::DEFAULT_WRITE_TIMEOUT;
use crate::audio::BufferSizePolicy;
use crate::error::{Error, Result};
use crate::playback::pump::DEFAULT_CHUNK_SIZE;
use crate::wav::ValidationMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use wavplay_common::config::{load_toml, resolve_config_path, CONFIG_ENV_VAR};

/// Default wait after the last write before stopping
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2000;

/// Logging section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Bytes read from the file and written to the sink per iteration
    pub chunk_size_bytes: usize,

    /// Wait after the last chunk so queued audio finishes rendering
    pub grace_period_ms: u64,

    /// Longest a single write may block without progress
    pub write_timeout_ms: u64,

    /// Buffer floor as a multiple of the device minimum
    pub min_buffer_multiplier: u32,

    /// Share of the payload to buffer, in (0, 1]
    pub payload_fraction: f64,

    pub validation: ValidationMode,

    /// Stop automatically once the header's duration has been rendered
    pub single_shot_period: bool,

    /// Output device name; `None` uses the system default
    pub device: Option<String>,

    pub logging: LoggingConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            min_buffer_multiplier: DEFAULT_MIN_MULTIPLIER,
            payload_fraction: DEFAULT_PAYLOAD_FRACTION,
            validation: ValidationMode::Lenient,
            single_shot_period: false,
            device: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Load from the resolved config file (CLI path, `WAVPLAY_CONFIG`, per-user
    /// file, defaults) and validate.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let source = resolve_config_path(cli_path, CONFIG_ENV_VAR);
        let config: Self = load_toml(&source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes == 0 {
            return Err(Error::Config("chunk_size_bytes must be > 0".to_string()));
        }
        if self.write_timeout_ms == 0 {
            return Err(Error::Config("write_timeout_ms must be > 0".to_string()));
        }
        self.buffer_policy()?;
        Ok(())
    }

    pub fn buffer_policy(&self) -> Result<BufferSizePolicy> {
        BufferSizePolicy::new(self.min_buffer_multiplier, self.payload_fraction)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
