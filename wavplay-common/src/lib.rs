//! # wavplay common library
//!
//! Shared code for the wavplay workspace:
//! - Common error type
//! - Bootstrap configuration file discovery and TOML loading
//! - Playback event types and the broadcast `EventBus`

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, PlaybackEvent, StopReason};
