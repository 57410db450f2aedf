//! Streaming buffer sizing
//!
//! Chooses the output sink's buffer capacity from the PCM payload size and the
//! device-reported minimum buffer size:
//!
//! - `floor = device_min * min_multiplier`
//! - payload below `floor` → `device_min` (one unit, not the floor)
//! - otherwise `payload * payload_fraction`, rounded up to the next multiple of
//!   `device_min`, and never below `floor`

use crate::error::{Error, Result};
use tracing::debug;

/// Default multiplier applied to the device minimum to get the floor
pub const DEFAULT_MIN_MULTIPLIER: u32 = 10;

/// Default share of the payload to buffer
pub const DEFAULT_PAYLOAD_FRACTION: f64 = 0.1;

/// Buffer sizing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferSizePolicy {
    pub min_multiplier: u32,
    pub payload_fraction: f64,
}

impl Default for BufferSizePolicy {
    fn default() -> Self {
        Self {
            min_multiplier: DEFAULT_MIN_MULTIPLIER,
            payload_fraction: DEFAULT_PAYLOAD_FRACTION,
        }
    }
}

impl BufferSizePolicy {
    pub fn new(min_multiplier: u32, payload_fraction: f64) -> Result<Self> {
        if !payload_fraction.is_finite() || payload_fraction <= 0.0 || payload_fraction > 1.0 {
            return Err(Error::Config(format!(
                "payload fraction must be in (0, 1], got {}",
                payload_fraction
            )));
        }
        Ok(Self {
            min_multiplier,
            payload_fraction,
        })
    }

    /// Buffer capacity in bytes for a payload of `payload_size_bytes`.
    pub fn compute(&self, payload_size_bytes: u64, device_min_buffer_bytes: i64) -> Result<usize> {
        if device_min_buffer_bytes <= 0 {
            return Err(Error::InvalidBufferSize(device_min_buffer_bytes));
        }
        let unit = device_min_buffer_bytes as u64;
        let floor = unit.saturating_mul(u64::from(self.min_multiplier));

        let capacity = if payload_size_bytes < floor {
            debug!(
                "Payload {} b below {} b floor, using one device unit ({} b)",
                payload_size_bytes, floor, unit
            );
            unit
        } else {
            let target = (payload_size_bytes as f64 * self.payload_fraction).floor() as u64;
            let rounded = (target / unit).saturating_add(1).saturating_mul(unit);
            let capacity = rounded.max(floor);
            debug!(
                "Payload {} b: target {} b, rounded {} b, floor {} b -> {} b",
                payload_size_bytes, target, rounded, floor, capacity
            );
            capacity
        };

        Ok(usize::try_from(capacity).unwrap_or(usize::MAX))
    }
}

/// Capacity under the default policy (multiplier 10, 10% of payload).
pub fn compute_buffer_bytes(payload_size_bytes: u64, device_min_buffer_bytes: i64) -> Result<usize> {
    BufferSizePolicy::default().compute(payload_size_bytes, device_min_buffer_bytes)
}
