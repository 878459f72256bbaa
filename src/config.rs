//! Tuning knobs for a transfer.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Initial flush threshold for the adaptive batcher, and the step by which
/// the threshold grows after each threshold-met flush (4 KiB).
pub const DEFAULT_BASE_UNIT: usize = 4096;

/// Default bound on the adaptive threshold, as a multiple of the base unit.
/// At the default base unit the ceiling is 80 KiB.
pub const DEFAULT_MAX_MULTIPLIER: usize = 20;

/// Default cap on buffered-but-unread bytes (320 KiB): a few flush ceilings'
/// worth of slack, so a fast producer stays a bounded distance ahead of a
/// slow consumer.
pub const DEFAULT_OUTSTANDING_CAP: usize = 4 * DEFAULT_BASE_UNIT * DEFAULT_MAX_MULTIPLIER;

/// Tuning for one transfer.
///
/// The defaults suit many small fragments feeding a windowed bulk consumer.
/// All fields are optional in serialized form and fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Initial flush threshold; also the growth step per threshold-met flush.
    pub base_unit: usize,
    /// Bound on the adaptive threshold, as a multiple of `base_unit`.
    pub max_multiplier: usize,
    /// Block the producer while at least this many bytes sit unread in the
    /// channel. `None` removes backpressure entirely.
    pub outstanding_cap: Option<usize>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            base_unit: DEFAULT_BASE_UNIT,
            max_multiplier: DEFAULT_MAX_MULTIPLIER,
            outstanding_cap: Some(DEFAULT_OUTSTANDING_CAP),
        }
    }
}

impl TransferConfig {
    /// Largest batch the adaptive threshold can reach.
    pub fn max_flush(&self) -> usize {
        self.base_unit.saturating_mul(self.max_multiplier)
    }

    /// Reject configurations that would deadlock or never flush.
    pub fn validate(&self) -> Result<()> {
        if self.base_unit == 0 {
            return Err(StreamError::Config("base_unit must be non-zero".into()));
        }
        if self.max_multiplier == 0 {
            return Err(StreamError::Config("max_multiplier must be non-zero".into()));
        }
        if self.outstanding_cap == Some(0) {
            return Err(StreamError::Config(
                "outstanding_cap must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}
