use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Chain-native unit of a timelock
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TimelockUnit {
    UnixSeconds,
    BlockHeight,
}

impl TimelockUnit {
    /// Timelock `window_secs` after `now` (expressed in this unit)
    pub fn advance(self, now: u64, window_secs: u64, block_time_secs: u64) -> Timelock {
        let value = match self {
            TimelockUnit::UnixSeconds => now.saturating_add(window_secs),
            TimelockUnit::BlockHeight => {
                let block_time = block_time_secs.max(1);
                now.saturating_add(window_secs.div_ceil(block_time))
            }
        };
        Timelock { value, unit: self }
    }
}

/// Absolute expiry in chain-native units
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Timelock {
    pub value: u64,
    pub unit: TimelockUnit,
}

impl Timelock {
    pub fn unix(value: u64) -> Self {
        Self {
            value,
            unit: TimelockUnit::UnixSeconds,
        }
    }

    pub fn height(value: u64) -> Self {
        Self {
            value,
            unit: TimelockUnit::BlockHeight,
        }
    }

    /// True once chain time (same unit) has reached the timelock
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.value
    }

    /// Estimated seconds until expiry given chain time in the same unit
    pub fn seconds_remaining(&self, now: u64, block_time_secs: u64) -> u64 {
        let left = self.value.saturating_sub(now);
        match self.unit {
            TimelockUnit::UnixSeconds => left,
            TimelockUnit::BlockHeight => left.saturating_mul(block_time_secs.max(1)),
        }
    }
}

impl fmt::Display for Timelock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            TimelockUnit::UnixSeconds => write!(f, "unix:{}", self.value),
            TimelockUnit::BlockHeight => write!(f, "height:{}", self.value),
        }
    }
}

/// Source and destination timelocks with wall-clock expiry estimates.
///
/// Raw values are chain-native and may use different units, so cross-chain
/// ordering is judged on the `*_expires_at` estimates (unix seconds).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelockPair {
    pub source: Timelock,
    pub destination: Timelock,
    pub source_expires_at: u64,
    pub destination_expires_at: u64,
}

impl TimelockPair {
    /// Seconds the counter-claimant has beyond the destination expiry
    pub fn margin_secs(&self) -> u64 {
        self.source_expires_at
            .saturating_sub(self.destination_expires_at)
    }

    /// Destination must expire at least `margin_secs` before source, and
    /// more than `margin_secs` after `now`
    pub fn check_ordering(&self, now: u64, margin_secs: u64) -> Result<()> {
        if self.destination_expires_at >= self.source_expires_at {
            return Err(Error::InvalidTerms(format!(
                "destination timelock (expires {}) must expire before source timelock (expires {})",
                self.destination_expires_at, self.source_expires_at
            )));
        }

        if self.source.unit == self.destination.unit && self.destination.value >= self.source.value
        {
            return Err(Error::InvalidTerms(format!(
                "destination timelock {} must be below source timelock {}",
                self.destination, self.source
            )));
        }

        if self.margin_secs() < margin_secs {
            return Err(Error::InvalidTerms(format!(
                "timelocks are {}s apart, the claim safety margin is {}s",
                self.margin_secs(),
                margin_secs
            )));
        }

        if self.destination_expires_at <= now.saturating_add(margin_secs) {
            return Err(Error::InvalidTerms(format!(
                "destination timelock expires at {}, inside the {}s claim margin",
                self.destination_expires_at, margin_secs
            )));
        }

        Ok(())
    }
}
