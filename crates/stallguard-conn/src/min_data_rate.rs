use std::time::Duration;

use stallguard_core::HEARTBEAT_INTERVAL;

use crate::clock::duration_to_nanos;
use crate::error::DataRateError;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Minimum throughput a connection must sustain once its grace period is over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinDataRate {
    bytes_per_second: f64,
    grace_period: Duration,
}

impl MinDataRate {
    /// The grace period must span at least one heartbeat so the rate is
    /// measured over at least one full tick before it can be enforced.
    pub fn new(bytes_per_second: f64, grace_period: Duration) -> Result<Self, DataRateError> {
        if !bytes_per_second.is_finite() || bytes_per_second < 0.0 {
            return Err(DataRateError::InvalidBytesPerSecond(bytes_per_second));
        }
        if grace_period < HEARTBEAT_INTERVAL {
            return Err(DataRateError::GracePeriodTooShort {
                min: HEARTBEAT_INTERVAL,
                actual: grace_period,
            });
        }
        Ok(Self {
            bytes_per_second,
            grace_period,
        })
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Nanoseconds needed to transfer `size` bytes at exactly this rate.
    ///
    /// A zero rate never finishes, which saturates to `u64::MAX`.
    pub(crate) fn nanos_to_transfer(&self, size: u64) -> u64 {
        if self.bytes_per_second <= 0.0 {
            return u64::MAX;
        }
        let nanos = size as f64 / self.bytes_per_second * NANOS_PER_SEC;
        if nanos >= u64::MAX as f64 {
            u64::MAX
        } else {
            nanos as u64
        }
    }

    pub(crate) fn grace_period_nanos(&self) -> u64 {
        duration_to_nanos(self.grace_period)
    }
}
