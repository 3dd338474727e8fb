//! Token-bucket throttling for diagnostic log messages.
//!
//! Failure paths a remote peer can trigger at will (protocol violations,
//! accept errors) log through one of these, so a misbehaving client cannot
//! flood the daemon's log.

use std::time::Instant;

const UNITS_PER_MSG: u64 = 60_000;

/// Token bucket refilled at a fixed rate per minute, capped at `burst`.
#[derive(Debug)]
pub struct RateLimit {
    rate_per_min: u64,
    burst_units: u64,
    units: u64,
    last: Instant,
    dropped: u64,
}

impl RateLimit {
    /// Create a bucket admitting `rate_per_min` messages per minute with up
    /// to `burst` admitted back to back. The bucket starts full.
    pub fn new(rate_per_min: u32, burst: u32) -> Self {
        let burst_units = u64::from(burst) * UNITS_PER_MSG;
        Self {
            rate_per_min: u64::from(rate_per_min),
            burst_units,
            units: burst_units,
            last: Instant::now(),
            dropped: 0,
        }
    }

    /// Try to take one message token.
    ///
    /// Returns `Some(n)` when the message should be logged, where `n` is the
    /// number of messages suppressed since the last admitted one; `None`
    /// when the message should be dropped.
    pub fn admit(&mut self) -> Option<u64> {
        self.admit_at(Instant::now())
    }

    fn admit_at(&mut self, now: Instant) -> Option<u64> {
        // Sub-millisecond intervals accumulate: `last` only advances when
        // whole milliseconds have elapsed.
        let elapsed_ms = now.duration_since(self.last).as_millis() as u64;
        if elapsed_ms > 0 {
            self.units = (self.units + elapsed_ms * self.rate_per_min).min(self.burst_units);
            self.last = now;
        }

        if self.units >= UNITS_PER_MSG {
            self.units -= UNITS_PER_MSG;
            Some(std::mem::take(&mut self.dropped))
        } else {
            self.dropped += 1;
            None
        }
    }
}
