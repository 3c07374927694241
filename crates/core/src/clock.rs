// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time access for loops, TTLs, and heartbeat ages.
//!
//! Everything persisted (heartbeats, job timestamps, phase markers) is
//! epoch milliseconds; `Instant` exists only for in-process deadlines
//! such as circuit-breaker cooldowns. The fake clock drives both from
//! tests, so staleness windows and retention sweeps are deterministic.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn epoch_ms(&self) -> u64;

    /// Milliseconds elapsed since a persisted timestamp.
    ///
    /// Saturates at zero for timestamps from the future, which can
    /// happen across restarts on hosts with stepped clocks.
    fn age_ms(&self, since_epoch_ms: u64) -> u64 {
        self.epoch_ms().saturating_sub(since_epoch_ms)
    }
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

struct FakeTime {
    instant: Instant,
    epoch_ms: u64,
}

/// Test clock: starts at a fixed epoch and only moves when advanced, so
/// both the monotonic and the wall reading stay in lockstep.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeTime>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::at(1_000_000)
    }

    /// Start at a specific epoch-millisecond timestamp.
    pub fn at(epoch_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeTime {
                instant: Instant::now(),
                epoch_ms,
            })),
        }
    }

    /// Advance both readings by the given duration
    pub fn advance(&self, duration: Duration) {
        let mut time = self.inner.lock();
        time.instant += duration;
        time.epoch_ms += duration.as_millis() as u64;
    }

    /// Jump the wall reading to an absolute timestamp; the monotonic
    /// reading is left alone.
    pub fn set_epoch_ms(&self, epoch_ms: u64) {
        self.inner.lock().epoch_ms = epoch_ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.inner.lock().instant
    }

    fn epoch_ms(&self) -> u64 {
        self.inner.lock().epoch_ms
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
