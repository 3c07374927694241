// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-handler circuit breaker for the cleanup substrate.
//!
//! Open after max consecutive failures; half-open after the cooldown,
//! allowing one probe. A probe success closes the breaker and clears
//! counters; a failure re-opens it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
struct BreakerEntry {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

pub struct CircuitBreaker {
    max_failures: u32,
    cooldown: Duration,
    entries: Mutex<HashMap<String, BreakerEntry>>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            max_failures,
            cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether invocations for this handler should be skipped right now.
    /// An elapsed cooldown reads as closed: the next invocation is the
    /// half-open probe.
    pub fn is_open(&self, handler: &str, now: Instant) -> bool {
        let entries = self.entries.lock();
        match entries.get(handler).and_then(|e| e.open_until) {
            Some(until) => until > now,
            None => false,
        }
    }

    pub fn record_success(&self, handler: &str) {
        self.entries.lock().remove(handler);
    }

    pub fn record_failure(&self, handler: &str, now: Instant) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(handler.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.max_failures {
            entry.open_until = Some(now + self.cooldown);
        }
        // A half-open probe that fails re-opens immediately
        if entry.open_until.is_some() {
            entry.open_until = Some(now + self.cooldown);
        }
    }

    pub fn failure_count(&self, handler: &str) -> u32 {
        self.entries
            .lock()
            .get(handler)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
