// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process bus implementation.

use super::{BusError, SharedBus};
use arche_core::{CleanupEvent, Clock};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

struct Entry {
    value: String,
    expires_at_ms: u64,
}

/// In-process shared bus with clock-driven TTL expiry.
#[derive(Clone)]
pub struct MemoryBus<C: Clock> {
    clock: C,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    tx: broadcast::Sender<CleanupEvent>,
    /// Test hook: simulate a failing lock store (fail-open paths).
    fail_locks: Arc<AtomicBool>,
}

impl<C: Clock> MemoryBus<C> {
    pub fn new(clock: C) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            clock,
            entries: Arc::new(Mutex::new(HashMap::new())),
            tx,
            fail_locks: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make lock operations fail until re-enabled.
    pub fn set_lock_failure(&self, failing: bool) {
        self.fail_locks.store(failing, Ordering::SeqCst);
    }

    fn check_failing(&self) -> Result<(), BusError> {
        if self.fail_locks.load(Ordering::SeqCst) {
            return Err(BusError::Backend("lock store unreachable".to_string()));
        }
        Ok(())
    }

    fn purge_expired(&self, entries: &mut HashMap<String, Entry>) {
        let now = self.clock.epoch_ms();
        entries.retain(|_, e| e.expires_at_ms > now);
    }
}

#[async_trait]
impl<C: Clock> SharedBus for MemoryBus<C> {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError> {
        self.check_failing()?;
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms: self.clock.epoch_ms() + ttl.as_millis() as u64,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BusError> {
        self.check_failing()?;
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), BusError> {
        self.check_failing()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn publish(&self, event: CleanupEvent) -> Result<(), BusError> {
        // No subscriber is fine: fire-and-forget
        let _ = self.tx.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CleanupEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
