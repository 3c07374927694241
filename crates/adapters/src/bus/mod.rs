// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared bus: short-TTL locks and the cleanup-event channel.
//!
//! Locks follow `NX EX` semantics (set-if-absent with expiry); unlock is
//! best-effort. Multiple controller workers converge on the same
//! decisions because cooldowns and deploy locks live here rather than in
//! the database.

mod memory;

pub use memory::MemoryBus;

use arche_core::CleanupEvent;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from bus operations. Callers that hold the fail-open contract
/// (deploy locks) treat these as "proceed without the lock".
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("bus backend error: {0}")]
    Backend(String),
}

/// Shared bus operations.
#[async_trait]
pub trait SharedBus: Clone + Send + Sync + 'static {
    /// Set `key` to `value` only if absent, with a TTL. Returns true when
    /// the key was acquired.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError>;

    /// Current value of a live (unexpired) key.
    async fn get(&self, key: &str) -> Result<Option<String>, BusError>;

    /// Best-effort delete.
    async fn delete(&self, key: &str) -> Result<(), BusError>;

    /// Publish a cleanup event to the channel. Fire-and-forget: with no
    /// subscriber the event is dropped.
    async fn publish(&self, event: CleanupEvent) -> Result<(), BusError>;

    /// Subscribe to the cleanup channel.
    fn subscribe(&self) -> broadcast::Receiver<CleanupEvent>;
}
