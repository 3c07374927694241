// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Row guards for long-running per-entity operations.
//!
//! The database itself serializes individual commits; these guards
//! serialize operations that span I/O (an enforcement dispatch, a link
//! teardown). `try_lock` returning `None` is the skip-if-held path:
//! another worker owns the row this cycle, move on.

use arche_core::{LabId, NodeId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Key for a node-state row.
pub fn node_state_key(lab: &LabId, node: &NodeId) -> String {
    format!("node_state:{lab}:{node}")
}

/// Key for a link-state row.
pub fn link_state_key(lab: &LabId, link_name: &str) -> String {
    format!("link_state:{lab}:{link_name}")
}

/// Registry of held row locks.
#[derive(Clone, Default)]
pub struct RowLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a row guard, or `None` if another operation holds it.
    pub fn try_lock(&self, key: impl Into<String>) -> Option<RowGuard> {
        let key = key.into();
        let mut held = self.held.lock();
        if held.contains(&key) {
            return None;
        }
        held.insert(key.clone());
        Some(RowGuard {
            key,
            held: Arc::clone(&self.held),
        })
    }

    /// Whether a row is currently locked.
    pub fn is_locked(&self, key: &str) -> bool {
        self.held.lock().contains(key)
    }
}

/// Owned guard; releases the row on drop.
pub struct RowGuard {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl RowGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
