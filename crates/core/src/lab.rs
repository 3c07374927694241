// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lab entity and aggregate state.

use crate::id::{AgentId, LabId};
use crate::node::ActualState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate state of a lab, derived from its nodes' actual states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
    Unknown,
}

impl fmt::Display for LabState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LabState::Stopped => "stopped",
            LabState::Starting => "starting",
            LabState::Running => "running",
            LabState::Stopping => "stopping",
            LabState::Error => "error",
            LabState::Unknown => "unknown",
        })
    }
}

/// A tenant-owned container for a topology.
///
/// State is mutated only by the job pipeline and reconciliation; the
/// topology itself (nodes, links) lives in its own tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lab {
    pub id: LabId,
    pub name: String,
    pub owner: String,
    /// Preferred agent for unpinned nodes in multi-host deploys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent_id: Option<AgentId>,
    pub state: LabState,
    pub state_changed_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Lab {
    pub fn new(id: LabId, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: owner.into(),
            default_agent_id: None,
            state: LabState::Stopped,
            state_changed_at_ms: 0,
            error_message: None,
        }
    }

    /// Record a new aggregate state, updating the change timestamp only
    /// when the state actually moved.
    pub fn set_state(&mut self, state: LabState, epoch_ms: u64) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.state_changed_at_ms = epoch_ms;
        if state != LabState::Error {
            self.error_message = None;
        }
        true
    }
}

/// Aggregate a lab state from its nodes' actual states.
///
/// Any running node makes the lab running (a partially-up lab is still
/// usable). With nothing running: all stopped/undeployed is stopped, any
/// error is error, and in-flight transitions win over unknown.
pub fn aggregate_lab_state(actuals: &[ActualState]) -> LabState {
    if actuals.is_empty() {
        return LabState::Stopped;
    }
    if actuals.iter().any(|a| *a == ActualState::Running) {
        return LabState::Running;
    }
    if actuals
        .iter()
        .all(|a| matches!(a, ActualState::Stopped | ActualState::Undeployed))
    {
        return LabState::Stopped;
    }
    if actuals.iter().any(|a| *a == ActualState::Error) {
        return LabState::Error;
    }
    if actuals.iter().any(|a| *a == ActualState::Starting) {
        return LabState::Starting;
    }
    if actuals.iter().any(|a| *a == ActualState::Stopping) {
        return LabState::Stopping;
    }
    LabState::Unknown
}

#[cfg(test)]
#[path = "lab_tests.rs"]
mod tests;
