// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cleanup events published on lifecycle transitions.
//!
//! Serializes with `{"type": "scope:verb", ...fields}` format. A single
//! consumer drains these into targeted cleanup handlers; periodic sweeps
//! are the safety net for dropped events.

use crate::id::{AgentId, JobId, LabId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CleanupEvent {
    #[serde(rename = "lab:deleted")]
    LabDeleted { lab_id: LabId },

    #[serde(rename = "node:removed")]
    NodeRemoved { lab_id: LabId, node_name: String },

    #[serde(rename = "node:placement_changed")]
    NodePlacementChanged {
        lab_id: LabId,
        node_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_host: Option<AgentId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_host: Option<AgentId>,
    },

    #[serde(rename = "link:removed")]
    LinkRemoved { lab_id: LabId, link_name: String },

    #[serde(rename = "agent:offline")]
    AgentOffline { agent_id: AgentId },

    #[serde(rename = "deploy:finished")]
    DeployFinished {
        lab_id: LabId,
        job_id: JobId,
        success: bool,
    },

    #[serde(rename = "destroy:finished")]
    DestroyFinished {
        lab_id: LabId,
        job_id: JobId,
        success: bool,
    },

    #[serde(rename = "job:completed")]
    JobCompleted {
        job_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lab_id: Option<LabId>,
    },

    #[serde(rename = "job:failed")]
    JobFailed {
        job_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lab_id: Option<LabId>,
    },

    #[serde(rename = "state:check_requested")]
    StateCheckRequested { lab_id: LabId },
}

impl CleanupEvent {
    /// Stable handler key; the per-handler circuit breaker is keyed on
    /// this.
    pub fn kind(&self) -> &'static str {
        match self {
            CleanupEvent::LabDeleted { .. } => "lab_deleted",
            CleanupEvent::NodeRemoved { .. } => "node_removed",
            CleanupEvent::NodePlacementChanged { .. } => "node_placement_changed",
            CleanupEvent::LinkRemoved { .. } => "link_removed",
            CleanupEvent::AgentOffline { .. } => "agent_offline",
            CleanupEvent::DeployFinished { .. } => "deploy_finished",
            CleanupEvent::DestroyFinished { .. } => "destroy_finished",
            CleanupEvent::JobCompleted { .. } => "job_completed",
            CleanupEvent::JobFailed { .. } => "job_failed",
            CleanupEvent::StateCheckRequested { .. } => "state_check_requested",
        }
    }

    /// Lab this event concerns, if any.
    pub fn lab_id(&self) -> Option<&LabId> {
        match self {
            CleanupEvent::LabDeleted { lab_id }
            | CleanupEvent::NodeRemoved { lab_id, .. }
            | CleanupEvent::NodePlacementChanged { lab_id, .. }
            | CleanupEvent::LinkRemoved { lab_id, .. }
            | CleanupEvent::DeployFinished { lab_id, .. }
            | CleanupEvent::DestroyFinished { lab_id, .. }
            | CleanupEvent::StateCheckRequested { lab_id } => Some(lab_id),
            CleanupEvent::JobCompleted { lab_id, .. }
            | CleanupEvent::JobFailed { lab_id, .. } => lab_id.as_ref(),
            CleanupEvent::AgentOffline { .. } => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
