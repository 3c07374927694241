// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node definitions and the node lifecycle state machine.

use crate::id::{AgentId, LabId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A device definition inside a lab. Definitions carry no runtime state;
/// that lives in [`NodeState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub lab_id: LabId,
    /// Display name, unique within the lab. Links and agent reports refer
    /// to nodes by this name.
    pub name: String,
    /// Deterministic container/domain name on the host runtime.
    pub container_name: String,
    /// Device kind (vendor tag, e.g. "linux", "ceos").
    pub kind: String,
    /// Image reference the runtime boots from.
    pub image: String,
    /// Explicit host pin, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_pin: Option<AgentId>,
}

impl Node {
    pub fn new(
        id: NodeId,
        lab_id: LabId,
        name: impl Into<String>,
        kind: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let container_name = container_name(&lab_id, &name);
        Self {
            id,
            lab_id,
            name,
            container_name,
            kind: kind.into(),
            image: image.into(),
            host_pin: None,
        }
    }

    pub fn with_host_pin(mut self, agent: AgentId) -> Self {
        self.host_pin = Some(agent);
        self
    }
}

/// Deterministic container/domain name for a node.
pub fn container_name(lab_id: &LabId, node_name: &str) -> String {
    format!("arche-{}-{}", lab_id.short(12), node_name)
}

/// The state the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Running,
    Stopped,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DesiredState::Running => "running",
            DesiredState::Stopped => "stopped",
        })
    }
}

/// The state agents report as observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualState {
    Undeployed,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ActualState {
    /// Transitional states are held by an in-flight operation and guard
    /// command admission.
    pub fn is_transitional(&self) -> bool {
        matches!(self, ActualState::Starting | ActualState::Stopping)
    }

    /// Map a runtime status string reported by an agent into an actual
    /// state. Container and domain runtimes report different vocabularies;
    /// unknown strings map to `Error` so drift is visible.
    pub fn from_report(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "running" => ActualState::Running,
            "created" | "starting" | "restarting" | "booting" => ActualState::Starting,
            "stopping" | "shutdown" | "shutting-down" => ActualState::Stopping,
            "exited" | "stopped" | "shutoff" | "paused" => ActualState::Stopped,
            "undeployed" | "absent" => ActualState::Undeployed,
            _ => ActualState::Error,
        }
    }

    /// Whether the actual state satisfies a desired state.
    pub fn satisfies(&self, desired: DesiredState) -> bool {
        match desired {
            DesiredState::Running => *self == ActualState::Running,
            DesiredState::Stopped => {
                matches!(self, ActualState::Stopped | ActualState::Undeployed)
            }
        }
    }
}

impl fmt::Display for ActualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActualState::Undeployed => "undeployed",
            ActualState::Starting => "starting",
            ActualState::Running => "running",
            ActualState::Stopping => "stopping",
            ActualState::Stopped => "stopped",
            ActualState::Error => "error",
        })
    }
}

/// Image-sync sub-status for a node whose image is being staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSyncStatus {
    #[default]
    None,
    Syncing,
    Failed,
}

/// A command a user or the enforcement loop can issue against a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCommand {
    Start,
    Stop,
    Reload,
}

impl fmt::Display for NodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeCommand::Start => "start",
            NodeCommand::Stop => "stop",
            NodeCommand::Reload => "reload",
        })
    }
}

/// Verdict of command admission against the current actual state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Dispatch a job for the command.
    Dispatch,
    /// The command is already satisfied; no job is created.
    Noop,
    /// The command is rejected because of a transitional state.
    Conflict(String),
}

/// Admission rules for node commands. The same rules apply to API guards
/// and to enforcement:
///
/// - start while stopping is rejected (transitional)
/// - stop while starting is allowed (aborts a slow boot)
/// - start while running and stop while stopped are no-ops
/// - start against an error node is allowed (retry)
pub fn admit(command: NodeCommand, actual: ActualState) -> Admission {
    match command {
        NodeCommand::Start => match actual {
            ActualState::Stopping => {
                Admission::Conflict("node is stopping; retry when it has stopped".to_string())
            }
            ActualState::Running | ActualState::Starting => Admission::Noop,
            ActualState::Undeployed | ActualState::Stopped | ActualState::Error => {
                Admission::Dispatch
            }
        },
        NodeCommand::Stop => match actual {
            ActualState::Stopped | ActualState::Undeployed | ActualState::Stopping => {
                Admission::Noop
            }
            // Stopping a starting node aborts a slow boot.
            ActualState::Starting | ActualState::Running | ActualState::Error => {
                Admission::Dispatch
            }
        },
        NodeCommand::Reload => match actual {
            ActualState::Running => Admission::Dispatch,
            ActualState::Stopping | ActualState::Starting => {
                Admission::Conflict(format!("node is {}", actual))
            }
            _ => Admission::Noop,
        },
    }
}

/// Desired-vs-actual record for one node. Exactly one exists per
/// (lab, node); created when the node is added to a topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub lab_id: LabId,
    pub node_id: NodeId,
    pub desired: DesiredState,
    pub actual: ActualState,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopping_started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub image_sync: ImageSyncStatus,
    #[serde(default)]
    pub enforcement_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcement_last_attempt_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcement_failed_at_ms: Option<u64>,
}

impl NodeState {
    pub fn new(lab_id: LabId, node_id: NodeId) -> Self {
        Self {
            lab_id,
            node_id,
            desired: DesiredState::Stopped,
            actual: ActualState::Undeployed,
            is_ready: false,
            boot_started_at_ms: None,
            starting_started_at_ms: None,
            stopping_started_at_ms: None,
            error_message: None,
            image_sync: ImageSyncStatus::None,
            enforcement_attempts: 0,
            enforcement_last_attempt_ms: None,
            enforcement_failed_at_ms: None,
        }
    }

    /// Change the desired state. Enforcement counters reset whenever
    /// desired changes so a user edit re-arms the loop.
    pub fn set_desired(&mut self, desired: DesiredState) -> bool {
        if self.desired == desired {
            return false;
        }
        self.desired = desired;
        self.reset_enforcement();
        true
    }

    /// Record an observed actual state, maintaining phase timestamps and
    /// clearing stale errors when recovering into a good state.
    pub fn record_actual(&mut self, actual: ActualState, epoch_ms: u64) -> bool {
        if self.actual == actual {
            return false;
        }
        match actual {
            ActualState::Starting => {
                self.starting_started_at_ms = Some(epoch_ms);
                if self.boot_started_at_ms.is_none() {
                    self.boot_started_at_ms = Some(epoch_ms);
                }
            }
            ActualState::Stopping => self.stopping_started_at_ms = Some(epoch_ms),
            ActualState::Running => {
                self.error_message = None;
            }
            ActualState::Stopped | ActualState::Undeployed => {
                self.error_message = None;
                self.is_ready = false;
                self.boot_started_at_ms = None;
            }
            ActualState::Error => {
                self.is_ready = false;
            }
        }
        self.actual = actual;
        true
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.actual = ActualState::Error;
        self.is_ready = false;
        self.error_message = Some(message.into());
    }

    /// Whether desired and actual have drifted apart.
    pub fn has_drift(&self) -> bool {
        !self.actual.satisfies(self.desired)
    }

    pub fn record_enforcement_attempt(&mut self, epoch_ms: u64) {
        self.enforcement_attempts += 1;
        self.enforcement_last_attempt_ms = Some(epoch_ms);
    }

    pub fn mark_enforcement_failed(&mut self, epoch_ms: u64) {
        self.enforcement_failed_at_ms = Some(epoch_ms);
        self.set_error("enforcement retries exhausted");
    }

    pub fn reset_enforcement(&mut self) {
        self.enforcement_attempts = 0;
        self.enforcement_last_attempt_ms = None;
        self.enforcement_failed_at_ms = None;
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
