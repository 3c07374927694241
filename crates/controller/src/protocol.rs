// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live-state subscription message grammar.
//!
//! Server→client messages are tagged `{type, data}` payloads; clients
//! only ever send `ping` and `refresh`. Anything else, unknown types and
//! invalid JSON included, is ignored.

use arche_core::{Job, Lab, LinkState, NodeState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabStatePayload {
    pub lab_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&Lab> for LabStatePayload {
    fn from(lab: &Lab) -> Self {
        Self {
            lab_id: lab.id.to_string(),
            state: lab.state.to_string(),
            error_message: lab.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatePayload {
    pub lab_id: String,
    pub node_id: String,
    pub desired: String,
    pub actual: String,
    pub is_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&NodeState> for NodeStatePayload {
    fn from(ns: &NodeState) -> Self {
        Self {
            lab_id: ns.lab_id.to_string(),
            node_id: ns.node_id.to_string(),
            desired: ns.desired.to_string(),
            actual: ns.actual.to_string(),
            is_ready: ns.is_ready,
            error_message: ns.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStatePayload {
    pub lab_id: String,
    pub link_name: String,
    pub desired: String,
    pub actual: String,
    pub source_node: String,
    pub target_node: String,
    pub source_oper_state: String,
    pub target_oper_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_oper_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_oper_reason: Option<String>,
    pub oper_epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&LinkState> for LinkStatePayload {
    fn from(ls: &LinkState) -> Self {
        Self {
            lab_id: ls.lab_id.to_string(),
            link_name: ls.name.clone(),
            desired: ls.desired.to_string(),
            actual: ls.actual.to_string(),
            source_node: ls.source.node.clone(),
            target_node: ls.target.node.clone(),
            source_oper_state: ls.source_oper_state.to_string(),
            target_oper_state: ls.target_oper_state.to_string(),
            source_oper_reason: ls.source_oper_reason.clone(),
            target_oper_reason: ls.target_oper_reason.clone(),
            oper_epoch: ls.oper_epoch,
            error_message: ls.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgressPayload {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_id: Option<String>,
    pub action: String,
    pub status: String,
    /// Classified reason label for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&Job> for JobProgressPayload {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            lab_id: job.lab_id.as_ref().map(|l| l.to_string()),
            action: job.action.to_string(),
            status: job.status.to_string(),
            failure_reason: job.failure_reason.map(|r| r.label().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InitialStatePayload {
    pub nodes: Vec<NodeStatePayload>,
    pub links: Vec<LinkStatePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Server→client messages, in the order a fresh subscriber sees them:
/// `lab_state`, then `initial_state`, then streamed deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LabState { data: LabStatePayload },
    InitialState { data: InitialStatePayload },
    NodeState { data: NodeStatePayload },
    LinkState { data: LinkStatePayload },
    JobProgress { data: JobProgressPayload },
    Pong { timestamp: u64 },
    Error { data: ErrorPayload },
}

/// Client→server messages. Unknown types parse to `Unknown` and are
/// ignored; invalid JSON is ignored upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Refresh,
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a raw client frame; `None` for invalid JSON or non-object
    /// payloads.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
