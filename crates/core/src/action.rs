// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job action grammar and the conflict matrix.
//!
//! Actions serialize to a compact string (`up`, `sync:node:<id>`,
//! `links:add:2,remove:1`) so job rows stay greppable, but the pipeline
//! works on the parsed variant and the conflict matrix is a pure function
//! over the tags.

use crate::id::{AgentId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scope qualifier for a sync action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncScope {
    /// Full-lab reconciliation pass.
    Lab,
    /// Reconcile one node.
    Node(NodeId),
    /// Reconcile every lab carried by one agent.
    Agent(AgentId),
}

/// The work a job performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobAction {
    /// Deploy the lab topology and start nodes.
    Up,
    /// Stop and destroy the lab's runtime.
    Down,
    /// Import observed state.
    Sync(SyncScope),
    /// Apply a topology edit: K links added, M removed.
    Links { add: u32, remove: u32 },
    /// Track a host-agent upgrade; lab-less.
    AgentUpdate(AgentId),
}

impl JobAction {
    /// Asymmetric in general; symmetric for the verbs defined here.
    ///
    /// `up`/`down` conflict with each other and with sync; sync passes may
    /// interleave with each other. Topology edits conflict with deploys
    /// and with each other but not with sync. Agent updates are scoped to
    /// a host, not a lab, and conflict with nothing.
    pub fn conflicts_with(&self, other: &JobAction) -> bool {
        use JobAction::*;
        match (self, other) {
            (Up | Down, Up | Down | Sync(_) | Links { .. }) => true,
            (Sync(_), Up | Down) => true,
            (Links { .. }, Up | Down | Links { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::Up => f.write_str("up"),
            JobAction::Down => f.write_str("down"),
            JobAction::Sync(SyncScope::Lab) => f.write_str("sync"),
            JobAction::Sync(SyncScope::Node(id)) => write!(f, "sync:node:{id}"),
            JobAction::Sync(SyncScope::Agent(id)) => write!(f, "sync:agent:{id}"),
            JobAction::Links { add, remove } => write!(f, "links:add:{add},remove:{remove}"),
            JobAction::AgentUpdate(id) => write!(f, "update:agent:{id}"),
        }
    }
}

/// Error parsing an action string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job action: {0}")]
pub struct ParseActionError(pub String);

impl FromStr for JobAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => return Ok(JobAction::Up),
            "down" => return Ok(JobAction::Down),
            "sync" => return Ok(JobAction::Sync(SyncScope::Lab)),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("sync:node:") {
            if rest.is_empty() {
                return Err(ParseActionError(s.to_string()));
            }
            return Ok(JobAction::Sync(SyncScope::Node(NodeId::new(rest))));
        }
        if let Some(rest) = s.strip_prefix("sync:agent:") {
            if rest.is_empty() {
                return Err(ParseActionError(s.to_string()));
            }
            return Ok(JobAction::Sync(SyncScope::Agent(AgentId::new(rest))));
        }
        if let Some(rest) = s.strip_prefix("update:agent:") {
            if rest.is_empty() {
                return Err(ParseActionError(s.to_string()));
            }
            return Ok(JobAction::AgentUpdate(AgentId::new(rest)));
        }
        if let Some(rest) = s.strip_prefix("links:") {
            let mut add = None;
            let mut remove = None;
            for part in rest.split(',') {
                if let Some(n) = part.strip_prefix("add:") {
                    add = n.parse::<u32>().ok();
                } else if let Some(n) = part.strip_prefix("remove:") {
                    remove = n.parse::<u32>().ok();
                } else {
                    return Err(ParseActionError(s.to_string()));
                }
            }
            if let (Some(add), Some(remove)) = (add, remove) {
                return Ok(JobAction::Links { add, remove });
            }
            return Err(ParseActionError(s.to_string()));
        }
        Err(ParseActionError(s.to_string()))
    }
}

impl TryFrom<String> for JobAction {
    type Error = ParseActionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<JobAction> for String {
    fn from(a: JobAction) -> Self {
        a.to_string()
    }
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;
