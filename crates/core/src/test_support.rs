// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for tests across the workspace.

use crate::agent::{AgentCapabilities, AgentInfo, AgentStatus};
use crate::id::{AgentId, LabId, NodeId};
use crate::lab::Lab;
use crate::link::{Endpoint, LinkState};
use crate::node::{Node, NodeState};

/// A lab named `lab-1` owned by `tester`.
pub fn sample_lab(id: &str) -> Lab {
    Lab::new(LabId::new(id), "lab-1", "tester")
}

/// A linux node definition with no host pin.
pub fn sample_node(lab: &str, name: &str) -> Node {
    Node::new(
        NodeId::new(format!("{lab}-{name}")),
        LabId::new(lab),
        name,
        "linux",
        "alpine:3",
    )
}

pub fn sample_node_state(lab: &str, name: &str) -> NodeState {
    NodeState::new(LabId::new(lab), NodeId::new(format!("{lab}-{name}")))
}

/// A link between `<a>:eth1` and `<b>:eth1`.
pub fn sample_link(lab: &str, a: &str, b: &str) -> LinkState {
    LinkState::new(
        LabId::new(lab),
        Endpoint::new(a, "eth1"),
        Endpoint::new(b, "eth1"),
    )
}

/// An online agent with a fresh heartbeat and docker capability.
pub fn sample_agent(id: &str, now_ms: u64) -> AgentInfo {
    let mut agent = AgentInfo::new(AgentId::new(id), format!("{id}.example:8000"));
    agent.status = AgentStatus::Online;
    agent.last_heartbeat_ms = Some(now_ms);
    agent.capabilities = AgentCapabilities::default();
    agent
}
