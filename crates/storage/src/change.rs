// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journaled mutations.
//!
//! Every write to the database is one of these variants, serialized as
//! `{"type": "scope:verb", ...fields}` into the WAL before application.
//! Application MUST be idempotent: replaying the same change twice
//! produces the same state, because recovery may re-apply changes already
//! reflected in a snapshot.

use arche_core::agent::ResourceUsage;
use arche_core::link::Endpoint;
use arche_core::node::{ActualState, DesiredState, ImageSyncStatus};
use arche_core::{
    AgentId, AgentInfo, AgentStatus, Job, Lab, LabId, LabState, LinkState, Node, NodeId, TunnelId,
    TunnelStatus, VxlanTunnel,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Change {
    // -- lab --
    #[serde(rename = "lab:created")]
    LabCreated { lab: Lab },

    #[serde(rename = "lab:state")]
    LabStateChanged {
        lab_id: LabId,
        state: LabState,
        epoch_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "lab:default_agent")]
    LabDefaultAgent {
        lab_id: LabId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },

    /// Cascades to nodes, node states, links, reservations, tunnels,
    /// placements, and jobs of the lab.
    #[serde(rename = "lab:deleted")]
    LabDeleted { lab_id: LabId },

    // -- node --
    /// Adds the definition and its (empty) NodeState row.
    #[serde(rename = "node:added")]
    NodeAdded { node: Node },

    #[serde(rename = "node:removed")]
    NodeRemoved { lab_id: LabId, node_id: NodeId },

    #[serde(rename = "node_state:desired")]
    NodeDesired {
        lab_id: LabId,
        node_id: NodeId,
        desired: DesiredState,
    },

    #[serde(rename = "node_state:observed")]
    NodeObserved {
        lab_id: LabId,
        node_id: NodeId,
        actual: ActualState,
        epoch_ms: u64,
    },

    #[serde(rename = "node_state:ready")]
    NodeReady {
        lab_id: LabId,
        node_id: NodeId,
        is_ready: bool,
    },

    #[serde(rename = "node_state:error")]
    NodeErrored {
        lab_id: LabId,
        node_id: NodeId,
        message: String,
    },

    #[serde(rename = "node_state:image_sync")]
    NodeImageSync {
        lab_id: LabId,
        node_id: NodeId,
        status: ImageSyncStatus,
    },

    #[serde(rename = "node_state:enforcement_attempt")]
    EnforcementAttempted {
        lab_id: LabId,
        node_id: NodeId,
        epoch_ms: u64,
    },

    #[serde(rename = "node_state:enforcement_failed")]
    EnforcementFailed {
        lab_id: LabId,
        node_id: NodeId,
        epoch_ms: u64,
    },

    // -- link --
    #[serde(rename = "link:added")]
    LinkAdded { link: LinkState },

    /// Whole-row update; the link orchestrator mutates many fields per
    /// phase and the row is the natural unit.
    #[serde(rename = "link:updated")]
    LinkUpdated { link: LinkState },

    #[serde(rename = "link:removed")]
    LinkRemoved { lab_id: LabId, name: String },

    // -- endpoint reservations --
    #[serde(rename = "reservation:claimed")]
    ReservationClaimed {
        lab_id: LabId,
        link_name: String,
        endpoints: Vec<Endpoint>,
    },

    #[serde(rename = "reservation:released")]
    ReservationReleased { lab_id: LabId, link_name: String },

    // -- vxlan tunnels --
    #[serde(rename = "tunnel:created")]
    TunnelCreated { tunnel: VxlanTunnel },

    #[serde(rename = "tunnel:status")]
    TunnelStatusChanged { id: TunnelId, status: TunnelStatus },

    #[serde(rename = "tunnel:deleted")]
    TunnelDeleted { id: TunnelId },

    // -- agents --
    /// Upsert by id; re-registration refreshes capabilities and version.
    #[serde(rename = "agent:registered")]
    AgentRegistered { agent: AgentInfo },

    #[serde(rename = "agent:heartbeat")]
    AgentHeartbeat {
        agent_id: AgentId,
        epoch_ms: u64,
        usage: ResourceUsage,
    },

    #[serde(rename = "agent:status")]
    AgentStatusChanged {
        agent_id: AgentId,
        status: AgentStatus,
    },

    // -- jobs --
    #[serde(rename = "job:created")]
    JobCreated { job: Job },

    /// Whole-row update (status transitions, log appends, heartbeats).
    #[serde(rename = "job:updated")]
    JobUpdated { job: Job },

    #[serde(rename = "job:deleted")]
    JobDeleted { id: arche_core::JobId },

    // -- placements --
    #[serde(rename = "placement:set")]
    PlacementSet {
        lab_id: LabId,
        node_name: String,
        agent_id: AgentId,
    },

    #[serde(rename = "placement:removed")]
    PlacementRemoved { lab_id: LabId, node_name: String },

    // -- image hosts --
    #[serde(rename = "image_host:recorded")]
    ImageHostRecorded {
        image: String,
        agent_id: AgentId,
        epoch_ms: u64,
    },

    /// Drops every ImageHost row for the agent (e.g. it went offline and
    /// its local cache can no longer be trusted).
    #[serde(rename = "image_host:invalidated")]
    ImageHostInvalidated { agent_id: AgentId },
}

#[cfg(test)]
#[path = "change_tests.rs"]
mod tests;
