// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized database built from change replay.

mod agents;
mod jobs;
mod labs;
mod links;
mod nodes;

use crate::change::Change;
use arche_core::link::Endpoint;
use arche_core::normalize_interface;
use arche_core::{
    AgentId, AgentInfo, Job, JobAction, Lab, LabId, LinkState, Node, NodeId, NodeState, TunnelId,
    TunnelStatus, VxlanTunnel,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Uniqueness guard row: (lab, node, interface) belongs to at most one
/// desired-up link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub node: String,
    pub interface: String,
    pub link_name: String,
}

impl Reservation {
    /// Whether this reservation covers a given endpoint, comparing
    /// interfaces in normalized form.
    pub fn covers(&self, endpoint: &Endpoint) -> bool {
        self.node == endpoint.node
            && normalize_interface(&self.interface) == normalize_interface(&endpoint.interface)
    }
}

/// Image presence record; unique on (image, agent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHost {
    pub image: String,
    pub agent_id: AgentId,
    pub synced_at_ms: u64,
}

/// Materialized database built from change replay.
///
/// All invariants (uniqueness, cascades) are enforced before a change is
/// journaled; `apply` itself is idempotent and infallible so WAL replay
/// can never fail half-way.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Database {
    pub labs: HashMap<LabId, Lab>,
    #[serde(default)]
    pub nodes: HashMap<LabId, HashMap<NodeId, Node>>,
    #[serde(default)]
    pub node_states: HashMap<LabId, HashMap<NodeId, NodeState>>,
    /// Link states keyed by canonical link name.
    #[serde(default)]
    pub links: HashMap<LabId, HashMap<String, LinkState>>,
    #[serde(default)]
    pub reservations: HashMap<LabId, Vec<Reservation>>,
    #[serde(default)]
    pub tunnels: HashMap<TunnelId, VxlanTunnel>,
    #[serde(default)]
    pub agents: HashMap<AgentId, AgentInfo>,
    #[serde(default)]
    pub jobs: HashMap<arche_core::JobId, Job>,
    /// (lab, node_name) → host.
    #[serde(default)]
    pub placements: HashMap<LabId, HashMap<String, AgentId>>,
    #[serde(default)]
    pub image_hosts: Vec<ImageHost>,
}

impl Database {
    /// Apply a change to derive state. MUST be idempotent: applying the
    /// same change twice produces the same state (recovery may replay
    /// changes already reflected in a snapshot).
    pub fn apply(&mut self, change: &Change) {
        match change {
            Change::LabCreated { .. }
            | Change::LabStateChanged { .. }
            | Change::LabDefaultAgent { .. }
            | Change::LabDeleted { .. } => labs::apply(self, change),

            Change::NodeAdded { .. }
            | Change::NodeRemoved { .. }
            | Change::NodeDesired { .. }
            | Change::NodeObserved { .. }
            | Change::NodeReady { .. }
            | Change::NodeErrored { .. }
            | Change::NodeImageSync { .. }
            | Change::EnforcementAttempted { .. }
            | Change::EnforcementFailed { .. }
            | Change::PlacementSet { .. }
            | Change::PlacementRemoved { .. } => nodes::apply(self, change),

            Change::LinkAdded { .. }
            | Change::LinkUpdated { .. }
            | Change::LinkRemoved { .. }
            | Change::ReservationClaimed { .. }
            | Change::ReservationReleased { .. }
            | Change::TunnelCreated { .. }
            | Change::TunnelStatusChanged { .. }
            | Change::TunnelDeleted { .. } => links::apply(self, change),

            Change::AgentRegistered { .. }
            | Change::AgentHeartbeat { .. }
            | Change::AgentStatusChanged { .. }
            | Change::ImageHostRecorded { .. }
            | Change::ImageHostInvalidated { .. } => agents::apply(self, change),

            Change::JobCreated { .. } | Change::JobUpdated { .. } | Change::JobDeleted { .. } => {
                jobs::apply(self, change)
            }
        }
    }

    // -- lookups --

    pub fn node(&self, lab: &LabId, node: &NodeId) -> Option<&Node> {
        self.nodes.get(lab)?.get(node)
    }

    pub fn node_by_name(&self, lab: &LabId, name: &str) -> Option<&Node> {
        self.nodes.get(lab)?.values().find(|n| n.name == name)
    }

    pub fn node_state(&self, lab: &LabId, node: &NodeId) -> Option<&NodeState> {
        self.node_states.get(lab)?.get(node)
    }

    pub fn link(&self, lab: &LabId, name: &str) -> Option<&LinkState> {
        self.links.get(lab)?.get(name)
    }

    /// Find the link whose source or target matches a reported
    /// (node, interface) pair, comparing interfaces in normalized form.
    pub fn link_by_endpoint(&self, lab: &LabId, node: &str, interface: &str) -> Option<&LinkState> {
        self.links
            .get(lab)?
            .values()
            .find(|ls| ls.side_of(node, interface).is_some())
    }

    pub fn tunnel_for_link(&self, lab: &LabId, link_name: &str) -> Option<&VxlanTunnel> {
        self.tunnels
            .values()
            .find(|t| &t.lab_id == lab && t.link_name == link_name)
    }

    pub fn tunnels_with_status(&self, status: TunnelStatus) -> impl Iterator<Item = &VxlanTunnel> {
        self.tunnels.values().filter(move |t| t.status == status)
    }

    /// Active (queued or running) job whose action conflicts with the
    /// proposed one, if any.
    pub fn active_conflicting_job(&self, lab: &LabId, action: &JobAction) -> Option<&Job> {
        self.jobs.values().find(|j| {
            j.lab_id.as_ref() == Some(lab)
                && j.status.is_active()
                && j.action.conflicts_with(action)
        })
    }

    /// Count of active jobs assigned to an agent, for load ordering.
    pub fn active_job_count(&self, agent: &AgentId) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status.is_active() && j.agent_id.as_ref() == Some(agent))
            .count()
    }

    /// Links other than `exclude` that hold a desired-up reservation on
    /// any of the given endpoints.
    pub fn reservation_holders(
        &self,
        lab: &LabId,
        endpoints: &[Endpoint],
        exclude: &str,
    ) -> Vec<String> {
        let mut holders = Vec::new();
        if let Some(rows) = self.reservations.get(lab) {
            for row in rows {
                if row.link_name == exclude {
                    continue;
                }
                if endpoints.iter().any(|ep| row.covers(ep)) && !holders.contains(&row.link_name) {
                    holders.push(row.link_name.clone());
                }
            }
        }
        holders
    }

    /// Hosts known to carry nodes for a lab: explicit placements plus
    /// node pins.
    pub fn hosts_for_lab(&self, lab: &LabId) -> HashSet<AgentId> {
        let mut hosts: HashSet<AgentId> = self
            .placements
            .get(lab)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        if let Some(nodes) = self.nodes.get(lab) {
            hosts.extend(nodes.values().filter_map(|n| n.host_pin.clone()));
        }
        hosts
    }

    pub fn has_image(&self, agent: &AgentId, image: &str) -> bool {
        self.image_hosts
            .iter()
            .any(|ih| &ih.agent_id == agent && ih.image == image)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
