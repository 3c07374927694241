// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Links, the L2 connectivity model, and VNI derivation.
//!
//! A link is an undirected connection between two (node, interface)
//! endpoints. Canonical naming orders the endpoints so the name is stable
//! regardless of which end the user listed first. Interface names are
//! normalized from vendor form (`Ethernet1`) to a canonical form (`eth1`)
//! at comparison time only; stored names keep their vendor form.

use crate::id::{AgentId, LabId, TunnelId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Normalize an interface name for comparison.
///
/// Vendor prefixes that denote a plain ethernet port collapse to `eth`;
/// the port index (including sub-port paths like `1/1`) is preserved.
/// Unrecognized forms are lowercased unchanged.
pub fn normalize_interface(raw: &str) -> String {
    let trimmed = raw.trim().to_ascii_lowercase();
    let split = trimmed
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i);
    let Some(idx) = split else { return trimmed };
    let (prefix, index) = trimmed.split_at(idx);
    match prefix {
        "eth" | "ethernet" | "et" | "e" | "gigabitethernet" | "ge" | "tengigabitethernet"
        | "xe" => {
            format!("eth{index}")
        }
        _ => trimmed,
    }
}

/// One end of a link: a node (by display name) and an interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: String,
    pub interface: String,
}

impl Endpoint {
    pub fn new(node: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            interface: interface.into(),
        }
    }

    /// Whether this endpoint matches a reported (node, interface) pair,
    /// comparing interfaces in normalized form.
    pub fn matches(&self, node: &str, interface: &str) -> bool {
        self.node == node && normalize_interface(&self.interface) == normalize_interface(interface)
    }

    fn sort_key(&self) -> (String, String) {
        (self.node.clone(), normalize_interface(&self.interface))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

/// Canonically order two endpoints and derive the link name
/// `nodeA:ifA-nodeB:ifB`. Returns (name, source, target).
pub fn canonical_link_name(a: Endpoint, b: Endpoint) -> (String, Endpoint, Endpoint) {
    let (source, target) = if a.sort_key() <= b.sort_key() {
        (a, b)
    } else {
        (b, a)
    };
    let name = format!("{source}-{target}");
    (name, source, target)
}

/// Deterministic VNI for a cross-host link.
///
/// Hashes `lab_id:link_name` so repeated enforcement allocates the same
/// VNI. Range [1000, 16_001_000) avoids reserved low values.
pub fn derive_vni(lab_id: &LabId, link_name: &str) -> u32 {
    let digest = Sha256::digest(format!("{}:{}", lab_id.as_str(), link_name).as_bytes());
    let val = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (val % 16_000_000) + 1000
}

/// The state the user asked for on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDesired {
    Up,
    Down,
}

impl fmt::Display for LinkDesired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkDesired::Up => "up",
            LinkDesired::Down => "down",
        })
    }
}

/// Observed/transitional state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkActual {
    Unknown,
    /// Waiting for an endpoint node to reach running.
    Pending,
    Up,
    Down,
    Error,
    /// Two-phase teardown in progress; reconciliation pauses on it.
    Cleanup,
    Creating,
    Connecting,
}

impl fmt::Display for LinkActual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkActual::Unknown => "unknown",
            LinkActual::Pending => "pending",
            LinkActual::Up => "up",
            LinkActual::Down => "down",
            LinkActual::Error => "error",
            LinkActual::Cleanup => "cleanup",
            LinkActual::Creating => "creating",
            LinkActual::Connecting => "connecting",
        })
    }
}

/// Interface physical-layer state, distinct from administrative up/down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierState {
    On,
    Off,
}

/// Per-side operational verdict derived from carrier + overlay attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperState {
    Up,
    Down,
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperState::Up => "up",
            OperState::Down => "down",
        })
    }
}

/// Which side of a link an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    Source,
    Target,
}

/// Per-link runtime record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    pub lab_id: LabId,
    /// Canonical name `nodeA:ifA-nodeB:ifB`.
    pub name: String,
    pub source: Endpoint,
    pub target: Endpoint,
    pub desired: LinkDesired,
    pub actual: LinkActual,
    #[serde(default)]
    pub is_cross_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_host_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_host_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vni: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_vlan_tag: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_vlan_tag: Option<u16>,
    #[serde(default)]
    pub source_vxlan_attached: bool,
    #[serde(default)]
    pub target_vxlan_attached: bool,
    pub source_carrier: CarrierState,
    pub target_carrier: CarrierState,
    pub source_oper_state: OperState,
    pub target_oper_state: OperState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_oper_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_oper_reason: Option<String>,
    /// Strictly monotonic per link; clients drop out-of-order deltas.
    #[serde(default)]
    pub oper_epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LinkState {
    /// Create a link state from two endpoints, canonicalizing the order.
    pub fn new(lab_id: LabId, a: Endpoint, b: Endpoint) -> Self {
        let (name, source, target) = canonical_link_name(a, b);
        Self {
            lab_id,
            name,
            source,
            target,
            desired: LinkDesired::Up,
            actual: LinkActual::Unknown,
            is_cross_host: false,
            source_host_id: None,
            target_host_id: None,
            vni: None,
            source_vlan_tag: None,
            target_vlan_tag: None,
            source_vxlan_attached: false,
            target_vxlan_attached: false,
            source_carrier: CarrierState::Off,
            target_carrier: CarrierState::Off,
            source_oper_state: OperState::Down,
            target_oper_state: OperState::Down,
            source_oper_reason: None,
            target_oper_reason: None,
            oper_epoch: 0,
            error_message: None,
        }
    }

    /// Find which side a reported (node, interface) pair matches.
    ///
    /// When both interfaces normalize to the same canonical form the
    /// source side wins; the caller sees the later arrival overwrite it.
    pub fn side_of(&self, node: &str, interface: &str) -> Option<LinkSide> {
        if self.source.matches(node, interface) {
            Some(LinkSide::Source)
        } else if self.target.matches(node, interface) {
            Some(LinkSide::Target)
        } else {
            None
        }
    }

    pub fn endpoint(&self, side: LinkSide) -> &Endpoint {
        match side {
            LinkSide::Source => &self.source,
            LinkSide::Target => &self.target,
        }
    }

    pub fn peer(&self, side: LinkSide) -> &Endpoint {
        match side {
            LinkSide::Source => &self.target,
            LinkSide::Target => &self.source,
        }
    }

    pub fn host_of(&self, side: LinkSide) -> Option<&AgentId> {
        match side {
            LinkSide::Source => self.source_host_id.as_ref(),
            LinkSide::Target => self.target_host_id.as_ref(),
        }
    }

    pub fn set_carrier(&mut self, side: LinkSide, carrier: CarrierState) {
        match side {
            LinkSide::Source => self.source_carrier = carrier,
            LinkSide::Target => self.target_carrier = carrier,
        }
    }

    /// Recompute per-side operational state from carrier + vxlan
    /// attachment. Bumps `oper_epoch` and returns true when anything
    /// changed.
    pub fn recompute_oper_state(&mut self) -> bool {
        let (src_state, src_reason) = side_oper(
            self.source_carrier,
            self.is_cross_host,
            self.source_vxlan_attached,
        );
        let (tgt_state, tgt_reason) = side_oper(
            self.target_carrier,
            self.is_cross_host,
            self.target_vxlan_attached,
        );

        let changed = self.source_oper_state != src_state
            || self.target_oper_state != tgt_state
            || self.source_oper_reason != src_reason
            || self.target_oper_reason != tgt_reason;
        if changed {
            self.source_oper_state = src_state;
            self.target_oper_state = tgt_state;
            self.source_oper_reason = src_reason;
            self.target_oper_reason = tgt_reason;
            self.oper_epoch += 1;
        }
        changed
    }
}

fn side_oper(
    carrier: CarrierState,
    cross_host: bool,
    vxlan_attached: bool,
) -> (OperState, Option<String>) {
    if carrier == CarrierState::Off {
        return (OperState::Down, Some("carrier off".to_string()));
    }
    if cross_host && !vxlan_attached {
        return (OperState::Down, Some("overlay detached".to_string()));
    }
    (OperState::Up, None)
}

/// Status of a VXLAN tunnel ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    Active,
    Cleanup,
    Failed,
}

/// Ledger entry for one cross-host tunnel. Created on successful
/// connection, marked cleanup during teardown, deleted only when both
/// sides have detached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VxlanTunnel {
    pub id: TunnelId,
    pub lab_id: LabId,
    pub link_name: String,
    pub vni: u32,
    pub agent_a: AgentId,
    pub ip_a: String,
    pub agent_b: AgentId,
    pub ip_b: String,
    pub port_name: String,
    pub status: TunnelStatus,
}

impl VxlanTunnel {
    /// Trunk port name for a host pair, shared by every tunnel between
    /// those two hosts.
    pub fn trunk_port_name(vni: u32) -> String {
        format!("vxlan-{vni}")
    }
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
