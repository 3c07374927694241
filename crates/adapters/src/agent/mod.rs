// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent RPC surface.
//!
//! The [`AgentApi`] trait is the controller's only way to touch a worker
//! host. Two failure classes matter to callers: [`AgentApiError::Unavailable`]
//! is transport-level and retriable; [`AgentApiError::Job`] is the agent
//! saying no and is not retried at this layer.

mod http;

pub use http::{HttpAgentApi, HttpAgentApiConfig};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{AgentCall, FakeAgentApi};

use arche_core::link::Endpoint;
use arche_core::node::NodeCommand;
use arche_core::{AgentInfo, CarrierState, JobId, LabId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from agent RPC operations.
#[derive(Debug, Clone, Error)]
pub enum AgentApiError {
    /// Connection refused, DNS failure, read timeout, 5xx after retries.
    /// Transport-level and retriable.
    #[error("agent unavailable: {0}")]
    Unavailable(String),
    /// The agent returned an application-level failure. Not retriable at
    /// this layer; carries the agent's output for the job log.
    #[error("agent job failed: {message}")]
    Job {
        message: String,
        stdout: String,
        stderr: String,
    },
    /// The agent does not implement this call (older agent version).
    #[error("agent call unsupported: {0}")]
    Unsupported(&'static str),
    /// The agent answered with a payload the controller cannot parse.
    #[error("invalid agent response: {0}")]
    InvalidResponse(String),
}

impl AgentApiError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, AgentApiError::Unavailable(_))
    }

    pub fn job(message: impl Into<String>) -> Self {
        AgentApiError::Job {
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Outcome of a deploy/destroy/node-action call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeployOutcome {
    /// The agent ran the work synchronously.
    Finished { stdout: String, stderr: String },
    /// The agent accepted the job and will deliver a callback.
    AcceptedAsync,
}

/// Per-node status line from `get_lab_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub node_name: String,
    pub status: String,
}

/// One lab an agent still carries, from `discover_labs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredLab {
    pub lab_id: LabId,
    pub nodes: Vec<String>,
}

/// Result of a same-host link creation. Idempotent by (lab,
/// endpoint-pair): an existing link returns its VLAN tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCreateResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_tag: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters for attaching an endpoint to a VXLAN overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayAttach {
    pub lab_id: LabId,
    pub container: String,
    pub interface: String,
    pub vni: u32,
    pub local_ip: String,
    pub remote_ip: String,
    pub link_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

/// One entry of the declared VTEP set, split so each side sees itself as
/// local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayDeclaration {
    pub link_id: String,
    pub lab_id: LabId,
    pub port_name: String,
    pub vni: u32,
    pub local_ip: String,
    pub remote_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_vlan: Option<u16>,
}

/// Per-entry convergence status reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayEntryStatus {
    Converged,
    Created,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayEntryReport {
    pub link_id: String,
    pub status: OverlayEntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a `declare_overlay_state` convergence call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverlayReport {
    pub results: Vec<OverlayEntryReport>,
    #[serde(default)]
    pub orphans_removed: Vec<String>,
}

/// Readiness probe result for a booting node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub is_ready: bool,
    #[serde(default)]
    pub progress_percent: u8,
    #[serde(default)]
    pub message: String,
}

/// Result of a docker prune pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PruneReport {
    #[serde(default)]
    pub reclaimed_bytes: u64,
}

/// Typed remote calls to a worker host.
///
/// Idempotence contract: deploy, destroy, set_carrier, detach, and
/// declare_overlay_state are safely retriable; create_link is idempotent
/// by (lab, endpoint-pair).
#[async_trait]
pub trait AgentApi: Clone + Send + Sync + 'static {
    async fn deploy(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        topology: &serde_json::Value,
    ) -> Result<DeployOutcome, AgentApiError>;

    async fn destroy(&self, agent: &AgentInfo, lab: &LabId) -> Result<DeployOutcome, AgentApiError>;

    async fn node_action(
        &self,
        agent: &AgentInfo,
        job: &JobId,
        lab: &LabId,
        node: &str,
        verb: NodeCommand,
    ) -> Result<DeployOutcome, AgentApiError>;

    async fn get_lab_status(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
    ) -> Result<Vec<NodeStatusReport>, AgentApiError>;

    async fn discover_labs(&self, agent: &AgentInfo) -> Result<Vec<DiscoveredLab>, AgentApiError>;

    async fn create_link(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<LinkCreateResult, AgentApiError>;

    /// Delete a same-host link between two endpoints.
    async fn remove_link(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<(), AgentApiError>;

    async fn attach_overlay_interface(
        &self,
        agent: &AgentInfo,
        attach: &OverlayAttach,
    ) -> Result<(), AgentApiError>;

    async fn detach_overlay_interface(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        container: &str,
        interface: &str,
        link_id: &str,
    ) -> Result<(), AgentApiError>;

    /// Idempotent: the agent converges its VTEP set to the declared set
    /// and reports what it created, kept, and removed.
    async fn declare_overlay_state(
        &self,
        agent: &AgentInfo,
        declared: &[OverlayDeclaration],
    ) -> Result<OverlayReport, AgentApiError>;

    /// Legacy whitelist path for agents without declare-state: send the
    /// expected port names and ask the agent to remove anything else.
    async fn reconcile_vxlan_ports(
        &self,
        agent: &AgentInfo,
        valid_ports: &[String],
        allow_empty: bool,
    ) -> Result<(), AgentApiError>;

    async fn set_carrier(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        interface: &str,
        carrier: CarrierState,
    ) -> Result<(), AgentApiError>;

    /// Move the interface to a unique throwaway VLAN with carrier off.
    async fn isolate_endpoint(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        interface: &str,
    ) -> Result<(), AgentApiError>;

    async fn check_node_readiness(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        kind: &str,
    ) -> Result<ReadinessReport, AgentApiError>;

    async fn sync_image(&self, agent: &AgentInfo, image: &str) -> Result<(), AgentApiError>;

    async fn check_image(&self, agent: &AgentInfo, image: &str) -> Result<bool, AgentApiError>;

    async fn cleanup_workspace(&self, agent: &AgentInfo, lab: &LabId)
        -> Result<(), AgentApiError>;

    async fn cleanup_orphans(
        &self,
        agent: &AgentInfo,
        valid_lab_ids: &[LabId],
    ) -> Result<(), AgentApiError>;

    async fn prune_docker(&self, agent: &AgentInfo) -> Result<PruneReport, AgentApiError>;
}
