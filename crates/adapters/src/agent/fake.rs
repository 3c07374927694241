// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake agent API for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{
    AgentApi, AgentApiError, DeployOutcome, DiscoveredLab, LinkCreateResult, NodeStatusReport,
    OverlayAttach, OverlayDeclaration, OverlayEntryReport, OverlayEntryStatus, OverlayReport,
    PruneReport, ReadinessReport,
};
use arche_core::link::Endpoint;
use arche_core::node::NodeCommand;
use arche_core::{AgentId, AgentInfo, CarrierState, JobId, LabId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Recorded call to FakeAgentApi
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCall {
    Deploy {
        agent: AgentId,
        lab: LabId,
    },
    Destroy {
        agent: AgentId,
        lab: LabId,
    },
    NodeAction {
        agent: AgentId,
        lab: LabId,
        node: String,
        verb: NodeCommand,
    },
    GetLabStatus {
        agent: AgentId,
        lab: LabId,
    },
    DiscoverLabs {
        agent: AgentId,
    },
    CreateLink {
        agent: AgentId,
        lab: LabId,
        source: Endpoint,
        target: Endpoint,
    },
    RemoveLink {
        agent: AgentId,
        lab: LabId,
        source: Endpoint,
        target: Endpoint,
    },
    AttachOverlay {
        agent: AgentId,
        link_id: String,
        vni: u32,
    },
    DetachOverlay {
        agent: AgentId,
        lab: LabId,
        container: String,
        interface: String,
        link_id: String,
    },
    DeclareOverlay {
        agent: AgentId,
        link_ids: Vec<String>,
    },
    ReconcileVxlanPorts {
        agent: AgentId,
        valid_ports: Vec<String>,
    },
    SetCarrier {
        agent: AgentId,
        lab: LabId,
        node: String,
        interface: String,
        carrier: CarrierState,
    },
    IsolateEndpoint {
        agent: AgentId,
        lab: LabId,
        node: String,
        interface: String,
    },
    CheckReadiness {
        agent: AgentId,
        lab: LabId,
        node: String,
    },
    SyncImage {
        agent: AgentId,
        image: String,
    },
    CheckImage {
        agent: AgentId,
        image: String,
    },
    CleanupWorkspace {
        agent: AgentId,
        lab: LabId,
    },
    CleanupOrphans {
        agent: AgentId,
    },
    PruneDocker {
        agent: AgentId,
    },
}

struct FakeState {
    calls: Vec<AgentCall>,
    /// Agents that refuse every call with `Unavailable`.
    unavailable: HashSet<AgentId>,
    /// Scripted one-shot failures per method name.
    failures: HashMap<&'static str, VecDeque<AgentApiError>>,
    /// Scripted one-shot failures per (agent, method).
    agent_failures: HashMap<(AgentId, &'static str), VecDeque<AgentApiError>>,
    /// Scripted lab status per (agent, lab).
    lab_statuses: HashMap<(AgentId, LabId), Vec<NodeStatusReport>>,
    /// Scripted discovery per agent.
    discovered: HashMap<AgentId, Vec<DiscoveredLab>>,
    /// Nodes whose readiness probe reports not-ready.
    not_ready: HashSet<String>,
    /// Images missing per agent; everything else reports present.
    missing_images: HashMap<AgentId, HashSet<String>>,
    /// Agents that accept deploys asynchronously.
    async_deploys: HashSet<AgentId>,
    /// Existing same-host links for create_link idempotence.
    links: HashMap<(AgentId, LabId, String), u16>,
    next_vlan: u16,
}

/// Fake agent API for testing.
///
/// Records every call and allows scripting per-method failures and
/// per-agent observed state.
#[derive(Clone)]
pub struct FakeAgentApi {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeAgentApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAgentApi {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                calls: Vec::new(),
                unavailable: HashSet::new(),
                failures: HashMap::new(),
                agent_failures: HashMap::new(),
                lab_statuses: HashMap::new(),
                discovered: HashMap::new(),
                not_ready: HashSet::new(),
                missing_images: HashMap::new(),
                async_deploys: HashSet::new(),
                links: HashMap::new(),
                next_vlan: 100,
            })),
        }
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<AgentCall> {
        self.inner.lock().calls.clone()
    }

    /// Clear recorded calls
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Make every call against this agent fail with `Unavailable`.
    pub fn set_unavailable(&self, agent: &AgentId) {
        self.inner.lock().unavailable.insert(agent.clone());
    }

    pub fn set_available(&self, agent: &AgentId) {
        self.inner.lock().unavailable.remove(agent);
    }

    /// Queue a one-shot failure for the next invocation of `method`
    /// (e.g. "deploy", "detach_overlay_interface").
    pub fn fail_next(&self, method: &'static str, error: AgentApiError) {
        self.inner
            .lock()
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Queue a one-shot failure for the next invocation of `method`
    /// against one specific agent.
    pub fn fail_next_for(&self, agent: &AgentId, method: &'static str, error: AgentApiError) {
        self.inner
            .lock()
            .agent_failures
            .entry((agent.clone(), method))
            .or_default()
            .push_back(error);
    }

    /// Script what `get_lab_status` reports for (agent, lab).
    pub fn set_lab_status(&self, agent: &AgentId, lab: &LabId, nodes: Vec<(&str, &str)>) {
        let reports = nodes
            .into_iter()
            .map(|(name, status)| NodeStatusReport {
                node_name: name.to_string(),
                status: status.to_string(),
            })
            .collect();
        self.inner
            .lock()
            .lab_statuses
            .insert((agent.clone(), lab.clone()), reports);
    }

    pub fn set_discovered(&self, agent: &AgentId, labs: Vec<DiscoveredLab>) {
        self.inner.lock().discovered.insert(agent.clone(), labs);
    }

    /// Make the readiness probe report not-ready for a node name.
    pub fn set_not_ready(&self, node: &str) {
        self.inner.lock().not_ready.insert(node.to_string());
    }

    pub fn set_ready(&self, node: &str) {
        self.inner.lock().not_ready.remove(node);
    }

    pub fn set_image_missing(&self, agent: &AgentId, image: &str) {
        self.inner
            .lock()
            .missing_images
            .entry(agent.clone())
            .or_default()
            .insert(image.to_string());
    }

    /// Make deploys on this agent return `AcceptedAsync`.
    pub fn set_async_deploy(&self, agent: &AgentId) {
        self.inner.lock().async_deploys.insert(agent.clone());
    }

    fn check(&self, agent: &AgentInfo, method: &'static str) -> Result<(), AgentApiError> {
        let mut inner = self.inner.lock();
        if inner.unavailable.contains(&agent.id) {
            return Err(AgentApiError::Unavailable(format!(
                "connection refused: {}",
                agent.address
            )));
        }
        if let Some(queue) = inner
            .agent_failures
            .get_mut(&(agent.id.clone(), method))
        {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        if let Some(queue) = inner.failures.get_mut(method) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }

    fn record(&self, call: AgentCall) {
        self.inner.lock().calls.push(call);
    }
}

#[async_trait]
impl AgentApi for FakeAgentApi {
    async fn deploy(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        _topology: &serde_json::Value,
    ) -> Result<DeployOutcome, AgentApiError> {
        self.record(AgentCall::Deploy {
            agent: agent.id.clone(),
            lab: lab.clone(),
        });
        self.check(agent, "deploy")?;
        if self.inner.lock().async_deploys.contains(&agent.id) {
            return Ok(DeployOutcome::AcceptedAsync);
        }
        Ok(DeployOutcome::Finished {
            stdout: "deployed".to_string(),
            stderr: String::new(),
        })
    }

    async fn destroy(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
    ) -> Result<DeployOutcome, AgentApiError> {
        self.record(AgentCall::Destroy {
            agent: agent.id.clone(),
            lab: lab.clone(),
        });
        self.check(agent, "destroy")?;
        Ok(DeployOutcome::Finished {
            stdout: "destroyed".to_string(),
            stderr: String::new(),
        })
    }

    async fn node_action(
        &self,
        agent: &AgentInfo,
        _job: &JobId,
        lab: &LabId,
        node: &str,
        verb: NodeCommand,
    ) -> Result<DeployOutcome, AgentApiError> {
        self.record(AgentCall::NodeAction {
            agent: agent.id.clone(),
            lab: lab.clone(),
            node: node.to_string(),
            verb,
        });
        self.check(agent, "node_action")?;
        Ok(DeployOutcome::Finished {
            stdout: format!("{verb} {node}"),
            stderr: String::new(),
        })
    }

    async fn get_lab_status(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
    ) -> Result<Vec<NodeStatusReport>, AgentApiError> {
        self.record(AgentCall::GetLabStatus {
            agent: agent.id.clone(),
            lab: lab.clone(),
        });
        self.check(agent, "get_lab_status")?;
        Ok(self
            .inner
            .lock()
            .lab_statuses
            .get(&(agent.id.clone(), lab.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn discover_labs(&self, agent: &AgentInfo) -> Result<Vec<DiscoveredLab>, AgentApiError> {
        self.record(AgentCall::DiscoverLabs {
            agent: agent.id.clone(),
        });
        self.check(agent, "discover_labs")?;
        Ok(self
            .inner
            .lock()
            .discovered
            .get(&agent.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_link(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<LinkCreateResult, AgentApiError> {
        self.record(AgentCall::CreateLink {
            agent: agent.id.clone(),
            lab: lab.clone(),
            source: source.clone(),
            target: target.clone(),
        });
        self.check(agent, "create_link")?;
        let mut inner = self.inner.lock();
        let key = (
            agent.id.clone(),
            lab.clone(),
            format!("{source}-{target}"),
        );
        let vlan = match inner.links.get(&key) {
            Some(existing) => *existing,
            None => {
                let vlan = inner.next_vlan;
                inner.next_vlan += 1;
                inner.links.insert(key, vlan);
                vlan
            }
        };
        Ok(LinkCreateResult {
            success: true,
            vlan_tag: Some(vlan),
            error: None,
        })
    }

    async fn remove_link(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<(), AgentApiError> {
        self.record(AgentCall::RemoveLink {
            agent: agent.id.clone(),
            lab: lab.clone(),
            source: source.clone(),
            target: target.clone(),
        });
        self.check(agent, "remove_link")?;
        let key = (agent.id.clone(), lab.clone(), format!("{source}-{target}"));
        self.inner.lock().links.remove(&key);
        Ok(())
    }

    async fn attach_overlay_interface(
        &self,
        agent: &AgentInfo,
        attach: &OverlayAttach,
    ) -> Result<(), AgentApiError> {
        self.record(AgentCall::AttachOverlay {
            agent: agent.id.clone(),
            link_id: attach.link_id.clone(),
            vni: attach.vni,
        });
        self.check(agent, "attach_overlay_interface")
    }

    async fn detach_overlay_interface(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        container: &str,
        interface: &str,
        link_id: &str,
    ) -> Result<(), AgentApiError> {
        self.record(AgentCall::DetachOverlay {
            agent: agent.id.clone(),
            lab: lab.clone(),
            container: container.to_string(),
            interface: interface.to_string(),
            link_id: link_id.to_string(),
        });
        self.check(agent, "detach_overlay_interface")
    }

    async fn declare_overlay_state(
        &self,
        agent: &AgentInfo,
        declared: &[OverlayDeclaration],
    ) -> Result<OverlayReport, AgentApiError> {
        self.record(AgentCall::DeclareOverlay {
            agent: agent.id.clone(),
            link_ids: declared.iter().map(|d| d.link_id.clone()).collect(),
        });
        self.check(agent, "declare_overlay_state")?;
        Ok(OverlayReport {
            results: declared
                .iter()
                .map(|d| OverlayEntryReport {
                    link_id: d.link_id.clone(),
                    status: OverlayEntryStatus::Converged,
                    error: None,
                })
                .collect(),
            orphans_removed: Vec::new(),
        })
    }

    async fn reconcile_vxlan_ports(
        &self,
        agent: &AgentInfo,
        valid_ports: &[String],
        _allow_empty: bool,
    ) -> Result<(), AgentApiError> {
        self.record(AgentCall::ReconcileVxlanPorts {
            agent: agent.id.clone(),
            valid_ports: valid_ports.to_vec(),
        });
        self.check(agent, "reconcile_vxlan_ports")
    }

    async fn set_carrier(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        interface: &str,
        carrier: CarrierState,
    ) -> Result<(), AgentApiError> {
        self.record(AgentCall::SetCarrier {
            agent: agent.id.clone(),
            lab: lab.clone(),
            node: node.to_string(),
            interface: interface.to_string(),
            carrier,
        });
        self.check(agent, "set_carrier")
    }

    async fn isolate_endpoint(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        interface: &str,
    ) -> Result<(), AgentApiError> {
        self.record(AgentCall::IsolateEndpoint {
            agent: agent.id.clone(),
            lab: lab.clone(),
            node: node.to_string(),
            interface: interface.to_string(),
        });
        self.check(agent, "isolate_endpoint")
    }

    async fn check_node_readiness(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        _kind: &str,
    ) -> Result<ReadinessReport, AgentApiError> {
        self.record(AgentCall::CheckReadiness {
            agent: agent.id.clone(),
            lab: lab.clone(),
            node: node.to_string(),
        });
        self.check(agent, "check_node_readiness")?;
        let ready = !self.inner.lock().not_ready.contains(node);
        Ok(ReadinessReport {
            is_ready: ready,
            progress_percent: if ready { 100 } else { 40 },
            message: if ready {
                "ready".to_string()
            } else {
                "booting".to_string()
            },
        })
    }

    async fn sync_image(&self, agent: &AgentInfo, image: &str) -> Result<(), AgentApiError> {
        self.record(AgentCall::SyncImage {
            agent: agent.id.clone(),
            image: image.to_string(),
        });
        self.check(agent, "sync_image")
    }

    async fn check_image(&self, agent: &AgentInfo, image: &str) -> Result<bool, AgentApiError> {
        self.record(AgentCall::CheckImage {
            agent: agent.id.clone(),
            image: image.to_string(),
        });
        self.check(agent, "check_image")?;
        let missing = self
            .inner
            .lock()
            .missing_images
            .get(&agent.id)
            .map(|set| set.contains(image))
            .unwrap_or(false);
        Ok(!missing)
    }

    async fn cleanup_workspace(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
    ) -> Result<(), AgentApiError> {
        self.record(AgentCall::CleanupWorkspace {
            agent: agent.id.clone(),
            lab: lab.clone(),
        });
        self.check(agent, "cleanup_workspace")
    }

    async fn cleanup_orphans(
        &self,
        agent: &AgentInfo,
        _valid_lab_ids: &[LabId],
    ) -> Result<(), AgentApiError> {
        self.record(AgentCall::CleanupOrphans {
            agent: agent.id.clone(),
        });
        self.check(agent, "cleanup_orphans")
    }

    async fn prune_docker(&self, agent: &AgentInfo) -> Result<PruneReport, AgentApiError> {
        self.record(AgentCall::PruneDocker {
            agent: agent.id.clone(),
        });
        self.check(agent, "prune_docker")?;
        Ok(PruneReport::default())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
