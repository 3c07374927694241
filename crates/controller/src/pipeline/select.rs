// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topology analysis and agent assignment for deploys.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::{AgentInfo, Clock, LabId, Node};
use arche_storage::Change;
use std::collections::HashMap;
use tracing::info;

/// Runtime provider required for a device kind.
pub(crate) fn provider_for_kind(kind: &str) -> &'static str {
    match kind {
        "vm" | "qemu" | "kvm" | "vmx" | "vqfx" => "libvirt",
        _ => "docker",
    }
}

/// Agent assignments for one deploy.
pub struct DeployPlan {
    pub assignments: Vec<(AgentInfo, Vec<Node>)>,
    pub multi_host: bool,
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Decide where every node runs.
    ///
    /// Distinct pinned hosts make the deploy multi-host: every named
    /// host must be healthy with matching capability, and unpinned nodes
    /// go to the lab's default agent (or the deploy is rejected).
    /// Otherwise an affinity-aware pick places the whole lab.
    pub(crate) fn plan_deploy(&self, lab_id: &LabId) -> Result<DeployPlan, ControllerError> {
        let nodes: Vec<Node> = self.store.read(|db| {
            db.nodes
                .get(lab_id)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        });

        if nodes.is_empty() {
            return Ok(DeployPlan {
                assignments: Vec::new(),
                multi_host: false,
            });
        }

        let pinned_hosts: Vec<_> = nodes
            .iter()
            .filter_map(|n| n.host_pin.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        let multi_host = pinned_hosts.len() > 1;

        let mut assignments: HashMap<arche_core::AgentId, (AgentInfo, Vec<Node>)> = HashMap::new();

        if multi_host {
            for node in &nodes {
                let provider = provider_for_kind(&node.kind);
                let agent = match &node.host_pin {
                    Some(pin) => self.pick_agent_by_id(pin, provider).ok_or_else(|| {
                        ControllerError::NoAgent(format!(
                            "pinned host {pin} for node {} is not healthy",
                            node.name
                        ))
                    })?,
                    None => {
                        let default_agent = self
                            .require_lab(lab_id)?
                            .default_agent_id
                            .ok_or_else(|| {
                                ControllerError::NoAgent(format!(
                                    "multi-host lab has no default agent for unpinned node {}",
                                    node.name
                                ))
                            })?;
                        self.pick_agent_by_id(&default_agent, provider).ok_or_else(|| {
                            ControllerError::NoAgent(format!(
                                "default agent {default_agent} is not healthy"
                            ))
                        })?
                    }
                };
                assignments
                    .entry(agent.id.clone())
                    .or_insert_with(|| (agent, Vec::new()))
                    .1
                    .push(node.clone());
            }
        } else {
            // Single-host: one affinity-aware pick carries the lab.
            let provider = nodes
                .first()
                .map(|n| provider_for_kind(&n.kind))
                .unwrap_or("docker");
            let agent = match pinned_hosts.first() {
                Some(pin) => self.pick_agent_by_id(pin, provider).ok_or_else(|| {
                    ControllerError::NoAgent(format!("pinned host {pin} is not healthy"))
                })?,
                None => self
                    .pick_agent_for_lab(lab_id, provider)
                    .ok_or_else(|| ControllerError::NoAgent("no agent with capacity".to_string()))?,
            };
            if !nodes.is_empty() {
                assignments.insert(agent.id.clone(), (agent, nodes.clone()));
            }
        }

        let mut assignments: Vec<_> = assignments.into_values().collect();
        assignments.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        info!(
            lab = %lab_id,
            hosts = assignments.len(),
            multi_host,
            "deploy planned"
        );
        Ok(DeployPlan {
            assignments,
            multi_host,
        })
    }

    /// Check that every target agent has the images its nodes need.
    ///
    /// Missing images kick off sync jobs (when enabled) and fail the
    /// deploy with the exact list rather than proceeding.
    pub(crate) async fn image_preflight(&self, plan: &DeployPlan) -> Result<(), ControllerError> {
        let mut missing = Vec::new();
        for (agent, nodes) in &plan.assignments {
            let mut images: Vec<&str> = nodes.iter().map(|n| n.image.as_str()).collect();
            images.sort_unstable();
            images.dedup();
            for image in images {
                let cached = self.store.read(|db| db.has_image(&agent.id, image));
                if cached {
                    continue;
                }
                match self.rpc.check_image(agent, image).await {
                    Ok(true) => {
                        self.store.commit([Change::ImageHostRecorded {
                            image: image.to_string(),
                            agent_id: agent.id.clone(),
                            epoch_ms: self.now_ms(),
                        }])?;
                    }
                    Ok(false) => {
                        if self.config.image_sync_enabled {
                            let _ = self.rpc.sync_image(agent, image).await;
                        }
                        missing.push(format!("{image} on {}", agent.id));
                    }
                    Err(e) => {
                        missing.push(format!("{image} on {} ({e})", agent.id));
                    }
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::MissingImages { images: missing })
        }
    }

    /// Opaque topology document shipped to agents.
    pub(crate) fn topology_json(&self, lab_id: &LabId) -> serde_json::Value {
        self.store.read(|db| {
            let nodes: Vec<serde_json::Value> = db
                .nodes
                .get(lab_id)
                .map(|m| {
                    let mut nodes: Vec<_> = m.values().collect();
                    nodes.sort_by(|a, b| a.name.cmp(&b.name));
                    nodes
                        .iter()
                        .map(|n| {
                            serde_json::json!({
                                "name": n.name,
                                "container_name": n.container_name,
                                "kind": n.kind,
                                "image": n.image,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            let links: Vec<String> = db
                .links
                .get(lab_id)
                .map(|m| {
                    let mut names: Vec<_> = m.keys().cloned().collect();
                    names.sort();
                    names
                })
                .unwrap_or_default();
            serde_json::json!({ "nodes": nodes, "links": links })
        })
    }
}

#[cfg(test)]
#[path = "select_tests.rs"]
mod tests;
