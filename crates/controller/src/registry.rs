// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry: heartbeat tracking, stale detection, and selection.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::agent::{AgentCapabilities, ResourceUsage};
use arche_core::{
    AgentId, AgentInfo, AgentStatus, CleanupEvent, Clock, JobAction, JobStatus, LabId,
};
use arche_storage::Change;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Registration payload delivered with an agent's first (and every
/// re-) registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub id: AgentId,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_mode: Option<String>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sync_strategy: Option<String>,
}

/// Per-cycle memo of agent reachability so one pass does not re-probe
/// the same host.
#[derive(Default)]
pub struct OnlineCache {
    map: HashMap<AgentId, bool>,
}

impl OnlineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn online(&mut self, agent: &AgentInfo, now_ms: u64, stale_timeout_ms: u64) -> bool {
        *self
            .map
            .entry(agent.id.clone())
            .or_insert_with(|| agent.is_online(now_ms, stale_timeout_ms))
    }
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Upsert an agent by id. Re-registration refreshes capabilities and
    /// version, and completes any update job that targeted this
    /// version/commit.
    pub fn register_agent(&self, reg: AgentRegistration) -> Result<(), ControllerError> {
        let now = self.now_ms();
        let mut agent = AgentInfo::new(reg.id.clone(), reg.address);
        agent.status = AgentStatus::Online;
        agent.last_heartbeat_ms = Some(now);
        agent.version = reg.version.clone();
        agent.commit = reg.commit.clone();
        agent.deployment_mode = reg.deployment_mode;
        agent.capabilities = reg.capabilities;
        agent.image_sync_strategy = reg.image_sync_strategy;

        self.store.commit([Change::AgentRegistered { agent }])?;
        info!(agent = %reg.id, version = ?reg.version, "agent registered");

        self.complete_update_jobs(&reg.id, reg.version.as_deref(), reg.commit.as_deref())?;
        Ok(())
    }

    /// Check outstanding update jobs for an agent that just registered.
    fn complete_update_jobs(
        &self,
        agent_id: &AgentId,
        version: Option<&str>,
        commit: Option<&str>,
    ) -> Result<(), ControllerError> {
        let pending: Vec<_> = self.store.read(|db| {
            db.jobs
                .values()
                .filter(|j| {
                    j.status.is_active() && j.action == JobAction::AgentUpdate(agent_id.clone())
                })
                .cloned()
                .collect()
        });

        for job in pending {
            let matched = job
                .update_target
                .as_ref()
                .map(|t| t.matches(version, commit))
                .unwrap_or(true);
            if matched {
                let now = self.now_ms();
                let updated = self.store.update_job(&job.id, |j| {
                    j.append_log(&format!(
                        "agent re-registered with version {}",
                        version.unwrap_or("unknown")
                    ));
                    j.mark_terminal(JobStatus::Completed, now);
                })?;
                self.broadcaster
                    .publish_job_progress(updated.lab_id.as_ref(), (&updated).into());
                info!(agent = %agent_id, job = %job.id, "agent update completed");
            } else {
                warn!(
                    agent = %agent_id,
                    job = %job.id,
                    got = ?version,
                    "agent re-registered with unexpected version"
                );
            }
        }
        Ok(())
    }

    /// Record a heartbeat and the reported resource snapshot. Unknown
    /// agents are ignored (they must register first).
    pub fn agent_heartbeat(
        &self,
        agent_id: &AgentId,
        usage: ResourceUsage,
    ) -> Result<(), ControllerError> {
        let known = self.store.read(|db| db.agents.contains_key(agent_id));
        if !known {
            return Err(ControllerError::InvalidRequest(format!(
                "unknown agent {agent_id}"
            )));
        }
        let mut changes = vec![Change::AgentHeartbeat {
            agent_id: agent_id.clone(),
            epoch_ms: self.now_ms(),
            usage,
        }];
        // A heartbeat from an offline agent brings it back online.
        let offline = self.store.read(|db| {
            db.agents
                .get(agent_id)
                .map(|a| a.status == AgentStatus::Offline)
                .unwrap_or(false)
        });
        if offline {
            changes.push(Change::AgentStatusChanged {
                agent_id: agent_id.clone(),
                status: AgentStatus::Online,
            });
        }
        self.store.commit(changes)?;
        Ok(())
    }

    /// Mark agents offline whose heartbeat is older than the stale
    /// timeout (or missing). Returns the newly-offline ids; an
    /// `agent:offline` cleanup event is published for each.
    pub async fn mark_stale_agents(&self) -> Result<Vec<AgentId>, ControllerError> {
        let now = self.now_ms();
        let timeout = self.config.agent_stale_timeout.as_millis() as u64;
        let stale: Vec<AgentId> = self.store.read(|db| {
            db.agents
                .values()
                .filter(|a| a.status == AgentStatus::Online && !a.is_online(now, timeout))
                .map(|a| a.id.clone())
                .collect()
        });

        for agent_id in &stale {
            self.store.commit([Change::AgentStatusChanged {
                agent_id: agent_id.clone(),
                status: AgentStatus::Offline,
            }])?;
            warn!(agent = %agent_id, "agent heartbeat stale, marked offline");
            let _ = self
                .bus
                .publish(CleanupEvent::AgentOffline {
                    agent_id: agent_id.clone(),
                })
                .await;
        }
        Ok(stale)
    }

    pub(crate) fn agent(&self, id: &AgentId) -> Option<AgentInfo> {
        self.store.read(|db| db.agents.get(id).cloned())
    }

    pub(crate) fn agent_online(&self, agent: &AgentInfo) -> bool {
        agent.is_online(
            self.now_ms(),
            self.config.agent_stale_timeout.as_millis() as u64,
        )
    }

    /// Select a healthy agent: capability filter, exclusion list,
    /// affinity if the preferred agent is healthy and under capacity,
    /// otherwise least-loaded. `None` when nothing qualifies or all are
    /// at capacity.
    pub fn pick_agent(
        &self,
        required_provider: &str,
        prefer: Option<&AgentId>,
        exclude: &[AgentId],
    ) -> Option<AgentInfo> {
        let now = self.now_ms();
        let timeout = self.config.agent_stale_timeout.as_millis() as u64;

        let candidates: Vec<(AgentInfo, usize)> = self.store.read(|db| {
            db.agents
                .values()
                .filter(|a| a.is_online(now, timeout))
                .filter(|a| a.has_provider(required_provider))
                .filter(|a| !exclude.contains(&a.id))
                .map(|a| (a.clone(), db.active_job_count(&a.id)))
                .collect()
        });

        let under_capacity =
            |agent: &AgentInfo, load: usize| (load as u32) < agent.capabilities.max_concurrent_jobs;

        if let Some(preferred) = prefer {
            if let Some((agent, load)) = candidates.iter().find(|(a, _)| &a.id == preferred) {
                if under_capacity(agent, *load) {
                    return Some(agent.clone());
                }
            }
        }

        candidates
            .into_iter()
            .filter(|(agent, load)| under_capacity(agent, *load))
            .min_by_key(|(_, load)| *load)
            .map(|(agent, _)| agent)
    }

    /// Variant of pick that prefers agents already hosting nodes for the
    /// lab, then the lab's default agent.
    pub fn pick_agent_for_lab(&self, lab_id: &LabId, required_provider: &str) -> Option<AgentInfo> {
        let (hosts, default_agent) = self.store.read(|db| {
            let mut counts: HashMap<AgentId, usize> = HashMap::new();
            if let Some(placements) = db.placements.get(lab_id) {
                for agent in placements.values() {
                    *counts.entry(agent.clone()).or_insert(0) += 1;
                }
            }
            let default_agent = db.labs.get(lab_id).and_then(|l| l.default_agent_id.clone());
            (counts, default_agent)
        });

        // Most placements first, so co-location wins
        let mut by_affinity: Vec<(AgentId, usize)> = hosts.into_iter().collect();
        by_affinity.sort_by(|a, b| b.1.cmp(&a.1));
        for (agent_id, _) in by_affinity {
            if let Some(agent) = self.pick_agent(required_provider, Some(&agent_id), &[]) {
                if agent.id == agent_id {
                    return Some(agent);
                }
            }
        }

        if let Some(default_id) = default_agent {
            if let Some(agent) = self.pick_agent(required_provider, Some(&default_id), &[]) {
                if agent.id == default_id {
                    return Some(agent);
                }
            }
        }

        self.pick_agent(required_provider, None, &[])
    }

    /// Exact-id lookup, subject to the same health and capability checks.
    pub fn pick_agent_by_id(&self, id: &AgentId, required_provider: &str) -> Option<AgentInfo> {
        let agent = self.agent(id)?;
        if !self.agent_online(&agent) || !agent.has_provider(required_provider) {
            return None;
        }
        let load = self.store.read(|db| db.active_job_count(id));
        if (load as u32) >= agent.capabilities.max_concurrent_jobs {
            return None;
        }
        Some(agent)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
