// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic safety-net sweeps for resources the event path can miss.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::{AgentStatus, Clock};
use arche_storage::Change;
use tracing::{debug, info};

/// Counts from one sweep pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub jobs_pruned: usize,
    pub tunnels_removed: usize,
    pub image_hosts_invalidated: usize,
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// One sweep pass, honoring the configured retention windows.
    pub async fn cleanup_sweep(&self) -> Result<SweepSummary, ControllerError> {
        let mut summary = SweepSummary::default();
        let retention_ms = self.config.job_retention().as_millis() as u64;

        // Old terminal jobs age out of the audit window
        let expired: Vec<_> = self.store.read(|db| {
            db.jobs
                .values()
                .filter(|j| {
                    j.status.is_terminal()
                        && j.completed_at_ms
                            .map(|t| self.clock.age_ms(t) > retention_ms)
                            .unwrap_or(false)
                })
                .map(|j| j.id.clone())
                .collect()
        });
        for id in expired {
            self.store.commit([Change::JobDeleted { id }])?;
            summary.jobs_pruned += 1;
        }

        summary.tunnels_removed = self.sweep_orphan_tunnels()?;

        // Image rows for offline agents are stale claims
        let offline: Vec<_> = self.store.read(|db| {
            db.agents
                .values()
                .filter(|a| a.status == AgentStatus::Offline)
                .filter(|a| db.image_hosts.iter().any(|ih| ih.agent_id == a.id))
                .map(|a| a.id.clone())
                .collect()
        });
        for agent_id in offline {
            self.store
                .commit([Change::ImageHostInvalidated { agent_id }])?;
            summary.image_hosts_invalidated += 1;
        }

        // Docker housekeeping on every online agent
        let agents: Vec<_> = self.store.read(|db| db.agents.values().cloned().collect());
        for agent in agents.iter().filter(|a| self.agent_online(a)) {
            match self.rpc.prune_docker(agent).await {
                Ok(report) if report.reclaimed_bytes > 0 => {
                    info!(agent = %agent.id, bytes = report.reclaimed_bytes, "docker prune reclaimed space");
                }
                Ok(_) => {}
                Err(e) => debug!(agent = %agent.id, error = %e, "docker prune failed"),
            }
        }

        if summary != SweepSummary::default() {
            info!(
                jobs = summary.jobs_pruned,
                tunnels = summary.tunnels_removed,
                image_hosts = summary.image_hosts_invalidated,
                "cleanup sweep finished"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
#[path = "sweeps_tests.rs"]
mod tests;
