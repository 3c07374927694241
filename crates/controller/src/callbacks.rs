// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound agent callbacks: async job completion, heartbeats, carrier
//! events, and the dead-letter path of last resort.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::node::ActualState;
use arche_core::{
    CleanupEvent, Clock, JobAction, JobId, JobStatus, LabState,
};
use arche_storage::Change;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Async job completion payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCallback {
    /// "completed" or "failed".
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Per-node actual states observed by the agent after the work.
    #[serde(default)]
    pub node_states: Vec<NodeStateReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStateReport {
    pub node_name: String,
    pub status: String,
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Ingest an async job completion.
    ///
    /// Idempotent: repeat callbacks for a terminal job are acknowledged
    /// and ignored.
    pub async fn job_callback(
        &self,
        job_id: &JobId,
        payload: JobCallback,
    ) -> Result<(), ControllerError> {
        let job = self.require_job(job_id)?;
        if job.status.is_terminal() {
            info!(job = %job_id, "callback for terminal job acknowledged");
            return Ok(());
        }

        self.store.update_job(job_id, |j| {
            if !payload.stdout.is_empty() {
                j.append_log(&payload.stdout);
            }
            if !payload.stderr.is_empty() {
                j.append_log(&payload.stderr);
            }
        })?;

        // The callback is authoritative for observed node state
        if let Some(lab_id) = &job.lab_id {
            let now = self.now_ms();
            for report in &payload.node_states {
                let node = self
                    .store
                    .read(|db| db.node_by_name(lab_id, &report.node_name).cloned());
                if let Some(node) = node {
                    self.store.commit([Change::NodeObserved {
                        lab_id: lab_id.clone(),
                        node_id: node.id.clone(),
                        actual: ActualState::from_report(&report.status),
                        epoch_ms: now,
                    }])?;
                    self.publish_node_state(lab_id, &node.id);
                }
            }
        }

        match payload.status.as_str() {
            "completed" => {
                self.complete_job(job_id).await?;
                if let Some(lab_id) = &job.lab_id {
                    self.aggregate_and_publish_lab(lab_id)?;
                    self.process_link_changes(lab_id).await;
                    if matches!(job.action, JobAction::Up) {
                        let _ = self
                            .bus
                            .publish(CleanupEvent::DeployFinished {
                                lab_id: lab_id.clone(),
                                job_id: job_id.clone(),
                                success: true,
                            })
                            .await;
                    }
                    if matches!(job.action, JobAction::Down) {
                        let _ = self
                            .bus
                            .publish(CleanupEvent::DestroyFinished {
                                lab_id: lab_id.clone(),
                                job_id: job_id.clone(),
                                success: true,
                            })
                            .await;
                    }
                }
            }
            _ => {
                let message = if payload.stderr.is_empty() {
                    format!("agent reported job {}", payload.status)
                } else {
                    payload.stderr.clone()
                };
                self.fail_job(job_id, &message).await?;
            }
        }
        Ok(())
    }

    /// Empty-payload liveness signal from a long-running agent job.
    pub fn job_heartbeat(&self, job_id: &JobId) -> Result<(), ControllerError> {
        let now = self.now_ms();
        let job = self.store.update_job(job_id, |j| {
            if j.status == JobStatus::Running {
                j.heartbeat(now);
            }
        })?;
        if job.status != JobStatus::Running {
            warn!(job = %job_id, status = %job.status, "heartbeat for non-running job");
        }
        Ok(())
    }

    /// Dead-letter delivery: the agent could not reach the normal
    /// callback endpoint after its own retries.
    ///
    /// With a payload the original status is recorded as if the callback
    /// had arrived; without one the job fails with a clear marker and
    /// the lab goes to unknown so reconciliation takes over.
    pub async fn dead_letter(
        &self,
        job_id: &JobId,
        payload: Option<JobCallback>,
    ) -> Result<(), ControllerError> {
        match payload {
            Some(payload) => {
                info!(job = %job_id, "dead-letter carried original payload, replaying");
                self.job_callback(job_id, payload).await
            }
            None => {
                warn!(job = %job_id, "dead-letter without payload, failing job");
                let job = self.require_job(job_id)?;
                if job.status.is_terminal() {
                    return Ok(());
                }
                self.fail_job(job_id, "callback delivery failed").await?;
                if let Some(lab_id) = &job.lab_id {
                    self.set_lab_state(lab_id, LabState::Unknown, None)?;
                }
                Ok(())
            }
        }
    }

    /// Agent-update progress callback.
    pub fn agent_update_progress(
        &self,
        job_id: &JobId,
        log_line: &str,
    ) -> Result<(), ControllerError> {
        let now = self.now_ms();
        self.store.update_job(job_id, |j| {
            j.append_log(log_line);
            if j.status == JobStatus::Running {
                j.heartbeat(now);
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "callbacks_tests.rs"]
mod tests;
