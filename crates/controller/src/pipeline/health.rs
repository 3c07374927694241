// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job-health monitor: stuck vs slow.
//!
//! A running job with a recent heartbeat is merely slow and is left
//! alone; one whose last sign of life is older than the stuck threshold
//! is failed so the lab can fall back to reconciliation.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::{Clock, Job, JobAction, JobId, JobStatus, LabState};
use tracing::warn;

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// One monitor pass. Returns the ids of jobs failed this pass.
    pub async fn job_health_pass(&self) -> Result<Vec<JobId>, ControllerError> {
        let now = self.now_ms();
        let stuck_ms = self.config.job_stuck_threshold.as_millis() as u64;
        let update_ms = self.config.agent_update_restart_timeout.as_millis() as u64;

        let candidates: Vec<Job> = self.store.read(|db| {
            db.jobs
                .values()
                .filter(|j| j.status.is_active())
                .cloned()
                .collect()
        });

        let mut failed = Vec::new();
        for job in candidates {
            match &job.action {
                JobAction::AgentUpdate(agent_id) => {
                    // The agent never came back with the target build.
                    if job.update_target.is_some()
                        && self.clock.age_ms(job.created_at_ms) > update_ms
                    {
                        warn!(job = %job.id, agent = %agent_id, "agent update timed out");
                        let terminal = self.store.update_job(&job.id, |j| {
                            j.append_log("agent did not re-register with target version");
                            j.mark_failed(now);
                        })?;
                        self.broadcaster
                            .publish_job_progress(terminal.lab_id.as_ref(), (&terminal).into());
                        failed.push(job.id.clone());
                    }
                }
                _ => {
                    if job.status != JobStatus::Running {
                        continue;
                    }
                    if job.liveness_age_ms(now) > stuck_ms {
                        warn!(job = %job.id, "job stuck: no heartbeat past threshold");
                        self.fail_job(&job.id, "job stuck: no heartbeat past threshold")
                            .await?;
                        if let Some(lab_id) = &job.lab_id {
                            self.set_lab_state(lab_id, LabState::Unknown, None)?;
                        }
                        failed.push(job.id.clone());
                    }
                }
            }
        }
        Ok(failed)
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
