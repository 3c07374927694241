// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job pipeline: admission, conflict detection, dispatch, retries.

mod deploy_locks;
mod health;
pub(crate) mod select;

pub use select::DeployPlan;

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, DeployOutcome, SharedBus};
use arche_core::node::ActualState;
use arche_core::{
    extract_error_summary, CleanupEvent, Clock, DesiredState, Job, JobAction, JobId, JobStatus,
    LabId, LabState, SyncScope,
};
use arche_storage::Change;
use tracing::{info, warn};

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Admit a job: the conflict check and the insert are one
    /// transaction, so two concurrent submissions cannot both pass.
    pub fn submit_job(
        &self,
        lab_id: Option<LabId>,
        user: &str,
        action: JobAction,
    ) -> Result<Job, ControllerError> {
        let now = self.now_ms();
        let job_id = self.next_job_id();
        let admitted: Result<Job, ControllerError> = self.store.transact(|db, staged| {
            if let Some(lab) = &lab_id {
                if !db.labs.contains_key(lab) {
                    return Err(arche_storage::StoreError::NotFound {
                        entity: "lab",
                        key: lab.to_string(),
                    });
                }
                if let Some(conflict) = db.active_conflicting_job(lab, &action) {
                    return Ok(Err(ControllerError::JobConflict {
                        job_id: conflict.id.clone(),
                        action: conflict.action.to_string(),
                        status: conflict.status,
                    }));
                }
            }
            let job = Job::new(job_id.clone(), lab_id.clone(), user, action.clone(), now);
            staged.push(Change::JobCreated { job: job.clone() });
            Ok(Ok(job))
        })?;

        let job = admitted?;
        self.broadcaster
            .publish_job_progress(job.lab_id.as_ref(), (&job).into());
        Ok(job)
    }

    /// Execute a queued job. Completion may be synchronous or arrive
    /// later through a callback when the agent accepted async work.
    pub async fn run_job(&self, job_id: &JobId) -> Result<(), ControllerError> {
        let job = self.require_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(());
        }
        match job.action.clone() {
            JobAction::Up => self.run_deploy(job).await,
            JobAction::Down => self.run_destroy(job).await,
            JobAction::Sync(scope) => self.run_sync(job, scope).await,
            JobAction::Links { .. } => self.run_links(job).await,
            // Agent updates are driven by the agent's own callbacks.
            JobAction::AgentUpdate(_) => Ok(()),
        }
    }

    async fn run_deploy(&self, job: Job) -> Result<(), ControllerError> {
        let lab_id = job
            .lab_id
            .clone()
            .ok_or_else(|| ControllerError::InvalidRequest("deploy requires a lab".to_string()))?;

        let plan = match self.plan_deploy(&lab_id) {
            Ok(plan) => plan,
            Err(e) => {
                self.fail_job(&job.id, &e.to_string()).await?;
                return Err(e);
            }
        };

        if self.config.image_pre_deploy_check {
            if let Err(e) = self.image_preflight(&plan).await {
                self.fail_job(&job.id, &e.to_string()).await?;
                return Err(e);
            }
        }

        let node_names: Vec<String> = plan
            .assignments
            .iter()
            .flat_map(|(_, nodes)| nodes.iter().map(|n| n.name.clone()))
            .collect();
        let locks = match self
            .acquire_deploy_locks(&lab_id, &node_names, &job.id)
            .await
        {
            Ok(locks) => locks,
            Err(e) => {
                self.fail_job(&job.id, &e.to_string()).await?;
                return Err(e);
            }
        };

        let primary = plan.assignments.first().map(|(a, _)| a.id.clone());
        let now = self.now_ms();
        if let Some(agent_id) = primary {
            let updated = self.store.update_job(&job.id, |j| {
                j.mark_running(agent_id.clone(), now);
                j.append_log(&format!("deploying lab {lab_id}"));
            })?;
            self.broadcaster
                .publish_job_progress(Some(&lab_id), (&updated).into());
        }

        // Desired state first: enforcement picks up anything the deploy
        // itself fails to bring up.
        let mut changes = Vec::new();
        for (agent, nodes) in &plan.assignments {
            for node in nodes {
                changes.push(Change::NodeDesired {
                    lab_id: lab_id.clone(),
                    node_id: node.id.clone(),
                    desired: DesiredState::Running,
                });
                changes.push(Change::PlacementSet {
                    lab_id: lab_id.clone(),
                    node_name: node.name.clone(),
                    agent_id: agent.id.clone(),
                });
            }
        }
        self.store.commit(changes)?;
        self.set_lab_state(&lab_id, LabState::Starting, None)?;

        let topology = self.topology_json(&lab_id);
        let mut async_pending = false;
        for (agent, nodes) in &plan.assignments {
            match self.rpc.deploy(agent, &lab_id, &topology).await {
                Ok(DeployOutcome::Finished { stdout, stderr }) => {
                    self.store.update_job(&job.id, |j| {
                        if !stdout.is_empty() {
                            j.append_log(&stdout);
                        }
                        if !stderr.is_empty() {
                            j.append_log(&stderr);
                        }
                    })?;
                    let now = self.now_ms();
                    let observed: Vec<Change> = nodes
                        .iter()
                        .map(|n| Change::NodeObserved {
                            lab_id: lab_id.clone(),
                            node_id: n.id.clone(),
                            actual: ActualState::Starting,
                            epoch_ms: now,
                        })
                        .collect();
                    self.store.commit(observed)?;
                }
                Ok(DeployOutcome::AcceptedAsync) => {
                    async_pending = true;
                }
                Err(e) => {
                    self.release_deploy_locks(locks).await;
                    return self.fail_or_retry(job, e.into()).await;
                }
            }
        }

        if !async_pending {
            self.reconcile_lab(&lab_id).await?;
            self.process_link_changes(&lab_id).await;
            self.complete_job(&job.id).await?;
            let _ = self
                .bus
                .publish(CleanupEvent::DeployFinished {
                    lab_id: lab_id.clone(),
                    job_id: job.id.clone(),
                    success: true,
                })
                .await;
        }

        self.release_deploy_locks(locks).await;
        Ok(())
    }

    async fn run_destroy(&self, job: Job) -> Result<(), ControllerError> {
        let lab_id = job
            .lab_id
            .clone()
            .ok_or_else(|| ControllerError::InvalidRequest("destroy requires a lab".to_string()))?;

        let mut hosts: Vec<_> = self
            .store
            .read(|db| db.hosts_for_lab(&lab_id).into_iter().collect::<Vec<_>>());
        if let Some(default_agent) = self.require_lab(&lab_id)?.default_agent_id {
            if !hosts.contains(&default_agent) {
                hosts.push(default_agent);
            }
        }
        hosts.sort();

        let now = self.now_ms();
        if let Some(first) = hosts.first().cloned() {
            let updated = self.store.update_job(&job.id, |j| {
                j.mark_running(first, now);
                j.append_log(&format!("destroying lab {lab_id}"));
            })?;
            self.broadcaster
                .publish_job_progress(Some(&lab_id), (&updated).into());
        }
        self.set_lab_state(&lab_id, LabState::Stopping, None)?;

        // Idempotent and offline-tolerant: attempt every host, record
        // partial failures, never block completion.
        let mut partial: Vec<String> = Vec::new();
        for host in &hosts {
            let Some(agent) = self.agent(host) else {
                continue;
            };
            if !self.agent_online(&agent) {
                self.store.update_job(&job.id, |j| {
                    j.append_log(&format!("agent {host} offline, skipping destroy"));
                })?;
                partial.push(format!("{host} (offline)"));
                continue;
            }
            match self.rpc.destroy(&agent, &lab_id).await {
                Ok(_) => {}
                Err(e) => {
                    warn!(lab = %lab_id, agent = %host, error = %e, "destroy failed on host");
                    self.store.update_job(&job.id, |j| {
                        j.append_log(&format!("destroy failed on {host}: {e}"));
                    })?;
                    partial.push(host.to_string());
                }
            }
        }

        self.mark_lab_destroyed(&lab_id)?;

        if partial.is_empty() {
            self.set_lab_state(&lab_id, LabState::Stopped, None)?;
        } else {
            self.set_lab_state(
                &lab_id,
                LabState::Error,
                Some(format!("destroy partially failed: {}", partial.join(", "))),
            )?;
        }
        self.complete_job(&job.id).await?;
        let _ = self
            .bus
            .publish(CleanupEvent::DestroyFinished {
                lab_id: lab_id.clone(),
                job_id: job.id.clone(),
                success: partial.is_empty(),
            })
            .await;
        Ok(())
    }

    /// Clear runtime state after a destroy: nodes stopped, links down,
    /// tunnels and reservations gone.
    fn mark_lab_destroyed(&self, lab_id: &LabId) -> Result<(), ControllerError> {
        let now = self.now_ms();
        self.store.transact(|db, staged| {
            if let Some(states) = db.node_states.get(lab_id) {
                for ns in states.values() {
                    staged.push(Change::NodeDesired {
                        lab_id: lab_id.clone(),
                        node_id: ns.node_id.clone(),
                        desired: DesiredState::Stopped,
                    });
                    staged.push(Change::NodeObserved {
                        lab_id: lab_id.clone(),
                        node_id: ns.node_id.clone(),
                        actual: ActualState::Stopped,
                        epoch_ms: now,
                    });
                }
            }
            if let Some(links) = db.links.get(lab_id) {
                for link in links.values() {
                    let mut cleared = link.clone();
                    cleared.actual = arche_core::LinkActual::Down;
                    cleared.source_carrier = arche_core::CarrierState::Off;
                    cleared.target_carrier = arche_core::CarrierState::Off;
                    cleared.source_vxlan_attached = false;
                    cleared.target_vxlan_attached = false;
                    cleared.vni = None;
                    cleared.source_vlan_tag = None;
                    cleared.target_vlan_tag = None;
                    cleared.recompute_oper_state();
                    staged.push(Change::LinkUpdated { link: cleared });
                    staged.push(Change::ReservationReleased {
                        lab_id: lab_id.clone(),
                        link_name: link.name.clone(),
                    });
                }
            }
            for tunnel in db.tunnels.values().filter(|t| &t.lab_id == lab_id) {
                staged.push(Change::TunnelDeleted {
                    id: tunnel.id.clone(),
                });
            }
            Ok(())
        })?;
        Ok(())
    }

    async fn run_sync(&self, job: Job, scope: SyncScope) -> Result<(), ControllerError> {
        match scope {
            SyncScope::Lab => {
                let lab_id = job.lab_id.clone().ok_or_else(|| {
                    ControllerError::InvalidRequest("sync requires a lab".to_string())
                })?;
                self.reconcile_lab(&lab_id).await?;
                self.complete_job(&job.id).await?;
            }
            SyncScope::Node(node_id) => {
                let lab_id = job.lab_id.clone().ok_or_else(|| {
                    ControllerError::InvalidRequest("node sync requires a lab".to_string())
                })?;
                self.dispatch_node_enforcement(&lab_id, &node_id, job.clone())
                    .await?;
            }
            SyncScope::Agent(agent_id) => {
                let labs: Vec<LabId> = self.store.read(|db| {
                    db.placements
                        .iter()
                        .filter(|(_, placements)| placements.values().any(|a| a == &agent_id))
                        .map(|(lab, _)| lab.clone())
                        .collect()
                });
                for lab in labs {
                    self.reconcile_lab(&lab).await?;
                }
                self.complete_job(&job.id).await?;
            }
        }
        Ok(())
    }

    async fn run_links(&self, job: Job) -> Result<(), ControllerError> {
        let lab_id = job.lab_id.clone().ok_or_else(|| {
            ControllerError::InvalidRequest("link changes require a lab".to_string())
        })?;
        self.process_link_changes(&lab_id).await;
        self.complete_job(&job.id).await?;
        Ok(())
    }

    /// Transport failures retry as a new job chained via supersedes;
    /// application failures fail the job and put the lab in error.
    pub(crate) async fn fail_or_retry(
        &self,
        job: Job,
        error: ControllerError,
    ) -> Result<(), ControllerError> {
        let now = self.now_ms();
        if error.is_retriable() && job.retry_count < self.config.job_retry_max {
            let retry_id = JobId::new(format!("{}-r{}", job.id, job.retry_count + 1));
            info!(job = %job.id, retry = %retry_id, "transport failure, scheduling retry");
            let failed = self.store.update_job(&job.id, |j| {
                j.append_log(&format!("transport failure: {error}"));
                j.append_log(&format!("superseded by {retry_id}"));
                j.mark_failed(now);
            })?;
            self.broadcaster
                .publish_job_progress(failed.lab_id.as_ref(), (&failed).into());

            let mut retry = Job::new(retry_id, job.lab_id.clone(), &job.user, job.action, now);
            retry.retry_count = job.retry_count + 1;
            retry.supersedes = Some(job.id.clone());
            self.store.commit([Change::JobCreated { job: retry.clone() }])?;
            self.broadcaster
                .publish_job_progress(retry.lab_id.as_ref(), (&retry).into());
            return Err(error);
        }

        self.fail_job(&job.id, &error.to_string()).await?;
        Err(error)
    }

    /// Mark a job failed, classify the failure into the lab state, and
    /// publish the terminal events.
    pub(crate) async fn fail_job(
        &self,
        job_id: &JobId,
        message: &str,
    ) -> Result<(), ControllerError> {
        let now = self.now_ms();
        let job = self.store.update_job(job_id, |j| {
            j.append_log(message);
            j.mark_failed(now);
        })?;
        self.broadcaster
            .publish_job_progress(job.lab_id.as_ref(), (&job).into());
        if let Some(lab_id) = &job.lab_id {
            // Only deploys/destroys put the lab in error; everything else
            // leaves truth to reconciliation.
            if matches!(job.action, JobAction::Up | JobAction::Down) {
                let summary = extract_error_summary(&job.log)
                    .unwrap_or_else(|| message.to_string());
                self.set_lab_state(lab_id, LabState::Error, Some(summary))?;
                let _ = self
                    .bus
                    .publish(CleanupEvent::DeployFinished {
                        lab_id: lab_id.clone(),
                        job_id: job_id.clone(),
                        success: false,
                    })
                    .await;
            }
        }
        let _ = self
            .bus
            .publish(CleanupEvent::JobFailed {
                job_id: job_id.clone(),
                lab_id: job.lab_id.clone(),
            })
            .await;
        Ok(())
    }

    pub(crate) async fn complete_job(&self, job_id: &JobId) -> Result<(), ControllerError> {
        let now = self.now_ms();
        let job = self.store.update_job(job_id, |j| {
            j.mark_terminal(JobStatus::Completed, now);
        })?;
        self.broadcaster
            .publish_job_progress(job.lab_id.as_ref(), (&job).into());
        let _ = self
            .bus
            .publish(CleanupEvent::JobCompleted {
                job_id: job_id.clone(),
                lab_id: job.lab_id.clone(),
            })
            .await;
        Ok(())
    }

    /// Restart a lab: a destroy followed by a deploy, as two pipeline
    /// jobs chained through parent_id.
    pub async fn restart_lab(
        &self,
        lab_id: &LabId,
        user: &str,
    ) -> Result<(Job, Job), ControllerError> {
        let down = self.submit_job(Some(lab_id.clone()), user, JobAction::Down)?;
        self.run_job(&down.id).await?;

        let up = self.submit_job(Some(lab_id.clone()), user, JobAction::Up)?;
        let up = self.store.update_job(&up.id, |j| {
            j.parent_id = Some(down.id.clone());
        })?;
        self.run_job(&up.id).await?;
        Ok((down, self.require_job(&up.id)?))
    }

    /// Best-effort cancel: in-flight agent work is not forcibly killed;
    /// the lab goes to unknown so reconciliation determines truth.
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<(), ControllerError> {
        let job = self.require_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(());
        }
        let now = self.now_ms();
        let job = self.store.update_job(job_id, |j| {
            j.append_log("--- cancelled by user ---");
            j.mark_terminal(JobStatus::Cancelled, now);
        })?;
        self.broadcaster
            .publish_job_progress(job.lab_id.as_ref(), (&job).into());
        if let Some(lab_id) = &job.lab_id {
            self.set_lab_state(lab_id, LabState::Unknown, None)?;
        }
        Ok(())
    }

    /// Commit a lab state change and broadcast it.
    pub(crate) fn set_lab_state(
        &self,
        lab_id: &LabId,
        state: LabState,
        error: Option<String>,
    ) -> Result<(), ControllerError> {
        self.store.commit([Change::LabStateChanged {
            lab_id: lab_id.clone(),
            state,
            epoch_ms: self.now_ms(),
            error,
        }])?;
        if let Some(lab) = self.store.read(|db| db.labs.get(lab_id).cloned()) {
            self.broadcaster.publish_lab_state((&lab).into());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
