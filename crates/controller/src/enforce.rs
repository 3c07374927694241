// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Desired→actual drift correction with cooldowns and a per-node
//! circuit breaker.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::node::{admit, ActualState, Admission, DesiredState, NodeCommand};
use arche_core::{Clock, Job, JobAction, JobId, LabId, NodeId, NodeState, SyncScope};
use arche_storage::{node_state_key, Change};
use tracing::{debug, info, warn};

use crate::pipeline::select::provider_for_kind;

fn cooldown_key(lab: &LabId, node: &NodeId) -> String {
    format!("enforce_cooldown:{lab}:{node}")
}

/// Outcome counters for one enforcement pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnforcementSummary {
    /// Node actions successfully handed to an agent.
    pub dispatched: usize,
    pub skipped: usize,
    /// Dispatch attempts that errored (counted toward the node's
    /// enforcement attempts, retried after the cooldown).
    pub failed: usize,
    pub exhausted: usize,
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Change a node's desired state through command admission.
    ///
    /// Returns the dispatched job when drift correction was kicked off
    /// immediately, `None` for no-ops. A desired change resets the
    /// enforcement counters and clears the cooldown key so the loop can
    /// act at once.
    pub async fn set_node_desired(
        &self,
        lab_id: &LabId,
        node_id: &NodeId,
        desired: DesiredState,
        user: &str,
    ) -> Result<Option<Job>, ControllerError> {
        // Serialize against enforcement and reconciliation on this row;
        // one retry, then report the contention.
        let key = node_state_key(lab_id, node_id);
        let _guard = match self.store.locks().try_lock(key.as_str()) {
            Some(guard) => guard,
            None => {
                tokio::task::yield_now().await;
                self.store
                    .locks()
                    .try_lock(key.as_str())
                    .ok_or_else(|| ControllerError::RowLocked(key.clone()))?
            }
        };

        let ns = self
            .store
            .read(|db| db.node_state(lab_id, node_id).cloned())
            .ok_or_else(|| ControllerError::Store(arche_storage::StoreError::NotFound {
                entity: "node_state",
                key: format!("{lab_id}:{node_id}"),
            }))?;

        let command = match desired {
            DesiredState::Running => NodeCommand::Start,
            DesiredState::Stopped => NodeCommand::Stop,
        };
        match admit(command, ns.actual) {
            Admission::Conflict(reason) => {
                return Err(ControllerError::TransitionalState(reason));
            }
            Admission::Noop => {
                // Still record intent; no job is created.
                self.store.commit([Change::NodeDesired {
                    lab_id: lab_id.clone(),
                    node_id: node_id.clone(),
                    desired,
                }])?;
                let _ = self.bus.delete(&cooldown_key(lab_id, node_id)).await;
                self.publish_node_state(lab_id, node_id);
                return Ok(None);
            }
            Admission::Dispatch => {}
        }

        self.store.commit([Change::NodeDesired {
            lab_id: lab_id.clone(),
            node_id: node_id.clone(),
            desired,
        }])?;
        let _ = self.bus.delete(&cooldown_key(lab_id, node_id)).await;
        self.publish_node_state(lab_id, node_id);

        let job = self.submit_job(
            Some(lab_id.clone()),
            user,
            JobAction::Sync(SyncScope::Node(node_id.clone())),
        )?;
        Ok(Some(job))
    }

    /// One enforcement pass over every node state with drift.
    pub async fn enforcement_pass(&self) -> Result<EnforcementSummary, ControllerError> {
        let mut summary = EnforcementSummary::default();
        let labs: Vec<LabId> = self.store.read(|db| db.labs.keys().cloned().collect());

        for lab_id in labs {
            // Skip the lab while a conflicting job is active: enforcement
            // acts like a sync.
            let conflict = self.store.read(|db| {
                db.active_conflicting_job(&lab_id, &JobAction::Sync(SyncScope::Lab))
                    .map(|j| j.id.clone())
            });
            if let Some(job_id) = conflict {
                debug!(lab = %lab_id, job = %job_id, "enforcement skipped: conflicting job");
                summary.skipped += 1;
                continue;
            }

            for ns in self.node_states_for(&lab_id) {
                match self.enforce_node(&lab_id, &ns).await {
                    EnforceOutcome::Dispatched => summary.dispatched += 1,
                    EnforceOutcome::Skipped => summary.skipped += 1,
                    EnforceOutcome::Failed => summary.failed += 1,
                    EnforceOutcome::Exhausted => summary.exhausted += 1,
                    EnforceOutcome::InSync => {}
                }
            }
        }
        Ok(summary)
    }

    async fn enforce_node(&self, lab_id: &LabId, ns: &NodeState) -> EnforceOutcome {
        if !ns.has_drift() || ns.actual.is_transitional() {
            return EnforceOutcome::InSync;
        }
        // Circuit open until a user changes desired state.
        if ns.enforcement_failed_at_ms.is_some() {
            return EnforceOutcome::Skipped;
        }
        if ns.desired == DesiredState::Running && !self.config.enforcement_auto_restart {
            return EnforceOutcome::Skipped;
        }

        // Cooldown lives in the bus so multiple workers converge on the
        // same decision. set_nx doubles as check-and-claim.
        match self
            .bus
            .set_nx(
                &cooldown_key(lab_id, &ns.node_id),
                "cooldown",
                self.config.enforcement_cooldown,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => return EnforceOutcome::Skipped,
            Err(e) => {
                warn!(lab = %lab_id, node = %ns.node_id, error = %e, "cooldown store failed, proceeding");
            }
        }

        // Row held by another worker: skip this cycle.
        let Some(_guard) = self
            .store
            .locks()
            .try_lock(node_state_key(lab_id, &ns.node_id))
        else {
            return EnforceOutcome::Skipped;
        };

        if ns.enforcement_attempts >= self.config.enforcement_max_retries {
            warn!(
                lab = %lab_id,
                node = %ns.node_id,
                attempts = ns.enforcement_attempts,
                "enforcement retries exhausted, marking node error"
            );
            let _ = self.store.commit([Change::EnforcementFailed {
                lab_id: lab_id.clone(),
                node_id: ns.node_id.clone(),
                epoch_ms: self.now_ms(),
            }]);
            self.publish_node_state(lab_id, &ns.node_id);
            return EnforceOutcome::Exhausted;
        }

        let command = match ns.desired {
            DesiredState::Running => NodeCommand::Start,
            DesiredState::Stopped => NodeCommand::Stop,
        };
        if admit(command, ns.actual) != Admission::Dispatch {
            return EnforceOutcome::Skipped;
        }

        let now = self.now_ms();
        if self
            .store
            .commit([Change::EnforcementAttempted {
                lab_id: lab_id.clone(),
                node_id: ns.node_id.clone(),
                epoch_ms: now,
            }])
            .is_err()
        {
            return EnforceOutcome::Skipped;
        }

        let job_id = JobId::new(format!("job-enf-{}-{}", ns.node_id, now));
        let job = Job::new(
            job_id,
            Some(lab_id.clone()),
            "enforcement",
            JobAction::Sync(SyncScope::Node(ns.node_id.clone())),
            now,
        );
        if self
            .store
            .commit([Change::JobCreated { job: job.clone() }])
            .is_err()
        {
            return EnforceOutcome::Skipped;
        }

        match self.dispatch_node_enforcement(lab_id, &ns.node_id, job).await {
            Ok(()) => EnforceOutcome::Dispatched,
            Err(e) => {
                debug!(lab = %lab_id, node = %ns.node_id, error = %e, "enforcement dispatch failed");
                EnforceOutcome::Failed
            }
        }
    }

    /// Issue the node action for one drifted node, running the job to a
    /// terminal state. Shared by the enforcement loop and `sync:node`
    /// jobs.
    pub(crate) async fn dispatch_node_enforcement(
        &self,
        lab_id: &LabId,
        node_id: &NodeId,
        job: Job,
    ) -> Result<(), ControllerError> {
        let (node, ns) = self
            .store
            .read(|db| {
                let node = db.node(lab_id, node_id).cloned()?;
                let ns = db.node_state(lab_id, node_id).cloned()?;
                Some((node, ns))
            })
            .ok_or_else(|| ControllerError::Store(arche_storage::StoreError::NotFound {
                entity: "node",
                key: format!("{lab_id}:{node_id}"),
            }))?;

        let command = match ns.desired {
            DesiredState::Running => NodeCommand::Start,
            DesiredState::Stopped => NodeCommand::Stop,
        };
        if admit(command, ns.actual) != Admission::Dispatch {
            self.complete_job(&job.id).await?;
            return Ok(());
        }

        let provider = provider_for_kind(&node.kind);
        let agent = node
            .host_pin
            .as_ref()
            .and_then(|pin| self.pick_agent_by_id(pin, provider))
            .or_else(|| self.pick_agent_for_lab(lab_id, provider))
            .ok_or_else(|| ControllerError::NoAgent(format!("for node {}", node.name)))?;

        let now = self.now_ms();
        let running = self.store.update_job(&job.id, |j| {
            j.mark_running(agent.id.clone(), now);
            j.append_log(&format!("{command} {} on {}", node.name, agent.id));
        })?;
        self.broadcaster
            .publish_job_progress(Some(lab_id), (&running).into());

        match self
            .rpc
            .node_action(&agent, &job.id, lab_id, &node.name, command)
            .await
        {
            Ok(_) => {
                let transitional = match command {
                    NodeCommand::Start => ActualState::Starting,
                    NodeCommand::Stop => ActualState::Stopping,
                    NodeCommand::Reload => ActualState::Starting,
                };
                self.store.commit([Change::NodeObserved {
                    lab_id: lab_id.clone(),
                    node_id: node_id.clone(),
                    actual: transitional,
                    epoch_ms: self.now_ms(),
                }])?;
                self.publish_node_state(lab_id, node_id);
                self.complete_job(&job.id).await?;
                info!(lab = %lab_id, node = %node.name, %command, "node action dispatched");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.store.commit([Change::NodeErrored {
                    lab_id: lab_id.clone(),
                    node_id: node_id.clone(),
                    message: message.clone(),
                }])?;
                self.publish_node_state(lab_id, node_id);
                self.fail_or_retry(self.require_job(&job.id)?, e.into()).await
            }
        }
    }

    /// Broadcast the current state of one node.
    pub(crate) fn publish_node_state(&self, lab_id: &LabId, node_id: &NodeId) {
        if let Some(ns) = self.store.read(|db| db.node_state(lab_id, node_id).cloned()) {
            self.broadcaster.publish_node_state((&ns).into());
        }
    }
}

enum EnforceOutcome {
    InSync,
    Dispatched,
    Skipped,
    Failed,
    Exhausted,
}

#[cfg(test)]
#[path = "enforce_tests.rs"]
mod tests;
