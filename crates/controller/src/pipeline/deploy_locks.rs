// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node deploy locks with a TTL.
//!
//! Keys are `deploy_lock:<lab>:<node>` in the shared bus. Contention
//! reports the exact nodes so callers can present a precise error; a
//! failing lock store fails open; periodic enforcement is the safety
//! net.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::{Clock, JobId, LabId};
use tracing::warn;

fn lock_key(lab: &LabId, node: &str) -> String {
    format!("deploy_lock:{lab}:{node}")
}

/// Keys acquired for one deploy; released explicitly after the work.
#[must_use]
pub(crate) struct DeployLockSet {
    keys: Vec<String>,
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Acquire the deploy lock for every node, or none.
    ///
    /// On contention the already-acquired keys are released and the
    /// conflicting node names are reported. On lock-store errors the
    /// affected node proceeds without a lock (fail open).
    pub(crate) async fn acquire_deploy_locks(
        &self,
        lab: &LabId,
        nodes: &[String],
        owner: &JobId,
    ) -> Result<DeployLockSet, ControllerError> {
        let ttl = self.config.deploy_lock_ttl;
        let mut acquired = Vec::new();
        let mut contended = Vec::new();

        for node in nodes {
            let key = lock_key(lab, node);
            match self.bus.set_nx(&key, owner.as_str(), ttl).await {
                Ok(true) => acquired.push(key),
                Ok(false) => contended.push(node.clone()),
                Err(e) => {
                    warn!(lab = %lab, node = %node, error = %e, "deploy lock store failed, proceeding without lock");
                }
            }
        }

        if !contended.is_empty() {
            // Avoid deadlock across partially-overlapping deploys
            for key in acquired {
                let _ = self.bus.delete(&key).await;
            }
            return Err(ControllerError::DeployLocked { nodes: contended });
        }

        Ok(DeployLockSet { keys: acquired })
    }

    /// Best-effort unlock; TTL expiry is the backstop.
    pub(crate) async fn release_deploy_locks(&self, locks: DeployLockSet) {
        for key in locks.keys {
            let _ = self.bus.delete(&key).await;
        }
    }
}

#[cfg(test)]
#[path = "deploy_locks_tests.rs"]
mod tests;
