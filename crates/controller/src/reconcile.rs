// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observed-state ingestion from agents.
//!
//! Reconciliation imports what agents report into NodeState/LinkState,
//! aggregates lab state, and flags rapid oscillations. Orphan containers
//! (reported but unknown here) are logged, never destroyed.

use crate::controller::Controller;
use crate::error::ControllerError;
use crate::registry::OnlineCache;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::node::ActualState;
use arche_core::{aggregate_lab_state, Clock, LabId, LabState, NodeId};
use arche_storage::Change;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Window and threshold for flap tagging.
const FLAP_WINDOW: Duration = Duration::from_secs(60);
const FLAP_THRESHOLD: usize = 4;

/// Counts rapid state oscillations per node. Flaps never suppress
/// reconciliation; they inform operators.
#[derive(Clone, Default)]
pub struct FlapDetector {
    transitions: Arc<Mutex<HashMap<(LabId, NodeId), VecDeque<u64>>>>,
}

impl FlapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition; returns true when the node is flapping.
    pub fn record(&self, lab: &LabId, node: &NodeId, now_ms: u64) -> bool {
        let mut transitions = self.transitions.lock();
        let window = transitions
            .entry((lab.clone(), node.clone()))
            .or_default();
        window.push_back(now_ms);
        let cutoff = now_ms.saturating_sub(FLAP_WINDOW.as_millis() as u64);
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
        window.len() >= FLAP_THRESHOLD
    }

    pub fn transition_count(&self, lab: &LabId, node: &NodeId) -> usize {
        self.transitions
            .lock()
            .get(&(lab.clone(), node.clone()))
            .map(|w| w.len())
            .unwrap_or(0)
    }
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// One reconciliation pass over every lab.
    pub async fn reconcile_pass(&self) -> Result<(), ControllerError> {
        let labs: Vec<LabId> = self.store.read(|db| db.labs.keys().cloned().collect());
        for lab_id in labs {
            if let Err(e) = self.reconcile_lab(&lab_id).await {
                warn!(lab = %lab_id, error = %e, "reconciliation failed for lab");
            }
        }
        Ok(())
    }

    /// Import observed state for one lab and aggregate its state.
    pub async fn reconcile_lab(&self, lab_id: &LabId) -> Result<LabState, ControllerError> {
        let hosts = self.store.read(|db| db.hosts_for_lab(lab_id));
        let stale_ms = self.config.agent_stale_timeout.as_millis() as u64;
        let mut online_cache = OnlineCache::new();

        for host in hosts {
            let Some(agent) = self.agent(&host) else {
                continue;
            };
            if !online_cache.online(&agent, self.now_ms(), stale_ms) {
                debug!(lab = %lab_id, agent = %host, "agent offline, skipping status pull");
                continue;
            }

            let reports = match self.rpc.get_lab_status(&agent, lab_id).await {
                Ok(reports) => reports,
                Err(e) => {
                    warn!(lab = %lab_id, agent = %host, error = %e, "lab status pull failed");
                    continue;
                }
            };

            for report in reports {
                let Some(node) = self.store.read(|db| {
                    db.node_by_name(lab_id, &report.node_name)
                        .or_else(|| {
                            // Agents may report container names instead
                            // of display names.
                            db.nodes.get(lab_id).and_then(|m| {
                                m.values().find(|n| n.container_name == report.node_name)
                            })
                        })
                        .cloned()
                }) else {
                    // Orphan: observed on the agent but unknown here.
                    // Conservatism by contract: log, never destroy.
                    warn!(
                        lab = %lab_id,
                        agent = %host,
                        container = %report.node_name,
                        "orphan container observed, leaving untouched"
                    );
                    continue;
                };

                let actual = ActualState::from_report(&report.status);
                let previous = self
                    .store
                    .read(|db| db.node_state(lab_id, &node.id).map(|ns| ns.actual));
                if previous != Some(actual) {
                    let now = self.now_ms();
                    self.store.commit([Change::NodeObserved {
                        lab_id: lab_id.clone(),
                        node_id: node.id.clone(),
                        actual,
                        epoch_ms: now,
                    }])?;
                    if self.flaps.record(lab_id, &node.id, now) {
                        warn!(lab = %lab_id, node = %node.name, "node state is flapping");
                    }
                    self.publish_node_state(lab_id, &node.id);

                    // Nodes that just reached running may unblock pending
                    // links.
                    if actual == ActualState::Running {
                        self.connect_pending_links_for_node(lab_id, &node.name).await;
                    }
                }

                // Readiness is kind-aware and only meaningful while
                // running.
                if actual == ActualState::Running {
                    let is_ready = match self
                        .rpc
                        .check_node_readiness(&agent, lab_id, &node.name, &node.kind)
                        .await
                    {
                        Ok(probe) => probe.is_ready,
                        Err(e) => {
                            debug!(lab = %lab_id, node = %node.name, error = %e, "readiness probe failed");
                            false
                        }
                    };
                    let current = self
                        .store
                        .read(|db| db.node_state(lab_id, &node.id).map(|ns| ns.is_ready));
                    if current != Some(is_ready) {
                        self.store.commit([Change::NodeReady {
                            lab_id: lab_id.clone(),
                            node_id: node.id.clone(),
                            is_ready,
                        }])?;
                        self.publish_node_state(lab_id, &node.id);
                    }
                }
            }
        }

        let state = self.aggregate_and_publish_lab(lab_id)?;
        Ok(state)
    }

    /// Ask every online agent which labs it still carries.
    ///
    /// Used after a controller restart to find labs whose placements
    /// were lost. Labs unknown to the database are logged as orphans
    /// and left alone; destruction is an explicit administrative call.
    pub async fn discover_pass(&self) -> Result<(), ControllerError> {
        let agents: Vec<_> = self.store.read(|db| db.agents.values().cloned().collect());
        for agent in agents.iter().filter(|a| self.agent_online(a)) {
            let discovered = match self.rpc.discover_labs(agent).await {
                Ok(discovered) => discovered,
                Err(e) => {
                    debug!(agent = %agent.id, error = %e, "lab discovery failed");
                    continue;
                }
            };
            for found in discovered {
                let known = self.store.read(|db| db.labs.contains_key(&found.lab_id));
                if !known {
                    warn!(
                        agent = %agent.id,
                        lab = %found.lab_id,
                        nodes = found.nodes.len(),
                        "agent carries a lab unknown to the database, leaving untouched"
                    );
                    continue;
                }
                // Re-learn placements the restart lost
                for node_name in &found.nodes {
                    let missing = self.store.read(|db| {
                        db.node_by_name(&found.lab_id, node_name).is_some()
                            && db
                                .placements
                                .get(&found.lab_id)
                                .map(|p| !p.contains_key(node_name))
                                .unwrap_or(true)
                    });
                    if missing {
                        self.store.commit([Change::PlacementSet {
                            lab_id: found.lab_id.clone(),
                            node_name: node_name.clone(),
                            agent_id: agent.id.clone(),
                        }])?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Aggregate lab state from node actuals; keep a deploy error
    /// sticky until something actually runs again.
    pub(crate) fn aggregate_and_publish_lab(
        &self,
        lab_id: &LabId,
    ) -> Result<LabState, ControllerError> {
        let (current, error_message, actuals) = self.store.read(|db| {
            let lab = db.labs.get(lab_id);
            let actuals: Vec<ActualState> = db
                .node_states
                .get(lab_id)
                .map(|m| m.values().map(|ns| ns.actual).collect())
                .unwrap_or_default();
            (
                lab.map(|l| l.state),
                lab.and_then(|l| l.error_message.clone()),
                actuals,
            )
        });
        let Some(current) = current else {
            return Err(ControllerError::Store(arche_storage::StoreError::NotFound {
                entity: "lab",
                key: lab_id.to_string(),
            }));
        };

        let mut aggregated = aggregate_lab_state(&actuals);
        // A failed deploy keeps the lab in error until nodes actually
        // run; mixed stop states do not clear it.
        if current == LabState::Error
            && aggregated != LabState::Running
            && error_message.is_some()
        {
            aggregated = LabState::Error;
        }

        if aggregated != current {
            info!(lab = %lab_id, from = %current, to = %aggregated, "lab state aggregated");
            self.set_lab_state(lab_id, aggregated, None)?;
        }
        Ok(aggregated)
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
