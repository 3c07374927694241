// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller context shared by every loop and handler.

use crate::broadcast::StateBroadcaster;
use crate::env::Config;
use crate::error::ControllerError;
use crate::reconcile::FlapDetector;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::{Clock, Job, JobId, Lab, LabId, LinkState, NodeState};
use arche_storage::Store;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::cleanup::breaker::CircuitBreaker;

/// Controller context. Background loops share one instance behind an
/// `Arc`; all mutable state lives in the store, the bus, or the
/// lifecycle-scoped in-process structures below.
pub struct Controller<A, B, C: Clock> {
    pub(crate) store: Store,
    pub(crate) rpc: A,
    pub(crate) bus: B,
    pub(crate) clock: C,
    pub(crate) config: Config,
    pub(crate) broadcaster: StateBroadcaster,
    pub(crate) flaps: FlapDetector,
    pub(crate) cleanup_breaker: CircuitBreaker,
    /// Set by a successful cleanup handler so periodic monitors can run
    /// an extra pass.
    pub(crate) cleanup_dirty: Arc<AtomicBool>,
    job_seq: Arc<AtomicU64>,
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    pub fn new(store: Store, rpc: A, bus: B, clock: C, config: Config) -> Self {
        let cleanup_breaker = CircuitBreaker::new(3, std::time::Duration::from_secs(60));
        Self {
            store,
            rpc,
            bus,
            clock,
            config,
            broadcaster: StateBroadcaster::new(),
            flaps: FlapDetector::new(),
            cleanup_breaker,
            cleanup_dirty: Arc::new(AtomicBool::new(false)),
            job_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Next process-unique job id.
    pub(crate) fn next_job_id(&self) -> JobId {
        let seq = self.job_seq.fetch_add(1, Ordering::Relaxed);
        JobId::new(format!("job-{}-{seq}", self.clock.epoch_ms()))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn broadcaster(&self) -> &StateBroadcaster {
        &self.broadcaster
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    pub(crate) fn require_lab(&self, lab_id: &LabId) -> Result<Lab, ControllerError> {
        self.store
            .read(|db| db.labs.get(lab_id).cloned())
            .ok_or_else(|| ControllerError::Store(arche_storage::StoreError::NotFound {
                entity: "lab",
                key: lab_id.to_string(),
            }))
    }

    pub(crate) fn require_job(&self, job_id: &JobId) -> Result<Job, ControllerError> {
        self.store
            .read(|db| db.jobs.get(job_id).cloned())
            .ok_or_else(|| ControllerError::Store(arche_storage::StoreError::NotFound {
                entity: "job",
                key: job_id.to_string(),
            }))
    }

    pub(crate) fn require_link(
        &self,
        lab_id: &LabId,
        name: &str,
    ) -> Result<LinkState, ControllerError> {
        self.store
            .read(|db| db.link(lab_id, name).cloned())
            .ok_or_else(|| ControllerError::Store(arche_storage::StoreError::NotFound {
                entity: "link",
                key: format!("{lab_id}:{name}"),
            }))
    }

    /// Node states for a lab, cloned out of the store.
    pub(crate) fn node_states_for(&self, lab_id: &LabId) -> Vec<NodeState> {
        self.store.read(|db| {
            db.node_states
                .get(lab_id)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        })
    }
}
