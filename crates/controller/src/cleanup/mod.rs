// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-driven cleanup substrate.
//!
//! One consumer subscribes to the cleanup channel, buffers raw events in
//! a bounded queue, and drains them sequentially into targeted handlers.
//! Backpressure drops events with a warning; the periodic sweeps are
//! the safety net. Each handler type sits behind a circuit breaker.

pub mod breaker;
mod sweeps;

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::{CleanupEvent, Clock};
use arche_storage::Change;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Bounded queue between the subscriber and the processor.
pub(crate) const QUEUE_CAPACITY: usize = 100;
pub(crate) const QUEUE_WARN_DEPTH: usize = 50;

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Run the cleanup consumer until shutdown.
    pub async fn run_cleanup_consumer(&self, mut shutdown: watch::Receiver<bool>) {
        let mut channel = self.bus.subscribe();
        let (queue_tx, mut queue_rx) = mpsc::channel::<CleanupEvent>(QUEUE_CAPACITY);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cleanup consumer shutting down");
                        return;
                    }
                }
                event = channel.recv() => {
                    match event {
                        Ok(event) => {
                            let depth = QUEUE_CAPACITY - queue_tx.capacity();
                            if depth >= QUEUE_WARN_DEPTH {
                                warn!(depth, "cleanup queue depth above warn threshold");
                            }
                            if let Err(mpsc::error::TrySendError::Full(event)) =
                                queue_tx.try_send(event)
                            {
                                warn!(
                                    kind = event.kind(),
                                    "cleanup queue full, dropping event; sweeps are the safety net"
                                );
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "cleanup channel lagged, events lost");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            return;
                        }
                    }
                }
                Some(event) = queue_rx.recv() => {
                    self.dispatch_cleanup(event).await;
                }
            }
        }
    }

    /// Dispatch one event: breaker check, one retry on failure, then the
    /// breaker counter.
    pub(crate) async fn dispatch_cleanup(&self, event: CleanupEvent) {
        let kind = event.kind();
        let now = self.clock.now();
        if self.cleanup_breaker.is_open(kind, now) {
            debug!(handler = kind, "cleanup handler circuit open, skipping");
            return;
        }

        let mut result = self.handle_cleanup_event(&event).await;
        if result.is_err() {
            // One retry after a brief backoff before the breaker counts it
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            result = self.handle_cleanup_event(&event).await;
        }

        match result {
            Ok(()) => {
                self.cleanup_breaker.record_success(kind);
                self.cleanup_dirty.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(handler = kind, error = %e, "cleanup handler failed");
                self.cleanup_breaker.record_failure(kind, self.clock.now());
            }
        }
    }

    /// Whether a cleanup handler ran successfully since the flag was
    /// last cleared.
    pub fn take_cleanup_dirty(&self) -> bool {
        self.cleanup_dirty.swap(false, Ordering::SeqCst)
    }

    async fn handle_cleanup_event(&self, event: &CleanupEvent) -> Result<(), ControllerError> {
        match event {
            CleanupEvent::LabDeleted { lab_id } => {
                // The cascade removed the rows; agents still hold
                // workspaces and possibly VTEPs.
                let agents = self.store.read(|db| {
                    db.agents.values().cloned().collect::<Vec<_>>()
                });
                for agent in agents.iter().filter(|a| self.agent_online(a)) {
                    if let Err(e) = self.rpc.cleanup_workspace(agent, lab_id).await {
                        debug!(agent = %agent.id, error = %e, "workspace cleanup failed");
                    }
                }
                self.overlay_convergence_pass().await?;
                Ok(())
            }

            CleanupEvent::NodeRemoved { lab_id, node_name } => {
                self.store.commit([Change::PlacementRemoved {
                    lab_id: lab_id.clone(),
                    node_name: node_name.clone(),
                }])?;
                Ok(())
            }

            CleanupEvent::NodePlacementChanged {
                lab_id, old_host, ..
            } => {
                if let Some(old_host) = old_host {
                    if let Some(agent) = self.agent(old_host) {
                        if self.agent_online(&agent) {
                            let _ = self.rpc.cleanup_workspace(&agent, lab_id).await;
                        }
                    }
                }
                Ok(())
            }

            CleanupEvent::LinkRemoved { .. } => {
                self.sweep_orphan_tunnels()?;
                self.overlay_convergence_pass().await?;
                Ok(())
            }

            CleanupEvent::AgentOffline { agent_id } => {
                // Image presence on an offline host can no longer be
                // trusted.
                self.store.commit([Change::ImageHostInvalidated {
                    agent_id: agent_id.clone(),
                }])?;
                Ok(())
            }

            CleanupEvent::DeployFinished { lab_id, .. }
            | CleanupEvent::DestroyFinished { lab_id, .. }
            | CleanupEvent::StateCheckRequested { lab_id } => {
                self.reconcile_lab(lab_id).await?;
                Ok(())
            }

            CleanupEvent::JobCompleted { .. } | CleanupEvent::JobFailed { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
