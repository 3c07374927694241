// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declare-state overlay convergence.
//!
//! Periodically make each agent's VTEP set exactly equal to the set the
//! controller intends. Agents without declare-state fall back to the
//! older whitelist call.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, AgentApiError, OverlayDeclaration, OverlayEntryStatus, SharedBus};
use arche_core::{AgentId, Clock, LinkActual, LinkDesired, LinkSide, TunnelStatus};
use arche_storage::Change;
use std::collections::HashMap;
use tracing::{debug, info, warn};

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// One convergence cycle over every online agent with declared
    /// entries. Agents with an empty declared set are not called.
    pub async fn overlay_convergence_pass(&self) -> Result<(), ControllerError> {
        let declared = self.declared_overlay_sets();

        for (agent_id, entries) in declared {
            let Some(agent) = self.agent(&agent_id) else {
                continue;
            };
            if !self.agent_online(&agent) {
                debug!(agent = %agent_id, "skipping overlay convergence: offline");
                continue;
            }

            match self.rpc.declare_overlay_state(&agent, &entries).await {
                Ok(report) => {
                    if !report.orphans_removed.is_empty() {
                        info!(
                            agent = %agent_id,
                            orphans = report.orphans_removed.len(),
                            "agent removed orphan VTEP ports"
                        );
                    }
                    for entry in report.results {
                        if matches!(
                            entry.status,
                            OverlayEntryStatus::Converged | OverlayEntryStatus::Created
                        ) {
                            self.mark_side_attached(&agent_id, &entry.link_id)?;
                        } else {
                            warn!(
                                agent = %agent_id,
                                link = %entry.link_id,
                                error = ?entry.error,
                                "overlay entry failed to converge"
                            );
                        }
                    }
                }
                Err(AgentApiError::Unsupported(_)) => {
                    // Older agent: whitelist the expected port names and
                    // let it remove the rest.
                    let ports: Vec<String> =
                        entries.iter().map(|e| e.port_name.clone()).collect();
                    if let Err(e) = self
                        .rpc
                        .reconcile_vxlan_ports(&agent, &ports, false)
                        .await
                    {
                        warn!(agent = %agent_id, error = %e, "vxlan whitelist fallback failed");
                    }
                }
                Err(e) => {
                    warn!(agent = %agent_id, error = %e, "overlay convergence call failed");
                }
            }
        }
        Ok(())
    }

    /// The per-agent declared sets, from active tunnels whose link is
    /// desired-up. In-progress links are included as a protective
    /// measure so the agent does not treat them as orphans.
    pub(crate) fn declared_overlay_sets(&self) -> HashMap<AgentId, Vec<OverlayDeclaration>> {
        self.store.read(|db| {
            let mut sets: HashMap<AgentId, Vec<OverlayDeclaration>> = HashMap::new();
            for tunnel in db.tunnels.values() {
                if tunnel.status != TunnelStatus::Active {
                    continue;
                }
                let Some(link) = db.link(&tunnel.lab_id, &tunnel.link_name) else {
                    continue;
                };
                let in_progress =
                    matches!(link.actual, LinkActual::Connecting | LinkActual::Creating);
                if link.desired != LinkDesired::Up && !in_progress {
                    continue;
                }
                // Split so each side sees itself as local
                sets.entry(tunnel.agent_a.clone())
                    .or_default()
                    .push(OverlayDeclaration {
                        link_id: tunnel.link_name.clone(),
                        lab_id: tunnel.lab_id.clone(),
                        port_name: tunnel.port_name.clone(),
                        vni: tunnel.vni,
                        local_ip: tunnel.ip_a.clone(),
                        remote_ip: tunnel.ip_b.clone(),
                        expected_vlan: link.source_vlan_tag,
                    });
                sets.entry(tunnel.agent_b.clone())
                    .or_default()
                    .push(OverlayDeclaration {
                        link_id: tunnel.link_name.clone(),
                        lab_id: tunnel.lab_id.clone(),
                        port_name: tunnel.port_name.clone(),
                        vni: tunnel.vni,
                        local_ip: tunnel.ip_b.clone(),
                        remote_ip: tunnel.ip_a.clone(),
                        expected_vlan: link.target_vlan_tag,
                    });
            }
            sets
        })
    }

    /// Record that one side of a link has a converged VTEP.
    fn mark_side_attached(
        &self,
        agent_id: &AgentId,
        link_name: &str,
    ) -> Result<(), ControllerError> {
        let located = self.store.read(|db| {
            db.tunnels
                .values()
                .find(|t| {
                    t.link_name == link_name
                        && (&t.agent_a == agent_id || &t.agent_b == agent_id)
                })
                .map(|t| {
                    let side = if &t.agent_a == agent_id {
                        LinkSide::Source
                    } else {
                        LinkSide::Target
                    };
                    (t.lab_id.clone(), side)
                })
        });
        let Some((lab_id, side)) = located else {
            return Ok(());
        };

        let already = self.store.read(|db| {
            db.link(&lab_id, link_name).map(|l| match side {
                LinkSide::Source => l.source_vxlan_attached,
                LinkSide::Target => l.target_vxlan_attached,
            })
        });
        if already == Some(true) {
            return Ok(());
        }

        let updated = self.store.update_link(&lab_id, link_name, |l| {
            match side {
                LinkSide::Source => l.source_vxlan_attached = true,
                LinkSide::Target => l.target_vxlan_attached = true,
            }
            l.recompute_oper_state();
        })?;
        self.broadcaster.publish_link_state((&updated).into());
        Ok(())
    }

    /// Sweep tunnel rows whose link or lab no longer exists. Failed
    /// tunnels with no backing link are ledger garbage after a manual
    /// cleanup.
    pub(crate) fn sweep_orphan_tunnels(&self) -> Result<usize, ControllerError> {
        let orphans: Vec<_> = self.store.read(|db| {
            db.tunnels
                .values()
                .filter(|t| db.link(&t.lab_id, &t.link_name).is_none())
                .map(|t| t.id.clone())
                .collect()
        });
        let count = orphans.len();
        for id in orphans {
            self.store.commit([Change::TunnelDeleted { id }])?;
        }
        Ok(count)
    }
}

#[cfg(test)]
#[path = "overlay_tests.rs"]
mod tests;
