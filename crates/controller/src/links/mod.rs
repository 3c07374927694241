// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Link orchestration: same-host OVS stitching, cross-host VXLAN
//! trunks, and two-phase teardown with rollback.

pub mod carrier;
pub mod overlay;

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, OverlayAttach, SharedBus};
use arche_core::link::{derive_vni, Endpoint};
use arche_core::node::ActualState;
use arche_core::{
    AgentId, AgentInfo, CarrierState, CleanupEvent, Clock, LabId, LinkActual, LinkDesired,
    LinkState, TunnelId, TunnelStatus, VxlanTunnel,
};
use arche_storage::{link_state_key, Change, StoreError};
use tracing::{info, warn};

/// IP an agent terminates VXLAN on, from its registered address.
pub(crate) fn agent_ip(agent: &AgentInfo) -> String {
    agent
        .address
        .rsplit_once(':')
        .map(|(host, _)| host.to_string())
        .unwrap_or_else(|| agent.address.clone())
}

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Add a link definition between two endpoints and try to bring it
    /// up immediately.
    pub async fn add_link(
        &self,
        lab_id: &LabId,
        a: Endpoint,
        b: Endpoint,
    ) -> Result<LinkState, ControllerError> {
        for ep in [&a, &b] {
            if self
                .store
                .read(|db| db.node_by_name(lab_id, &ep.node).is_none())
            {
                return Err(ControllerError::InvalidRequest(format!(
                    "unknown node {} in link endpoint",
                    ep.node
                )));
            }
        }
        let link = LinkState::new(lab_id.clone(), a, b);
        let name = link.name.clone();
        self.store.commit([Change::LinkAdded { link }])?;
        self.connect_link(lab_id, &name).await
    }

    /// Remove a link definition: tear down the runtime state, release
    /// reservations, drop the row.
    pub async fn remove_link_definition(
        &self,
        lab_id: &LabId,
        name: &str,
    ) -> Result<(), ControllerError> {
        let link = self.require_link(lab_id, name)?;
        if link.actual == LinkActual::Up {
            self.disconnect_link(lab_id, name).await?;
        }
        self.store.commit([Change::LinkRemoved {
            lab_id: lab_id.clone(),
            name: name.to_string(),
        }])?;
        let _ = self
            .bus
            .publish(CleanupEvent::LinkRemoved {
                lab_id: lab_id.clone(),
                link_name: name.to_string(),
            })
            .await;
        Ok(())
    }

    /// Drive one link toward desired=up.
    ///
    /// Claims endpoint reservations first; a claim conflict parks the
    /// link in error naming the holder(s), never up. Links whose
    /// endpoint nodes are not running go to pending and are revisited
    /// when the node reaches running.
    pub async fn connect_link(
        &self,
        lab_id: &LabId,
        name: &str,
    ) -> Result<LinkState, ControllerError> {
        let Some(_guard) = self.store.locks().try_lock(link_state_key(lab_id, name)) else {
            return Err(ControllerError::RowLocked(name.to_string()));
        };

        let link = self.require_link(lab_id, name)?;
        if link.actual == LinkActual::Up {
            return Ok(link);
        }

        // Both endpoint nodes must be running before wiring anything.
        for ep in [&link.source, &link.target] {
            let running = self.store.read(|db| {
                db.node_by_name(lab_id, &ep.node)
                    .and_then(|n| db.node_state(lab_id, &n.id))
                    .map(|ns| ns.actual == ActualState::Running)
                    .unwrap_or(false)
            });
            if !running {
                let updated = self.store.update_link(lab_id, name, |l| {
                    l.actual = LinkActual::Pending;
                })?;
                self.broadcaster.publish_link_state((&updated).into());
                return Ok(updated);
            }
        }

        let endpoints = [link.source.clone(), link.target.clone()];
        match self.store.claim_endpoints(lab_id, name, &endpoints) {
            Ok(()) => {}
            Err(StoreError::EndpointReserved { holders }) => {
                let message = format!(
                    "endpoint already in use by link(s): {}",
                    holders.join(", ")
                );
                warn!(lab = %lab_id, link = %name, %message, "reservation conflict");
                let updated = self.store.update_link(lab_id, name, |l| {
                    l.actual = LinkActual::Error;
                    l.error_message = Some(message.clone());
                })?;
                self.broadcaster.publish_link_state((&updated).into());
                return Ok(updated);
            }
            Err(e) => return Err(e.into()),
        }

        let source_host = self.host_for_node(lab_id, &link.source.node);
        let target_host = self.host_for_node(lab_id, &link.target.node);
        let (Some(source_host), Some(target_host)) = (source_host, target_host) else {
            let updated = self.store.update_link(lab_id, name, |l| {
                l.actual = LinkActual::Pending;
            })?;
            self.broadcaster.publish_link_state((&updated).into());
            return Ok(updated);
        };

        if source_host == target_host {
            self.connect_same_host(lab_id, name, &source_host).await
        } else {
            self.connect_cross_host(lab_id, name, &source_host, &target_host)
                .await
        }
    }

    async fn connect_same_host(
        &self,
        lab_id: &LabId,
        name: &str,
        host: &AgentId,
    ) -> Result<LinkState, ControllerError> {
        let agent = self
            .agent(host)
            .ok_or_else(|| ControllerError::NoAgent(format!("host {host} unknown")))?;
        let link = self.store.update_link(lab_id, name, |l| {
            l.actual = LinkActual::Creating;
            l.is_cross_host = false;
            l.source_host_id = Some(host.clone());
            l.target_host_id = Some(host.clone());
        })?;

        match self
            .rpc
            .create_link(&agent, lab_id, &link.source, &link.target)
            .await
        {
            Ok(result) if result.success => {
                let updated = self.store.update_link(lab_id, name, |l| {
                    l.actual = LinkActual::Up;
                    l.source_vlan_tag = result.vlan_tag;
                    l.target_vlan_tag = result.vlan_tag;
                    l.source_carrier = CarrierState::On;
                    l.target_carrier = CarrierState::On;
                    l.error_message = None;
                    l.recompute_oper_state();
                })?;
                info!(lab = %lab_id, link = %name, vlan = ?result.vlan_tag, "same-host link up");
                self.broadcaster.publish_link_state((&updated).into());
                Ok(updated)
            }
            Ok(result) => {
                self.park_link_error(
                    lab_id,
                    name,
                    result
                        .error
                        .unwrap_or_else(|| "agent failed to create link".to_string()),
                )
            }
            Err(e) => self.park_link_error(lab_id, name, e.to_string()),
        }
    }

    async fn connect_cross_host(
        &self,
        lab_id: &LabId,
        name: &str,
        source_host: &AgentId,
        target_host: &AgentId,
    ) -> Result<LinkState, ControllerError> {
        let agent_a = self
            .agent(source_host)
            .ok_or_else(|| ControllerError::NoAgent(format!("host {source_host} unknown")))?;
        let agent_b = self
            .agent(target_host)
            .ok_or_else(|| ControllerError::NoAgent(format!("host {target_host} unknown")))?;

        // Deterministic per (lab, link) so repeated enforcement is
        // idempotent.
        let vni = derive_vni(lab_id, name);
        let ip_a = agent_ip(&agent_a);
        let ip_b = agent_ip(&agent_b);

        let link = self.store.update_link(lab_id, name, |l| {
            l.actual = LinkActual::Connecting;
            l.is_cross_host = true;
            l.source_host_id = Some(source_host.clone());
            l.target_host_id = Some(target_host.clone());
            l.vni = Some(vni);
        })?;

        let source_attach = OverlayAttach {
            lab_id: lab_id.clone(),
            container: link.source.node.clone(),
            interface: link.source.interface.clone(),
            vni,
            local_ip: ip_a.clone(),
            remote_ip: ip_b.clone(),
            link_id: name.to_string(),
            mtu: None,
        };
        if let Err(e) = self.rpc.attach_overlay_interface(&agent_a, &source_attach).await {
            return self.park_link_error(lab_id, name, format!("source attach failed: {e}"));
        }

        let target_attach = OverlayAttach {
            lab_id: lab_id.clone(),
            container: link.target.node.clone(),
            interface: link.target.interface.clone(),
            vni,
            local_ip: ip_b.clone(),
            remote_ip: ip_a.clone(),
            link_id: name.to_string(),
            mtu: None,
        };
        if let Err(e) = self.rpc.attach_overlay_interface(&agent_b, &target_attach).await {
            // Unwind the half-built trunk so L2 state stays symmetric
            let _ = self
                .rpc
                .detach_overlay_interface(
                    &agent_a,
                    lab_id,
                    &link.source.node,
                    &link.source.interface,
                    name,
                )
                .await;
            return self.park_link_error(lab_id, name, format!("target attach failed: {e}"));
        }

        let tunnel = VxlanTunnel {
            id: TunnelId::new(format!("tun-{lab_id}-{vni}")),
            lab_id: lab_id.clone(),
            link_name: name.to_string(),
            vni,
            agent_a: source_host.clone(),
            ip_a,
            agent_b: target_host.clone(),
            ip_b,
            port_name: VxlanTunnel::trunk_port_name(vni),
            status: TunnelStatus::Active,
        };
        self.store.commit([Change::TunnelCreated { tunnel }])?;

        let updated = self.store.update_link(lab_id, name, |l| {
            l.actual = LinkActual::Up;
            l.source_vxlan_attached = true;
            l.target_vxlan_attached = true;
            l.source_carrier = CarrierState::On;
            l.target_carrier = CarrierState::On;
            l.error_message = None;
            l.recompute_oper_state();
        })?;
        info!(lab = %lab_id, link = %name, vni, "cross-host link up");
        self.broadcaster.publish_link_state((&updated).into());
        Ok(updated)
    }

    /// Drive one link toward desired=down.
    pub async fn disconnect_link(
        &self,
        lab_id: &LabId,
        name: &str,
    ) -> Result<LinkState, ControllerError> {
        let Some(_guard) = self.store.locks().try_lock(link_state_key(lab_id, name)) else {
            return Err(ControllerError::RowLocked(name.to_string()));
        };

        let link = self.require_link(lab_id, name)?;
        if link.is_cross_host {
            self.teardown_cross_host(lab_id, name).await
        } else {
            self.teardown_same_host(lab_id, name).await
        }
    }

    async fn teardown_same_host(
        &self,
        lab_id: &LabId,
        name: &str,
    ) -> Result<LinkState, ControllerError> {
        let link = self.require_link(lab_id, name)?;
        if let Some(host) = link.source_host_id.clone() {
            if let Some(agent) = self.agent(&host) {
                if let Err(e) = self
                    .rpc
                    .remove_link(&agent, lab_id, &link.source, &link.target)
                    .await
                {
                    return self.park_link_error(lab_id, name, format!("link delete failed: {e}"));
                }
                for ep in [&link.source, &link.target] {
                    let _ = self
                        .rpc
                        .isolate_endpoint(&agent, lab_id, &ep.node, &ep.interface)
                        .await;
                }
            }
        }

        self.store.commit([Change::ReservationReleased {
            lab_id: lab_id.clone(),
            link_name: name.to_string(),
        }])?;
        let updated = self.store.update_link(lab_id, name, |l| {
            l.actual = LinkActual::Down;
            l.source_vlan_tag = None;
            l.target_vlan_tag = None;
            l.source_carrier = CarrierState::Off;
            l.target_carrier = CarrierState::Off;
            l.error_message = None;
            l.recompute_oper_state();
        })?;
        info!(lab = %lab_id, link = %name, "same-host link down");
        self.broadcaster.publish_link_state((&updated).into());
        Ok(updated)
    }

    /// Two-phase cross-host teardown.
    ///
    /// Detach source, then target; a target failure re-attaches the
    /// source to preserve L2 continuity. The tunnel row is deleted only
    /// when both sides have detached.
    async fn teardown_cross_host(
        &self,
        lab_id: &LabId,
        name: &str,
    ) -> Result<LinkState, ControllerError> {
        let link = self.require_link(lab_id, name)?;
        let Some(tunnel) = self.store.read(|db| db.tunnel_for_link(lab_id, name).cloned()) else {
            warn!(lab = %lab_id, link = %name, "no tunnel for link, nothing to tear down");
            let updated = self.store.update_link(lab_id, name, |l| {
                l.actual = LinkActual::Down;
                l.recompute_oper_state();
            })?;
            return Ok(updated);
        };
        let agent_a = self
            .agent(&tunnel.agent_a)
            .ok_or_else(|| ControllerError::NoAgent(format!("host {} unknown", tunnel.agent_a)))?;
        let agent_b = self
            .agent(&tunnel.agent_b)
            .ok_or_else(|| ControllerError::NoAgent(format!("host {} unknown", tunnel.agent_b)))?;

        // Phase 1: pause reconciliation on the pair
        self.store.commit([
            Change::TunnelStatusChanged {
                id: tunnel.id.clone(),
                status: TunnelStatus::Cleanup,
            },
        ])?;
        self.store.update_link(lab_id, name, |l| {
            l.actual = LinkActual::Cleanup;
        })?;

        // Phase 2a: source detach
        if let Err(e) = self
            .rpc
            .detach_overlay_interface(
                &agent_a,
                lab_id,
                &link.source.node,
                &link.source.interface,
                name,
            )
            .await
        {
            warn!(lab = %lab_id, link = %name, error = %e, "source detach failed");
            self.store.commit([Change::TunnelStatusChanged {
                id: tunnel.id.clone(),
                status: TunnelStatus::Failed,
            }])?;
            return self.park_link_error(lab_id, name, "Failed to detach source endpoint");
        }

        // Phase 2b: target detach, rolling back the source on failure
        if let Err(e) = self
            .rpc
            .detach_overlay_interface(
                &agent_b,
                lab_id,
                &link.target.node,
                &link.target.interface,
                name,
            )
            .await
        {
            warn!(lab = %lab_id, link = %name, error = %e, "target detach failed, rolling back source");
            let rollback = OverlayAttach {
                lab_id: lab_id.clone(),
                container: link.source.node.clone(),
                interface: link.source.interface.clone(),
                vni: tunnel.vni,
                local_ip: tunnel.ip_a.clone(),
                remote_ip: tunnel.ip_b.clone(),
                link_id: name.to_string(),
                mtu: None,
            };
            let rollback_ok = self
                .rpc
                .attach_overlay_interface(&agent_a, &rollback)
                .await
                .is_ok();
            if !rollback_ok {
                warn!(lab = %lab_id, link = %name, "source rollback failed");
            }
            self.store.commit([Change::TunnelStatusChanged {
                id: tunnel.id.clone(),
                status: TunnelStatus::Failed,
            }])?;
            let updated = self.store.update_link(lab_id, name, |l| {
                l.actual = LinkActual::Error;
                l.source_vxlan_attached = rollback_ok;
                l.target_vxlan_attached = false;
                l.error_message = Some("Failed to detach target endpoint".to_string());
                l.recompute_oper_state();
            })?;
            self.broadcaster.publish_link_state((&updated).into());
            return Ok(updated);
        }

        // Phase 3: both sides detached
        self.store.commit([
            Change::TunnelDeleted {
                id: tunnel.id.clone(),
            },
            Change::ReservationReleased {
                lab_id: lab_id.clone(),
                link_name: name.to_string(),
            },
        ])?;
        let updated = self.store.update_link(lab_id, name, |l| {
            l.actual = LinkActual::Down;
            l.vni = None;
            l.source_vlan_tag = None;
            l.target_vlan_tag = None;
            l.source_vxlan_attached = false;
            l.target_vxlan_attached = false;
            l.source_carrier = CarrierState::Off;
            l.target_carrier = CarrierState::Off;
            l.error_message = None;
            l.recompute_oper_state();
        })?;
        info!(lab = %lab_id, link = %name, "cross-host link torn down");
        self.broadcaster.publish_link_state((&updated).into());
        Ok(updated)
    }

    /// Drive every link of a lab toward its desired state. Row-locked
    /// links are skipped; another worker owns them this cycle.
    pub async fn process_link_changes(&self, lab_id: &LabId) {
        let links: Vec<LinkState> = self.store.read(|db| {
            db.links
                .get(lab_id)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        });
        for link in links {
            let result = match (link.desired, link.actual) {
                (
                    LinkDesired::Up,
                    LinkActual::Unknown | LinkActual::Pending | LinkActual::Down,
                ) => self.connect_link(lab_id, &link.name).await,
                (LinkDesired::Down, LinkActual::Up) => {
                    self.disconnect_link(lab_id, &link.name).await
                }
                _ => continue,
            };
            match result {
                Ok(_) => {}
                Err(ControllerError::RowLocked(_)) => {}
                Err(e) => {
                    warn!(lab = %lab_id, link = %link.name, error = %e, "link state change failed");
                }
            }
        }
    }

    /// Revisit pending links touching a node that just reached running.
    pub(crate) async fn connect_pending_links_for_node(&self, lab_id: &LabId, node_name: &str) {
        let pending: Vec<String> = self.store.read(|db| {
            db.links
                .get(lab_id)
                .map(|m| {
                    m.values()
                        .filter(|l| {
                            l.desired == LinkDesired::Up
                                && matches!(l.actual, LinkActual::Pending | LinkActual::Unknown)
                                && (l.source.node == node_name || l.target.node == node_name)
                        })
                        .map(|l| l.name.clone())
                        .collect()
                })
                .unwrap_or_default()
        });
        for name in pending {
            match self.connect_link(lab_id, &name).await {
                Ok(_) | Err(ControllerError::RowLocked(_)) => {}
                Err(e) => {
                    warn!(lab = %lab_id, link = %name, error = %e, "pending link connect failed");
                }
            }
        }
    }

    /// Change a link's desired state and act on it.
    pub async fn set_link_desired(
        &self,
        lab_id: &LabId,
        name: &str,
        desired: LinkDesired,
    ) -> Result<LinkState, ControllerError> {
        self.store.update_link(lab_id, name, |l| {
            l.desired = desired;
        })?;
        match desired {
            LinkDesired::Up => self.connect_link(lab_id, name).await,
            LinkDesired::Down => self.disconnect_link(lab_id, name).await,
        }
    }

    pub(crate) fn host_for_node(&self, lab_id: &LabId, node_name: &str) -> Option<AgentId> {
        self.store.read(|db| {
            db.placements
                .get(lab_id)
                .and_then(|p| p.get(node_name).cloned())
                .or_else(|| db.node_by_name(lab_id, node_name).and_then(|n| n.host_pin.clone()))
        })
    }

    fn park_link_error(
        &self,
        lab_id: &LabId,
        name: &str,
        message: impl Into<String>,
    ) -> Result<LinkState, ControllerError> {
        let message = message.into();
        let updated = self.store.update_link(lab_id, name, |l| {
            l.actual = LinkActual::Error;
            l.error_message = Some(message);
        })?;
        self.broadcaster.publish_link_state((&updated).into());
        Ok(updated)
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
