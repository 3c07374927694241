// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Carrier-state propagation across hosts.
//!
//! When a NOS shuts an interface, the host-side veth carrier drops; the
//! agent reports it here. The matched side of the link is updated, the
//! peer host mirrors the carrier so its NOS observes link-down, and the
//! link's operational state is recomputed.
//!
//! Loop prevention: the remote set-carrier flips only the interface
//! carrier, not its administrative state, so the peer agent observes no
//! transition and emits no echo event.

use crate::controller::Controller;
use crate::error::ControllerError;
use arche_adapters::{AgentApi, SharedBus};
use arche_core::{CarrierState, Clock, LabId, LinkSide};
use tracing::{info, warn};

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Handle a carrier change reported by an agent. Returns true when a
    /// link matched the (node, interface) pair.
    pub async fn carrier_state_changed(
        &self,
        lab_id: &LabId,
        node: &str,
        interface: &str,
        carrier: CarrierState,
    ) -> Result<bool, ControllerError> {
        // Normalized matching tolerates vendor-form interface names.
        let matched = self.store.read(|db| {
            db.link_by_endpoint(lab_id, node, interface)
                .map(|l| (l.name.clone(), l.side_of(node, interface)))
        });
        let Some((link_name, Some(side))) = matched else {
            warn!(lab = %lab_id, %node, %interface, "no link for carrier event");
            return Ok(false);
        };

        info!(
            lab = %lab_id, link = %link_name, %node, %interface,
            carrier = ?carrier, "carrier state change"
        );

        let link = self.require_link(lab_id, &link_name)?;
        let peer = link.peer(side).clone();
        let peer_side = match side {
            LinkSide::Source => LinkSide::Target,
            LinkSide::Target => LinkSide::Source,
        };
        let peer_host = link.host_of(peer_side).cloned();
        let local_host = link.host_of(side).cloned();

        // Mirror to the peer only when it lives on another host; the
        // same-host case shares the OVS bridge and needs no help.
        let mut peer_mirrored = false;
        if let Some(peer_host) = peer_host {
            if Some(&peer_host) != local_host.as_ref() {
                match self.agent(&peer_host) {
                    Some(agent) if self.agent_online(&agent) => {
                        match self
                            .rpc
                            .set_carrier(&agent, lab_id, &peer.node, &peer.interface, carrier)
                            .await
                        {
                            Ok(()) => {
                                peer_mirrored = true;
                                info!(
                                    lab = %lab_id, link = %link_name,
                                    peer = %peer, "carrier propagated to peer"
                                );
                            }
                            Err(e) => {
                                warn!(
                                    lab = %lab_id, link = %link_name, error = %e,
                                    "carrier propagation to peer failed"
                                );
                            }
                        }
                    }
                    _ => {
                        warn!(
                            lab = %lab_id, link = %link_name, peer_host = %peer_host,
                            "peer agent offline, skipping carrier propagation"
                        );
                    }
                }
            }
        }

        let updated = self.store.update_link(lab_id, &link_name, |l| {
            l.set_carrier(side, carrier);
            if peer_mirrored {
                l.set_carrier(peer_side, carrier);
            }
            l.recompute_oper_state();
        })?;
        self.broadcaster.publish_link_state((&updated).into());
        Ok(true)
    }
}

#[cfg(test)]
#[path = "carrier_tests.rs"]
mod tests;
