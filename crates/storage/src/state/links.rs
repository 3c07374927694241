// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Link, reservation, and tunnel change handlers.

use super::{Database, Reservation};
use crate::change::Change;

pub(crate) fn apply(db: &mut Database, change: &Change) {
    match change {
        Change::LinkAdded { link } => {
            db.links
                .entry(link.lab_id.clone())
                .or_default()
                .entry(link.name.clone())
                .or_insert_with(|| link.clone());
        }

        Change::LinkUpdated { link } => {
            // Whole-row upsert; oper_epoch monotonicity is preserved by
            // never letting a replayed row regress an existing epoch.
            let entry = db
                .links
                .entry(link.lab_id.clone())
                .or_default()
                .entry(link.name.clone());
            match entry {
                std::collections::hash_map::Entry::Occupied(mut o) => {
                    if link.oper_epoch >= o.get().oper_epoch {
                        o.insert(link.clone());
                    }
                }
                std::collections::hash_map::Entry::Vacant(v) => {
                    v.insert(link.clone());
                }
            }
        }

        Change::LinkRemoved { lab_id, name } => {
            if let Some(links) = db.links.get_mut(lab_id) {
                links.remove(name);
            }
            if let Some(rows) = db.reservations.get_mut(lab_id) {
                rows.retain(|r| &r.link_name != name);
            }
        }

        Change::ReservationClaimed {
            lab_id,
            link_name,
            endpoints,
        } => {
            let rows = db.reservations.entry(lab_id.clone()).or_default();
            for ep in endpoints {
                let exists = rows.iter().any(|r| r.link_name == *link_name && r.covers(ep));
                if !exists {
                    rows.push(Reservation {
                        node: ep.node.clone(),
                        interface: ep.interface.clone(),
                        link_name: link_name.clone(),
                    });
                }
            }
        }

        Change::ReservationReleased { lab_id, link_name } => {
            if let Some(rows) = db.reservations.get_mut(lab_id) {
                rows.retain(|r| &r.link_name != link_name);
            }
        }

        Change::TunnelCreated { tunnel } => {
            db.tunnels
                .entry(tunnel.id.clone())
                .or_insert_with(|| tunnel.clone());
        }

        Change::TunnelStatusChanged { id, status } => {
            if let Some(tunnel) = db.tunnels.get_mut(id) {
                tunnel.status = *status;
            }
        }

        Change::TunnelDeleted { id } => {
            db.tunnels.remove(id);
        }

        _ => {}
    }
}
