// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lab change handlers, including the cascade delete.

use super::Database;
use crate::change::Change;

pub(crate) fn apply(db: &mut Database, change: &Change) {
    match change {
        Change::LabCreated { lab } => {
            // Idempotency: keep the existing row on replay
            db.labs.entry(lab.id.clone()).or_insert_with(|| lab.clone());
            db.nodes.entry(lab.id.clone()).or_default();
            db.node_states.entry(lab.id.clone()).or_default();
            db.links.entry(lab.id.clone()).or_default();
        }

        Change::LabStateChanged {
            lab_id,
            state,
            epoch_ms,
            error,
        } => {
            if let Some(lab) = db.labs.get_mut(lab_id) {
                lab.set_state(*state, *epoch_ms);
                if error.is_some() {
                    lab.error_message.clone_from(error);
                }
            }
        }

        Change::LabDefaultAgent { lab_id, agent_id } => {
            if let Some(lab) = db.labs.get_mut(lab_id) {
                lab.default_agent_id.clone_from(agent_id);
            }
        }

        Change::LabDeleted { lab_id } => {
            db.labs.remove(lab_id);
            db.nodes.remove(lab_id);
            db.node_states.remove(lab_id);
            db.links.remove(lab_id);
            db.reservations.remove(lab_id);
            db.placements.remove(lab_id);
            db.tunnels.retain(|_, t| &t.lab_id != lab_id);
            db.jobs.retain(|_, j| j.lab_id.as_ref() != Some(lab_id));
        }

        _ => {}
    }
}
