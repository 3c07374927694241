// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node, node-state, and placement change handlers.

use super::Database;
use crate::change::Change;
use arche_core::NodeState;

pub(crate) fn apply(db: &mut Database, change: &Change) {
    match change {
        Change::NodeAdded { node } => {
            db.nodes
                .entry(node.lab_id.clone())
                .or_default()
                .entry(node.id.clone())
                .or_insert_with(|| node.clone());
            // Exactly one NodeState per (lab, node)
            db.node_states
                .entry(node.lab_id.clone())
                .or_default()
                .entry(node.id.clone())
                .or_insert_with(|| NodeState::new(node.lab_id.clone(), node.id.clone()));
        }

        Change::NodeRemoved { lab_id, node_id } => {
            let removed_name = db
                .nodes
                .get_mut(lab_id)
                .and_then(|m| m.remove(node_id))
                .map(|n| n.name);
            if let Some(states) = db.node_states.get_mut(lab_id) {
                states.remove(node_id);
            }
            if let (Some(name), Some(placements)) = (removed_name, db.placements.get_mut(lab_id)) {
                placements.remove(&name);
            }
        }

        Change::NodeDesired {
            lab_id,
            node_id,
            desired,
        } => {
            if let Some(ns) = node_state_mut(db, lab_id, node_id) {
                ns.set_desired(*desired);
            }
        }

        Change::NodeObserved {
            lab_id,
            node_id,
            actual,
            epoch_ms,
        } => {
            if let Some(ns) = node_state_mut(db, lab_id, node_id) {
                ns.record_actual(*actual, *epoch_ms);
            }
        }

        Change::NodeReady {
            lab_id,
            node_id,
            is_ready,
        } => {
            if let Some(ns) = node_state_mut(db, lab_id, node_id) {
                ns.is_ready = *is_ready;
            }
        }

        Change::NodeErrored {
            lab_id,
            node_id,
            message,
        } => {
            if let Some(ns) = node_state_mut(db, lab_id, node_id) {
                ns.set_error(message.clone());
            }
        }

        Change::NodeImageSync {
            lab_id,
            node_id,
            status,
        } => {
            if let Some(ns) = node_state_mut(db, lab_id, node_id) {
                ns.image_sync = *status;
            }
        }

        Change::EnforcementAttempted {
            lab_id,
            node_id,
            epoch_ms,
        } => {
            if let Some(ns) = node_state_mut(db, lab_id, node_id) {
                // Guarded by the attempt timestamp so replay after a
                // snapshot does not double-count.
                if ns.enforcement_last_attempt_ms != Some(*epoch_ms) {
                    ns.record_enforcement_attempt(*epoch_ms);
                }
            }
        }

        Change::EnforcementFailed {
            lab_id,
            node_id,
            epoch_ms,
        } => {
            if let Some(ns) = node_state_mut(db, lab_id, node_id) {
                ns.mark_enforcement_failed(*epoch_ms);
            }
        }

        Change::PlacementSet {
            lab_id,
            node_name,
            agent_id,
        } => {
            db.placements
                .entry(lab_id.clone())
                .or_default()
                .insert(node_name.clone(), agent_id.clone());
        }

        Change::PlacementRemoved { lab_id, node_name } => {
            if let Some(placements) = db.placements.get_mut(lab_id) {
                placements.remove(node_name);
            }
        }

        _ => {}
    }
}

fn node_state_mut<'a>(
    db: &'a mut Database,
    lab_id: &arche_core::LabId,
    node_id: &arche_core::NodeId,
) -> Option<&'a mut NodeState> {
    db.node_states.get_mut(lab_id)?.get_mut(node_id)
}
