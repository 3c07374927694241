// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job change handlers.

use super::Database;
use crate::change::Change;

pub(crate) fn apply(db: &mut Database, change: &Change) {
    match change {
        Change::JobCreated { job } => {
            db.jobs.entry(job.id.clone()).or_insert_with(|| job.clone());
        }

        Change::JobUpdated { job } => {
            // Whole-row upsert. Terminal rows never regress to active on
            // replay (callbacks are idempotent for terminal jobs).
            match db.jobs.get_mut(&job.id) {
                Some(existing) => {
                    if existing.status.is_terminal() && job.status.is_active() {
                        return;
                    }
                    *existing = job.clone();
                }
                None => {
                    db.jobs.insert(job.id.clone(), job.clone());
                }
            }
        }

        Change::JobDeleted { id } => {
            db.jobs.remove(id);
        }

        _ => {}
    }
}
