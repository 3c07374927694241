// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The store: WAL-journaled database behind one lock.
//!
//! A transaction is one closure under the store lock: constraint checks
//! read the current database and stage changes; on success the staged
//! changes are journaled (one fsync) and applied before the lock is
//! released. Staged changes are not visible to reads inside the same
//! closure; validate first, stage last.

use crate::change::Change;
use crate::locks::RowLocks;
use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::Database;
use crate::wal::{Wal, WalError};
use arche_core::link::Endpoint;
use arche_core::{Job, JobId, Lab, LabId, LinkState, Node};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("unique constraint {constraint} violated by {key}")]
    Duplicate {
        constraint: &'static str,
        key: String,
    },
    #[error("endpoint(s) already reserved by link(s): {}", holders.join(", "))]
    EndpointReserved { holders: Vec<String> },
}

struct Inner {
    db: Database,
    wal: Wal,
}

/// WAL-journaled database with row guards.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
    locks: RowLocks,
    snapshot_path: PathBuf,
}

impl Store {
    /// Open the store: load the latest snapshot, replay the WAL tail.
    pub fn open(wal_path: &Path, snapshot_path: &Path) -> Result<Self, StoreError> {
        let (mut db, seq) = match Snapshot::load(snapshot_path)? {
            Some(snapshot) => (snapshot.state, snapshot.seq),
            None => (Database::default(), 0),
        };

        let wal = Wal::open(wal_path)?;
        let tail = wal.entries_after(seq)?;
        let replayed = tail.len();
        for entry in tail {
            db.apply(&entry.change);
        }
        if replayed > 0 {
            info!(replayed, "replayed WAL tail after snapshot");
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { db, wal })),
            locks: RowLocks::new(),
            snapshot_path: snapshot_path.to_owned(),
        })
    }

    /// Row guard registry shared by every handle to this store.
    pub fn locks(&self) -> &RowLocks {
        &self.locks
    }

    /// Read the database under the store lock.
    pub fn read<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let inner = self.inner.lock();
        f(&inner.db)
    }

    /// Journal and apply a batch of changes as one transaction.
    pub fn commit(&self, changes: impl IntoIterator<Item = Change>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        commit_locked(&mut inner, changes)
    }

    /// Run a transaction: validate against the current database, stage
    /// changes, commit them atomically on `Ok`.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&Database, &mut Vec<Change>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.inner.lock();
        let mut staged = Vec::new();
        let value = f(&inner.db, &mut staged)?;
        commit_locked(&mut inner, staged)?;
        Ok(value)
    }

    /// Write a snapshot at the current sequence and truncate the WAL.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let seq = inner.wal.write_seq();
        Snapshot::new(seq, inner.db.clone()).save(&self.snapshot_path)?;
        inner.wal.truncate_through(seq)?;
        Ok(())
    }

    // -- constraint-checked entity operations --

    /// Create a lab; duplicate ids are rejected.
    pub fn create_lab(&self, lab: Lab) -> Result<(), StoreError> {
        self.transact(|db, staged| {
            if db.labs.contains_key(&lab.id) {
                return Err(StoreError::Duplicate {
                    constraint: "lab_id",
                    key: lab.id.to_string(),
                });
            }
            staged.push(Change::LabCreated { lab: lab.clone() });
            Ok(())
        })
    }

    /// Delete a lab, cascading to everything it owns.
    pub fn delete_lab(&self, lab_id: &LabId) -> Result<(), StoreError> {
        self.transact(|db, staged| {
            if !db.labs.contains_key(lab_id) {
                return Err(StoreError::NotFound {
                    entity: "lab",
                    key: lab_id.to_string(),
                });
            }
            staged.push(Change::LabDeleted {
                lab_id: lab_id.clone(),
            });
            Ok(())
        })
    }

    /// Add a node definition (and its NodeState row). Unique on
    /// (lab, node id) and on the display name within the lab.
    pub fn add_node(&self, node: Node) -> Result<(), StoreError> {
        self.transact(|db, staged| {
            if !db.labs.contains_key(&node.lab_id) {
                return Err(StoreError::NotFound {
                    entity: "lab",
                    key: node.lab_id.to_string(),
                });
            }
            if db.node(&node.lab_id, &node.id).is_some()
                || db.node_by_name(&node.lab_id, &node.name).is_some()
            {
                return Err(StoreError::Duplicate {
                    constraint: "node",
                    key: format!("{}:{}", node.lab_id, node.name),
                });
            }
            staged.push(Change::NodeAdded { node: node.clone() });
            Ok(())
        })
    }

    /// Claim endpoint reservations for a desired-up link.
    ///
    /// Fails naming the conflicting link(s) when any endpoint is already
    /// reserved by another desired-up link.
    pub fn claim_endpoints(
        &self,
        lab_id: &LabId,
        link_name: &str,
        endpoints: &[Endpoint],
    ) -> Result<(), StoreError> {
        self.transact(|db, staged| {
            let holders = db.reservation_holders(lab_id, endpoints, link_name);
            if !holders.is_empty() {
                return Err(StoreError::EndpointReserved { holders });
            }
            staged.push(Change::ReservationClaimed {
                lab_id: lab_id.clone(),
                link_name: link_name.to_string(),
                endpoints: endpoints.to_vec(),
            });
            Ok(())
        })
    }

    /// Mutate a job row in place (status transitions, log appends).
    pub fn update_job(
        &self,
        id: &JobId,
        f: impl FnOnce(&mut Job),
    ) -> Result<Job, StoreError> {
        self.transact(|db, staged| {
            let mut job = db
                .jobs
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    entity: "job",
                    key: id.to_string(),
                })?;
            f(&mut job);
            staged.push(Change::JobUpdated { job: job.clone() });
            Ok(job)
        })
    }

    /// Mutate a link row in place.
    pub fn update_link(
        &self,
        lab_id: &LabId,
        name: &str,
        f: impl FnOnce(&mut LinkState),
    ) -> Result<LinkState, StoreError> {
        self.transact(|db, staged| {
            let mut link = db
                .link(lab_id, name)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    entity: "link",
                    key: format!("{lab_id}:{name}"),
                })?;
            f(&mut link);
            staged.push(Change::LinkUpdated { link: link.clone() });
            Ok(link)
        })
    }
}

fn commit_locked(
    inner: &mut Inner,
    changes: impl IntoIterator<Item = Change>,
) -> Result<(), StoreError> {
    let changes: Vec<Change> = changes.into_iter().collect();
    if changes.is_empty() {
        return Ok(());
    }
    for change in &changes {
        inner.wal.append(change)?;
    }
    // Durability point: the transaction is on disk before its effects
    // become observable.
    inner.wal.flush()?;
    for change in &changes {
        inner.db.apply(change);
    }
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
