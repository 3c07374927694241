// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Topology database for the Archetype controller.
//!
//! Desired state is the source of truth and must survive restarts: every
//! mutation is journaled to a WAL as a [`Change`] and applied to the
//! in-memory [`Database`]. Recovery loads the latest snapshot and replays
//! the WAL tail. Uniqueness constraints and cascade deletes are enforced
//! at the [`Store`] API; row guards serialize long-running operations on
//! individual rows.

mod change;
mod locks;
mod snapshot;
mod state;
mod store;
mod wal;

pub use change::Change;
pub use locks::{link_state_key, node_state_key, RowGuard, RowLocks};
pub use snapshot::{Snapshot, SnapshotError};
pub use state::{Database, ImageHost, Reservation};
pub use store::{Store, StoreError};
pub use wal::{Wal, WalEntry, WalError};
