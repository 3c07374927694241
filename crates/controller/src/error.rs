// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the controller.
//!
//! Kinds map onto the user-visible status classes: conflicts reject at
//! admission (409), missing agents/images degrade to 503, transport
//! failures retry then surface, application failures never retry.

use arche_adapters::AgentApiError;
use arche_core::{JobId, JobStatus};
use arche_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Agent(#[from] AgentApiError),

    /// An active job with a conflicting action owns the lab.
    #[error("conflicting job {job_id} ({action}) is {status}")]
    JobConflict {
        job_id: JobId,
        action: String,
        status: JobStatus,
    },

    /// A command was rejected because of a transitional node state.
    #[error("conflict: {0}")]
    TransitionalState(String),

    /// No online agent satisfies the capability/capacity requirements.
    #[error("no healthy agent available: {0}")]
    NoAgent(String),

    /// Deploy locks are held for these nodes by another operation.
    #[error("deploy in progress for node(s): {}", nodes.join(", "))]
    DeployLocked { nodes: Vec<String> },

    /// Pre-flight found images missing from target agents.
    #[error("missing images: {}", images.join(", "))]
    MissingImages { images: Vec<String> },

    /// Another worker holds the row; retry next cycle.
    #[error("row locked: {0}")]
    RowLocked(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ControllerError {
    /// Whether the failure is transport-class and worth a retry.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ControllerError::Agent(e) if e.is_retriable())
    }
}
