// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapters for external I/O: the agent RPC surface and the shared bus.

pub mod agent;
pub mod bus;

pub use agent::{
    AgentApi, AgentApiError, DeployOutcome, DiscoveredLab, HttpAgentApi, HttpAgentApiConfig,
    LinkCreateResult, NodeStatusReport, OverlayAttach, OverlayDeclaration, OverlayEntryReport,
    OverlayEntryStatus, OverlayReport, PruneReport, ReadinessReport,
};
pub use bus::{BusError, MemoryBus, SharedBus};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use agent::{AgentCall, FakeAgentApi};
