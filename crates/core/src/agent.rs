// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker host (agent) records.

use crate::id::AgentId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
        })
    }
}

/// Capabilities an agent declares at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Runtime providers this host supports (e.g. "docker", "libvirt").
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    #[serde(default)]
    pub features: Vec<String>,
}

fn default_max_concurrent_jobs() -> u32 {
    4
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            providers: vec!["docker".to_string()],
            max_concurrent_jobs: default_max_concurrent_jobs(),
            features: Vec::new(),
        }
    }
}

/// Last reported resource snapshot from a heartbeat.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub cpu_pct: f64,
    #[serde(default)]
    pub memory_pct: f64,
    #[serde(default)]
    pub disk_pct: f64,
    #[serde(default)]
    pub containers: u32,
    #[serde(default)]
    pub vms: u32,
}

/// A worker host. Registered on first heartbeat; the row persists across
/// offline periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    /// Reachable address (`host:port`).
    pub address: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_mode: Option<String>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub usage: ResourceUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sync_strategy: Option<String>,
}

impl AgentInfo {
    pub fn new(id: AgentId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            status: AgentStatus::Online,
            last_heartbeat_ms: None,
            version: None,
            commit: None,
            deployment_mode: None,
            capabilities: AgentCapabilities::default(),
            usage: ResourceUsage::default(),
            image_sync_strategy: None,
        }
    }

    /// An agent is online iff its status says so and the heartbeat is
    /// fresh. A missing heartbeat is always stale.
    pub fn is_online(&self, now_ms: u64, stale_timeout_ms: u64) -> bool {
        if self.status != AgentStatus::Online {
            return false;
        }
        match self.last_heartbeat_ms {
            Some(hb) => now_ms.saturating_sub(hb) < stale_timeout_ms,
            None => false,
        }
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.capabilities.providers.iter().any(|p| p == provider)
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
