// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the controller.
//!
//! Every option has a default; unset and unparseable values fall back
//! silently so a partially-configured environment still boots.

use std::path::PathBuf;
use std::time::Duration;

fn parse_secs(var: &str, default: u64) -> Duration {
    Duration::from_secs(parse_u64(var, default))
}

fn parse_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_bool(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Controller configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (WAL, snapshot, logs, pid file).
    pub state_dir: PathBuf,
    /// Bearer token for agent RPC.
    pub agent_token: String,
    /// Heartbeat age after which an agent is marked offline.
    pub agent_stale_timeout: Duration,
    /// Enforcement attempts before a node is circuit-broken to error.
    pub enforcement_max_retries: u32,
    /// Whether enforcement may start nodes whose desired is running.
    pub enforcement_auto_restart: bool,
    /// Per-node cooldown between enforcement attempts.
    pub enforcement_cooldown: Duration,
    pub enforcement_interval: Duration,
    pub reconcile_interval: Duration,
    pub overlay_interval: Duration,
    pub image_sync_enabled: bool,
    pub image_pre_deploy_check: bool,
    pub job_retention_days: u64,
    pub snapshot_retention_days: u64,
    pub disk_warning_pct: u32,
    pub disk_critical_pct: u32,
    pub db_pool_warning_pct: u32,
    pub db_pool_critical_pct: u32,
    pub process_memory_warning_mb: u64,
    /// No heartbeat for this long fails a running job.
    pub job_stuck_threshold: Duration,
    pub job_retry_max: u32,
    pub deploy_lock_ttl: Duration,
    pub rpc_attempts: u32,
    /// Window an updating agent has to re-register with the new version.
    pub agent_update_restart_timeout: Duration,
    pub sweep_interval: Duration,
    pub job_health_interval: Duration,
    pub stale_check_interval: Duration,
    pub checkpoint_interval: Duration,
}

impl Config {
    pub fn load() -> Self {
        let state_dir = std::env::var("ARCHE_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/archetype"));
        Self {
            state_dir,
            agent_token: std::env::var("ARCHE_AGENT_TOKEN").unwrap_or_default(),
            agent_stale_timeout: parse_secs("ARCHE_AGENT_STALE_TIMEOUT_SECS", 90),
            enforcement_max_retries: parse_u32("ARCHE_ENFORCEMENT_MAX_RETRIES", 3),
            enforcement_auto_restart: parse_bool("ARCHE_ENFORCEMENT_AUTO_RESTART", true),
            enforcement_cooldown: parse_secs("ARCHE_ENFORCEMENT_COOLDOWN_SECS", 30),
            enforcement_interval: parse_secs("ARCHE_ENFORCEMENT_INTERVAL_SECS", 60),
            reconcile_interval: parse_secs("ARCHE_RECONCILE_INTERVAL_SECS", 30),
            overlay_interval: parse_secs("ARCHE_OVERLAY_INTERVAL_SECS", 60),
            image_sync_enabled: parse_bool("ARCHE_IMAGE_SYNC_ENABLED", true),
            image_pre_deploy_check: parse_bool("ARCHE_IMAGE_PRE_DEPLOY_CHECK", true),
            job_retention_days: parse_u64("ARCHE_JOB_RETENTION_DAYS", 7),
            snapshot_retention_days: parse_u64("ARCHE_SNAPSHOT_RETENTION_DAYS", 30),
            disk_warning_pct: parse_u32("ARCHE_DISK_WARNING_PCT", 80),
            disk_critical_pct: parse_u32("ARCHE_DISK_CRITICAL_PCT", 90),
            db_pool_warning_pct: parse_u32("ARCHE_DB_POOL_WARNING_PCT", 75),
            db_pool_critical_pct: parse_u32("ARCHE_DB_POOL_CRITICAL_PCT", 90),
            process_memory_warning_mb: parse_u64("ARCHE_PROCESS_MEMORY_WARNING_MB", 2048),
            job_stuck_threshold: parse_secs("ARCHE_JOB_STUCK_SECS", 300),
            job_retry_max: parse_u32("ARCHE_JOB_RETRY_MAX", 3),
            deploy_lock_ttl: parse_secs("ARCHE_DEPLOY_LOCK_TTL_SECS", 600),
            rpc_attempts: parse_u32("ARCHE_AGENT_RPC_ATTEMPTS", 3),
            agent_update_restart_timeout: parse_secs("ARCHE_AGENT_UPDATE_RESTART_SECS", 300),
            sweep_interval: parse_secs("ARCHE_SWEEP_INTERVAL_SECS", 3600),
            job_health_interval: parse_secs("ARCHE_JOB_HEALTH_INTERVAL_SECS", 60),
            stale_check_interval: parse_secs("ARCHE_STALE_CHECK_INTERVAL_SECS", 30),
            checkpoint_interval: parse_secs("ARCHE_CHECKPOINT_INTERVAL_SECS", 300),
        }
    }

    /// Defaults with state under a caller-provided directory. Used by
    /// tests; production goes through `load()`.
    pub fn with_state_dir(state_dir: PathBuf) -> Self {
        let mut config = Self::load();
        config.state_dir = state_dir;
        config
    }

    pub fn wal_path(&self) -> PathBuf {
        self.state_dir.join("wal").join("changes.wal")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("snapshot.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("arched.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("arched.log")
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_days * 24 * 3600)
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
