// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job records, status, and failure classification.

use crate::action::JobAction;
use crate::id::{AgentId, JobId, LabId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Queued or running; active jobs participate in conflict detection.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        })
    }
}

/// A unit of work executed against an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Lab scope; absent for agent-scoped jobs (e.g. agent updates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_id: Option<LabId>,
    pub user: String,
    pub action: JobAction,
    pub status: JobStatus,
    /// Set while running; identifies the host producing observed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    /// For retries: the job this one replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<JobId>,
    /// Parent job for compound sequences (e.g. restart = down then up).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    /// Inline log content for audit and error extraction.
    #[serde(default)]
    pub log: String,
    /// Set when the job fails: the log classified into the bounded
    /// label set, for metrics and the job list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    /// For agent-update jobs: the version/commit the agent must come back
    /// with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_target: Option<UpdateTarget>,
}

/// Target of an agent-update job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl UpdateTarget {
    /// Whether a registration's version/commit satisfies the target.
    pub fn matches(&self, version: Option<&str>, commit: Option<&str>) -> bool {
        let version_ok = match self.version.as_deref() {
            Some(want) => version == Some(want),
            None => true,
        };
        let commit_ok = match self.commit.as_deref() {
            Some(want) => commit == Some(want),
            None => true,
        };
        version_ok && commit_ok
    }
}

impl Job {
    pub fn new(
        id: JobId,
        lab_id: Option<LabId>,
        user: impl Into<String>,
        action: JobAction,
        epoch_ms: u64,
    ) -> Self {
        Self {
            id,
            lab_id,
            user: user.into(),
            action,
            status: JobStatus::Queued,
            agent_id: None,
            created_at_ms: epoch_ms,
            started_at_ms: None,
            completed_at_ms: None,
            last_heartbeat_ms: None,
            retry_count: 0,
            supersedes: None,
            parent_id: None,
            log: String::new(),
            failure_reason: None,
            update_target: None,
        }
    }

    pub fn append_log(&mut self, line: &str) {
        if !self.log.is_empty() {
            self.log.push('\n');
        }
        self.log.push_str(line);
    }

    pub fn mark_running(&mut self, agent: AgentId, epoch_ms: u64) {
        self.status = JobStatus::Running;
        self.agent_id = Some(agent);
        self.started_at_ms = Some(epoch_ms);
        self.last_heartbeat_ms = Some(epoch_ms);
    }

    pub fn mark_terminal(&mut self, status: JobStatus, epoch_ms: u64) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at_ms = Some(epoch_ms);
    }

    /// Fail the job, classifying the accumulated log into the bounded
    /// reason set. Callers append their error to the log first so the
    /// classification sees it.
    pub fn mark_failed(&mut self, epoch_ms: u64) {
        self.failure_reason = Some(classify_failure(&self.log));
        self.mark_terminal(JobStatus::Failed, epoch_ms);
    }

    pub fn heartbeat(&mut self, epoch_ms: u64) {
        self.last_heartbeat_ms = Some(epoch_ms);
    }

    /// Age of the last sign of life (heartbeat, else start, else creation).
    pub fn liveness_age_ms(&self, now_ms: u64) -> u64 {
        let last = self
            .last_heartbeat_ms
            .or(self.started_at_ms)
            .unwrap_or(self.created_at_ms);
        now_ms.saturating_sub(last)
    }
}

/// Bounded label set for classified job failures, used by metrics and
/// the job list UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AgentUnavailable,
    ImagePull,
    ResourceExhausted,
    PortConflict,
    ReadinessTimeout,
    CallbackLost,
    Unknown,
}

impl FailureReason {
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::AgentUnavailable => "agent_unavailable",
            FailureReason::ImagePull => "image_pull",
            FailureReason::ResourceExhausted => "resource_exhausted",
            FailureReason::PortConflict => "port_conflict",
            FailureReason::ReadinessTimeout => "readiness_timeout",
            FailureReason::CallbackLost => "callback_lost",
            FailureReason::Unknown => "unknown",
        }
    }
}

/// Patterns matched against job logs, checked in order. First hit wins.
const FAILURE_PATTERNS: &[(&str, FailureReason)] = &[
    ("pull access denied", FailureReason::ImagePull),
    ("manifest unknown", FailureReason::ImagePull),
    ("no such image", FailureReason::ImagePull),
    ("no space left on device", FailureReason::ResourceExhausted),
    ("out of memory", FailureReason::ResourceExhausted),
    ("oom-kill", FailureReason::ResourceExhausted),
    ("port is already allocated", FailureReason::PortConflict),
    ("address already in use", FailureReason::PortConflict),
    ("timed out waiting for readiness", FailureReason::ReadinessTimeout),
    ("readiness probe failed", FailureReason::ReadinessTimeout),
    ("callback delivery failed", FailureReason::CallbackLost),
    ("connection refused", FailureReason::AgentUnavailable),
    ("agent unreachable", FailureReason::AgentUnavailable),
];

/// Classify a failed job's log into a bounded reason label.
pub fn classify_failure(log: &str) -> FailureReason {
    let lower = log.to_ascii_lowercase();
    for (pattern, reason) in FAILURE_PATTERNS {
        if lower.contains(pattern) {
            return *reason;
        }
    }
    FailureReason::Unknown
}

/// Extract a concise error summary from a job log for quick triage.
///
/// Returns the first line matching a known failure pattern, else the last
/// non-empty line, else nothing.
pub fn extract_error_summary(log: &str) -> Option<String> {
    for line in log.lines() {
        let lower = line.to_ascii_lowercase();
        if FAILURE_PATTERNS.iter().any(|(p, _)| lower.contains(p)) {
            return Some(line.trim().to_string());
        }
    }
    log.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
