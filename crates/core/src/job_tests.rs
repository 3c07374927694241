// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn job() -> Job {
    Job::new(
        JobId::new("job-1"),
        Some(LabId::new("lab-1")),
        "tester",
        JobAction::Up,
        1_000,
    )
}

#[test]
fn new_job_is_queued_and_unassigned() {
    let j = job();
    assert_eq!(j.status, JobStatus::Queued);
    assert!(j.agent_id.is_none());
    assert!(j.status.is_active());
}

#[test]
fn mark_running_assigns_agent() {
    let mut j = job();
    j.mark_running(AgentId::new("h1"), 2_000);
    assert_eq!(j.status, JobStatus::Running);
    assert_eq!(j.agent_id, Some(AgentId::new("h1")));
    assert_eq!(j.started_at_ms, Some(2_000));
}

#[test]
fn terminal_statuses() {
    assert!(JobStatus::Completed.is_terminal());
    assert!(JobStatus::Failed.is_terminal());
    assert!(JobStatus::Cancelled.is_terminal());
    assert!(!JobStatus::Running.is_terminal());
    assert!(!JobStatus::Queued.is_terminal());
}

#[test]
fn mark_failed_classifies_the_log() {
    let mut j = job();
    j.append_log("Error: pull access denied for registry/foo");
    j.mark_failed(2_000);
    assert_eq!(j.status, JobStatus::Failed);
    assert_eq!(j.failure_reason, Some(FailureReason::ImagePull));
    assert_eq!(j.completed_at_ms, Some(2_000));
}

#[test]
fn append_log_joins_lines() {
    let mut j = job();
    j.append_log("first");
    j.append_log("second");
    assert_eq!(j.log, "first\nsecond");
}

#[test]
fn liveness_age_prefers_heartbeat() {
    let mut j = job();
    assert_eq!(j.liveness_age_ms(5_000), 4_000);
    j.mark_running(AgentId::new("h1"), 2_000);
    j.heartbeat(4_000);
    assert_eq!(j.liveness_age_ms(5_000), 1_000);
}

// --- failure classification ---

#[yare::parameterized(
    image_pull = { "Error: pull access denied for registry/foo", FailureReason::ImagePull },
    disk_full = { "write /var/lib: no space left on device", FailureReason::ResourceExhausted },
    port = { "Bind for 0.0.0.0:830: port is already allocated", FailureReason::PortConflict },
    readiness = { "timed out waiting for readiness of r1", FailureReason::ReadinessTimeout },
    dead_letter = { "callback delivery failed after 5 attempts", FailureReason::CallbackLost },
    transport = { "connect: connection refused", FailureReason::AgentUnavailable },
    unknown = { "something exploded", FailureReason::Unknown },
)]
fn classification(log: &str, expected: FailureReason) {
    assert_eq!(classify_failure(log), expected);
}

#[test]
fn summary_prefers_matched_pattern_line() {
    let log = "step 1 ok\nError: pull access denied for foo\ncleanup done";
    assert_eq!(
        extract_error_summary(log).as_deref(),
        Some("Error: pull access denied for foo")
    );
}

#[test]
fn summary_falls_back_to_last_nonempty_line() {
    let log = "doing things\nboom happened\n\n";
    assert_eq!(extract_error_summary(log).as_deref(), Some("boom happened"));
}

#[test]
fn summary_of_empty_log_is_none() {
    assert_eq!(extract_error_summary(""), None);
}
