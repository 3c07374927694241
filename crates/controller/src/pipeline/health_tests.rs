// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{context, create_lab, register_agent};
use arche_core::{AgentId, UpdateTarget};
use arche_storage::Change;
use std::time::Duration;

#[tokio::test]
async fn stuck_job_is_failed_and_lab_goes_unknown() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let mut job = Job::new(
        JobId::new("job-1"),
        Some(lab.clone()),
        "tester",
        JobAction::Up,
        ctx.clock.epoch_ms(),
    );
    job.mark_running(AgentId::new("h1"), ctx.clock.epoch_ms());
    ctx.controller
        .store()
        .commit([Change::JobCreated { job }])
        .unwrap();

    ctx.clock.advance(Duration::from_secs(400));
    let failed = ctx.controller.job_health_pass().await.unwrap();
    assert_eq!(failed, vec![JobId::new("job-1")]);

    ctx.controller.store().read(|db| {
        assert_eq!(db.jobs[&JobId::new("job-1")].status, JobStatus::Failed);
        assert_eq!(db.labs[&lab].state, LabState::Unknown);
    });
}

#[tokio::test]
async fn recent_heartbeat_means_slow_not_stuck() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let mut job = Job::new(
        JobId::new("job-1"),
        Some(lab.clone()),
        "tester",
        JobAction::Up,
        ctx.clock.epoch_ms(),
    );
    job.mark_running(AgentId::new("h1"), ctx.clock.epoch_ms());
    ctx.controller
        .store()
        .commit([Change::JobCreated { job }])
        .unwrap();

    ctx.clock.advance(Duration::from_secs(400));
    ctx.controller.job_heartbeat(&JobId::new("job-1")).unwrap();
    ctx.clock.advance(Duration::from_secs(100));

    let failed = ctx.controller.job_health_pass().await.unwrap();
    assert!(failed.is_empty());
    assert_eq!(
        ctx.controller
            .store()
            .read(|db| db.jobs[&JobId::new("job-1")].status),
        JobStatus::Running
    );
}

#[tokio::test]
async fn queued_jobs_are_not_stuck() {
    let ctx = context();
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    ctx.controller
        .submit_job(Some(lab), "tester", JobAction::Up)
        .unwrap();
    ctx.clock.advance(Duration::from_secs(1_000));
    assert!(ctx.controller.job_health_pass().await.unwrap().is_empty());
}

#[tokio::test]
async fn update_job_past_restart_timeout_fails() {
    let ctx = context();
    let mut job = Job::new(
        JobId::new("job-u1"),
        None,
        "tester",
        JobAction::AgentUpdate(AgentId::new("h1")),
        ctx.clock.epoch_ms(),
    );
    job.update_target = Some(UpdateTarget {
        version: Some("2.0.0".to_string()),
        commit: None,
    });
    ctx.controller
        .store()
        .commit([Change::JobCreated { job }])
        .unwrap();

    ctx.clock.advance(Duration::from_secs(100));
    assert!(ctx.controller.job_health_pass().await.unwrap().is_empty());

    ctx.clock.advance(Duration::from_secs(300));
    let failed = ctx.controller.job_health_pass().await.unwrap();
    assert_eq!(failed, vec![JobId::new("job-u1")]);
    let job = ctx
        .controller
        .store()
        .read(|db| db.jobs[&JobId::new("job-u1")].clone());
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.log.contains("did not re-register"));
}
