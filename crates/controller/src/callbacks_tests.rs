// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{context, create_lab, node_id, register_agent};
use arche_core::{AgentId, Job, JobId, LabId};
use arche_storage::Change;

fn running_job(ctx: &crate::test_helpers::TestContext, id: &str, lab: &LabId) -> JobId {
    let mut job = Job::new(
        JobId::new(id),
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
    JobId::new(id)
}

fn completion(status: &str) -> JobCallback {
    JobCallback {
        status: status.to_string(),
        started_at_ms: None,
        completed_at_ms: None,
        stdout: "work done".to_string(),
        stderr: String::new(),
        node_states: vec![NodeStateReport {
            node_name: "r1".to_string(),
            status: "running".to_string(),
        }],
    }
}

#[tokio::test]
async fn completion_callback_ingests_node_states() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let job_id = running_job(&ctx, "job-1", &lab);

    ctx.controller
        .job_callback(&job_id, completion("completed"))
        .await
        .unwrap();

    ctx.controller.store().read(|db| {
        assert_eq!(db.jobs[&job_id].status, JobStatus::Completed);
        assert!(db.jobs[&job_id].log.contains("work done"));
        assert_eq!(
            db.node_state(&lab, &node_id("lab-1", "r1")).unwrap().actual,
            ActualState::Running
        );
        assert_eq!(db.labs[&lab].state, LabState::Running);
    });
}

#[tokio::test]
async fn repeat_callbacks_for_terminal_jobs_are_acknowledged() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let job_id = running_job(&ctx, "job-1", &lab);

    ctx.controller
        .job_callback(&job_id, completion("completed"))
        .await
        .unwrap();
    let log_before = ctx
        .controller
        .store()
        .read(|db| db.jobs[&job_id].log.clone());

    // the repeat changes nothing
    ctx.controller
        .job_callback(&job_id, completion("failed"))
        .await
        .unwrap();
    ctx.controller.store().read(|db| {
        assert_eq!(db.jobs[&job_id].status, JobStatus::Completed);
        assert_eq!(db.jobs[&job_id].log, log_before);
    });
}

#[tokio::test]
async fn failure_callback_fails_the_job_and_errors_the_lab() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let job_id = running_job(&ctx, "job-1", &lab);

    let mut payload = completion("failed");
    payload.stderr = "pull access denied for alpine".to_string();
    payload.node_states.clear();
    ctx.controller.job_callback(&job_id, payload).await.unwrap();

    ctx.controller.store().read(|db| {
        assert_eq!(db.jobs[&job_id].status, JobStatus::Failed);
        assert_eq!(db.labs[&lab].state, LabState::Error);
    });
}

#[tokio::test]
async fn heartbeat_refreshes_running_jobs() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let job_id = running_job(&ctx, "job-1", &lab);

    ctx.clock.advance(std::time::Duration::from_secs(60));
    ctx.controller.job_heartbeat(&job_id).unwrap();
    let age = ctx
        .controller
        .store()
        .read(|db| db.jobs[&job_id].liveness_age_ms(ctx.clock.epoch_ms()));
    assert_eq!(age, 0);
}

#[tokio::test]
async fn dead_letter_with_payload_replays_the_callback() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let job_id = running_job(&ctx, "job-1", &lab);

    ctx.controller
        .dead_letter(&job_id, Some(completion("completed")))
        .await
        .unwrap();
    assert_eq!(
        ctx.controller.store().read(|db| db.jobs[&job_id].status),
        JobStatus::Completed
    );
}

#[tokio::test]
async fn dead_letter_without_payload_fails_with_marker_and_lab_unknown() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let job_id = running_job(&ctx, "job-1", &lab);

    ctx.controller.dead_letter(&job_id, None).await.unwrap();

    ctx.controller.store().read(|db| {
        let job = &db.jobs[&job_id];
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.log.contains("callback delivery failed"));
        assert_eq!(
            job.failure_reason,
            Some(arche_core::FailureReason::CallbackLost)
        );
        assert_eq!(db.labs[&lab].state, LabState::Unknown);
    });
}

#[tokio::test]
async fn agent_update_progress_appends_log() {
    let ctx = context();
    let mut job = Job::new(
        JobId::new("job-u1"),
        None,
        "tester",
        JobAction::AgentUpdate(AgentId::new("h1")),
        ctx.clock.epoch_ms(),
    );
    job.mark_running(AgentId::new("h1"), ctx.clock.epoch_ms());
    ctx.controller
        .store()
        .commit([Change::JobCreated { job }])
        .unwrap();

    ctx.controller
        .agent_update_progress(&JobId::new("job-u1"), "downloading 2.0.0")
        .unwrap();
    assert!(ctx
        .controller
        .store()
        .read(|db| db.jobs[&JobId::new("job-u1")].log.contains("downloading")));
}
