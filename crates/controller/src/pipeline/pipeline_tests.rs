// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::ControllerError;
use crate::test_helpers::{context, create_lab, create_pinned_node, register_agent};
use arche_adapters::{AgentApiError, AgentCall};
use arche_core::{AgentId, LabId};

#[test]
fn conflicting_job_is_rejected_naming_the_holder() {
    let ctx = context();
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let up = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();

    let err = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Sync(SyncScope::Lab))
        .unwrap_err();
    match err {
        ControllerError::JobConflict { job_id, action, .. } => {
            assert_eq!(job_id, up.id);
            assert_eq!(action, "up");
        }
        other => panic!("expected conflict, got {other}"),
    }

    // The original job proceeds unaffected
    let original = ctx.controller.store().read(|db| db.jobs[&up.id].clone());
    assert!(original.status.is_active());
}

#[test]
fn sync_does_not_conflict_with_sync() {
    let ctx = context();
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    ctx.controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Sync(SyncScope::Lab))
        .unwrap();
    assert!(ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Sync(SyncScope::Lab))
        .is_ok());
}

#[test]
fn submit_for_missing_lab_is_not_found() {
    let ctx = context();
    assert!(ctx
        .controller
        .submit_job(Some(LabId::new("nope")), "tester", JobAction::Up)
        .is_err());
}

#[tokio::test]
async fn deploy_runs_to_completion_and_places_nodes() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1", "r2"]);
    ctx.rpc
        .set_lab_status(&AgentId::new("h1"), &lab, vec![("r1", "running"), ("r2", "running")]);

    let job = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    let mut events = ctx.bus.subscribe();
    ctx.controller.run_job(&job.id).await.unwrap();

    let (status, agent_id) = ctx
        .controller
        .store()
        .read(|db| (db.jobs[&job.id].status, db.jobs[&job.id].agent_id.clone()));
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(agent_id, Some(AgentId::new("h1")));

    ctx.controller.store().read(|db| {
        let placements = &db.placements[&lab];
        assert_eq!(placements.get("r1"), Some(&AgentId::new("h1")));
        assert_eq!(placements.get("r2"), Some(&AgentId::new("h1")));
        for ns in db.node_states[&lab].values() {
            assert_eq!(ns.desired, DesiredState::Running);
            assert_eq!(ns.actual, ActualState::Running);
        }
        assert_eq!(db.labs[&lab].state, LabState::Running);
    });

    // deploy lock was released
    assert!(ctx
        .bus
        .get(&format!("deploy_lock:{lab}:r1"))
        .await
        .unwrap()
        .is_none());

    let kinds: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind())
        .collect::<Vec<_>>();
    assert!(kinds.contains(&"job_completed"));
    assert!(kinds.contains(&"deploy_finished"));
}

#[tokio::test]
async fn deploy_without_agents_fails_cleanly() {
    let ctx = context();
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let job = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    let err = ctx.controller.run_job(&job.id).await.unwrap_err();
    assert!(matches!(err, ControllerError::NoAgent(_)));

    let status = ctx.controller.store().read(|db| db.jobs[&job.id].status);
    assert_eq!(status, JobStatus::Failed);
}

#[tokio::test]
async fn deploy_with_missing_image_fails_naming_it() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    ctx.rpc.set_image_missing(&AgentId::new("h1"), "alpine:3");

    let job = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    let err = ctx.controller.run_job(&job.id).await.unwrap_err();
    match err {
        ControllerError::MissingImages { images } => {
            assert!(images[0].contains("alpine:3"));
        }
        other => panic!("expected missing images, got {other}"),
    }
    // a sync was kicked off for the missing image
    assert!(ctx
        .rpc
        .calls()
        .iter()
        .any(|c| matches!(c, AgentCall::SyncImage { image, .. } if image == "alpine:3")));
}

#[tokio::test]
async fn transport_failure_retries_with_supersedes_chain() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    ctx.rpc.fail_next(
        "deploy",
        AgentApiError::Unavailable("connection refused".to_string()),
    );

    let job = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    let err = ctx.controller.run_job(&job.id).await.unwrap_err();
    assert!(err.is_retriable());

    ctx.controller.store().read(|db| {
        let failed = &db.jobs[&job.id];
        assert_eq!(failed.status, JobStatus::Failed);
        let retry = db
            .jobs
            .values()
            .find(|j| j.supersedes.as_ref() == Some(&job.id))
            .expect("retry job exists");
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.action, JobAction::Up);
        assert!(retry.status.is_active());
    });
}

#[tokio::test]
async fn application_failure_does_not_retry_and_errors_the_lab() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    ctx.rpc.fail_next(
        "deploy",
        AgentApiError::Job {
            message: "pull access denied for alpine".to_string(),
            stdout: String::new(),
            stderr: "pull access denied for alpine".to_string(),
        },
    );

    let job = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    assert!(ctx.controller.run_job(&job.id).await.is_err());

    ctx.controller.store().read(|db| {
        assert_eq!(db.jobs[&job.id].status, JobStatus::Failed);
        assert_eq!(
            db.jobs[&job.id].failure_reason,
            Some(arche_core::FailureReason::ImagePull)
        );
        assert!(db
            .jobs
            .values()
            .all(|j| j.supersedes.as_ref() != Some(&job.id)));
        assert_eq!(db.labs[&lab].state, LabState::Error);
        assert!(db.labs[&lab]
            .error_message
            .as_deref()
            .unwrap()
            .contains("pull access denied"));
    });
}

#[tokio::test]
async fn async_deploy_waits_for_callback() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    ctx.rpc.set_async_deploy(&AgentId::new("h1"));

    let job = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    ctx.controller.run_job(&job.id).await.unwrap();
    let status = ctx.controller.store().read(|db| db.jobs[&job.id].status);
    assert_eq!(status, JobStatus::Running);
}

#[tokio::test]
async fn multi_host_destroy_tolerates_offline_host() {
    let ctx = context();
    register_agent(&ctx, "h1");
    register_agent(&ctx, "h2");
    let lab = create_lab(&ctx, "lab-1", &[]);
    create_pinned_node(&ctx, &lab, "r1", "h1");
    create_pinned_node(&ctx, &lab, "r3", "h2");
    ctx.rpc.set_unavailable(&AgentId::new("h2"));
    // h2 goes quiet and ages out; h1 keeps beating
    ctx.clock.advance(std::time::Duration::from_secs(120));
    ctx.controller
        .agent_heartbeat(&AgentId::new("h1"), Default::default())
        .unwrap();

    let job = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Down)
        .unwrap();
    ctx.controller.run_job(&job.id).await.unwrap();

    ctx.controller.store().read(|db| {
        // completes despite the offline host, downgraded to a partial
        // failure state
        assert_eq!(db.jobs[&job.id].status, JobStatus::Completed);
        assert_eq!(db.labs[&lab].state, LabState::Error);
        assert!(db.labs[&lab]
            .error_message
            .as_deref()
            .unwrap()
            .contains("offline"));
        for ns in db.node_states[&lab].values() {
            assert_eq!(ns.desired, DesiredState::Stopped);
        }
    });
    // destroy was attempted on the online host only
    let destroys: Vec<_> = ctx
        .rpc
        .calls()
        .into_iter()
        .filter(|c| matches!(c, AgentCall::Destroy { .. }))
        .collect();
    assert_eq!(destroys.len(), 1);
}

#[tokio::test]
async fn restart_runs_down_then_up() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    ctx.rpc
        .set_lab_status(&AgentId::new("h1"), &lab, vec![("r1", "running")]);
    // bring the lab up first so the restart has something to destroy
    let initial = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    ctx.controller.run_job(&initial.id).await.unwrap();
    ctx.rpc.clear_calls();

    let (down, up) = ctx.controller.restart_lab(&lab, "tester").await.unwrap();
    assert_eq!(down.action, JobAction::Down);
    assert_eq!(up.action, JobAction::Up);
    assert_eq!(up.parent_id, Some(down.id.clone()));

    ctx.controller.store().read(|db| {
        assert_eq!(db.jobs[&down.id].status, JobStatus::Completed);
        assert_eq!(db.jobs[&up.id].status, JobStatus::Completed);
        assert_eq!(db.labs[&lab].state, LabState::Running);
    });
    // the destroy ran before the deploy
    let calls = ctx.rpc.calls();
    let destroy_at = calls
        .iter()
        .position(|c| matches!(c, AgentCall::Destroy { .. }))
        .unwrap();
    let deploy_at = calls
        .iter()
        .position(|c| matches!(c, AgentCall::Deploy { .. }))
        .unwrap();
    assert!(destroy_at < deploy_at);
}

#[tokio::test]
async fn cancel_sets_lab_unknown() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    let job = ctx
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();

    ctx.controller.cancel_job(&job.id).await.unwrap();
    ctx.controller.store().read(|db| {
        assert_eq!(db.jobs[&job.id].status, JobStatus::Cancelled);
        assert!(db.jobs[&job.id].log.contains("cancelled by user"));
        assert_eq!(db.labs[&lab].state, LabState::Unknown);
    });

    // cancel is idempotent on terminal jobs
    ctx.controller.cancel_job(&job.id).await.unwrap();
}
