//! Admission conflicts and transitional-state guards.

use crate::prelude::*;
use arche_controller::ControllerError;
use arche_core::{
    ActualState, DesiredState, JobAction, JobStatus, SyncScope,
};
use arche_storage::Change;

#[tokio::test]
async fn sync_against_an_active_up_is_rejected_naming_it() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    let up = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();

    let err = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Sync(SyncScope::Lab))
        .unwrap_err();
    match err {
        ControllerError::JobConflict { job_id, action, status } => {
            assert_eq!(job_id, up.id);
            assert_eq!(action, "up");
            assert_eq!(status, JobStatus::Queued);
        }
        other => panic!("expected a job conflict, got {other}"),
    }

    // the original job proceeds unaffected
    assert!(h
        .controller
        .store()
        .read(|db| db.jobs[&up.id].status.is_active()));
}

#[tokio::test]
async fn sync_passes_may_interleave() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    h.controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Sync(SyncScope::Lab))
        .unwrap();
    assert!(h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Sync(SyncScope::Lab))
        .is_ok());
}

#[tokio::test]
async fn starting_a_stopping_node_is_a_conflict() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    h.controller
        .store()
        .commit([Change::NodeObserved {
            lab_id: lab.clone(),
            node_id: node_id("lab-1", "r1"),
            actual: ActualState::Stopping,
            epoch_ms: h.clock.epoch_ms(),
        }])
        .unwrap();

    let err = h
        .controller
        .set_node_desired(&lab, &node_id("lab-1", "r1"), DesiredState::Running, "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::TransitionalState(_)));
}

#[tokio::test]
async fn starting_a_running_node_creates_no_job() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    h.controller
        .store()
        .commit([Change::NodeObserved {
            lab_id: lab.clone(),
            node_id: node_id("lab-1", "r1"),
            actual: ActualState::Running,
            epoch_ms: h.clock.epoch_ms(),
        }])
        .unwrap();

    let job = h
        .controller
        .set_node_desired(&lab, &node_id("lab-1", "r1"), DesiredState::Running, "tester")
        .await
        .unwrap();
    assert!(job.is_none());
    assert_eq!(h.controller.store().read(|db| db.jobs.len()), 0);
}

#[tokio::test]
async fn stopping_a_starting_node_is_accepted() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    h.controller
        .store()
        .commit([
            Change::NodeDesired {
                lab_id: lab.clone(),
                node_id: node_id("lab-1", "r1"),
                desired: DesiredState::Running,
            },
            Change::NodeObserved {
                lab_id: lab.clone(),
                node_id: node_id("lab-1", "r1"),
                actual: ActualState::Starting,
                epoch_ms: h.clock.epoch_ms(),
            },
        ])
        .unwrap();

    let job = h
        .controller
        .set_node_desired(&lab, &node_id("lab-1", "r1"), DesiredState::Stopped, "tester")
        .await
        .unwrap();
    assert!(job.is_some(), "abort-slow-boot dispatches a job");
}

#[tokio::test]
async fn cancelled_jobs_leave_the_lab_to_reconciliation() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    let job = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    h.controller.cancel_job(&job.id).await.unwrap();

    h.controller.store().read(|db| {
        assert_eq!(db.jobs[&job.id].status, JobStatus::Cancelled);
        assert_eq!(db.labs[&lab].state, arche_core::LabState::Unknown);
    });
}
