//! Round-trip laws: desired-state toggles converge without job
//! leakage; adding and removing a cross-host link leaves no residue.

use crate::prelude::*;
use arche_core::{ActualState, DesiredState, JobAction, LinkActual};

#[tokio::test]
async fn desired_toggles_converge_back_to_running() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    let node = node_id("lab-1", "r1");

    for (desired, reported) in [
        (DesiredState::Running, "running"),
        (DesiredState::Stopped, "exited"),
        (DesiredState::Running, "running"),
    ] {
        if let Some(job) = h
            .controller
            .set_node_desired(&lab, &node, desired, "tester")
            .await
            .unwrap()
        {
            h.controller.run_job(&job.id).await.unwrap();
        }
        report_status(&h, "h1", &lab, vec![("r1", reported)]);
        h.controller.reconcile_lab(&lab).await.unwrap();
    }

    h.controller.store().read(|db| {
        let ns = db.node_state(&lab, &node).unwrap();
        assert_eq!(ns.desired, DesiredState::Running);
        assert_eq!(ns.actual, ActualState::Running);

        // no stale active jobs left behind
        let active = db.jobs.values().filter(|j| j.status.is_active()).count();
        assert_eq!(active, 0);
        // at most one job row per toggle that dispatched
        assert!(db.jobs.len() <= 3);
    });
}

#[tokio::test]
async fn cross_host_link_add_then_remove_leaves_no_residue() {
    let h = harness();
    register_agent(&h, "h1");
    register_agent(&h, "h2");
    let lab = create_lab(&h, "lab-1", &[("r1", Some("h1")), ("r3", Some("h2"))]);
    report_status(&h, "h1", &lab, vec![("r1", "running")]);
    report_status(&h, "h2", &lab, vec![("r3", "running")]);
    let job = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    h.controller.run_job(&job.id).await.unwrap();

    let link = h
        .controller
        .add_link(
            &lab,
            arche_core::link::Endpoint::new("r1", "eth1"),
            arche_core::link::Endpoint::new("r3", "eth1"),
        )
        .await
        .unwrap();
    assert_eq!(link.actual, LinkActual::Up);

    h.controller
        .remove_link_definition(&lab, &link.name)
        .await
        .unwrap();

    h.controller.store().read(|db| {
        assert!(db.link(&lab, &link.name).is_none());
        assert!(db.tunnels.is_empty(), "tunnel row removed with the link");
        assert!(db.reservations[&lab].is_empty());
    });

    // a convergence cycle later no agent declares the dead link
    h.rpc.clear_calls();
    h.controller.overlay_convergence_pass().await.unwrap();
    assert!(h.rpc.calls().is_empty());
}

#[tokio::test]
async fn destroy_after_deploy_returns_the_lab_to_stopped() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    report_status(&h, "h1", &lab, vec![("r1", "running")]);
    let up = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    h.controller.run_job(&up.id).await.unwrap();

    let down = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Down)
        .unwrap();
    h.controller.run_job(&down.id).await.unwrap();

    h.controller.store().read(|db| {
        assert_eq!(db.labs[&lab].state, arche_core::LabState::Stopped);
        let ns = db.node_state(&lab, &node_id("lab-1", "r1")).unwrap();
        assert_eq!(ns.desired, DesiredState::Stopped);
        assert_eq!(ns.actual, ActualState::Stopped);
    });
}
