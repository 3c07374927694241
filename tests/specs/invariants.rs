//! Cross-cutting invariants that must hold for all traces.

use crate::prelude::*;
use arche_core::{CarrierState, JobAction, LinkActual, LinkDesired, TunnelStatus};

async fn deployed_cross_host(h: &Harness) -> (arche_core::LabId, String) {
    register_agent(h, "h1");
    register_agent(h, "h2");
    let lab = create_lab(h, "lab-1", &[("r1", Some("h1")), ("r3", Some("h2"))]);
    let link_name = add_link(h, &lab, "r1", "r3");
    report_status(h, "h1", &lab, vec![("r1", "running")]);
    report_status(h, "h2", &lab, vec![("r3", "running")]);
    let job = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    h.controller.run_job(&job.id).await.unwrap();
    (lab, link_name)
}

#[tokio::test]
async fn up_links_hold_exactly_two_reservations() {
    let h = harness();
    let (lab, link_name) = deployed_cross_host(&h).await;
    h.controller.store().read(|db| {
        let link = db.link(&lab, &link_name).unwrap();
        assert_eq!(link.desired, LinkDesired::Up);
        assert_eq!(link.actual, LinkActual::Up);
        let rows: Vec<_> = db.reservations[&lab]
            .iter()
            .filter(|r| r.link_name == link_name)
            .collect();
        assert_eq!(rows.len(), 2);
    });
}

#[tokio::test]
async fn active_tunnels_map_to_exactly_one_cross_host_link() {
    let h = harness();
    let (lab, _link) = deployed_cross_host(&h).await;
    h.controller.store().read(|db| {
        for tunnel in db.tunnels.values() {
            if tunnel.status != TunnelStatus::Active {
                continue;
            }
            let matching: Vec<_> = db
                .links
                .values()
                .flat_map(|m| m.values())
                .filter(|l| l.is_cross_host && l.lab_id == lab && l.name == tunnel.link_name)
                .collect();
            assert_eq!(matching.len(), 1);
        }
    });
}

#[tokio::test]
async fn running_jobs_always_carry_an_agent() {
    let h = harness();
    let (_lab, _link) = deployed_cross_host(&h).await;
    h.controller.store().read(|db| {
        for job in db.jobs.values() {
            if job.status == arche_core::JobStatus::Running {
                assert!(job.agent_id.is_some(), "running job without an agent");
            }
        }
    });
}

#[tokio::test]
async fn oper_epoch_never_decreases() {
    let h = harness();
    let (lab, link_name) = deployed_cross_host(&h).await;

    let mut last = h
        .controller
        .store()
        .read(|db| db.link(&lab, &link_name).unwrap().oper_epoch);
    for carrier in [
        CarrierState::Off,
        CarrierState::On,
        CarrierState::Off,
        CarrierState::On,
    ] {
        h.controller
            .carrier_state_changed(&lab, "r1", "eth1", carrier)
            .await
            .unwrap();
        let epoch = h
            .controller
            .store()
            .read(|db| db.link(&lab, &link_name).unwrap().oper_epoch);
        assert!(epoch >= last);
        last = epoch;
    }
}

#[tokio::test]
async fn enforcement_attempts_are_zero_after_every_desired_change() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    let node = node_id("lab-1", "r1");

    for desired in [
        arche_core::DesiredState::Running,
        arche_core::DesiredState::Stopped,
        arche_core::DesiredState::Running,
    ] {
        let _ = h
            .controller
            .set_node_desired(&lab, &node, desired, "tester")
            .await;
        let attempts = h
            .controller
            .store()
            .read(|db| db.node_state(&lab, &node).unwrap().enforcement_attempts);
        assert_eq!(attempts, 0);
    }
}

#[tokio::test]
async fn one_node_state_per_node_even_across_restart() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    // adding the same node again violates uniqueness
    let duplicate = arche_core::Node::new(
        node_id("lab-1", "r1"),
        lab.clone(),
        "r1",
        "linux",
        "alpine:3",
    );
    assert!(h.controller.store().add_node(duplicate).is_err());
    h.controller
        .store()
        .read(|db| assert_eq!(db.node_states[&lab].len(), 1));
}

#[tokio::test]
async fn declare_state_with_nothing_to_declare_calls_nobody() {
    let h = harness();
    register_agent(&h, "h1");
    register_agent(&h, "h2");
    h.rpc.clear_calls();
    h.controller.overlay_convergence_pass().await.unwrap();
    assert!(h.rpc.calls().is_empty());
}

#[tokio::test]
async fn deploy_lock_contention_reports_the_nodes() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None), ("r2", None)]);
    report_status(&h, "h1", &lab, vec![("r1", "running"), ("r2", "running")]);

    use arche_adapters::SharedBus;
    // a concurrent deploy holds r2
    assert!(h
        .bus
        .set_nx(
            &format!("deploy_lock:{lab}:r2"),
            "job-other",
            std::time::Duration::from_secs(600)
        )
        .await
        .unwrap());

    let job = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    let err = h.controller.run_job(&job.id).await.unwrap_err();
    match err {
        arche_controller::ControllerError::DeployLocked { nodes } => {
            assert_eq!(nodes, vec!["r2".to_string()]);
        }
        other => panic!("expected DeployLocked, got {other}"),
    }
    // no dangling lock for r1
    assert!(h
        .bus
        .get(&format!("deploy_lock:{lab}:r1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn deploy_proceeds_when_the_lock_store_is_down() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    report_status(&h, "h1", &lab, vec![("r1", "running")]);
    h.bus.set_lock_failure(true);

    let job = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    h.controller.run_job(&job.id).await.unwrap();
    h.bus.set_lock_failure(false);

    assert_eq!(
        h.controller.store().read(|db| db.jobs[&job.id].status),
        arche_core::JobStatus::Completed
    );
}
