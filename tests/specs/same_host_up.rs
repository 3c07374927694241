//! Same-host two-node lab up: one deploy job, both nodes running and
//! ready, the link up with a VLAN tag, the lab aggregated to running.

use crate::prelude::*;
use arche_core::{ActualState, AgentId, DesiredState, JobAction, JobStatus, LabState, LinkActual};

#[tokio::test]
async fn two_node_lab_comes_up_on_one_host() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None), ("r2", None)]);
    let link_name = add_link(&h, &lab, "r1", "r2");
    report_status(&h, "h1", &lab, vec![("r1", "running"), ("r2", "running")]);

    let job = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    h.controller.run_job(&job.id).await.unwrap();

    h.controller.store().read(|db| {
        // one deploy job, completed
        assert_eq!(db.jobs.len(), 1);
        assert_eq!(db.jobs[&job.id].status, JobStatus::Completed);

        // both nodes running and ready
        for name in ["r1", "r2"] {
            let ns = db.node_state(&lab, &node_id("lab-1", name)).unwrap();
            assert_eq!(ns.desired, DesiredState::Running);
            assert_eq!(ns.actual, ActualState::Running);
            assert!(ns.is_ready, "{name} should pass the readiness probe");
        }

        // the link reached up with a VLAN tag on one host
        let link = db.link(&lab, &link_name).unwrap();
        assert_eq!(link.actual, LinkActual::Up);
        assert!(!link.is_cross_host);
        assert!(link.source_vlan_tag.is_some());

        // one reservation row per endpoint
        assert_eq!(db.reservations[&lab].len(), 2);

        // placements landed on the single host
        assert_eq!(db.placements[&lab]["r1"], AgentId::new("h1"));
        assert_eq!(db.placements[&lab]["r2"], AgentId::new("h1"));

        // the lab aggregates to running
        assert_eq!(db.labs[&lab].state, LabState::Running);
    });
}
