//! Cross-host link creation: multi-host deploy, deterministic VNI, one
//! active tunnel, both sides attached.

use crate::prelude::*;
use arche_core::link::derive_vni;
use arche_core::{ActualState, AgentId, JobAction, JobStatus, TunnelStatus};

#[tokio::test]
async fn pinned_nodes_get_a_vxlan_tunnel() {
    let h = harness();
    register_agent(&h, "h1");
    register_agent(&h, "h2");
    let lab = create_lab(&h, "lab-1", &[("r1", Some("h1")), ("r3", Some("h2"))]);
    let link_name = add_link(&h, &lab, "r1", "r3");
    report_status(&h, "h1", &lab, vec![("r1", "running")]);
    report_status(&h, "h2", &lab, vec![("r3", "running")]);

    let job = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    h.controller.run_job(&job.id).await.unwrap();

    // one convergence cycle confirms the attachments
    h.controller.overlay_convergence_pass().await.unwrap();

    let expected_vni = derive_vni(&lab, &link_name);
    h.controller.store().read(|db| {
        assert_eq!(db.jobs[&job.id].status, JobStatus::Completed);

        // nodes landed on their pinned hosts
        assert_eq!(db.placements[&lab]["r1"], AgentId::new("h1"));
        assert_eq!(db.placements[&lab]["r3"], AgentId::new("h2"));
        for name in ["r1", "r3"] {
            assert_eq!(
                db.node_state(&lab, &node_id("lab-1", name)).unwrap().actual,
                ActualState::Running
            );
        }

        let link = db.link(&lab, &link_name).unwrap();
        assert!(link.is_cross_host);
        assert_eq!(link.vni, Some(expected_vni));
        assert!((1000..16_001_000).contains(&expected_vni));
        assert!(link.source_vxlan_attached);
        assert!(link.target_vxlan_attached);

        // exactly one active tunnel row for the link
        let tunnels: Vec<_> = db
            .tunnels
            .values()
            .filter(|t| t.link_name == link_name)
            .collect();
        assert_eq!(tunnels.len(), 1);
        assert_eq!(tunnels[0].status, TunnelStatus::Active);
        assert_eq!(tunnels[0].vni, expected_vni);
    });
}

#[tokio::test]
async fn repeated_connects_allocate_the_same_vni() {
    let h = harness();
    register_agent(&h, "h1");
    register_agent(&h, "h2");
    let lab = create_lab(&h, "lab-1", &[("r1", Some("h1")), ("r3", Some("h2"))]);
    let link_name = add_link(&h, &lab, "r1", "r3");
    report_status(&h, "h1", &lab, vec![("r1", "running")]);
    report_status(&h, "h2", &lab, vec![("r3", "running")]);
    let job = h
        .controller
        .submit_job(Some(lab.clone()), "tester", JobAction::Up)
        .unwrap();
    h.controller.run_job(&job.id).await.unwrap();

    let first = h
        .controller
        .store()
        .read(|db| db.link(&lab, &link_name).unwrap().vni);

    h.controller.disconnect_link(&lab, &link_name).await.unwrap();
    let again = h.controller.connect_link(&lab, &link_name).await.unwrap();
    assert_eq!(again.vni, first, "re-runs are idempotent on the VNI");
}
