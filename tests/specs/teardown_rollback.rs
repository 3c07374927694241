//! Cross-host teardown with a target-detach failure: the source is
//! re-attached, the tunnel is kept as failed, the link parks in error.

use crate::prelude::*;
use arche_adapters::{AgentApiError, AgentCall};
use arche_core::{AgentId, JobAction, LinkActual, TunnelStatus};

#[tokio::test]
async fn target_detach_failure_preserves_l2_continuity() {
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
    h.rpc.clear_calls();

    // the target-side detach fails
    h.rpc.fail_next_for(
        &AgentId::new("h2"),
        "detach_overlay_interface",
        AgentApiError::job("ovs port busy"),
    );
    let link = h
        .controller
        .disconnect_link(&lab, &link_name)
        .await
        .unwrap();

    assert_eq!(link.actual, LinkActual::Error);
    assert_eq!(
        link.error_message.as_deref(),
        Some("Failed to detach target endpoint")
    );
    assert!(link.source_vxlan_attached, "source was rolled back");
    assert!(!link.target_vxlan_attached);

    // the rollback re-attached the source on h1
    assert!(h.rpc.calls().iter().any(|c| matches!(
        c,
        AgentCall::AttachOverlay { agent, .. } if agent == &AgentId::new("h1")
    )));

    // the tunnel row was NOT deleted; it is failed
    h.controller.store().read(|db| {
        let tunnel = db.tunnel_for_link(&lab, &link_name).expect("tunnel kept");
        assert_eq!(tunnel.status, TunnelStatus::Failed);
    });
}
