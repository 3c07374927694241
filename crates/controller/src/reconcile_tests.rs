// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{context, create_lab, node_id, place_node, register_agent};
use arche_adapters::AgentCall;
use arche_core::{ActualState, AgentId};
use arche_storage::Change;

#[tokio::test]
async fn observed_statuses_are_imported() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1", "r2"]);
    place_node(&ctx, &lab, "r1", "h1");
    place_node(&ctx, &lab, "r2", "h1");
    ctx.rpc.set_lab_status(
        &AgentId::new("h1"),
        &lab,
        vec![("r1", "running"), ("r2", "exited")],
    );

    let state = ctx.controller.reconcile_lab(&lab).await.unwrap();
    assert_eq!(state, LabState::Running);

    ctx.controller.store().read(|db| {
        assert_eq!(
            db.node_state(&lab, &node_id("lab-1", "r1")).unwrap().actual,
            ActualState::Running
        );
        assert_eq!(
            db.node_state(&lab, &node_id("lab-1", "r2")).unwrap().actual,
            ActualState::Stopped
        );
    });
}

#[tokio::test]
async fn readiness_probe_sets_is_ready() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    place_node(&ctx, &lab, "r1", "h1");
    ctx.rpc
        .set_lab_status(&AgentId::new("h1"), &lab, vec![("r1", "running")]);
    ctx.rpc.set_not_ready("r1");

    ctx.controller.reconcile_lab(&lab).await.unwrap();
    assert!(!ctx
        .controller
        .store()
        .read(|db| db.node_state(&lab, &node_id("lab-1", "r1")).unwrap().is_ready));

    ctx.rpc.set_ready("r1");
    ctx.controller.reconcile_lab(&lab).await.unwrap();
    assert!(ctx
        .controller
        .store()
        .read(|db| db.node_state(&lab, &node_id("lab-1", "r1")).unwrap().is_ready));
}

#[tokio::test]
async fn recovery_clears_stale_error_message() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    place_node(&ctx, &lab, "r1", "h1");
    ctx.controller
        .store()
        .commit([Change::NodeErrored {
            lab_id: lab.clone(),
            node_id: node_id("lab-1", "r1"),
            message: "boot failed".to_string(),
        }])
        .unwrap();
    ctx.rpc
        .set_lab_status(&AgentId::new("h1"), &lab, vec![("r1", "running")]);

    ctx.controller.reconcile_lab(&lab).await.unwrap();
    let ns = ctx
        .controller
        .store()
        .read(|db| db.node_state(&lab, &node_id("lab-1", "r1")).cloned().unwrap());
    assert_eq!(ns.actual, ActualState::Running);
    assert!(ns.error_message.is_none());
}

#[tokio::test]
async fn orphan_containers_are_logged_never_destroyed() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    place_node(&ctx, &lab, "r1", "h1");
    ctx.rpc.set_lab_status(
        &AgentId::new("h1"),
        &lab,
        vec![("r1", "running"), ("mystery-container", "running")],
    );

    ctx.controller.reconcile_lab(&lab).await.unwrap();

    // no destructive call was issued for the orphan
    assert!(!ctx.rpc.calls().iter().any(|c| matches!(
        c,
        AgentCall::Destroy { .. } | AgentCall::NodeAction { .. } | AgentCall::CleanupOrphans { .. }
    )));
}

#[tokio::test]
async fn offline_agents_are_skipped() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    place_node(&ctx, &lab, "r1", "h1");
    ctx.clock.advance(std::time::Duration::from_secs(120));

    ctx.controller.reconcile_lab(&lab).await.unwrap();
    assert!(ctx.rpc.calls().is_empty());
}

#[tokio::test]
async fn deploy_error_is_sticky_until_nodes_run() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    place_node(&ctx, &lab, "r1", "h1");
    ctx.controller
        .set_lab_state(&lab, LabState::Error, Some("deploy failed".to_string()))
        .unwrap();
    ctx.rpc
        .set_lab_status(&AgentId::new("h1"), &lab, vec![("r1", "exited")]);

    let state = ctx.controller.reconcile_lab(&lab).await.unwrap();
    assert_eq!(state, LabState::Error);

    ctx.rpc
        .set_lab_status(&AgentId::new("h1"), &lab, vec![("r1", "running")]);
    let state = ctx.controller.reconcile_lab(&lab).await.unwrap();
    assert_eq!(state, LabState::Running);
}

#[test]
fn flap_detector_counts_within_window() {
    let detector = FlapDetector::new();
    let lab = LabId::new("lab-1");
    let node = NodeId::new("r1");

    assert!(!detector.record(&lab, &node, 1_000));
    assert!(!detector.record(&lab, &node, 2_000));
    assert!(!detector.record(&lab, &node, 3_000));
    assert!(detector.record(&lab, &node, 4_000), "fourth flap in a minute");

    // old transitions age out of the window
    assert!(!detector.record(&lab, &node, 120_000));
    assert_eq!(detector.transition_count(&lab, &node), 1);
}

#[tokio::test]
async fn discovery_relearns_lost_placements() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab = create_lab(&ctx, "lab-1", &["r1"]);
    ctx.rpc.set_discovered(
        &AgentId::new("h1"),
        vec![arche_adapters::DiscoveredLab {
            lab_id: lab.clone(),
            nodes: vec!["r1".to_string()],
        }],
    );

    ctx.controller.discover_pass().await.unwrap();
    ctx.controller.store().read(|db| {
        assert_eq!(db.placements[&lab]["r1"], AgentId::new("h1"));
    });
}

#[tokio::test]
async fn discovered_unknown_labs_are_left_alone() {
    let ctx = context();
    register_agent(&ctx, "h1");
    ctx.rpc.set_discovered(
        &AgentId::new("h1"),
        vec![arche_adapters::DiscoveredLab {
            lab_id: LabId::new("ghost-lab"),
            nodes: vec!["r1".to_string()],
        }],
    );

    ctx.controller.discover_pass().await.unwrap();
    // nothing destructive was issued and no rows appeared
    assert!(!ctx
        .rpc
        .calls()
        .iter()
        .any(|c| matches!(c, AgentCall::Destroy { .. })));
    ctx.controller
        .store()
        .read(|db| assert!(db.placements.is_empty()));
}

#[tokio::test]
async fn reconcile_pass_covers_every_lab() {
    let ctx = context();
    register_agent(&ctx, "h1");
    let lab_a = create_lab(&ctx, "lab-a", &["r1"]);
    let lab_b = create_lab(&ctx, "lab-b", &["r1"]);
    place_node(&ctx, &lab_a, "r1", "h1");
    place_node(&ctx, &lab_b, "r1", "h1");

    ctx.controller.reconcile_pass().await.unwrap();
    let pulls: Vec<_> = ctx
        .rpc
        .calls()
        .into_iter()
        .filter(|c| matches!(c, AgentCall::GetLabStatus { .. }))
        .collect();
    assert_eq!(pulls.len(), 2);
}
