//! Enforcement exhaustion: three failed starts circuit-break the node;
//! a desired-state change re-arms the loop and clears the cooldown.

use crate::prelude::*;
use arche_adapters::{AgentApiError, SharedBus};
use arche_core::{ActualState, DesiredState};
use arche_storage::Change;
use std::time::Duration;

#[tokio::test]
async fn three_failed_starts_circuit_break_the_node() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    let node = node_id("lab-1", "r1");
    h.controller
        .store()
        .commit([Change::NodeDesired {
            lab_id: lab.clone(),
            node_id: node.clone(),
            desired: DesiredState::Running,
        }])
        .unwrap();

    for _ in 0..3 {
        h.rpc
            .fail_next("node_action", AgentApiError::job("start exploded"));
        h.controller
            .store()
            .commit([Change::NodeObserved {
                lab_id: lab.clone(),
                node_id: node.clone(),
                actual: ActualState::Stopped,
                epoch_ms: h.clock.epoch_ms(),
            }])
            .unwrap();
        h.controller.enforcement_pass().await.unwrap();
        h.clock.advance(Duration::from_secs(31));
    }

    let summary = h.controller.enforcement_pass().await.unwrap();
    assert_eq!(summary.exhausted, 1);

    let ns = h
        .controller
        .store()
        .read(|db| db.node_state(&lab, &node).cloned().unwrap());
    assert_eq!(ns.actual, ActualState::Error);
    assert_eq!(ns.enforcement_attempts, 3);
    assert!(ns.enforcement_failed_at_ms.is_some());

    // no further enforcement while the circuit is open
    h.clock.advance(Duration::from_secs(31));
    let idle = h.controller.enforcement_pass().await.unwrap();
    assert_eq!(idle.dispatched, 0);

    // the user changing desired state resets counters and clears the
    // cooldown key immediately
    h.controller
        .set_node_desired(&lab, &node, DesiredState::Stopped, "tester")
        .await
        .unwrap();
    let ns = h
        .controller
        .store()
        .read(|db| db.node_state(&lab, &node).cloned().unwrap());
    assert_eq!(ns.enforcement_attempts, 0);
    assert!(ns.enforcement_failed_at_ms.is_none());
    assert!(h
        .bus
        .get(&format!("enforce_cooldown:{lab}:{node}"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn converged_nodes_are_never_enforced() {
    let h = harness();
    register_agent(&h, "h1");
    let lab = create_lab(&h, "lab-1", &[("r1", None)]);
    report_status(&h, "h1", &lab, vec![("r1", "running")]);
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
                actual: ActualState::Running,
                epoch_ms: h.clock.epoch_ms(),
            },
        ])
        .unwrap();

    let summary = h.controller.enforcement_pass().await.unwrap();
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.skipped, 0);
}
