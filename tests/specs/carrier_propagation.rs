//! Carrier propagation across hosts: one side drops, the peer host is
//! told, the operational epoch moves, the change is broadcast.

use crate::prelude::*;
use arche_adapters::AgentCall;
use arche_controller::ServerMessage;
use arche_core::{AgentId, CarrierState, JobAction, OperState};

async fn cross_host_lab_up(h: &Harness) -> (arche_core::LabId, String) {
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
async fn carrier_off_reaches_the_remote_peer() {
    let h = harness();
    let (lab, link_name) = cross_host_lab_up(&h).await;

    let (_sub, mut rx) = h.controller.subscribe_lab(&lab).unwrap();
    let _ = rx.recv().await; // lab_state
    let _ = rx.recv().await; // initial_state
    let epoch_before = h
        .controller
        .store()
        .read(|db| db.link(&lab, &link_name).unwrap().oper_epoch);
    h.rpc.clear_calls();

    // h1 reports carrier-off on r1:eth1
    h.controller
        .carrier_state_changed(&lab, "r1", "eth1", CarrierState::Off)
        .await
        .unwrap();

    // h2 received set_carrier(off) for r3:eth1
    assert!(h.rpc.calls().iter().any(|c| matches!(
        c,
        AgentCall::SetCarrier { agent, node, interface, carrier, .. }
            if agent == &AgentId::new("h2")
                && node == "r3"
                && interface == "eth1"
                && *carrier == CarrierState::Off
    )));

    let link = h
        .controller
        .store()
        .read(|db| db.link(&lab, &link_name).cloned().unwrap());
    assert_eq!(link.source_carrier, CarrierState::Off);
    assert_eq!(link.target_carrier, CarrierState::Off);
    assert_eq!(link.source_oper_state, OperState::Down);
    assert!(link.oper_epoch > epoch_before, "epoch must move forward");

    // a link_state broadcast carries the updated payload
    match rx.recv().await.unwrap() {
        ServerMessage::LinkState { data } => {
            assert_eq!(data.link_name, link_name);
            assert_eq!(data.source_oper_state, "down");
            assert_eq!(data.oper_epoch, link.oper_epoch);
        }
        other => panic!("expected link_state, got {other:?}"),
    }
}
