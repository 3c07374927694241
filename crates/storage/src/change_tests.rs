// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use arche_core::test_support::{sample_lab, sample_link, sample_node};

#[test]
fn changes_serialize_with_scoped_type_tag() {
    let change = Change::LabCreated {
        lab: sample_lab("lab-1"),
    };
    let json = serde_json::to_value(&change).unwrap();
    assert_eq!(json["type"], "lab:created");
}

#[test]
fn roundtrip_representative_variants() {
    let changes = vec![
        Change::LabCreated {
            lab: sample_lab("lab-1"),
        },
        Change::NodeAdded {
            node: sample_node("lab-1", "r1"),
        },
        Change::NodeDesired {
            lab_id: LabId::new("lab-1"),
            node_id: NodeId::new("lab-1-r1"),
            desired: DesiredState::Running,
        },
        Change::LinkUpdated {
            link: sample_link("lab-1", "r1", "r2"),
        },
        Change::ReservationClaimed {
            lab_id: LabId::new("lab-1"),
            link_name: "r1:eth1-r2:eth1".to_string(),
            endpoints: vec![Endpoint::new("r1", "eth1"), Endpoint::new("r2", "eth1")],
        },
        Change::AgentStatusChanged {
            agent_id: AgentId::new("h1"),
            status: AgentStatus::Offline,
        },
        Change::ImageHostInvalidated {
            agent_id: AgentId::new("h1"),
        },
    ];
    for change in changes {
        let json = serde_json::to_string(&change).unwrap();
        let back: Change = serde_json::from_str(&json).unwrap();
        assert_eq!(back, change);
    }
}
