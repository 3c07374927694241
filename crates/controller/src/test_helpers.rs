// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for controller tests.

use crate::controller::Controller;
use crate::env::Config;
use arche_adapters::{FakeAgentApi, MemoryBus};
use arche_core::agent::ResourceUsage;
use arche_core::link::Endpoint;
use arche_core::{AgentId, FakeClock, LabId, Node, NodeId};
use arche_storage::{Change, Store};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) type TestController = Controller<FakeAgentApi, MemoryBus<FakeClock>, FakeClock>;

pub(crate) struct TestContext {
    pub controller: TestController,
    pub rpc: FakeAgentApi,
    pub bus: MemoryBus<FakeClock>,
    pub clock: FakeClock,
    _dir: tempfile::TempDir,
}

pub(crate) fn test_config(state_dir: PathBuf) -> Config {
    Config {
        state_dir,
        agent_token: "test-token".to_string(),
        agent_stale_timeout: Duration::from_secs(90),
        enforcement_max_retries: 3,
        enforcement_auto_restart: true,
        enforcement_cooldown: Duration::from_secs(30),
        enforcement_interval: Duration::from_secs(60),
        reconcile_interval: Duration::from_secs(30),
        overlay_interval: Duration::from_secs(60),
        image_sync_enabled: true,
        image_pre_deploy_check: true,
        job_retention_days: 7,
        snapshot_retention_days: 30,
        disk_warning_pct: 80,
        disk_critical_pct: 90,
        db_pool_warning_pct: 75,
        db_pool_critical_pct: 90,
        process_memory_warning_mb: 2048,
        job_stuck_threshold: Duration::from_secs(300),
        job_retry_max: 3,
        deploy_lock_ttl: Duration::from_secs(600),
        rpc_attempts: 3,
        agent_update_restart_timeout: Duration::from_secs(300),
        sweep_interval: Duration::from_secs(3600),
        job_health_interval: Duration::from_secs(60),
        stale_check_interval: Duration::from_secs(30),
        checkpoint_interval: Duration::from_secs(300),
    }
}

pub(crate) fn context() -> TestContext {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(
        &dir.path().join("wal").join("changes.wal"),
        &dir.path().join("snapshot.json"),
    )
    .unwrap();
    let clock = FakeClock::new();
    let bus = MemoryBus::new(clock.clone());
    let rpc = FakeAgentApi::new();
    let config = test_config(dir.path().to_path_buf());
    let controller = Controller::new(store, rpc.clone(), bus.clone(), clock.clone(), config);
    TestContext {
        controller,
        rpc,
        bus,
        clock,
        _dir: dir,
    }
}

/// Register an online agent with a fresh heartbeat.
pub(crate) fn register_agent(ctx: &TestContext, id: &str) {
    ctx.controller
        .register_agent(crate::registry::AgentRegistration {
            id: AgentId::new(id),
            address: format!("{id}.example:8000"),
            version: Some("1.0.0".to_string()),
            commit: None,
            deployment_mode: None,
            capabilities: Default::default(),
            image_sync_strategy: None,
        })
        .unwrap();
    ctx.controller
        .agent_heartbeat(&AgentId::new(id), ResourceUsage::default())
        .unwrap();
}

/// Create a lab with linux nodes named as given.
pub(crate) fn create_lab(ctx: &TestContext, lab: &str, nodes: &[&str]) -> LabId {
    let lab_id = LabId::new(lab);
    ctx.controller
        .store()
        .create_lab(arche_core::Lab::new(lab_id.clone(), lab, "tester"))
        .unwrap();
    for name in nodes {
        ctx.controller
            .store()
            .add_node(Node::new(
                node_id(lab, name),
                lab_id.clone(),
                *name,
                "linux",
                "alpine:3",
            ))
            .unwrap();
    }
    lab_id
}

pub(crate) fn node_id(lab: &str, name: &str) -> NodeId {
    NodeId::new(format!("{lab}-{name}"))
}

/// Pin a node to a host at definition time.
pub(crate) fn create_pinned_node(ctx: &TestContext, lab: &LabId, name: &str, host: &str) {
    ctx.controller
        .store()
        .add_node(
            Node::new(
                node_id(lab.as_str(), name),
                lab.clone(),
                name,
                "linux",
                "alpine:3",
            )
            .with_host_pin(AgentId::new(host)),
        )
        .unwrap();
}

/// Place a node on a host, as a finished deploy would.
pub(crate) fn place_node(ctx: &TestContext, lab: &LabId, name: &str, host: &str) {
    ctx.controller
        .store()
        .commit([Change::PlacementSet {
            lab_id: lab.clone(),
            node_name: name.to_string(),
            agent_id: AgentId::new(host),
        }])
        .unwrap();
}

/// Mark a node as observed running.
pub(crate) fn observe_running(ctx: &TestContext, lab: &LabId, name: &str) {
    ctx.controller
        .store()
        .commit([Change::NodeObserved {
            lab_id: lab.clone(),
            node_id: node_id(lab.as_str(), name),
            actual: arche_core::ActualState::Running,
            epoch_ms: ctx.clock.epoch_ms(),
        }])
        .unwrap();
}

/// Add a link between `<a>:eth1` and `<b>:eth1` directly to the store.
pub(crate) fn add_link_row(ctx: &TestContext, lab: &LabId, a: &str, b: &str) -> String {
    let link = arche_core::LinkState::new(
        lab.clone(),
        Endpoint::new(a, "eth1"),
        Endpoint::new(b, "eth1"),
    );
    let name = link.name.clone();
    ctx.controller
        .store()
        .commit([Change::LinkAdded { link }])
        .unwrap();
    name
}
