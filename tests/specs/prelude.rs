//! Shared harness for controller specs.

use arche_adapters::{FakeAgentApi, MemoryBus};
use arche_controller::{AgentRegistration, Config, Controller};
use arche_core::link::Endpoint;
pub use arche_core::Clock;
use arche_core::{AgentId, FakeClock, Lab, LabId, LinkState, Node, NodeId};
use arche_storage::{Change, Store};
use std::path::PathBuf;
use std::time::Duration;

pub type SpecController = Controller<FakeAgentApi, MemoryBus<FakeClock>, FakeClock>;

pub struct Harness {
    pub controller: SpecController,
    pub rpc: FakeAgentApi,
    pub bus: MemoryBus<FakeClock>,
    pub clock: FakeClock,
    _dir: tempfile::TempDir,
}

pub fn spec_config(state_dir: PathBuf) -> Config {
    Config {
        state_dir,
        agent_token: "spec-token".to_string(),
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

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(
        &dir.path().join("wal").join("changes.wal"),
        &dir.path().join("snapshot.json"),
    )
    .unwrap();
    let clock = FakeClock::new();
    let bus = MemoryBus::new(clock.clone());
    let rpc = FakeAgentApi::new();
    let controller = Controller::new(
        store,
        rpc.clone(),
        bus.clone(),
        clock.clone(),
        spec_config(dir.path().to_path_buf()),
    );
    Harness {
        controller,
        rpc,
        bus,
        clock,
        _dir: dir,
    }
}

pub fn register_agent(h: &Harness, id: &str) {
    h.controller
        .register_agent(AgentRegistration {
            id: AgentId::new(id),
            address: format!("{id}.example:8000"),
            version: Some("1.0.0".to_string()),
            commit: None,
            deployment_mode: None,
            capabilities: Default::default(),
            image_sync_strategy: None,
        })
        .unwrap();
}

pub fn node_id(lab: &str, name: &str) -> NodeId {
    NodeId::new(format!("{lab}-{name}"))
}

/// Create a lab of linux nodes; `pins` maps node name → host id.
pub fn create_lab(h: &Harness, lab: &str, nodes: &[(&str, Option<&str>)]) -> LabId {
    let lab_id = LabId::new(lab);
    h.controller
        .store()
        .create_lab(Lab::new(lab_id.clone(), lab, "tester"))
        .unwrap();
    for (name, pin) in nodes {
        let mut node = Node::new(
            node_id(lab, name),
            lab_id.clone(),
            *name,
            "linux",
            "alpine:3",
        );
        if let Some(pin) = pin {
            node = node.with_host_pin(AgentId::new(*pin));
        }
        h.controller.store().add_node(node).unwrap();
    }
    lab_id
}

/// Add a link row between `<a>:eth1` and `<b>:eth1`; returns the
/// canonical name.
pub fn add_link(h: &Harness, lab: &LabId, a: &str, b: &str) -> String {
    let link = LinkState::new(
        lab.clone(),
        Endpoint::new(a, "eth1"),
        Endpoint::new(b, "eth1"),
    );
    let name = link.name.clone();
    h.controller
        .store()
        .commit([Change::LinkAdded { link }])
        .unwrap();
    name
}

/// Script agent-observed statuses for a lab.
pub fn report_status(h: &Harness, agent: &str, lab: &LabId, nodes: Vec<(&str, &str)>) {
    h.rpc.set_lab_status(&AgentId::new(agent), lab, nodes);
}
