// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller lifecycle: startup, background loops, shutdown.
//!
//! Every background loop is a named task with a watch-channel shutdown
//! path and a log-and-continue restart policy: a failing pass is logged
//! and the next tick runs anyway.

use crate::controller::Controller;
use crate::env::Config;
use arche_adapters::{HttpAgentApi, HttpAgentApiConfig, MemoryBus};
use arche_core::SystemClock;
use arche_storage::Store;
use fs2::FileExt;
use std::fs::File;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Production controller type: HTTP agent RPC, in-process bus, system
/// clock.
pub type DaemonController = Controller<HttpAgentApi, MemoryBus<SystemClock>, SystemClock>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("state directory error: {0}")]
    StateDir(std::io::Error),
    #[error("another arched instance holds the lock")]
    LockFailed(std::io::Error),
    #[error(transparent)]
    Store(#[from] arche_storage::StoreError),
}

/// Running daemon state. Dropping the lock file releases the instance
/// lock.
pub struct Daemon {
    pub controller: Arc<DaemonController>,
    // NOTE(lifetime): held to maintain the exclusive file lock
    #[allow(dead_code)]
    lock_file: File,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Open the store, build the adapters, and start every background loop.
pub fn startup(config: Config) -> Result<Daemon, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir).map_err(LifecycleError::StateDir)?;
    let lock_file = File::create(config.lock_path()).map_err(LifecycleError::StateDir)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    std::fs::write(config.lock_path(), std::process::id().to_string())
        .map_err(LifecycleError::StateDir)?;

    let store = Store::open(&config.wal_path(), &config.snapshot_path())?;
    let clock = SystemClock;
    let bus = MemoryBus::new(clock.clone());
    let rpc = HttpAgentApi::new(HttpAgentApiConfig {
        token: config.agent_token.clone(),
        attempts: config.rpc_attempts,
        ..HttpAgentApiConfig::default()
    });

    let controller = Arc::new(Controller::new(store, rpc, bus, clock, config.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks = spawn_loops(Arc::clone(&controller), &config, shutdown_rx);
    info!(state_dir = %config.state_dir.display(), "controller started");

    Ok(Daemon {
        controller,
        lock_file,
        shutdown_tx,
        tasks,
    })
}

impl Daemon {
    /// Signal every loop and wait for a clean exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("controller stopped");
    }
}

fn spawn_loops(
    controller: Arc<DaemonController>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut tasks = Vec::new();

    tasks.push(spawn_interval_loop(
        "enforcement",
        config.enforcement_interval,
        shutdown.clone(),
        {
            let c = Arc::clone(&controller);
            move || {
                let c = Arc::clone(&c);
                async move { c.enforcement_pass().await.map(|_| ()) }
            }
        },
    ));

    tasks.push(spawn_interval_loop(
        "reconcile",
        config.reconcile_interval,
        shutdown.clone(),
        {
            let c = Arc::clone(&controller);
            move || {
                let c = Arc::clone(&c);
                async move { c.reconcile_pass().await }
            }
        },
    ));

    tasks.push(spawn_interval_loop(
        "overlay-convergence",
        config.overlay_interval,
        shutdown.clone(),
        {
            let c = Arc::clone(&controller);
            move || {
                let c = Arc::clone(&c);
                async move { c.overlay_convergence_pass().await }
            }
        },
    ));

    tasks.push(spawn_interval_loop(
        "job-health",
        config.job_health_interval,
        shutdown.clone(),
        {
            let c = Arc::clone(&controller);
            move || {
                let c = Arc::clone(&c);
                async move { c.job_health_pass().await.map(|_| ()) }
            }
        },
    ));

    tasks.push(spawn_interval_loop(
        "agent-stale-detector",
        config.stale_check_interval,
        shutdown.clone(),
        {
            let c = Arc::clone(&controller);
            move || {
                let c = Arc::clone(&c);
                async move { c.mark_stale_agents().await.map(|_| ()) }
            }
        },
    ));

    tasks.push(spawn_interval_loop(
        "cleanup-sweep",
        config.sweep_interval,
        shutdown.clone(),
        {
            let c = Arc::clone(&controller);
            move || {
                let c = Arc::clone(&c);
                async move { c.cleanup_sweep().await.map(|_| ()) }
            }
        },
    ));

    tasks.push(spawn_interval_loop(
        "checkpoint",
        config.checkpoint_interval,
        shutdown.clone(),
        {
            let c = Arc::clone(&controller);
            move || {
                let c = Arc::clone(&c);
                async move { c.store().checkpoint().map_err(Into::into) }
            }
        },
    ));

    // One-shot at boot: re-learn placements lost across the restart
    tasks.push(tokio::spawn({
        let c = Arc::clone(&controller);
        async move {
            if let Err(e) = c.discover_pass().await {
                warn!(error = %e, "startup lab discovery failed");
            }
        }
    }));

    // The cleanup consumer owns its own select loop
    tasks.push(tokio::spawn({
        let c = Arc::clone(&controller);
        let shutdown = shutdown.clone();
        async move {
            c.run_cleanup_consumer(shutdown).await;
        }
    }));

    tasks
}

/// Periodic loop runner: ticks, runs the pass, logs failures, keeps
/// going. Cancellation is swallowed into a clean exit.
fn spawn_interval_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut pass: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), crate::error::ControllerError>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(task = name, "background loop stopped");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = pass().await {
                        warn!(task = name, error = %e, "background pass failed");
                    }
                }
            }
        }
    })
}
