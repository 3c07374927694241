// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State fan-out to connected subscribers.
//!
//! Every subscriber owns a bounded queue. Publishing try-enqueues into
//! each matching queue; a full queue drops the payload for that
//! subscriber only and flags it as having missed events. Producers never
//! block.

use crate::protocol::{
    JobProgressPayload, LabStatePayload, LinkStatePayload, NodeStatePayload, ServerMessage,
};
use arche_core::LabId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-subscriber queue capacity. Slow clients are penalized, not others.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Handle identifying one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    lab_id: LabId,
    tx: mpsc::Sender<ServerMessage>,
    missed_events: bool,
}

/// Fan-out hub mapping subscriber → bounded queue.
#[derive(Clone, Default)]
pub struct StateBroadcaster {
    inner: Arc<Mutex<HashMap<SubscriberId, Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl StateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for one lab. The caller drains the receiver
    /// and must `unsubscribe` on disconnect.
    pub fn register(&self, lab_id: LabId) -> (SubscriberId, mpsc::Receiver<ServerMessage>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.inner.lock().insert(
            id,
            Subscriber {
                lab_id,
                tx,
                missed_events: false,
            },
        );
        (id, rx)
    }

    pub fn unregister(&self, id: SubscriberId) {
        self.inner.lock().remove(&id);
        debug!(subscriber = %id, "unregistered subscriber");
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether a subscriber has dropped events since registration.
    pub fn has_missed_events(&self, id: SubscriberId) -> bool {
        self.inner
            .lock()
            .get(&id)
            .map(|s| s.missed_events)
            .unwrap_or(false)
    }

    /// Enqueue a message for one specific subscriber (snapshots, pongs).
    pub fn send_to(&self, id: SubscriberId, message: ServerMessage) {
        let mut inner = self.inner.lock();
        if let Some(sub) = inner.get_mut(&id) {
            try_enqueue(id, sub, message);
        }
    }

    pub fn publish_lab_state(&self, payload: LabStatePayload) {
        self.publish(&LabId::new(payload.lab_id.clone()), ServerMessage::LabState { data: payload });
    }

    pub fn publish_node_state(&self, payload: NodeStatePayload) {
        self.publish(
            &LabId::new(payload.lab_id.clone()),
            ServerMessage::NodeState { data: payload },
        );
    }

    pub fn publish_link_state(&self, payload: LinkStatePayload) {
        self.publish(
            &LabId::new(payload.lab_id.clone()),
            ServerMessage::LinkState { data: payload },
        );
    }

    pub fn publish_job_progress(&self, lab_id: Option<&LabId>, payload: JobProgressPayload) {
        match lab_id {
            Some(lab) => self.publish(lab, ServerMessage::JobProgress { data: payload }),
            // Lab-less jobs (agent updates) go to nobody.
            None => {}
        }
    }

    fn publish(&self, lab_id: &LabId, message: ServerMessage) {
        let mut inner = self.inner.lock();
        let mut closed = Vec::new();
        for (id, sub) in inner.iter_mut() {
            if &sub.lab_id != lab_id {
                continue;
            }
            if sub.tx.is_closed() {
                closed.push(*id);
                continue;
            }
            try_enqueue(*id, sub, message.clone());
        }
        for id in closed {
            inner.remove(&id);
        }
    }
}

fn try_enqueue(id: SubscriberId, sub: &mut Subscriber, message: ServerMessage) {
    match sub.tx.try_send(message) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            if !sub.missed_events {
                warn!(subscriber = %id, "subscriber queue full, dropping events");
            }
            sub.missed_events = true;
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

use crate::controller::Controller;
use crate::error::ControllerError;
use crate::protocol::{ClientMessage, InitialStatePayload};
use arche_adapters::{AgentApi, SharedBus};
use arche_core::Clock;

impl<A, B, C> Controller<A, B, C>
where
    A: AgentApi,
    B: SharedBus,
    C: Clock,
{
    /// Open a live-state subscription for a lab.
    ///
    /// The receiver always sees, in order: a `lab_state` snapshot, an
    /// `initial_state` snapshot, then streamed deltas.
    pub fn subscribe_lab(
        &self,
        lab_id: &LabId,
    ) -> Result<(SubscriberId, mpsc::Receiver<ServerMessage>), ControllerError> {
        let lab = self.require_lab(lab_id)?;
        let (id, rx) = self.broadcaster.register(lab_id.clone());
        self.send_snapshot(id, lab_id, &lab);
        Ok((id, rx))
    }

    fn send_snapshot(&self, id: SubscriberId, lab_id: &LabId, lab: &arche_core::Lab) {
        self.broadcaster.send_to(
            id,
            ServerMessage::LabState { data: lab.into() },
        );
        let initial = self.store.read(|db| {
            let mut nodes: Vec<NodeStatePayload> = db
                .node_states
                .get(lab_id)
                .map(|m| m.values().map(Into::into).collect())
                .unwrap_or_default();
            nodes.sort_by(|a: &NodeStatePayload, b| a.node_id.cmp(&b.node_id));
            let mut links: Vec<LinkStatePayload> = db
                .links
                .get(lab_id)
                .map(|m| m.values().map(Into::into).collect())
                .unwrap_or_default();
            links.sort_by(|a: &LinkStatePayload, b| a.link_name.cmp(&b.link_name));
            InitialStatePayload { nodes, links }
        });
        self.broadcaster
            .send_to(id, ServerMessage::InitialState { data: initial });
    }

    /// Handle a raw client frame on a subscription.
    ///
    /// `ping` gets a timestamped `pong`, `refresh` re-sends the
    /// snapshot; unknown messages and invalid JSON are ignored.
    pub fn handle_client_message(&self, id: SubscriberId, lab_id: &LabId, raw: &str) {
        match ClientMessage::parse(raw) {
            Some(ClientMessage::Ping) => {
                self.broadcaster.send_to(
                    id,
                    ServerMessage::Pong {
                        timestamp: self.now_ms(),
                    },
                );
            }
            Some(ClientMessage::Refresh) => {
                if let Ok(lab) = self.require_lab(lab_id) {
                    self.send_snapshot(id, lab_id, &lab);
                }
            }
            Some(ClientMessage::Unknown) | None => {}
        }
    }

    /// Drop a disconnected subscriber and free its queue.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.broadcaster.unregister(id);
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
