// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent and image-host change handlers.

use super::{Database, ImageHost};
use crate::change::Change;

pub(crate) fn apply(db: &mut Database, change: &Change) {
    match change {
        Change::AgentRegistered { agent } => {
            // Upsert: registration refreshes everything except the last
            // heartbeat, which only heartbeats move forward.
            let entry = db.agents.entry(agent.id.clone()).or_insert_with(|| agent.clone());
            let last_heartbeat = entry.last_heartbeat_ms.max(agent.last_heartbeat_ms);
            *entry = agent.clone();
            entry.last_heartbeat_ms = last_heartbeat;
        }

        Change::AgentHeartbeat {
            agent_id,
            epoch_ms,
            usage,
        } => {
            if let Some(agent) = db.agents.get_mut(agent_id) {
                agent.last_heartbeat_ms = Some(agent.last_heartbeat_ms.unwrap_or(0).max(*epoch_ms));
                agent.usage = usage.clone();
            }
        }

        Change::AgentStatusChanged { agent_id, status } => {
            if let Some(agent) = db.agents.get_mut(agent_id) {
                agent.status = *status;
            }
        }

        Change::ImageHostRecorded {
            image,
            agent_id,
            epoch_ms,
        } => {
            // Unique on (image, agent): refresh the timestamp if present
            if let Some(existing) = db
                .image_hosts
                .iter_mut()
                .find(|ih| ih.image == *image && &ih.agent_id == agent_id)
            {
                existing.synced_at_ms = *epoch_ms;
            } else {
                db.image_hosts.push(ImageHost {
                    image: image.clone(),
                    agent_id: agent_id.clone(),
                    synced_at_ms: *epoch_ms,
                });
            }
        }

        Change::ImageHostInvalidated { agent_id } => {
            db.image_hosts.retain(|ih| &ih.agent_id != agent_id);
        }

        _ => {}
    }
}
