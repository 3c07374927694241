// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP implementation of the agent RPC surface.
//!
//! JSON over HTTP with a bearer token per agent call. Transport failures
//! and 429 are retried with exponential backoff; other HTTP errors are
//! surfaced as application failures without retry.

use super::{
    AgentApi, AgentApiError, DeployOutcome, DiscoveredLab, LinkCreateResult, NodeStatusReport,
    OverlayAttach, OverlayDeclaration, OverlayReport, PruneReport, ReadinessReport,
};
use arche_core::link::Endpoint;
use arche_core::node::NodeCommand;
use arche_core::{AgentInfo, CarrierState, JobId, LabId};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the HTTP agent client.
#[derive(Debug, Clone)]
pub struct HttpAgentApiConfig {
    /// Bearer token sent with every call.
    pub token: String,
    /// Total attempts for retriable failures (transport errors, 429).
    pub attempts: u32,
    /// Base backoff; doubles per attempt.
    pub base_backoff: Duration,
    /// Deadline for ordinary calls.
    pub call_timeout: Duration,
    /// Deadline for deploy/destroy, which can run much longer.
    pub deploy_timeout: Duration,
}

impl Default for HttpAgentApiConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            attempts: 3,
            base_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(30),
            deploy_timeout: Duration::from_secs(120),
        }
    }
}

/// Exponential backoff for the nth retriable failure (1-indexed).
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// HTTP agent RPC client.
#[derive(Clone)]
pub struct HttpAgentApi {
    client: reqwest::Client,
    config: Arc<HttpAgentApiConfig>,
}

impl HttpAgentApi {
    pub fn new(config: HttpAgentApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }

    fn url(agent: &AgentInfo, path: &str) -> String {
        format!("http://{}{path}", agent.address)
    }

    /// Issue a request with retry on transport failures and 429.
    async fn request<T: DeserializeOwned>(
        &self,
        agent: &AgentInfo,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> Result<T, AgentApiError> {
        let url = Self::url(agent, path);
        let mut last_unavailable = String::new();

        for attempt in 1..=self.config.attempts {
            if attempt > 1 {
                tokio::time::sleep(backoff_delay(self.config.base_backoff, attempt - 1)).await;
            }

            let mut req = self
                .client
                .request(method.clone(), url.as_str())
                .bearer_auth(&self.config.token)
                .timeout(timeout);
            if let Some(body) = body {
                req = req.json(body);
            }

            let response = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_unavailable = e.to_string();
                    debug!(agent = %agent.id, %url, attempt, error = %e, "agent call transport failure");
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                last_unavailable = format!("agent busy (429) at {url}");
                warn!(agent = %agent.id, %url, attempt, "agent rate-limited, backing off");
                continue;
            }
            if status.is_server_error() {
                last_unavailable = format!("HTTP {status} from {url}");
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Err(AgentApiError::Unsupported("endpoint not implemented"));
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(AgentApiError::Job {
                    message: format!("HTTP {status}: {text}"),
                    stdout: String::new(),
                    stderr: text,
                });
            }

            return response
                .json::<T>()
                .await
                .map_err(|e| AgentApiError::InvalidResponse(e.to_string()));
        }

        Err(AgentApiError::Unavailable(last_unavailable))
    }

    async fn op(
        &self,
        agent: &AgentInfo,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(), AgentApiError> {
        let result: OpResponse = self
            .request(
                agent,
                Method::POST,
                path,
                Some(&body),
                self.config.call_timeout,
            )
            .await?;
        result.into_result()
    }
}

/// Generic `{success, error}` agent response.
#[derive(Debug, Deserialize)]
struct OpResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

impl OpResponse {
    fn into_result(self) -> Result<(), AgentApiError> {
        if self.success {
            Ok(())
        } else {
            Err(AgentApiError::Job {
                message: self.error.unwrap_or_else(|| "agent reported failure".to_string()),
                stdout: self.stdout.unwrap_or_default(),
                stderr: self.stderr.unwrap_or_default(),
            })
        }
    }
}

/// Deploy/destroy/node-action response.
#[derive(Debug, Deserialize)]
struct RunResponse {
    status: String,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    error: Option<String>,
}

impl RunResponse {
    fn into_outcome(self) -> Result<DeployOutcome, AgentApiError> {
        match self.status.as_str() {
            "accepted" => Ok(DeployOutcome::AcceptedAsync),
            "completed" => Ok(DeployOutcome::Finished {
                stdout: self.stdout,
                stderr: self.stderr,
            }),
            _ => Err(AgentApiError::Job {
                message: self
                    .error
                    .unwrap_or_else(|| format!("agent returned status {}", self.status)),
                stdout: self.stdout,
                stderr: self.stderr,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct EndpointWire<'a> {
    node: &'a str,
    interface: &'a str,
}

impl<'a> From<&'a Endpoint> for EndpointWire<'a> {
    fn from(ep: &'a Endpoint) -> Self {
        Self {
            node: &ep.node,
            interface: &ep.interface,
        }
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn deploy(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        topology: &serde_json::Value,
    ) -> Result<DeployOutcome, AgentApiError> {
        let body = serde_json::json!({ "topology": topology });
        let response: RunResponse = self
            .request(
                agent,
                Method::POST,
                &format!("/api/labs/{lab}/deploy"),
                Some(&body),
                self.config.deploy_timeout,
            )
            .await?;
        response.into_outcome()
    }

    async fn destroy(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
    ) -> Result<DeployOutcome, AgentApiError> {
        let response: RunResponse = self
            .request(
                agent,
                Method::POST,
                &format!("/api/labs/{lab}/destroy"),
                Some(&serde_json::json!({})),
                self.config.deploy_timeout,
            )
            .await?;
        response.into_outcome()
    }

    async fn node_action(
        &self,
        agent: &AgentInfo,
        job: &JobId,
        lab: &LabId,
        node: &str,
        verb: NodeCommand,
    ) -> Result<DeployOutcome, AgentApiError> {
        let body = serde_json::json!({ "job_id": job });
        let response: RunResponse = self
            .request(
                agent,
                Method::POST,
                &format!("/api/labs/{lab}/nodes/{node}/{verb}"),
                Some(&body),
                self.config.call_timeout,
            )
            .await?;
        response.into_outcome()
    }

    async fn get_lab_status(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
    ) -> Result<Vec<NodeStatusReport>, AgentApiError> {
        #[derive(Deserialize)]
        struct StatusResponse {
            nodes: Vec<NodeStatusReport>,
        }
        let response: StatusResponse = self
            .request(
                agent,
                Method::GET,
                &format!("/api/labs/{lab}/status"),
                None,
                self.config.call_timeout,
            )
            .await?;
        Ok(response.nodes)
    }

    async fn discover_labs(&self, agent: &AgentInfo) -> Result<Vec<DiscoveredLab>, AgentApiError> {
        #[derive(Deserialize)]
        struct DiscoverResponse {
            labs: Vec<DiscoveredLab>,
        }
        let response: DiscoverResponse = self
            .request(agent, Method::GET, "/api/labs", None, self.config.call_timeout)
            .await?;
        Ok(response.labs)
    }

    async fn create_link(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<LinkCreateResult, AgentApiError> {
        let body = serde_json::json!({
            "source": EndpointWire::from(source),
            "target": EndpointWire::from(target),
        });
        self.request(
            agent,
            Method::POST,
            &format!("/api/labs/{lab}/links"),
            Some(&body),
            self.config.call_timeout,
        )
        .await
    }

    async fn remove_link(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<(), AgentApiError> {
        let body = serde_json::json!({
            "source": EndpointWire::from(source),
            "target": EndpointWire::from(target),
        });
        self.op(agent, &format!("/api/labs/{lab}/links/delete"), body)
            .await
    }

    async fn attach_overlay_interface(
        &self,
        agent: &AgentInfo,
        attach: &OverlayAttach,
    ) -> Result<(), AgentApiError> {
        let body = serde_json::to_value(attach)
            .map_err(|e| AgentApiError::InvalidResponse(e.to_string()))?;
        self.op(agent, "/api/overlay/attach", body).await
    }

    async fn detach_overlay_interface(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        container: &str,
        interface: &str,
        link_id: &str,
    ) -> Result<(), AgentApiError> {
        let body = serde_json::json!({
            "container": container,
            "interface": interface,
            "link_id": link_id,
        });
        self.op(agent, &format!("/api/labs/{lab}/overlay/detach"), body)
            .await
    }

    async fn declare_overlay_state(
        &self,
        agent: &AgentInfo,
        declared: &[OverlayDeclaration],
    ) -> Result<OverlayReport, AgentApiError> {
        let body = serde_json::json!({ "tunnels": declared });
        self.request(
            agent,
            Method::POST,
            "/api/overlay/declare",
            Some(&body),
            self.config.call_timeout,
        )
        .await
    }

    async fn reconcile_vxlan_ports(
        &self,
        agent: &AgentInfo,
        valid_ports: &[String],
        allow_empty: bool,
    ) -> Result<(), AgentApiError> {
        let body = serde_json::json!({
            "valid_ports": valid_ports,
            "force": false,
            "confirm": true,
            "allow_empty": allow_empty,
        });
        self.op(agent, "/api/overlay/reconcile", body).await
    }

    async fn set_carrier(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        interface: &str,
        carrier: CarrierState,
    ) -> Result<(), AgentApiError> {
        let body = serde_json::json!({ "state": carrier });
        self.op(
            agent,
            &format!("/api/labs/{lab}/interfaces/{node}/{interface}/carrier"),
            body,
        )
        .await
    }

    async fn isolate_endpoint(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        interface: &str,
    ) -> Result<(), AgentApiError> {
        self.op(
            agent,
            &format!("/api/labs/{lab}/interfaces/{node}/{interface}/isolate"),
            serde_json::json!({}),
        )
        .await
    }

    async fn check_node_readiness(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
        node: &str,
        kind: &str,
    ) -> Result<ReadinessReport, AgentApiError> {
        self.request(
            agent,
            Method::GET,
            &format!("/api/labs/{lab}/nodes/{node}/readiness?kind={kind}"),
            None,
            self.config.call_timeout,
        )
        .await
    }

    async fn sync_image(&self, agent: &AgentInfo, image: &str) -> Result<(), AgentApiError> {
        self.op(agent, "/api/images/sync", serde_json::json!({ "image": image }))
            .await
    }

    async fn check_image(&self, agent: &AgentInfo, image: &str) -> Result<bool, AgentApiError> {
        #[derive(Deserialize)]
        struct CheckResponse {
            present: bool,
        }
        let body = serde_json::json!({ "image": image });
        let response: CheckResponse = self
            .request(
                agent,
                Method::POST,
                "/api/images/check",
                Some(&body),
                self.config.call_timeout,
            )
            .await?;
        Ok(response.present)
    }

    async fn cleanup_workspace(
        &self,
        agent: &AgentInfo,
        lab: &LabId,
    ) -> Result<(), AgentApiError> {
        self.op(
            agent,
            &format!("/api/labs/{lab}/workspace/cleanup"),
            serde_json::json!({}),
        )
        .await
    }

    async fn cleanup_orphans(
        &self,
        agent: &AgentInfo,
        valid_lab_ids: &[LabId],
    ) -> Result<(), AgentApiError> {
        self.op(
            agent,
            "/api/cleanup/orphans",
            serde_json::json!({ "valid_lab_ids": valid_lab_ids }),
        )
        .await
    }

    async fn prune_docker(&self, agent: &AgentInfo) -> Result<PruneReport, AgentApiError> {
        self.request(
            agent,
            Method::POST,
            "/api/docker/prune",
            Some(&serde_json::json!({})),
            self.config.call_timeout,
        )
        .await
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
