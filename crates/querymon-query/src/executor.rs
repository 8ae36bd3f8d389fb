use async_trait::async_trait;
use querymon_common::error::{AlertError, Result};
use querymon_common::principal;
use querymon_common::types::QueryResponse;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Request body accepted by the external PQL endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PqlQueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
}

impl PqlQueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: HashMap::new(),
        }
    }
}

/// The external query executor. Authoritative for PQL syntax and semantics;
/// the engine only composes strings and interprets the response shape.
#[async_trait]
pub trait PqlExecutor: Send + Sync {
    async fn execute(&self, request: &PqlQueryRequest) -> Result<QueryResponse>;
}

/// Executor backed by the cluster's PQL HTTP endpoint.
///
/// The ambient principal (the monitor's stored owner, installed by the
/// runner) is forwarded via proxy headers so the cluster applies the owner's
/// document-level permissions rather than the node identity's.
pub struct HttpPqlExecutor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPqlExecutor {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AlertError::Fatal(format!("failed to build PQL client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PqlExecutor for HttpPqlExecutor {
    async fn execute(&self, request: &PqlQueryRequest) -> Result<QueryResponse> {
        let mut builder = self.client.post(&self.endpoint).json(request);

        if let Some(user) = principal::current() {
            builder = builder.header("x-proxy-user", user.name.clone());
            if !user.backend_roles.is_empty() {
                builder = builder.header("x-proxy-roles", user.backend_roles.join(","));
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AlertError::QueryFailed(format!("PQL request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "PQL endpoint returned error");
            return Err(AlertError::QueryFailed(format!(
                "PQL endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| AlertError::QueryFailed(format!("malformed PQL response: {e}")))
    }
}
