//! HTTP transport to the sync server.
//!
//! [`SyncTransport`] abstracts the network layer so the sync client can be
//! driven by a real server or an in-process one in tests.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use super::protocol::{
    BatchSyncRequest, BatchSyncResponse, HealthResponse, KindSyncRequest, KindSyncResponse,
};
use crate::models::Entity;

/// Errors that can occur talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    /// True when no connection could be made, so nothing was sent.
    /// A timeout after connecting is not a connectivity failure.
    pub fn is_connectivity(&self) -> bool {
        match self {
            TransportError::Request(e) => e.is_connect(),
            _ => false,
        }
    }
}

/// Network layer used by the sync client.
pub trait SyncTransport: Send + Sync {
    /// Sends one combined batch for all kinds.
    fn batch_sync(
        &self,
        request: &BatchSyncRequest,
    ) -> impl Future<Output = Result<BatchSyncResponse, TransportError>> + Send;

    /// Sends a batch for a single kind.
    fn sync_kind<E: Entity>(
        &self,
        request: &KindSyncRequest<E>,
    ) -> impl Future<Output = Result<KindSyncResponse<E>, TransportError>> + Send;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(server_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the URL of an `/api` endpoint.
    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn health(&self) -> Result<HealthResponse, TransportError> {
        let response = self.client.get(self.endpoint("health")).send().await?;
        decode(response).await
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path);
        tracing::debug!("POST {}", url);
        let response = self.client.post(url).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
}

impl SyncTransport for HttpTransport {
    async fn batch_sync(
        &self,
        request: &BatchSyncRequest,
    ) -> Result<BatchSyncResponse, TransportError> {
        self.post_json("sync/batch", request).await
    }

    async fn sync_kind<E: Entity>(
        &self,
        request: &KindSyncRequest<E>,
    ) -> Result<KindSyncResponse<E>, TransportError> {
        let path = format!("{}/batch", E::KIND.collection());
        self.post_json(&path, request).await
    }
}

/// Adds a scheme to bare hosts and drops trailing slashes.
fn normalize_base_url(server_url: &str) -> String {
    let trimmed = server_url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
