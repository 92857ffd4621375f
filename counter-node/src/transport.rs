use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{CounterError, Result};
use crate::types::{FullState, HeartbeatRequest, JoinRequest, PeerInfo, PeersResponse, UpdateRecord};

/// Outbound calls a node makes to other nodes.
///
/// `addr` is always a peer's base URL (`http://host:port`).
pub trait PeerClient: Send + Sync + 'static {
    /// Push one update to a peer's apply route
    fn deliver(&self, addr: &str, update: &UpdateRecord) -> impl Future<Output = Result<()>> + Send;

    /// Liveness ping
    fn heartbeat(
        &self,
        addr: &str,
        request: &HeartbeatRequest,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Announce ourselves to a seed; returns the seed's membership view
    fn join(
        &self,
        addr: &str,
        request: &JoinRequest,
    ) -> impl Future<Output = Result<Vec<PeerInfo>>> + Send;

    /// Pull a seed's full contribution vector
    fn fetch_state(&self, addr: &str) -> impl Future<Output = Result<FullState>> + Send;
}

/// JSON-over-HTTP peer client
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    http_client: Client,
}

impl HttpPeerClient {
    /// Create a client whose every request is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CounterError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<reqwest::Response> {
        let response = self.http_client.post(url).json(body).send().await?;
        Self::check_status(url, response).await
    }

    async fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let response = self.http_client.get(url).send().await?;
        let response = Self::check_status(url, response).await?;
        Ok(response.json().await?)
    }

    async fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(CounterError::PeerStatus {
            url: url.to_string(),
            status,
            body,
        })
    }
}

fn endpoint(addr: &str, route: &str) -> String {
    format!("{}{}", addr.trim_end_matches('/'), route)
}

impl PeerClient for HttpPeerClient {
    async fn deliver(&self, addr: &str, update: &UpdateRecord) -> Result<()> {
        let url = endpoint(addr, "/apply");
        self.post_json(&url, update).await?;

        debug!(url = %url, node_id = %update.node_id, seq = update.seq, "Update delivered");
        Ok(())
    }

    async fn heartbeat(&self, addr: &str, request: &HeartbeatRequest) -> Result<()> {
        self.post_json(&endpoint(addr, "/heartbeat"), request).await?;
        Ok(())
    }

    async fn join(&self, addr: &str, request: &JoinRequest) -> Result<Vec<PeerInfo>> {
        let response = self.post_json(&endpoint(addr, "/join"), request).await?;
        let peers: PeersResponse = response.json().await?;
        Ok(peers.peers)
    }

    async fn fetch_state(&self, addr: &str) -> Result<FullState> {
        self.get_json(&endpoint(addr, "/state")).await
    }
}
