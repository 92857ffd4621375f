use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};

use crate::error::{CounterError, Result};
use crate::node::Node;
use crate::transport::PeerClient;
use crate::types::{Counts, FullState, HeartbeatRequest, JoinRequest, PeersResponse, UpdateRecord};

/// HTTP routes served by every node
pub fn router<C: PeerClient>(node: Arc<Node<C>>) -> Router {
    Router::new()
        .route("/join", post(join::<C>))
        .route("/heartbeat", post(heartbeat::<C>))
        .route("/peers", get(list_peers::<C>))
        .route("/increment", post(increment::<C>))
        .route("/count", get(count::<C>))
        .route("/apply", post(apply::<C>))
        .route("/state", get(state::<C>))
        .route("/health", get(health_check::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

impl From<JsonRejection> for CounterError {
    fn from(rejection: JsonRejection) -> Self {
        CounterError::MalformedRequest(rejection.body_text())
    }
}

impl IntoResponse for CounterError {
    fn into_response(self) -> Response {
        let status = if self.is_client_fault() {
            StatusCode::BAD_REQUEST
        } else {
            warn!(error = %self, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Join endpoint
#[instrument(skip(node, payload))]
async fn join<C: PeerClient>(
    State(node): State<Arc<Node<C>>>,
    payload: std::result::Result<Json<JoinRequest>, JsonRejection>,
) -> Result<Json<PeersResponse>> {
    let Json(request) = payload?;
    let peers = node.join(request).await?;
    Ok(Json(PeersResponse { peers }))
}

async fn heartbeat<C: PeerClient>(
    State(node): State<Arc<Node<C>>>,
    payload: std::result::Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<StatusCode> {
    let Json(request) = payload?;
    node.heartbeat(request).await?;
    Ok(StatusCode::OK)
}

async fn list_peers<C: PeerClient>(State(node): State<Arc<Node<C>>>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: node.list_peers().await,
    })
}

#[instrument(skip(node))]
async fn increment<C: PeerClient>(State(node): State<Arc<Node<C>>>) -> Json<Counts> {
    Json(node.increment().await)
}

async fn count<C: PeerClient>(State(node): State<Arc<Node<C>>>) -> Json<Counts> {
    Json(node.counts().await)
}

/// Gossip receive endpoint
async fn apply<C: PeerClient>(
    State(node): State<Arc<Node<C>>>,
    payload: std::result::Result<Json<UpdateRecord>, JsonRejection>,
) -> Result<StatusCode> {
    let Json(update) = payload?;
    node.apply(update).await?;
    Ok(StatusCode::OK)
}

async fn state<C: PeerClient>(State(node): State<Arc<Node<C>>>) -> Json<FullState> {
    Json(node.state().await)
}

/// Health check endpoint
async fn health_check<C: PeerClient>(State(node): State<Arc<Node<C>>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "node_id": node.identity().id,
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
