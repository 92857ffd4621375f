//! Multi-node tests over real loopback sockets
//!
//! - Bootstrap and convergence across a small cluster
//! - Delivery retries against a peer that fails its first requests
//! - Isolation of a dead peer from healthy ones

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use counter_node::{
    api, BackoffPolicy, Counts, GossipSettings, HttpPeerClient, Node, PeerInfo, UpdateRecord,
};

fn fast_settings() -> GossipSettings {
    GossipSettings {
        flush_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(500),
        prune_interval: Duration::from_millis(500),
        stale_after: Duration::from_secs(10),
        retry: BackoffPolicy {
            base: Duration::from_millis(20),
            factor: 2.0,
            max_delay: Duration::from_millis(100),
            max_attempts: 4,
        },
    }
}

struct TestNode {
    node: Arc<Node>,
    url: String,
    server: JoinHandle<()>,
}

impl TestNode {
    async fn spawn(id: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let client = HttpPeerClient::new(Duration::from_millis(500)).unwrap();
        let node = Arc::new(Node::new(PeerInfo::new(id, url.clone()), client, fast_settings()));

        let app = api::router(Arc::clone(&node));
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { node, url, server }
    }

    async fn shutdown(self) {
        self.node.stop().await;
        self.server.abort();
    }
}

/// Poll `check` until it holds or `limit` elapses
async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_nodes_converge() {
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;

    let report = b.node.bootstrap(&[a.url.clone()]).await;
    assert_eq!(report.joined, vec![a.url.clone()]);
    assert!(a.node.peers().get("b").await.is_some());

    a.node.start().await;
    b.node.start().await;

    for _ in 0..3 {
        a.node.increment().await;
    }
    for _ in 0..2 {
        b.node.increment().await;
    }

    let (node_a, node_b) = (&a.node, &b.node);
    let converged = eventually(Duration::from_secs(5), move || async move {
        node_a.counts().await.global == 5 && node_b.counts().await.global == 5
    })
    .await;
    assert!(converged, "a={:?} b={:?}", a.node.counts().await, b.node.counts().await);

    assert_eq!(a.node.counts().await, Counts { local: 3, global: 5 });
    assert_eq!(b.node.counts().await, Counts { local: 2, global: 5 });
    assert_eq!(a.node.state().await, b.node.state().await);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_joiner_pulls_existing_state() {
    let a = TestNode::spawn("a").await;
    a.node.start().await;
    for _ in 0..4 {
        a.node.increment().await;
    }

    let b = TestNode::spawn("b").await;
    b.node.bootstrap(&[a.url.clone()]).await;

    // Bootstrap merge alone brings the newcomer up to date
    assert_eq!(b.node.counts().await, Counts { local: 0, global: 4 });

    let c = TestNode::spawn("c").await;
    let report = c
        .node
        .bootstrap(&[a.url.trim_start_matches("http://").to_string()])
        .await;
    assert_eq!(report.joined, vec![a.url.clone()]);

    // C learns B through A's membership view
    let ids: Vec<String> = c.node.list_peers().await.into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    b.node.start().await;
    c.node.start().await;

    // A and C know every node, so their increments reach the whole cluster
    a.node.increment().await;
    c.node.increment().await;
    c.node.increment().await;

    let nodes = [&a, &b, &c];
    let converged = eventually(Duration::from_secs(5), move || async move {
        for n in nodes {
            if n.node.counts().await.global != 7 {
                return false;
            }
        }
        true
    })
    .await;
    assert!(converged);

    let state = a.node.state().await;
    assert_eq!(state.components.get("a"), 5);
    assert_eq!(state.components.get("c"), 2);

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_seed_does_not_abort_bootstrap() {
    let a = TestNode::spawn("a").await;

    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_url = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    let b = TestNode::spawn("b").await;
    let report = b.node.bootstrap(&[dead_url.clone(), a.url.clone()]).await;

    assert_eq!(report.joined, vec![a.url.clone()]);
    assert_eq!(report.failed, vec![dead_url]);
    assert!(b.node.peers().get("a").await.is_some());

    a.shutdown().await;
    b.shutdown().await;
}

/// Peer that answers 500 to its first `failures` apply requests
#[derive(Clone)]
struct FlakyPeer {
    failures: u32,
    seen: Arc<AtomicU32>,
    applied: Arc<Mutex<Vec<UpdateRecord>>>,
}

async fn flaky_apply(
    State(peer): State<FlakyPeer>,
    Json(update): Json<UpdateRecord>,
) -> StatusCode {
    let attempt = peer.seen.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt <= peer.failures {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    peer.applied.lock().unwrap().push(update);
    StatusCode::OK
}

async fn spawn_flaky_peer(failures: u32) -> (String, FlakyPeer, JoinHandle<()>) {
    let peer = FlakyPeer {
        failures,
        seen: Arc::new(AtomicU32::new(0)),
        applied: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/apply", post(flaky_apply))
        .route("/heartbeat", post(|| async { StatusCode::OK }))
        .with_state(peer.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (url, peer, server)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_failures_are_retried_until_delivered() {
    let (flaky_url, flaky, flaky_server) = spawn_flaky_peer(2).await;

    let a = TestNode::spawn("a").await;
    a.node.peers().upsert("flaky", &flaky_url).await;
    a.node.start().await;
    a.node.increment().await;

    let applied = &flaky.applied;
    let delivered = eventually(Duration::from_secs(5), move || async move {
        !applied.lock().unwrap().is_empty()
    })
    .await;
    assert!(delivered);

    assert_eq!(flaky.seen.load(Ordering::SeqCst), 3);
    assert_eq!(
        flaky.applied.lock().unwrap().clone(),
        vec![UpdateRecord {
            node_id: "a".to_string(),
            seq: 1,
            value: 1,
        }]
    );

    a.shutdown().await;
    flaky_server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dead_peer_does_not_delay_healthy_peer() {
    let (dead_url, dead, dead_server) = spawn_flaky_peer(u32::MAX).await;
    let (ok_url, ok, ok_server) = spawn_flaky_peer(0).await;

    let a = TestNode::spawn("a").await;
    a.node.peers().upsert("dead", &dead_url).await;
    a.node.peers().upsert("ok", &ok_url).await;
    a.node.start().await;

    for _ in 0..3 {
        a.node.increment().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    let applied = &ok.applied;
    let caught_up = eventually(Duration::from_secs(2), move || async move {
        applied
            .lock()
            .unwrap()
            .last()
            .map(|u| u.value == 3)
            .unwrap_or(false)
    })
    .await;
    assert!(caught_up);
    assert!(dead.applied.lock().unwrap().is_empty());
    assert!(dead.seen.load(Ordering::SeqCst) > 0);

    a.shutdown().await;
    dead_server.abort();
    ok_server.abort();
}
