//! Local axum server with scripted endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Number of 503 answers `/flaky` gives before succeeding.
pub const FLAKY_FAILURES: usize = 2;

#[derive(Clone, Default)]
struct AppState {
    hits: Arc<AtomicUsize>,
}

impl AppState {
    fn hit(&self) -> usize {
        self.hits.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A running server. Aborted on drop.
pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> anyhow::Result<Self> {
        let state = AppState::default();
        let hits = state.hits.clone();
        let app = Router::new()
            .route("/flaky", get(flaky))
            .route("/slow-once", get(slow_once))
            .route("/echo", get(echo))
            .route("/hang", get(hang))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("server error: {e}");
            }
        });

        Ok(Self { addr, hits, handle })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Requests received so far, across all endpoints.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn flaky(State(state): State<AppState>) -> Response {
    let hit = state.hit();
    if hit <= FLAKY_FAILURES {
        return (StatusCode::SERVICE_UNAVAILABLE, [("retry-after-ms", "20")], "busy").into_response();
    }
    (StatusCode::OK, [("x-attempt", hit.to_string())], "ok").into_response()
}

async fn slow_once(State(state): State<AppState>) -> &'static str {
    if state.hit() == 1 {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    "done"
}

async fn echo(State(state): State<AppState>, headers: HeaderMap) -> Json<serde_json::Value> {
    state.hit();
    let order: Vec<&str> = headers
        .get_all("x-order")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let request_id = headers
        .get("x-ms-client-request-id")
        .and_then(|v| v.to_str().ok());
    Json(json!({ "order": order, "request_id": request_id }))
}

async fn hang(State(state): State<AppState>) -> &'static str {
    state.hit();
    tokio::time::sleep(Duration::from_secs(30)).await;
    "late"
}
