use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use outreach_core::config::HealthConfig;
use outreach_core::Result;
use outreach_control::ControlPlaneClient;
use outreach_queue::InteractionQueue;

#[derive(Clone)]
struct HealthState {
    queue: InteractionQueue,
    control: Arc<ControlPlaneClient>,
}

/// Bind the health listener. Split from [`serve`] so callers (and tests)
/// can learn the bound address before the server runs.
pub async fn bind(config: &HealthConfig) -> Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    Ok(listener)
}

/// Serve `GET /v1/health` until the shutdown signal arrives.
pub async fn serve(
    listener: TcpListener,
    queue: InteractionQueue,
    control: Arc<ControlPlaneClient>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let state = HealthState { queue, control };
    let app = Router::new()
        .route("/v1/health", get(health_handler))
        .with_state(state);

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Health endpoint listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

/// Degraded-but-alive by design: memory pressure or an open breaker shows
/// up in the body, never as an unavailable endpoint.
async fn health_handler(State(state): State<HealthState>) -> Json<Value> {
    let queue = state.queue.queue_status().await;
    Json(json!({
        "status": "ok",
        "queue": queue,
        "circuitBreaker": state.control.breaker_snapshot(),
    }))
}
