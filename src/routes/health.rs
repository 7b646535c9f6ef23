use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: Probe,
    pub redis: Probe,
    pub queue_depth: Option<u64>,
}

/// Result of one dependency probe.
#[derive(Serialize)]
pub struct Probe {
    pub ok: bool,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn probe<E: std::fmt::Display>(check: impl Future<Output = Result<(), E>>) -> Probe {
    let started = Instant::now();
    match check.await {
        Ok(()) => Probe {
            ok: true,
            latency_ms: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => Probe {
            ok: false,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// GET /health: dependency status. Also refreshes the queue depth gauge.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = probe(async {
        sqlx::query("SELECT 1").execute(&state.db).await.map(|_| ())
    })
    .await;
    let redis = probe(state.queue.health_check()).await;

    let queue_depth = match state.queue.queue_depth().await {
        Ok(depth) => {
            metrics::gauge!("post_queue_depth").set(depth as f64);
            Some(depth)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not read queue depth");
            None
        }
    };

    let healthy = database.ok && redis.ok;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            database,
            redis,
            queue_depth,
        }),
    )
}
