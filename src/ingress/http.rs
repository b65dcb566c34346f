//! HTTP boundary for event ingestion
//!
//! - `POST /api/v1/events`: accept a batch for the tenant named in the
//!   `X-Tenant-ID` header, which the authenticating gateway in front of
//!   this service sets
//! - `GET /health`: liveness

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;

use super::Ingestor;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Body of `POST /api/v1/events`
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub events: Vec<Value>,
}

/// Body of a `202 Accepted` ingest response
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub event_count: usize,
    pub tenant_id: String,
}

/// Build the ingress router
pub fn router(ingestor: Arc<Ingestor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/events", post(ingest_events))
        .with_state(ingestor)
}

/// Serve the ingress router until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, ingestor: Arc<Ingestor>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Ingress listening on {}", addr);
    }
    axum::serve(listener, router(ingestor))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn ingest_events(
    State(ingestor): State<Arc<Ingestor>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let tenant_id = match headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(tenant) => tenant.to_string(),
        None => return error_response(StatusCode::UNAUTHORIZED, "missing tenant context"),
    };

    let request: IngestRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match ingestor.ingest(&tenant_id, request.events).await {
        Ok(receipt) => (
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                message: "Events queued for processing".to_string(),
                event_count: receipt.event_count,
                tenant_id: receipt.tenant_id,
            }),
        )
            .into_response(),
        Err(e) if e.is_validation() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            log::error!("Ingest for tenant {} failed: {}", tenant_id, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}
