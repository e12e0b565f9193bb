use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use schemata_db::Storage;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    storage: Storage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub storage: HealthCheck,
    pub checked_at: String,
}

pub fn router(storage: Storage) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { storage })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let storage = storage_check(&state.storage).await;
    let ready = storage.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "schemata-server accepting requests".to_string(),
        },
        storage,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn storage_check(storage: &Storage) -> HealthCheck {
    let backend = storage.backend().as_str();
    match storage.applications.ping().await {
        Ok(()) => HealthCheck { status: "ready", detail: format!("{backend} storage reachable") },
        Err(error) => HealthCheck {
            status: "degraded",
            detail: format!("{backend} storage check failed: {error}"),
        },
    }
}
