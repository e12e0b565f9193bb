use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use schemata_agent::{CompletionOrchestrator, CompletionRequest, LogStatus};
use schemata_core::domain::application::{ApplicationDefinition, ApplicationId};
use schemata_core::errors::{ApplicationError, InterfaceError};
use schemata_db::repositories::{ApplicationRepository, InteractionLogRepository};

const INTERACTION_LOG_HEADER: HeaderName = HeaderName::from_static("x-interaction-log");
const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

#[derive(Clone)]
pub struct ApiState {
    pub applications: Arc<dyn ApplicationRepository>,
    pub interactions: Arc<dyn InteractionLogRepository>,
    pub orchestrator: Arc<CompletionOrchestrator>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/applications", post(create_application))
        .route("/applications/{application_id}", delete(delete_application))
        .route("/applications/{application_id}/completions", post(create_completion))
        .route("/applications/{application_id}/completions/logs", get(list_interactions))
        .with_state(state)
}

/// An interface-level failure rendered as `{error, message, detail, correlation_id}`.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &error {
            InterfaceError::Unprocessable { message, .. }
            | InterfaceError::NotFound { message, .. } => message.clone(),
            InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => {
                error.user_message().to_string()
            }
        };
        let body = json!({
            "error": error.kind(),
            "message": message,
            "detail": error.detail(),
            "correlation_id": error.correlation_id(),
        });

        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(error.correlation_id()) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
}

#[derive(Debug, Serialize)]
struct InteractionView {
    sender: &'static str,
    msg: Value,
    timestamp: String,
}

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn fail(operation: &'static str, error: ApplicationError, correlation_id: String) -> ApiError {
    match &error {
        ApplicationError::Persistence(_)
        | ApplicationError::Integration(_)
        | ApplicationError::Configuration(_) => error!(
            event_name = "api.request_failed",
            operation,
            correlation_id = %correlation_id,
            error = %error,
            "request failed"
        ),
        ApplicationError::Domain(_) => info!(
            event_name = "api.request_rejected",
            operation,
            correlation_id = %correlation_id,
            error = %error,
            "request rejected"
        ),
    }
    ApiError(error.into_interface(correlation_id))
}

fn parse_body(body: &Bytes, correlation_id: &str) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        ApiError(InterfaceError::Unprocessable {
            kind: "malformed_json",
            message: "request body is not valid JSON".to_string(),
            detail: json!([err.to_string()]),
            correlation_id: correlation_id.to_string(),
        })
    })
}

async fn create_application(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let correlation_id = correlation_id();
    let body = parse_body(&body, &correlation_id)?;

    let definition = ApplicationDefinition::from_request(&body)
        .map_err(|err| fail("create_application", err.into(), correlation_id.clone()))?;
    let application = state
        .applications
        .create(definition)
        .await
        .map_err(|err| fail("create_application", err.into(), correlation_id.clone()))?;

    info!(
        event_name = "api.application_created",
        correlation_id = %correlation_id,
        application_id = %application.id,
        "application registered"
    );
    Ok(Json(json!({"application_id": application.id})))
}

async fn delete_application(
    State(state): State<ApiState>,
    Path(application_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let correlation_id = correlation_id();
    let application_id = ApplicationId(application_id);

    state
        .applications
        .delete(&application_id)
        .await
        .map_err(|err| fail("delete_application", err.into(), correlation_id.clone()))?;

    info!(
        event_name = "api.application_deleted",
        correlation_id = %correlation_id,
        application_id = %application_id,
        "application and its interaction log deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn create_completion(
    State(state): State<ApiState>,
    Path(application_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_id();
    let input = parse_body(&body, &correlation_id)?;

    let outcome = state
        .orchestrator
        .complete(CompletionRequest {
            application_id: ApplicationId(application_id),
            input,
            correlation_id: correlation_id.clone(),
        })
        .await
        .map_err(|err| fail("create_completion", err, correlation_id.clone()))?;

    let mut response = Json(outcome.output).into_response();
    if let LogStatus::Degraded { reason } = &outcome.log_status {
        warn!(
            event_name = "api.completion_log_degraded",
            correlation_id = %correlation_id,
            reason = %reason,
            "completion returned with a degraded interaction log"
        );
        response
            .headers_mut()
            .insert(INTERACTION_LOG_HEADER, HeaderValue::from_static("degraded"));
    }
    Ok(response)
}

async fn list_interactions(
    State(state): State<ApiState>,
    Path(application_id): Path<String>,
) -> Result<Json<Vec<InteractionView>>, ApiError> {
    let correlation_id = correlation_id();
    let entries = state
        .interactions
        .list(&ApplicationId(application_id))
        .await
        .map_err(|err| fail("list_interactions", err.into(), correlation_id))?;

    Ok(Json(
        entries
            .into_iter()
            .map(|entry| InteractionView {
                sender: entry.sender.as_str(),
                msg: entry.message,
                timestamp: entry.timestamp.to_rfc3339(),
            })
            .collect(),
    ))
}
