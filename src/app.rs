use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use crate::errors::AppError;
use crate::rules::{ProcessRequest, RuleEngine};
use crate::sync::{SyncEngine, SyncRequest};

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncEngine>,
    pub rules: Arc<RuleEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sync", post(handle_sync))
        .route("/rules/process", post(handle_process_rules))
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn handle_sync(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.sync.run(&request).await?;
    Ok(Json(json!({
        "success": true,
        "folders_processed": outcome.folders_processed,
        "synced_messages": outcome.synced_messages,
    })))
}

async fn handle_process_rules(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.rules.process(&request).await?;
    Ok(Json(json!({
        "success": true,
        "processed_messages": outcome.processed_messages,
        "rules_applied": outcome.rules_applied,
    })))
}

/// HTTP rendering of an `AppError`: authentication failures surface as 401,
/// remote provider failures as 502, everything else as 500.
struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(inner: AppError) -> Self {
        ApiError(inner)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Config(_) | AppError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error!(status = %status, error = %self.0, "Request failed");
        let body = Json(json!({ "success": false, "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
