use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{ExportEntry, ExportError, trigger_export};
use crate::web::{
    ApiError, AppState,
    auth::{self, JsonAuthError},
    json_error,
    responses::{attachment_response, upstream_error},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/exports", post(create_export))
        .route("/api/exports/history", get(export_history))
}

#[derive(Deserialize)]
struct ExportBody {
    service: String,
    formats: Vec<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    exports: Vec<ExportEntry>,
}

async fn create_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExportBody>,
) -> Result<Response, ApiError> {
    let user = auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let archive = trigger_export(
        state.export_client(),
        state.export_history(),
        user.id,
        &body.service,
        &body.formats,
    )
    .await
    .map_err(|err| match err {
        ExportError::Validation(message) => json_error(StatusCode::BAD_REQUEST, message),
        ExportError::Service(source) => {
            let (status, _) = upstream_error(&source);
            json_error(status, "Export failed. Please try again later.")
        }
    })?;

    attachment_response(archive.bytes, &archive.entry.filename, &archive.content_type)
}

async fn export_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let exports = state.export_history().list(user.id).await;
    Ok(Json(HistoryResponse { exports }))
}
