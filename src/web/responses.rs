use axum::Json;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::services::ServiceError;

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type ApiError = (StatusCode, Json<ApiMessage>);

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiMessage::new(message)))
}

pub fn internal_error() -> ApiError {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong")
}

/// Return a byte buffer as a download with a standard attachment disposition.
pub fn attachment_response(
    bytes: Bytes,
    filename: &str,
    content_type: &str,
) -> Result<Response, ApiError> {
    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    let disposition = format!("attachment; filename=\"{}\"", filename);
    let disposition = HeaderValue::from_str(&disposition).map_err(|_| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid download filename",
        )
    })?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok((headers, bytes).into_response())
}

/// Map a failed upstream call onto the gateway's response.
pub fn upstream_error(err: &ServiceError) -> ApiError {
    match err {
        ServiceError::Status { status, .. } if status.is_client_error() => {
            json_error(*status, err.detail())
        }
        ServiceError::Request(_) => {
            error!(?err, "failed to build upstream request");
            internal_error()
        }
        other => {
            error!(err = %other, "upstream service failed");
            json_error(StatusCode::BAD_GATEWAY, other.to_string())
        }
    }
}
