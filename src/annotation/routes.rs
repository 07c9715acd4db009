use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AnnotationError, AnnotationOutcome, AnnotationSession, preview_lines};
use crate::web::{
    ApiError, AppState,
    auth::{self, JsonAuthError},
    json_error,
    responses::upstream_error,
    uploads::{FileFieldConfig, IMAGE_EXTENSIONS, read_upload_form},
};

const MAX_IMAGES_PER_BATCH: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/annotation/classes",
            get(list_classes).post(create_class),
        )
        .route("/api/annotation/classes/:name", delete(remove_class))
        .route("/api/annotation/annotate", post(annotate))
        .route("/api/annotation/preview", post(preview))
        .route("/api/annotation/export", get(export_annotations))
}

#[derive(Serialize)]
struct ClassesResponse {
    classes: Vec<String>,
}

#[derive(Deserialize)]
struct NewClass {
    label: String,
}

#[derive(Deserialize)]
struct PreviewRequest {
    items: Vec<PreviewItem>,
}

#[derive(Deserialize)]
struct PreviewItem {
    image_name: String,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Serialize)]
struct PreviewResponse {
    lines: Vec<String>,
    unlabeled: usize,
}

async fn list_classes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClassesResponse>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let classes = state
        .annotation_client()
        .get_classes()
        .await
        .map_err(|err| upstream_error(&err))?;
    Ok(Json(ClassesResponse { classes }))
}

async fn create_class(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewClass>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let created = super::add_class(state.annotation_client(), &body.label)
        .await
        .map_err(annotation_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn remove_class(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    super::delete_class(state.annotation_client(), &name)
        .await
        .map(Json)
        .map_err(annotation_error)
}

async fn annotate(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<AnnotationOutcome>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let file_config =
        FileFieldConfig::new("files", IMAGE_EXTENSIONS, MAX_IMAGES_PER_BATCH).with_min_files(0);
    let mut upload = read_upload_form(multipart, &[file_config])
        .await
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.message()))?;

    let labels = upload.text_values("labels").to_vec();
    let files = upload.take_files("files");
    let session = AnnotationSession::from_parts(files, labels).map_err(annotation_error)?;

    super::submit(state.annotation_client(), &session, &user.id.to_string())
        .await
        .map(Json)
        .map_err(annotation_error)
}

async fn preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    if body.items.is_empty() {
        return Err(annotation_error(AnnotationError::Empty));
    }

    let unlabeled = body
        .items
        .iter()
        .filter(|item| item.label.as_deref().is_none_or(|label| label.trim().is_empty()))
        .count();
    let lines = preview_lines(
        body.items
            .iter()
            .map(|item| (item.image_name.as_str(), item.label.as_deref())),
    );

    Ok(Json(PreviewResponse { lines, unlabeled }))
}

async fn export_annotations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    state
        .annotation_client()
        .export()
        .await
        .map(Json)
        .map_err(|err| upstream_error(&err))
}

fn annotation_error(err: AnnotationError) -> ApiError {
    match err {
        AnnotationError::Service(ref source) => upstream_error(source),
        AnnotationError::Submission { ref source, .. } => {
            let (status, _) = upstream_error(source);
            json_error(status, err.to_string())
        }
        other => json_error(StatusCode::BAD_REQUEST, other.to_string()),
    }
}
