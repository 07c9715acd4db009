use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    DEFAULT_FACE_CONFIDENCE, DEFAULT_PATTERN_THRESHOLD, DetectionError, FaceDetection, FaceMethod,
    FaceParams, PanelResult, PatternMatch, PatternMethod, PatternParams, parse_confidence,
};
use crate::services::{Frame, MediaFile, Scene, SceneDetails};
use crate::web::{
    ApiError, AppState,
    auth::{self, JsonAuthError},
    json_error,
    responses::upstream_error,
    uploads::{FileFieldConfig, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS, read_upload_form},
};

const MAX_TEMPLATES: usize = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/scenes/detect", post(detect_scenes))
        .route("/api/scenes", delete(delete_scenes))
        .route("/api/scenes/files/:filename", get(scene_details))
        .route("/api/faces/detect", post(detect_faces))
        .route("/api/patterns/search", post(search_patterns))
}

/// Scene enriched with its computed duration.
#[derive(Serialize)]
struct SceneView {
    #[serde(flatten)]
    scene: Scene,
    duration: Option<String>,
}

impl From<Scene> for SceneView {
    fn from(scene: Scene) -> Self {
        let duration = scene.duration();
        Self { scene, duration }
    }
}

#[derive(Serialize)]
struct SceneDetectionResponse {
    status: String,
    scenes: Vec<SceneView>,
}

#[derive(Serialize)]
struct SceneDetailsResponse {
    status: String,
    scenes: Vec<SceneView>,
    frames: Vec<Frame>,
}

#[derive(Deserialize)]
struct DeleteQuery {
    filename: String,
}

async fn detect_scenes(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<SceneDetectionResponse>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let video = single_video(multipart).await?.0;
    let detection = state
        .scene_client()
        .detect(&video)
        .await
        .map_err(|err| upstream_error(&err))?;

    Ok(Json(SceneDetectionResponse {
        status: format!("Detection finished - {} scene(s) found", detection.scenes.len()),
        scenes: detection.scenes.into_iter().map(SceneView::from).collect(),
    }))
}

async fn scene_details(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Json<SceneDetailsResponse>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let SceneDetails { scenes, frames } = state
        .scene_client()
        .fetch_all(&filename)
        .await
        .map_err(|err| upstream_error(&err))?;

    Ok(Json(SceneDetailsResponse {
        status: format!(
            "Fetched {} scene(s) and {} frame(s)",
            scenes.len(),
            frames.len()
        ),
        scenes: scenes.into_iter().map(SceneView::from).collect(),
        frames,
    }))
}

async fn delete_scenes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<Value>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    if query.filename.trim().is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "A filename is required"));
    }

    state
        .scene_client()
        .delete(&query.filename)
        .await
        .map(Json)
        .map_err(|err| upstream_error(&err))
}

async fn detect_faces(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<PanelResult<FaceDetection>>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let (video, fields) = single_video(multipart).await?;
    let params = FaceParams {
        method: fields
            .method
            .as_deref()
            .map(str::parse::<FaceMethod>)
            .transpose()
            .map_err(detection_error)?
            .unwrap_or_default(),
        min_confidence: parse_confidence(fields.confidence.as_deref(), DEFAULT_FACE_CONFIDENCE)
            .map_err(detection_error)?,
    };

    state
        .analyzers()
        .detect_faces(&video, params)
        .await
        .map(Json)
        .map_err(detection_error)
}

async fn search_patterns(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<PanelResult<PatternMatch>>, ApiError> {
    auth::current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let configs = [
        FileFieldConfig::new("file", VIDEO_EXTENSIONS, 1),
        FileFieldConfig::new("templates", IMAGE_EXTENSIONS, MAX_TEMPLATES).with_min_files(0),
    ];
    let mut upload = read_upload_form(multipart, &configs)
        .await
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.message()))?;

    let method = upload
        .first_text("method")
        .map(str::parse::<PatternMethod>)
        .transpose()
        .map_err(detection_error)?
        .unwrap_or_default();
    let threshold = parse_confidence(upload.first_text("threshold"), DEFAULT_PATTERN_THRESHOLD)
        .map_err(detection_error)?;
    let templates = upload.take_files("templates");
    let video = upload
        .take_files("file")
        .into_iter()
        .next()
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "Select a video first"))?;

    state
        .analyzers()
        .search_patterns(&video, &templates, PatternParams { method, threshold })
        .await
        .map(Json)
        .map_err(detection_error)
}

struct PanelFields {
    method: Option<String>,
    confidence: Option<String>,
}

/// Read a form carrying exactly one video under `file` plus panel parameters.
async fn single_video(multipart: Multipart) -> Result<(MediaFile, PanelFields), ApiError> {
    let config = FileFieldConfig::new("file", VIDEO_EXTENSIONS, 1);
    let mut upload = read_upload_form(multipart, &[config])
        .await
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.message()))?;

    let fields = PanelFields {
        method: upload.first_text("method").map(str::to_string),
        confidence: upload
            .first_text("min_confidence")
            .or_else(|| upload.first_text("threshold"))
            .map(str::to_string),
    };
    let video = upload
        .take_files("file")
        .into_iter()
        .next()
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "Select a video first"))?;

    Ok((video, fields))
}

fn detection_error(err: DetectionError) -> ApiError {
    match err {
        DetectionError::Validation(message) => json_error(StatusCode::BAD_REQUEST, message),
        DetectionError::Service(source) => upstream_error(&source),
    }
}
