use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{MediaFile, ServiceError, UpstreamClient, endpoint, read_json, transport};

const SERVICE: &str = "scene-splitter";

/// A contiguous interval of a video, bounded by `HH:MM:SS` timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scene {
    pub scene_id: u32,
    pub start: String,
    pub end: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Scene {
    pub fn duration_seconds(&self) -> Option<u32> {
        let start = parse_timestamp(&self.start)?;
        let end = parse_timestamp(&self.end)?;
        end.checked_sub(start)
    }

    /// Duration formatted as `HH:MM:SS`.
    pub fn duration(&self) -> Option<String> {
        self.duration_seconds().map(format_timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub scene_id: u32,
    pub image_path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneDetection {
    pub scenes: Vec<Scene>,
}

/// Scenes and frames of one video, fetched together.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SceneDetails {
    pub scenes: Vec<Scene>,
    pub frames: Vec<Frame>,
}

#[derive(Clone)]
pub struct SceneClient {
    upstream: UpstreamClient,
    base_url: String,
}

impl SceneClient {
    pub fn new(upstream: UpstreamClient, base_url: &str) -> Self {
        Self {
            upstream,
            base_url: base_url.to_string(),
        }
    }

    pub async fn detect(&self, file: &MediaFile) -> Result<SceneDetection, ServiceError> {
        let form = Form::new().part("file", file.to_part()?);
        let response = self
            .upstream
            .http()
            .post(endpoint(&self.base_url, &["detect"])?)
            .multipart(form)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }

    pub async fn scenes(&self, filename: &str) -> Result<Vec<Scene>, ServiceError> {
        let response = self
            .upstream
            .http()
            .get(endpoint(&self.base_url, &["scenes", filename])?)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }

    pub async fn frames(&self, filename: &str) -> Result<Vec<Frame>, ServiceError> {
        let response = self
            .upstream
            .http()
            .get(endpoint(&self.base_url, &["frames", filename])?)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }

    /// Fetch scenes and frames concurrently; either failure fails the whole call.
    pub async fn fetch_all(&self, filename: &str) -> Result<SceneDetails, ServiceError> {
        let (scenes, frames) = tokio::try_join!(self.scenes(filename), self.frames(filename))?;
        Ok(SceneDetails { scenes, frames })
    }

    pub async fn delete(&self, filename: &str) -> Result<Value, ServiceError> {
        let response = self
            .upstream
            .http()
            .delete(endpoint(&self.base_url, &["delete"])?)
            .query(&[("filename", filename)])
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }
}

/// Parse `HH:MM:SS` (fractional seconds truncated) into whole seconds.
pub fn parse_timestamp(value: &str) -> Option<u32> {
    let mut parts = value.trim().split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    let seconds = seconds.split('.').next()?.parse::<u32>().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)
}

pub fn format_timestamp(total: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
