//! Face and pattern detection panels backed by an optional external analyzer.
//!
//! When no analyzer is configured, or the configured one cannot be reached,
//! a panel answers with a fixed demonstration set after `demo_delay` and
//! flags the response as simulated.

mod demo;
mod routes;

pub use routes::router;

use std::{fmt, str::FromStr, time::Duration};

use reqwest::multipart::Form;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::warn;

use crate::services::{MediaFile, ServiceError, UpstreamClient, read_json, transport};

const FACE_SERVICE: &str = "face-analyzer";
const PATTERN_SERVICE: &str = "pattern-analyzer";
pub const DEFAULT_FACE_CONFIDENCE: f32 = 80.0;
pub const DEFAULT_PATTERN_THRESHOLD: f32 = 70.0;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceMethod {
    #[default]
    Haar,
    Dnn,
    Hog,
}

impl FaceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceMethod::Haar => "haar",
            FaceMethod::Dnn => "dnn",
            FaceMethod::Hog => "hog",
        }
    }
}

impl FromStr for FaceMethod {
    type Err = DetectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "haar" => Ok(FaceMethod::Haar),
            "dnn" => Ok(FaceMethod::Dnn),
            "hog" => Ok(FaceMethod::Hog),
            other => Err(DetectionError::Validation(format!(
                "Unknown face detection method `{other}`"
            ))),
        }
    }
}

impl fmt::Display for FaceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMethod {
    #[default]
    Template,
    Features,
}

impl PatternMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternMethod::Template => "template",
            PatternMethod::Features => "features",
        }
    }
}

impl FromStr for PatternMethod {
    type Err = DetectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "template" => Ok(PatternMethod::Template),
            "features" | "feature" => Ok(PatternMethod::Features),
            other => Err(DetectionError::Validation(format!(
                "Unknown pattern search method `{other}`"
            ))),
        }
    }
}

impl fmt::Display for PatternMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage threshold in `0..=100`.
pub fn parse_confidence(raw: Option<&str>, default: f32) -> Result<f32, DetectionError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(default);
    };

    let value: f32 = raw
        .parse()
        .map_err(|_| DetectionError::Validation(format!("Invalid confidence `{raw}`")))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(DetectionError::Validation(
            "Confidence must be between 0 and 100".to_string(),
        ));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Position {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceDetection {
    pub frame_id: u32,
    pub timestamp: String,
    pub confidence: f32,
    pub face_id: u32,
    pub position: Position,
    #[serde(default)]
    pub emotion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternMatch {
    pub frame_id: u32,
    pub timestamp: String,
    pub confidence: f32,
    pub template_id: u32,
    pub position: Position,
}

trait Scored {
    fn confidence(&self) -> f32;
}

impl Scored for FaceDetection {
    fn confidence(&self) -> f32 {
        self.confidence
    }
}

impl Scored for PatternMatch {
    fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Output of one panel run.
#[derive(Debug, Clone, Serialize)]
pub struct PanelResult<T> {
    pub method: String,
    pub threshold: f32,
    pub simulated: bool,
    pub status: String,
    pub results: Vec<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnalyzerPayload<T> {
    List(Vec<T>),
    Wrapped { results: Vec<T> },
}

impl<T> AnalyzerPayload<T> {
    fn into_results(self) -> Vec<T> {
        match self {
            AnalyzerPayload::List(results) | AnalyzerPayload::Wrapped { results } => results,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FaceParams {
    pub method: FaceMethod,
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct PatternParams {
    pub method: PatternMethod,
    pub threshold: f32,
}

#[derive(Clone)]
pub struct Analyzers {
    upstream: UpstreamClient,
    face_url: Option<String>,
    pattern_url: Option<String>,
    demo_delay: Duration,
}

impl Analyzers {
    pub fn new(
        upstream: UpstreamClient,
        face_url: Option<String>,
        pattern_url: Option<String>,
        demo_delay: Duration,
    ) -> Self {
        Self {
            upstream,
            face_url,
            pattern_url,
            demo_delay,
        }
    }

    pub async fn detect_faces(
        &self,
        file: &MediaFile,
        params: FaceParams,
    ) -> Result<PanelResult<FaceDetection>, DetectionError> {
        let remote = match self.face_url.as_deref() {
            Some(url) => {
                let form = Form::new()
                    .part("file", file.to_part()?)
                    .text("method", params.method.as_str())
                    .text("min_confidence", params.min_confidence.to_string());
                self.call_analyzer::<FaceDetection>(FACE_SERVICE, url, form)
                    .await?
            }
            None => None,
        };

        let (results, simulated) = self.remote_or_demo(remote, demo::face_results).await;
        let results = above_threshold(results, params.min_confidence);
        Ok(PanelResult {
            method: params.method.to_string(),
            threshold: params.min_confidence,
            simulated,
            status: format!("Analysis finished - {} face(s) detected", results.len()),
            results,
        })
    }

    pub async fn search_patterns(
        &self,
        file: &MediaFile,
        templates: &[MediaFile],
        params: PatternParams,
    ) -> Result<PanelResult<PatternMatch>, DetectionError> {
        if templates.is_empty() {
            return Err(DetectionError::Validation(
                "At least one template image is required".to_string(),
            ));
        }

        let remote = match self.pattern_url.as_deref() {
            Some(url) => {
                let mut form = Form::new()
                    .part("file", file.to_part()?)
                    .text("method", params.method.as_str())
                    .text("threshold", params.threshold.to_string());
                for template in templates {
                    form = form.part("templates", template.to_part()?);
                }
                self.call_analyzer::<PatternMatch>(PATTERN_SERVICE, url, form)
                    .await?
            }
            None => None,
        };

        let (results, simulated) = self.remote_or_demo(remote, demo::pattern_results).await;
        let results = above_threshold(results, params.threshold);
        Ok(PanelResult {
            method: params.method.to_string(),
            threshold: params.threshold,
            simulated,
            status: format!(
                "Analysis finished - {} occurrence(s) found with {} template(s)",
                results.len(),
                templates.len()
            ),
            results,
        })
    }

    /// `Ok(None)` when the analyzer could not be reached at all.
    async fn call_analyzer<T: DeserializeOwned>(
        &self,
        service: &'static str,
        url: &str,
        form: Form,
    ) -> Result<Option<Vec<T>>, ServiceError> {
        let sent = self
            .upstream
            .http()
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(transport(service));

        let response = match sent {
            Ok(response) => response,
            Err(err) if err.is_unreachable() => {
                warn!(%err, "analyzer unreachable; answering with demonstration data");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let payload: AnalyzerPayload<T> = read_json(service, response).await?;
        Ok(Some(payload.into_results()))
    }

    async fn remote_or_demo<T>(
        &self,
        remote: Option<Vec<T>>,
        demo: fn() -> Vec<T>,
    ) -> (Vec<T>, bool) {
        match remote {
            Some(results) => (results, false),
            None => {
                tokio::time::sleep(self.demo_delay).await;
                (demo(), true)
            }
        }
    }
}

fn above_threshold<T: Scored>(mut results: Vec<T>, threshold: f32) -> Vec<T> {
    results.retain(|item| item.confidence() >= threshold);
    results
}
