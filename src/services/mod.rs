//! HTTP clients for the upstream annotation, export and scene-splitter services.

mod annotation;
mod export;
mod scenes;

pub use annotation::{AnnotationClient, AnnotationRecord};
pub use export::{ExportClient, ExportRequest};
pub use scenes::{Frame, Scene, SceneClient, SceneDetails};

use std::time::Duration;

use axum::body::Bytes;
use reqwest::{Body, Client, Response, StatusCode, Url, multipart::Part};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} service unreachable: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} service answered {status}: {detail}")]
    Status {
        service: &'static str,
        status: StatusCode,
        detail: String,
    },
    #[error("{service} service returned an unexpected payload: {source}")]
    Decode {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid upstream request: {0}")]
    Request(String),
}

impl ServiceError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ServiceError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Connection refused or timed out, as opposed to a malformed request.
    pub fn is_unreachable(&self) -> bool {
        match self {
            ServiceError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            _ => false,
        }
    }

    /// Human-readable detail suitable for a user-facing status line.
    pub fn detail(&self) -> String {
        match self {
            ServiceError::Status { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Shared reqwest client used for every upstream call.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
}

impl UpstreamClient {
    pub fn new(connect_timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { http })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }
}

/// An uploaded media file held in memory while it is forwarded upstream.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl MediaFile {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub(crate) fn to_part(&self) -> Result<Part, ServiceError> {
        let length = self.bytes.len() as u64;
        Part::stream_with_length(Body::from(self.bytes.clone()), length)
            .file_name(self.filename.clone())
            .mime_str(&self.content_type)
            .map_err(|err| ServiceError::Request(format!("invalid content type: {err}")))
    }
}

/// Join path segments onto a base URL, percent-encoding each segment.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ServiceError> {
    let mut url = Url::parse(base)
        .map_err(|err| ServiceError::Request(format!("invalid base url `{base}`: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| ServiceError::Request(format!("base url `{base}` cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> ServiceError {
    move |source| {
        if source.is_builder() {
            ServiceError::Request(format!("{service}: {source}"))
        } else {
            ServiceError::Transport { service, source }
        }
    }
}

/// Turn a non-success response into `ServiceError::Status`.
pub(crate) async fn ensure_success(
    service: &'static str,
    response: Response,
) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        service,
        status,
        detail: error_detail(&body).unwrap_or_else(|| "Unknown error".to_string()),
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    service: &'static str,
    response: Response,
) -> Result<T, ServiceError> {
    let response = ensure_success(service, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|source| ServiceError::Decode { service, source })
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<ErrorBody>(trimmed) {
        Ok(ErrorBody {
            detail: Some(Value::String(detail)),
            ..
        }) => Some(detail),
        Ok(ErrorBody {
            detail: Some(detail),
            ..
        }) => Some(detail.to_string()),
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => Some(message),
        _ => Some(trimmed.chars().take(200).collect()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;
    use tokio::net::TcpListener;

    /// Serve a router on an ephemeral local port and return its base URL.
    pub async fn spawn_upstream(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}")
    }

    /// A base URL on which nothing listens.
    pub async fn unreachable_base_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_media_shares_its_buffer() {
        let file = MediaFile::new("clip.mp4", "video/mp4", vec![7; 1024]);
        let copy = file.clone();
        assert_eq!(copy.bytes.as_ptr(), file.bytes.as_ptr());
        assert!(file.to_part().is_ok());
    }

    #[test]
    fn endpoint_encodes_segments() {
        let url = endpoint("http://localhost:8001/", &["classes", "red car"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8001/classes/red%20car");

        let url = endpoint("http://localhost:8000/scene-splitter", &["scenes", "a/b.mp4"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/scene-splitter/scenes/a%2Fb.mp4"
        );
    }

    #[test]
    fn error_detail_prefers_detail_then_message() {
        assert_eq!(
            error_detail(r#"{"detail":"Class already exists"}"#).as_deref(),
            Some("Class already exists")
        );
        assert_eq!(
            error_detail(r#"{"message":"User already exists"}"#).as_deref(),
            Some("User already exists")
        );
        assert_eq!(error_detail("plain failure").as_deref(), Some("plain failure"));
        assert_eq!(error_detail("   "), None);
    }
}
