use axum::body::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;

use super::{ServiceError, UpstreamClient, endpoint, ensure_success, transport};

const SERVICE: &str = "export";
const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportRequest {
    pub service: String,
    pub formats: Vec<String>,
    pub user_id: String,
}

/// Archive bytes produced by the export service.
#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Clone)]
pub struct ExportClient {
    upstream: UpstreamClient,
    base_url: String,
}

impl ExportClient {
    pub fn new(upstream: UpstreamClient, base_url: &str) -> Self {
        Self {
            upstream,
            base_url: base_url.to_string(),
        }
    }

    pub async fn request_archive(
        &self,
        request: &ExportRequest,
    ) -> Result<ExportArchive, ServiceError> {
        let response = self
            .upstream
            .http()
            .post(endpoint(&self.base_url, &["export"])?)
            .json(request)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        let response = ensure_success(SERVICE, response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(ARCHIVE_CONTENT_TYPE)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ServiceError::Decode {
                service: SERVICE,
                source,
            })?;

        Ok(ExportArchive {
            bytes,
            content_type,
        })
    }
}
