//! One-shot archive exports and the per-user display history.

mod routes;

pub use routes::router;

use std::{collections::HashMap, sync::Arc};

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::services::{ExportClient, ExportRequest, ServiceError};

pub const SUPPORTED_FORMATS: &[&str] = &["json", "csv"];
const MAX_HISTORY_PER_USER: usize = 50;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{0}")]
    Validation(String),
    #[error("Export failed: {0}")]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportEntry {
    pub service: String,
    pub formats: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub size_bytes: usize,
}

/// Downloaded archive plus the history entry recorded for it.
#[derive(Debug, Clone)]
pub struct ExportedArchive {
    pub content_type: String,
    pub bytes: Bytes,
    pub entry: ExportEntry,
}

/// In-memory export history keyed by user; lost on restart.
#[derive(Clone, Default)]
pub struct ExportHistory {
    entries: Arc<RwLock<HashMap<Uuid, Vec<ExportEntry>>>>,
}

impl ExportHistory {
    pub async fn record(&self, user_id: Uuid, entry: ExportEntry) {
        let mut guard = self.entries.write().await;
        let entries = guard.entry(user_id).or_default();
        entries.insert(0, entry);
        entries.truncate(MAX_HISTORY_PER_USER);
    }

    /// Entries for a user, newest first.
    pub async fn list(&self, user_id: Uuid) -> Vec<ExportEntry> {
        let guard = self.entries.read().await;
        guard.get(&user_id).cloned().unwrap_or_default()
    }
}

pub fn archive_filename(service: &str) -> String {
    format!("{service}_export.zip")
}

/// Validate the service name and formats, normalizing formats to lowercase
/// and dropping duplicates while keeping their order.
pub fn normalize_request(
    service: &str,
    formats: &[String],
) -> Result<(String, Vec<String>), ExportError> {
    let service = service.trim().to_ascii_lowercase();
    if service.is_empty() {
        return Err(ExportError::Validation("A target service is required".to_string()));
    }
    if !service
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ExportError::Validation(format!(
            "Invalid service name `{service}`"
        )));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(formats.len());
    for format in formats {
        let format = format.trim().to_ascii_lowercase();
        if !SUPPORTED_FORMATS.contains(&format.as_str()) {
            return Err(ExportError::Validation(format!(
                "Unsupported export format `{format}`"
            )));
        }
        if !normalized.contains(&format) {
            normalized.push(format);
        }
    }
    if normalized.is_empty() {
        return Err(ExportError::Validation(
            "At least one export format is required".to_string(),
        ));
    }

    Ok((service, normalized))
}

/// Request an archive and, only on success, record it in the user's history.
pub async fn trigger_export(
    client: &ExportClient,
    history: &ExportHistory,
    user_id: Uuid,
    service: &str,
    formats: &[String],
) -> Result<ExportedArchive, ExportError> {
    let (service, formats) = normalize_request(service, formats)?;

    let request = ExportRequest {
        service: service.clone(),
        formats: formats.clone(),
        user_id: user_id.to_string(),
    };
    let archive = client.request_archive(&request).await?;

    let entry = ExportEntry {
        filename: archive_filename(&service),
        service,
        formats,
        timestamp: Utc::now(),
        size_bytes: archive.bytes.len(),
    };
    history.record(user_id, entry.clone()).await;
    info!(%user_id, filename = %entry.filename, size = entry.size_bytes, "export downloaded");

    Ok(ExportedArchive {
        content_type: archive.content_type,
        bytes: archive.bytes,
        entry,
    })
}
