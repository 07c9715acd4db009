use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use axum::extract::Multipart;
use thiserror::Error;

use crate::services::MediaFile;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Error returned when validating uploaded multipart fields.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Expectations for a single multipart file field.
#[derive(Debug, Clone, Copy)]
pub struct FileFieldConfig<'a> {
    pub field_name: &'a str,
    pub allowed_extensions: &'a [&'a str],
    pub max_files: usize,
    pub min_files: usize,
}

impl<'a> FileFieldConfig<'a> {
    pub fn new(field_name: &'a str, allowed_extensions: &'a [&'a str], max_files: usize) -> Self {
        Self {
            field_name,
            allowed_extensions,
            max_files,
            min_files: if max_files == 0 { 0 } else { 1 },
        }
    }

    pub fn with_min_files(mut self, min_files: usize) -> Self {
        self.min_files = min_files;
        self
    }
}

/// Files and text fields read from a multipart form, in arrival order.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    files: Vec<(String, MediaFile)>,
    text_fields: HashMap<String, Vec<String>>,
}

impl UploadOutcome {
    pub fn take_files(&mut self, field_name: &str) -> Vec<MediaFile> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(name, _)| name == field_name);
        self.files = kept;
        taken.into_iter().map(|(_, file)| file).collect()
    }

    pub fn text_values(&self, field_name: &str) -> &[String] {
        self.text_fields
            .get(field_name)
            .map(|values| values.as_slice())
            .unwrap_or_default()
    }

    pub fn first_text(&self, field_name: &str) -> Option<&str> {
        self.text_values(field_name).first().map(|s| s.as_str())
    }
}

/// Read a multipart form into memory, validating file fields against `field_configs`.
pub async fn read_upload_form(
    mut multipart: Multipart,
    field_configs: &[FileFieldConfig<'_>],
) -> UploadResult<UploadOutcome> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for config in field_configs {
        if config.max_files == 0 {
            return Err(UploadError::new(format!(
                "field `{}` must accept at least one file",
                config.field_name
            )));
        }
        if config.min_files > config.max_files {
            return Err(UploadError::new(format!(
                "field `{}` min_files cannot exceed max_files",
                config.field_name
            )));
        }
        counts.insert(config.field_name, 0);
    }

    let allowed_lookup: HashMap<&str, HashSet<String>> = field_configs
        .iter()
        .map(|config| {
            let set = config
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect();
            (config.field_name, set)
        })
        .collect();

    let mut outcome = UploadOutcome::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("Failed to parse upload form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field
                .text()
                .await
                .map_err(|err| UploadError::new(format!("Failed to read field `{field_name}`: {err}")))?;
            outcome
                .text_fields
                .entry(field_name)
                .or_default()
                .push(value);
            continue;
        };

        let Some(config) = field_configs
            .iter()
            .find(|config| config.field_name == field_name)
        else {
            return Err(UploadError::new(format!(
                "Unsupported file field `{field_name}`"
            )));
        };

        let count = counts.entry(config.field_name).or_default();
        if *count >= config.max_files {
            return Err(UploadError::new(format!(
                "Too many files for `{}` (at most {})",
                config.field_name, config.max_files
            )));
        }

        let extension = Path::new(&file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let allowed = allowed_lookup
            .get(config.field_name)
            .cloned()
            .unwrap_or_default();
        if !allowed.is_empty() && !allowed.contains(&extension) {
            return Err(UploadError::new(format!(
                "Field `{}` does not accept `{extension}` files",
                config.field_name
            )));
        }

        let mut sanitized = sanitize_filename::sanitize(&file_name);
        if sanitized.is_empty() {
            sanitized = if extension.is_empty() {
                format!("file_{count}")
            } else {
                format!("file_{count}.{extension}")
            };
        }

        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|err| UploadError::new(format!("Failed to read upload data: {err}")))?;

        outcome.files.push((
            config.field_name.to_string(),
            MediaFile::new(sanitized, content_type, bytes),
        ));
        *count += 1;
    }

    for config in field_configs {
        let count = counts.get(config.field_name).copied().unwrap_or_default();
        if count < config.min_files {
            return Err(UploadError::new(format!(
                "Field `{}` requires at least {} file(s)",
                config.field_name, config.min_files
            )));
        }
    }

    Ok(outcome)
}
