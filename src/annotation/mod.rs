//! Labeling session for a batch of images and class management against the
//! annotation service.

mod routes;

pub use routes::router;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AnnotationTransport;
use crate::services::{AnnotationClient, AnnotationRecord, MediaFile, ServiceError};

pub const UNASSIGNED_LABEL: &str = "(unassigned)";

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("Select at least one image before annotating")]
    Empty,
    #[error("Received {files} image(s) but {labels} label(s)")]
    CountMismatch { files: usize, labels: usize },
    #[error("Every image must have a class selected (missing for `{image_name}`)")]
    MissingLabel { index: usize, image_name: String },
    #[error("Unknown class `{label}` for `{image_name}`")]
    UnknownClass { image_name: String, label: String },
    #[error("Class label must not be empty")]
    EmptyClass,
    #[error("Class `{0}` already exists")]
    Conflict(String),
    #[error("Annotation failed after {submitted} of {total} item(s): {source}")]
    Submission {
        submitted: usize,
        total: usize,
        #[source]
        source: ServiceError,
    },
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone)]
pub struct PendingAnnotation {
    pub file: MediaFile,
    pub label: String,
}

/// Ordered (file, label) pairs waiting to be submitted.
#[derive(Debug, Clone, Default)]
pub struct AnnotationSession {
    items: Vec<PendingAnnotation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationOutcome {
    pub message: String,
    pub transport: String,
    pub submitted: usize,
    pub results: Vec<Value>,
}

impl AnnotationSession {
    /// Pair files with labels by position.
    pub fn from_parts(
        files: Vec<MediaFile>,
        labels: Vec<String>,
    ) -> Result<Self, AnnotationError> {
        if files.len() != labels.len() {
            return Err(AnnotationError::CountMismatch {
                files: files.len(),
                labels: labels.len(),
            });
        }

        let items = files
            .into_iter()
            .zip(labels)
            .map(|(file, label)| PendingAnnotation {
                file,
                label: label.trim().to_string(),
            })
            .collect();
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[PendingAnnotation] {
        &self.items
    }

    /// Reject empty sessions and unlabeled entries.
    pub fn ensure_labeled(&self) -> Result<(), AnnotationError> {
        if self.is_empty() {
            return Err(AnnotationError::Empty);
        }

        match self
            .items
            .iter()
            .enumerate()
            .find(|(_, item)| item.label.is_empty())
        {
            Some((index, item)) => Err(AnnotationError::MissingLabel {
                index,
                image_name: item.file.filename.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn ensure_known_classes(&self, classes: &[String]) -> Result<(), AnnotationError> {
        match self
            .items
            .iter()
            .find(|item| !classes.iter().any(|class| class == &item.label))
        {
            Some(item) => Err(AnnotationError::UnknownClass {
                image_name: item.file.filename.clone(),
                label: item.label.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// `file → label` lines, marking entries without a label.
pub fn preview_lines<'a, I>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    entries
        .into_iter()
        .map(|(name, label)| {
            let label = label
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .unwrap_or(UNASSIGNED_LABEL);
            format!("{name} → {label}")
        })
        .collect()
}

/// Validate and deliver a session using the client's configured transport.
///
/// Unlabeled entries are rejected before any request is made. The first
/// failing request aborts the batch; items already accepted stay submitted.
pub async fn submit(
    client: &AnnotationClient,
    session: &AnnotationSession,
    user_id: &str,
) -> Result<AnnotationOutcome, AnnotationError> {
    session.ensure_labeled()?;

    let classes = client.get_classes().await?;
    session.ensure_known_classes(&classes)?;

    let total = session.len();
    let results = match client.transport() {
        AnnotationTransport::Sequential => {
            let mut results = Vec::with_capacity(total);
            for item in session.items() {
                let record = AnnotationRecord {
                    image_name: item.file.filename.clone(),
                    label: item.label.clone(),
                    user_id: user_id.to_string(),
                };
                let ack = client.annotate_one(&record).await.map_err(|source| {
                    AnnotationError::Submission {
                        submitted: results.len(),
                        total,
                        source,
                    }
                })?;
                results.push(ack);
            }
            results
        }
        AnnotationTransport::Multipart => {
            let batch: Vec<(MediaFile, String)> = session
                .items()
                .iter()
                .map(|item| (item.file.clone(), item.label.clone()))
                .collect();
            let ack = client
                .annotate_batch(&batch, user_id)
                .await
                .map_err(|source| AnnotationError::Submission {
                    submitted: 0,
                    total,
                    source,
                })?;
            vec![ack]
        }
    };

    info!(user_id, total, transport = %client.transport(), "annotation batch submitted");
    Ok(AnnotationOutcome {
        message: "All annotations have been processed.".to_string(),
        transport: client.transport().to_string(),
        submitted: total,
        results,
    })
}

pub async fn add_class(client: &AnnotationClient, label: &str) -> Result<Value, AnnotationError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(AnnotationError::EmptyClass);
    }

    let classes = client.get_classes().await?;
    if classes.iter().any(|existing| existing == label) {
        return Err(AnnotationError::Conflict(label.to_string()));
    }

    match client.add_class(label).await {
        Ok(created) => Ok(created),
        Err(err) if is_conflict(&err) => {
            warn!(label, "annotation service reported an existing class");
            Err(AnnotationError::Conflict(label.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn delete_class(
    client: &AnnotationClient,
    label: &str,
) -> Result<Value, AnnotationError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(AnnotationError::EmptyClass);
    }
    Ok(client.delete_class(label).await?)
}

fn is_conflict(err: &ServiceError) -> bool {
    matches!(
        err.status(),
        Some(StatusCode::BAD_REQUEST) | Some(StatusCode::CONFLICT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{UpstreamClient, test_support::spawn_upstream};
    use axum::{
        Json, Router,
        extract::{Multipart, Path, State},
        http::StatusCode as AxumStatus,
        routing::{delete, get, post},
    };
    use serde_json::json;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    #[derive(Default)]
    struct FakeAnnotations {
        classes: Vec<String>,
        records: Vec<Value>,
        batches: Vec<(Vec<String>, Vec<String>)>,
        requests: usize,
        fail_on_record: Option<usize>,
    }

    type Shared = Arc<Mutex<FakeAnnotations>>;

    fn fake_service(state: Shared) -> Router {
        Router::new()
            .route(
                "/classes",
                get(|State(state): State<Shared>| async move {
                    let mut guard = state.lock().expect("lock");
                    guard.requests += 1;
                    Json(json!(guard.classes))
                })
                .post(
                    |State(state): State<Shared>, Json(body): Json<Value>| async move {
                        let mut guard = state.lock().expect("lock");
                        guard.requests += 1;
                        let label = body["label"].as_str().unwrap_or_default().to_string();
                        if guard.classes.contains(&label) {
                            return (
                                AxumStatus::BAD_REQUEST,
                                Json(json!({"detail": "Class already exists"})),
                            );
                        }
                        guard.classes.push(label.clone());
                        (AxumStatus::OK, Json(json!({"label": label})))
                    },
                ),
            )
            .route(
                "/classes/:name",
                delete(
                    |State(state): State<Shared>, Path(name): Path<String>| async move {
                        let mut guard = state.lock().expect("lock");
                        guard.requests += 1;
                        guard.classes.retain(|class| class != &name);
                        Json(json!({"deleted": name}))
                    },
                ),
            )
            .route(
                "/annotate-db",
                post(
                    |State(state): State<Shared>, request: axum::extract::Request| async move {
                        let is_multipart = request
                            .headers()
                            .get("content-type")
                            .and_then(|value| value.to_str().ok())
                            .is_some_and(|value| value.starts_with("multipart/form-data"));

                        if is_multipart {
                            let mut multipart =
                                <Multipart as axum::extract::FromRequest<()>>::from_request(
                                    request,
                                    &(),
                                )
                                .await
                                .expect("multipart");
                            let mut files = Vec::new();
                            let mut labels = Vec::new();
                            while let Some(field) = multipart.next_field().await.expect("field") {
                                match field.name() {
                                    Some("files") => {
                                        files.push(field.file_name().unwrap_or_default().to_string())
                                    }
                                    Some("labels") => labels.push(field.text().await.expect("text")),
                                    _ => {}
                                }
                            }
                            let mut guard = state.lock().expect("lock");
                            guard.requests += 1;
                            let count = files.len();
                            guard.batches.push((files, labels));
                            return (AxumStatus::OK, Json(json!({"annotated": count})));
                        }

                        let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                            .await
                            .expect("body");
                        let record: Value = serde_json::from_slice(&bytes).expect("json");
                        let mut guard = state.lock().expect("lock");
                        guard.requests += 1;
                        if guard.fail_on_record == Some(guard.records.len()) {
                            return (
                                AxumStatus::INTERNAL_SERVER_ERROR,
                                Json(json!({"detail": "database unavailable"})),
                            );
                        }
                        guard.records.push(record.clone());
                        (AxumStatus::OK, Json(json!({"stored": record["image_name"]})))
                    },
                ),
            )
            .with_state(state)
    }

    async fn setup(
        classes: &[&str],
        transport: AnnotationTransport,
    ) -> (AnnotationClient, Shared) {
        let state: Shared = Arc::new(Mutex::new(FakeAnnotations {
            classes: classes.iter().map(|c| c.to_string()).collect(),
            ..FakeAnnotations::default()
        }));
        let base = spawn_upstream(fake_service(state.clone())).await;
        let client = AnnotationClient::new(
            UpstreamClient::new(Duration::from_secs(2)).expect("client"),
            &base,
            transport,
        );
        (client, state)
    }

    fn image(name: &str) -> MediaFile {
        MediaFile::new(name, "image/jpeg", vec![0xff, 0xd8])
    }

    fn session(entries: &[(&str, &str)]) -> AnnotationSession {
        let files = entries.iter().map(|(name, _)| image(name)).collect();
        let labels = entries.iter().map(|(_, label)| label.to_string()).collect();
        AnnotationSession::from_parts(files, labels).expect("session")
    }

    #[test]
    fn mismatched_counts_are_rejected() {
        let err = AnnotationSession::from_parts(vec![image("a.jpg")], vec![])
            .expect_err("mismatch");
        assert!(matches!(err, AnnotationError::CountMismatch { files: 1, labels: 0 }));
    }

    #[test]
    fn preview_marks_unlabeled_entries() {
        let lines = preview_lines([("a.jpg", Some("cat")), ("b.jpg", Some(" ")), ("c.jpg", None)]);
        assert_eq!(
            lines,
            vec!["a.jpg → cat", "b.jpg → (unassigned)", "c.jpg → (unassigned)"]
        );
    }

    #[tokio::test]
    async fn empty_label_is_rejected_before_any_request() {
        let (client, state) = setup(&["cat", "dog"], AnnotationTransport::Sequential).await;
        let pending = session(&[("a.jpg", "cat"), ("b.jpg", "  ")]);

        let err = submit(&client, &pending, "user-1").await.expect_err("rejected");

        assert!(matches!(err, AnnotationError::MissingLabel { index: 1, .. }));
        assert_eq!(state.lock().expect("lock").requests, 0);
    }

    #[tokio::test]
    async fn unknown_class_is_rejected_before_submission() {
        let (client, state) = setup(&["cat"], AnnotationTransport::Sequential).await;
        let pending = session(&[("a.jpg", "bird")]);

        let err = submit(&client, &pending, "user-1").await.expect_err("rejected");

        assert!(matches!(err, AnnotationError::UnknownClass { ref label, .. } if label == "bird"));
        assert!(state.lock().expect("lock").records.is_empty());
    }

    #[tokio::test]
    async fn sequential_transport_submits_in_order() {
        let (client, state) = setup(&["cat", "dog"], AnnotationTransport::Sequential).await;
        let pending = session(&[("a.jpg", "cat"), ("b.jpg", "dog"), ("c.jpg", "cat")]);

        let outcome = submit(&client, &pending, "user-1").await.expect("submitted");

        assert_eq!(outcome.submitted, 3);
        assert_eq!(outcome.results.len(), 3);
        let guard = state.lock().expect("lock");
        let names: Vec<&str> = guard
            .records
            .iter()
            .map(|record| record["image_name"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(guard.records[1]["label"], "dog");
        assert_eq!(guard.records[1]["user_id"], "user-1");
    }

    #[tokio::test]
    async fn sequential_failure_reports_progress_without_rollback() {
        let (client, state) = setup(&["cat"], AnnotationTransport::Sequential).await;
        state.lock().expect("lock").fail_on_record = Some(1);
        let pending = session(&[("a.jpg", "cat"), ("b.jpg", "cat"), ("c.jpg", "cat")]);

        let err = submit(&client, &pending, "user-1").await.expect_err("fails");

        assert!(matches!(
            err,
            AnnotationError::Submission {
                submitted: 1,
                total: 3,
                ..
            }
        ));
        assert_eq!(state.lock().expect("lock").records.len(), 1);
    }

    #[tokio::test]
    async fn multipart_transport_sends_one_batch() {
        let (client, state) = setup(&["cat", "dog"], AnnotationTransport::Multipart).await;
        let pending = session(&[("a.jpg", "cat"), ("b.jpg", "dog")]);

        let outcome = submit(&client, &pending, "user-1").await.expect("submitted");

        assert_eq!(outcome.transport, "multipart");
        let guard = state.lock().expect("lock");
        assert_eq!(guard.batches.len(), 1);
        assert_eq!(guard.batches[0].0, vec!["a.jpg", "b.jpg"]);
        assert_eq!(guard.batches[0].1, vec!["cat", "dog"]);
    }

    #[tokio::test]
    async fn adding_existing_class_conflicts_and_new_class_is_listed() {
        let (client, _state) = setup(&["cat", "dog"], AnnotationTransport::Multipart).await;

        let err = add_class(&client, "cat").await.expect_err("conflict");
        assert!(matches!(err, AnnotationError::Conflict(ref label) if label == "cat"));

        add_class(&client, "bird").await.expect("bird added");
        let classes = client.get_classes().await.expect("classes");
        assert_eq!(classes, vec!["cat", "dog", "bird"]);
    }

    #[tokio::test]
    async fn deleting_a_class_removes_it() {
        let (client, _state) = setup(&["cat", "dog"], AnnotationTransport::Multipart).await;

        delete_class(&client, "dog").await.expect("deleted");
        assert_eq!(client.get_classes().await.expect("classes"), vec!["cat"]);
        assert!(matches!(
            delete_class(&client, " ").await,
            Err(AnnotationError::EmptyClass)
        ));
    }
}
