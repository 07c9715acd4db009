use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{MediaFile, ServiceError, UpstreamClient, endpoint, read_json, transport};
use crate::config::AnnotationTransport;

const SERVICE: &str = "annotation";

/// One labeled image as recorded by the annotation service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub image_name: String,
    pub label: String,
    pub user_id: String,
}

/// Accepts the class list shapes the annotation service is known to return.
#[derive(Deserialize)]
#[serde(untagged)]
enum ClassListPayload {
    Labels(Vec<String>),
    Objects(Vec<ClassObject>),
    Wrapped { classes: Vec<ClassEntry> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassEntry {
    Label(String),
    Object(ClassObject),
}

#[derive(Deserialize)]
struct ClassObject {
    #[serde(alias = "name", alias = "class_name")]
    label: String,
}

impl ClassListPayload {
    fn into_labels(self) -> Vec<String> {
        match self {
            ClassListPayload::Labels(labels) => labels,
            ClassListPayload::Objects(objects) => {
                objects.into_iter().map(|object| object.label).collect()
            }
            ClassListPayload::Wrapped { classes } => classes
                .into_iter()
                .map(|entry| match entry {
                    ClassEntry::Label(label) => label,
                    ClassEntry::Object(object) => object.label,
                })
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct AnnotationClient {
    upstream: UpstreamClient,
    base_url: String,
    transport: AnnotationTransport,
}

impl AnnotationClient {
    pub fn new(upstream: UpstreamClient, base_url: &str, transport: AnnotationTransport) -> Self {
        Self {
            upstream,
            base_url: base_url.to_string(),
            transport,
        }
    }

    pub fn transport(&self) -> AnnotationTransport {
        self.transport
    }

    pub async fn get_classes(&self) -> Result<Vec<String>, ServiceError> {
        let response = self
            .upstream
            .http()
            .get(endpoint(&self.base_url, &["classes"])?)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        let payload: ClassListPayload = read_json(SERVICE, response).await?;
        Ok(payload.into_labels())
    }

    pub async fn add_class(&self, label: &str) -> Result<Value, ServiceError> {
        let response = self
            .upstream
            .http()
            .post(endpoint(&self.base_url, &["classes"])?)
            .json(&json!({ "label": label }))
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }

    pub async fn delete_class(&self, label: &str) -> Result<Value, ServiceError> {
        let response = self
            .upstream
            .http()
            .delete(endpoint(&self.base_url, &["classes", label])?)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }

    pub async fn annotate_one(&self, record: &AnnotationRecord) -> Result<Value, ServiceError> {
        let response = self
            .upstream
            .http()
            .post(endpoint(&self.base_url, &["annotate-db"])?)
            .json(record)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }

    /// Send every file and label in a single multipart request.
    pub async fn annotate_batch(
        &self,
        items: &[(MediaFile, String)],
        user_id: &str,
    ) -> Result<Value, ServiceError> {
        let mut form = Form::new().text("user_id", user_id.to_string());
        for (file, _) in items {
            form = form.part("files", file.to_part()?);
        }
        for (_, label) in items {
            form = form.text("labels", label.clone());
        }

        let response = self
            .upstream
            .http()
            .post(endpoint(&self.base_url, &["annotate-db"])?)
            .multipart(form)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }

    pub async fn export(&self) -> Result<Value, ServiceError> {
        let response = self
            .upstream
            .http()
            .get(endpoint(&self.base_url, &["export"])?)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        read_json(SERVICE, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_list_accepts_known_shapes() {
        let plain: ClassListPayload = serde_json::from_str(r#"["cat","dog"]"#).expect("plain");
        assert_eq!(plain.into_labels(), vec!["cat", "dog"]);

        let objects: ClassListPayload =
            serde_json::from_str(r#"[{"name":"cat"},{"label":"dog"}]"#).expect("objects");
        assert_eq!(objects.into_labels(), vec!["cat", "dog"]);

        let wrapped: ClassListPayload =
            serde_json::from_str(r#"{"classes":["cat",{"class_name":"dog"}]}"#).expect("wrapped");
        assert_eq!(wrapped.into_labels(), vec!["cat", "dog"]);
    }
}
