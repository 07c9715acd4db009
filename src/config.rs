use std::{env, fmt, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60;
const DEFAULT_ANNOTATION_SERVICE_URL: &str = "http://localhost:8001";
const DEFAULT_EXPORT_SERVICE_URL: &str = "http://localhost:8000/export";
const DEFAULT_SCENE_SERVICE_URL: &str = "http://localhost:8000/scene-splitter";
const DEFAULT_DEMO_DELAY_MS: u64 = 3000;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_UPLOAD_MB: usize = 512;
const MIN_SECRET_LEN: usize = 16;

/// How annotation batches are delivered to the annotation service.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AnnotationTransport {
    /// One JSON request per (file, label) pair, awaited in order.
    Sequential,
    /// A single multipart request carrying every file and label.
    #[default]
    Multipart,
}

impl FromStr for AnnotationTransport {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" | "json" => Ok(AnnotationTransport::Sequential),
            "multipart" | "batch" => Ok(AnnotationTransport::Multipart),
            other => Err(anyhow!("unknown annotation transport `{other}`")),
        }
    }
}

impl fmt::Display for AnnotationTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationTransport::Sequential => write!(f, "sequential"),
            AnnotationTransport::Multipart => write!(f, "multipart"),
        }
    }
}

/// Base URLs of the upstream services fronted by the gateway.
#[derive(Clone, Debug)]
pub struct ServiceEndpoints {
    pub annotation: String,
    pub export: String,
    pub scenes: String,
    pub face_analyzer: Option<String>,
    pub pattern_analyzer: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub endpoints: ServiceEndpoints,
    pub annotation_transport: AnnotationTransport,
    pub demo_delay: Duration,
    pub connect_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let jwt_secret = read("JWT_SECRET").context("JWT_SECRET env var is missing")?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} characters");
        }

        let token_ttl_minutes = parse_or(read("TOKEN_TTL_MINUTES"), DEFAULT_TOKEN_TTL_MINUTES)
            .context("TOKEN_TTL_MINUTES must be an integer")?;
        if token_ttl_minutes <= 0 {
            bail!("TOKEN_TTL_MINUTES must be positive");
        }

        let annotation_transport = match read("ANNOTATION_TRANSPORT") {
            Some(value) => value.parse()?,
            None => AnnotationTransport::default(),
        };

        let max_upload_mb: usize = parse_or(read("MAX_UPLOAD_MB"), DEFAULT_MAX_UPLOAD_MB)
            .context("MAX_UPLOAD_MB must be an integer")?;

        Ok(Self {
            port: parse_or(read("PORT"), DEFAULT_PORT).context("PORT must be a valid port")?,
            database_url: read("DATABASE_URL"),
            jwt_secret,
            token_ttl_minutes,
            endpoints: ServiceEndpoints {
                annotation: service_url(
                    "ANNOTATION_SERVICE_URL",
                    read("ANNOTATION_SERVICE_URL").as_deref().unwrap_or(DEFAULT_ANNOTATION_SERVICE_URL),
                )?,
                export: service_url(
                    "EXPORT_SERVICE_URL",
                    read("EXPORT_SERVICE_URL").as_deref().unwrap_or(DEFAULT_EXPORT_SERVICE_URL),
                )?,
                scenes: service_url(
                    "SCENE_SERVICE_URL",
                    read("SCENE_SERVICE_URL").as_deref().unwrap_or(DEFAULT_SCENE_SERVICE_URL),
                )?,
                face_analyzer: read("FACE_ANALYZER_URL")
                    .map(|value| service_url("FACE_ANALYZER_URL", &value))
                    .transpose()?,
                pattern_analyzer: read("PATTERN_ANALYZER_URL")
                    .map(|value| service_url("PATTERN_ANALYZER_URL", &value))
                    .transpose()?,
            },
            annotation_transport,
            demo_delay: Duration::from_millis(
                parse_or(read("DEMO_DELAY_MS"), DEFAULT_DEMO_DELAY_MS)
                    .context("DEMO_DELAY_MS must be an integer")?,
            ),
            connect_timeout: Duration::from_secs(
                parse_or(
                    read("UPSTREAM_CONNECT_TIMEOUT_SECS"),
                    DEFAULT_CONNECT_TIMEOUT_SECS,
                )
                .context("UPSTREAM_CONNECT_TIMEOUT_SECS must be an integer")?,
            ),
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
        })
    }
}

fn parse_or<T>(value: Option<String>, default: T) -> Result<T, T::Err>
where
    T: FromStr,
{
    match value {
        Some(raw) => raw.parse(),
        None => Ok(default),
    }
}

/// Check that `value` is an absolute http(s) URL and drop any trailing slash.
fn service_url(key: &str, value: &str) -> Result<String> {
    let url = Url::parse(value).with_context(|| format!("{key} is not a valid URL: `{value}`"))?;
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        bail!("{key} must be an http(s) URL with a host, got `{value}`");
    }
    Ok(value.trim_end_matches('/').to_string())
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config =
            AppConfig::from_lookup(lookup(&[("JWT_SECRET", "0123456789abcdef")])).expect("config");

        assert_eq!(config.port, 8080);
        assert_eq!(config.token_ttl_minutes, 60);
        assert!(config.database_url.is_none());
        assert_eq!(config.endpoints.annotation, "http://localhost:8001");
        assert_eq!(config.annotation_transport, AnnotationTransport::Multipart);
        assert_eq!(config.demo_delay, Duration::from_millis(3000));
        assert!(config.endpoints.face_analyzer.is_none());
    }

    #[test]
    fn missing_secret_is_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("JWT_SECRET", "short")])).is_err());
    }

    #[test]
    fn overrides_are_trimmed_and_parsed() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "0123456789abcdef"),
            ("PORT", "9000"),
            ("ANNOTATION_SERVICE_URL", "http://annotations:8001/ "),
            ("ANNOTATION_TRANSPORT", "Sequential"),
            ("FACE_ANALYZER_URL", "http://faces/"),
            ("DATABASE_URL", "  "),
        ]))
        .expect("config");

        assert_eq!(config.port, 9000);
        assert_eq!(config.endpoints.annotation, "http://annotations:8001");
        assert_eq!(config.annotation_transport, AnnotationTransport::Sequential);
        assert_eq!(config.endpoints.face_analyzer.as_deref(), Some("http://faces"));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn malformed_service_urls_are_rejected() {
        for key in [
            "ANNOTATION_SERVICE_URL",
            "EXPORT_SERVICE_URL",
            "SCENE_SERVICE_URL",
            "FACE_ANALYZER_URL",
            "PATTERN_ANALYZER_URL",
        ] {
            let err = AppConfig::from_lookup(lookup(&[
                ("JWT_SECRET", "0123456789abcdef"),
                (key, "not a url"),
            ]))
            .expect_err("malformed URL");
            assert!(err.to_string().contains(key), "{key}: {err}");
        }

        assert!(
            AppConfig::from_lookup(lookup(&[
                ("JWT_SECRET", "0123456789abcdef"),
                ("FACE_ANALYZER_URL", "ftp://faces"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn rejects_unknown_transport_and_bad_ttl() {
        assert!(
            AppConfig::from_lookup(lookup(&[
                ("JWT_SECRET", "0123456789abcdef"),
                ("ANNOTATION_TRANSPORT", "carrier-pigeon"),
            ]))
            .is_err()
        );
        assert!(
            AppConfig::from_lookup(lookup(&[
                ("JWT_SECRET", "0123456789abcdef"),
                ("TOKEN_TTL_MINUTES", "0"),
            ]))
            .is_err()
        );
    }
}
