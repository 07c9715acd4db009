use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    detection::Analyzers,
    exports::ExportHistory,
    services::{AnnotationClient, ExportClient, SceneClient, UpstreamClient},
    web::{
        data::{MemoryUserStore, PgUserStore, UserStore},
        token::TokenSigner,
    },
};

#[derive(Clone)]
pub struct AppState {
    users: Arc<dyn UserStore>,
    tokens: TokenSigner,
    annotation: AnnotationClient,
    export: ExportClient,
    scenes: SceneClient,
    analyzers: Analyzers,
    history: ExportHistory,
    config: Arc<AppConfig>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let users: Arc<dyn UserStore> = match config.database_url.as_deref() {
            Some(database_url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(database_url)
                    .await
                    .context("failed to connect to Postgres")?;

                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .context("failed to run database migrations")?;

                info!("using Postgres user store");
                Arc::new(PgUserStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        Self::with_store(config, users)
    }

    /// Assemble state around an existing user store.
    pub fn with_store(config: AppConfig, users: Arc<dyn UserStore>) -> Result<Self> {
        let upstream = UpstreamClient::new(config.connect_timeout)
            .context("failed to initialize upstream HTTP client")?;

        Ok(Self {
            users,
            tokens: TokenSigner::new(&config.jwt_secret, config.token_ttl_minutes),
            annotation: AnnotationClient::new(
                upstream.clone(),
                &config.endpoints.annotation,
                config.annotation_transport,
            ),
            export: ExportClient::new(upstream.clone(), &config.endpoints.export),
            scenes: SceneClient::new(upstream.clone(), &config.endpoints.scenes),
            analyzers: Analyzers::new(
                upstream,
                config.endpoints.face_analyzer.clone(),
                config.endpoints.pattern_analyzer.clone(),
                config.demo_delay,
            ),
            history: ExportHistory::default(),
            config: Arc::new(config),
        })
    }

    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    pub fn tokens(&self) -> &TokenSigner {
        &self.tokens
    }

    pub fn annotation_client(&self) -> &AnnotationClient {
        &self.annotation
    }

    pub fn export_client(&self) -> &ExportClient {
        &self.export
    }

    pub fn scene_client(&self) -> &SceneClient {
        &self.scenes
    }

    pub fn analyzers(&self) -> &Analyzers {
        &self.analyzers
    }

    pub fn export_history(&self) -> &ExportHistory {
        &self.history
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
