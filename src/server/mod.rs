//! HTTP 门面：配置、报告与对话记录接口。

mod routes;


use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::config::AppConfig;
use crate::http::HttpClient;
use crate::report::{CodeRabbitGenerator, ExternalSource, ReportGenerator, ReportService};
use crate::store::convex::ConvexStore;
use crate::store::ParrotStore;
use crate::upstream::{AnamSessionIssuer, AvatarSessionIssuer};

pub(crate) const STATIC_REPORT_FILE: &str = "report.json";

/// Shared, immutable state behind every handler.
pub struct AppState {
    pub config: AppConfig,
    pub store: Option<Arc<dyn ParrotStore>>,
    pub reports: ReportService,
    pub avatar: Arc<dyn AvatarSessionIssuer>,
}

impl AppState {
    /// Wires the production collaborators described by the configuration.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let http = HttpClient::with_timeout(config.http_timeout);
        let store = build_store(&config, &http)?;
        let generator = config.coderabbit_api_key.as_ref().map(|key| {
            Arc::new(CodeRabbitGenerator::new(
                http.clone(),
                config.coderabbit_report_url.clone(),
                key.clone(),
            )) as Arc<dyn ReportGenerator>
        });
        let avatar = Arc::new(AnamSessionIssuer::new(
            http.clone(),
            config.anam_session_token_url.clone(),
        ));
        Ok(Self::with_parts(config, http, store, generator, avatar))
    }

    pub fn with_parts(
        config: AppConfig,
        http: HttpClient,
        store: Option<Arc<dyn ParrotStore>>,
        generator: Option<Arc<dyn ReportGenerator>>,
        avatar: Arc<dyn AvatarSessionIssuer>,
    ) -> Self {
        let reports = ReportService::new(store.clone(), generator, http, external_source(&config));
        Self {
            config,
            store,
            reports,
            avatar,
        }
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.as_ref().map(|store| store.kind()).unwrap_or("none")
    }
}

/// The configured report URL, else the `report.json` served from the public
/// directory. Request headers never pick the source.
fn external_source(config: &AppConfig) -> ExternalSource {
    match &config.report_source_url {
        Some(url) => ExternalSource::Url(url.clone()),
        None => ExternalSource::File(config.public_dir.join(STATIC_REPORT_FILE)),
    }
}

fn build_store(config: &AppConfig, http: &HttpClient) -> Result<Option<Arc<dyn ParrotStore>>> {
    if let Some(url) = &config.convex_url {
        info!(target: "http", %url, "using hosted document store");
        let store = ConvexStore::new(http.clone(), url.clone(), config.convex_admin_key.clone());
        return Ok(Some(Arc::new(store)));
    }

    local_store(config)
}

#[cfg(feature = "sqlite-persistence")]
fn local_store(config: &AppConfig) -> Result<Option<Arc<dyn ParrotStore>>> {
    use crate::store::sqlite::{SqliteConfig, SqliteStore};

    let Some(path) = &config.database_path else {
        return Ok(None);
    };
    info!(target: "http", path = %path.display(), "using local SQLite store");
    let store = SqliteStore::bootstrap(SqliteConfig::file(path.clone()))?;
    Ok(Some(Arc::new(store)))
}

#[cfg(not(feature = "sqlite-persistence"))]
fn local_store(_config: &AppConfig) -> Result<Option<Arc<dyn ParrotStore>>> {
    Ok(None)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/api/config", get(routes::config))
        .route("/api/report", get(routes::report))
        .route(
            "/api/transcript",
            get(routes::list_transcript).post(routes::append_transcript),
        )
        .route("/report.json", get(routes::static_report))
        .with_state(state)
}
