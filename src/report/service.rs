use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use super::{fallback_report, Report, ReportDraft, ReportGenerator, ReportWindow};
use crate::http::HttpClient;
use crate::store::ParrotStore;
use crate::telemetry::events::record_report_resolved;
use crate::util::now_ms;

const TARGET: &str = "report_service";

/// Inputs of a report lookup.
#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub project_id: String,
    pub profile_id: Option<String>,
    pub generate: bool,
}

/// Where the external step reads its report from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalSource {
    /// Operator-configured URL, fetched with GET.
    Url(String),
    /// The static `report.json` this service also serves.
    File(PathBuf),
}

/// The report that won the fallback chain, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedReport {
    Generated(Report),
    Stored(Report),
    External(Value),
    Fallback(Report),
}

impl ResolvedReport {
    pub fn source(&self) -> &'static str {
        match self {
            ResolvedReport::Generated(_) => "generated",
            ResolvedReport::Stored(_) => "stored",
            ResolvedReport::External(_) => "external",
            ResolvedReport::Fallback(_) => "fallback",
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            ResolvedReport::External(value) => value,
            ResolvedReport::Generated(report)
            | ResolvedReport::Stored(report)
            | ResolvedReport::Fallback(report) => {
                serde_json::to_value(report).unwrap_or(Value::Null)
            }
        }
    }
}

/// Walks the report sources in priority order: generate, stored, external, fallback.
pub struct ReportService {
    store: Option<Arc<dyn ParrotStore>>,
    generator: Option<Arc<dyn ReportGenerator>>,
    http: HttpClient,
    external: ExternalSource,
}

impl ReportService {
    pub fn new(
        store: Option<Arc<dyn ParrotStore>>,
        generator: Option<Arc<dyn ReportGenerator>>,
        http: HttpClient,
        external: ExternalSource,
    ) -> Self {
        Self {
            store,
            generator,
            http,
            external,
        }
    }

    pub async fn resolve(&self, request: &ReportRequest) -> ResolvedReport {
        let started = Instant::now();
        let resolved = self.resolve_inner(request).await;
        record_report_resolved(
            &request.project_id,
            request.profile_id.as_deref(),
            request.generate,
            resolved.source(),
            started.elapsed(),
        );
        resolved
    }

    async fn resolve_inner(&self, request: &ReportRequest) -> ResolvedReport {
        if request.generate {
            if let Some(report) = self.generate(&request.project_id).await {
                return ResolvedReport::Generated(report);
            }
        }

        if let Some(report) = self.stored(&request.project_id).await {
            return ResolvedReport::Stored(report);
        }

        if let Some(value) = self.external().await {
            return ResolvedReport::External(value);
        }

        ResolvedReport::Fallback(fallback_report())
    }

    async fn generate(&self, project_id: &str) -> Option<Report> {
        let Some(generator) = self.generator.as_ref() else {
            info!(
                target: TARGET,
                project_id,
                "report generation requested but no generation key is configured"
            );
            return None;
        };

        let window = ReportWindow::trailing_day(Utc::now());
        let raw = match generator.generate(&window).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    target: TARGET,
                    project_id,
                    status = err.status(),
                    %err,
                    "report generation failed"
                );
                return None;
            }
        };

        let draft = ReportDraft {
            project_id: project_id.to_string(),
            project_name: project_id.to_string(),
            from: window.from,
            to: window.to,
            raw,
        };

        if let Some(store) = self.store.as_ref() {
            if let Err(err) = store.store_report(&draft).await {
                warn!(
                    target: TARGET,
                    project_id,
                    store = store.kind(),
                    %err,
                    "failed to persist generated report"
                );
                return None;
            }
        }

        Some(draft.into_report(now_ms()))
    }

    async fn stored(&self, project_id: &str) -> Option<Report> {
        let store = self.store.as_ref()?;
        match store.latest_report(project_id).await {
            Ok(Some(report)) if !report.summary.is_empty() => Some(report),
            Ok(_) => {
                info!(target: TARGET, project_id, store = store.kind(), "no stored report");
                None
            }
            Err(err) => {
                warn!(
                    target: TARGET,
                    project_id,
                    store = store.kind(),
                    %err,
                    "stored report lookup failed"
                );
                None
            }
        }
    }

    async fn external(&self) -> Option<Value> {
        match &self.external {
            ExternalSource::Url(url) => match self.http.get_json(url).await {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(
                        target: TARGET,
                        %url,
                        status = err.status(),
                        %err,
                        "report fetch failed"
                    );
                    None
                }
            },
            ExternalSource::File(path) => {
                let contents = match tokio::fs::read(path).await {
                    Ok(contents) => contents,
                    Err(err) => {
                        info!(target: TARGET, path = %path.display(), %err, "no static report");
                        return None;
                    }
                };
                match serde_json::from_slice(&contents) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(
                            target: TARGET,
                            path = %path.display(),
                            %err,
                            "static report is not JSON"
                        );
                        None
                    }
                }
            }
        }
    }
}
