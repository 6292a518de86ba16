//! Project report models and summary derivation.

mod generator;
mod service;

pub use generator::{CodeRabbitGenerator, ReportGenerator};
pub use service::{ExternalSource, ReportRequest, ReportService, ResolvedReport};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::de_opt_millis;

/// Stored summaries are capped at this many characters.
pub const SUMMARY_LIMIT: usize = 8_000;
/// Provenance tag written on generated reports.
pub const REPORT_SOURCE_TAG: &str = "coderabbit";
const DEFAULT_GROUP: &str = "Update";

/// Periodic summary of project activity.
///
/// Reports fetched from an external source or the built-in fallback only carry
/// the display fields, so provenance fields are optional. External bodies may
/// omit even those; missing ones decode as empty strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(
        default,
        deserialize_with = "de_opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub generated_at: Option<i64>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Input of the store-report operation. The summary is derived, never supplied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
    pub project_id: String,
    pub project_name: String,
    pub from: String,
    pub to: String,
    pub raw: Vec<Value>,
}

impl ReportDraft {
    pub fn summary(&self) -> String {
        summarize(&self.raw)
    }

    pub fn into_report(self, generated_at: i64) -> Report {
        let summary = self.summary();
        Report {
            project_id: self.project_id,
            project_name: self.project_name,
            from: self.from,
            to: self.to,
            generated_at: Some(generated_at),
            summary,
            raw: Some(Value::Array(self.raw)),
            source: Some(REPORT_SOURCE_TAG.into()),
        }
    }
}

/// Renders each raw group as a markdown section, joined by a blank line and
/// truncated to [`SUMMARY_LIMIT`] characters.
pub fn summarize(raw: &[Value]) -> String {
    let joined = raw
        .iter()
        .map(render_section)
        .collect::<Vec<_>>()
        .join("\n\n");
    truncate_chars(joined, SUMMARY_LIMIT)
}

fn render_section(group: &Value) -> String {
    let title = match group.get("group") {
        None | Some(Value::Null) => DEFAULT_GROUP.to_string(),
        Some(value) => scalar_text(value),
    };
    let body = match group.get("report") {
        None | Some(Value::Null) => pretty(group),
        Some(value) => scalar_text(value),
    };
    format!("### {title}\n{body}")
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn pretty(value: &Value) -> String {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value.clone()
    };
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

fn truncate_chars(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

/// Calendar-date window handed to the report generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportWindow {
    pub from: String,
    pub to: String,
}

impl ReportWindow {
    /// The last 24 hours, truncated to UTC dates.
    pub fn trailing_day(now: DateTime<Utc>) -> Self {
        let from = now - Duration::hours(24);
        Self {
            from: from.format("%Y-%m-%d").to_string(),
            to: now.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Report served when every other source failed.
pub fn fallback_report() -> Report {
    Report {
        project_id: "example/repo".into(),
        project_name: "Parrot Demo".into(),
        from: "2025-01-10".into(),
        to: "2025-01-11".into(),
        generated_at: None,
        summary: "### Merged\n- Add Anam + ElevenLabs demo skeleton\n- Improve WebSocket logging\n\n### Open Risks\n- No persistence for transcripts\n- No multi-project switcher yet\n\n### Next Up\n- Inject CodeRabbit context into ElevenLabs using contextual_update\n- Add report source selector".into(),
        raw: None,
        source: None,
    }
}
