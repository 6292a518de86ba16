use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) const TARGET: &str = "telemetry::parrot";
pub(crate) const EVENT_REPORT_RESOLVED: &str = "report_resolved";
pub(crate) const EVENT_TRANSCRIPT_PERSIST: &str = "transcript_persist";

#[derive(Debug, Serialize)]
pub struct ReportResolvedEvent<'a> {
    pub project_id: &'a str,
    pub profile_id: Option<&'a str>,
    pub generate_requested: bool,
    pub source: &'static str,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct TranscriptPersistEvent<'a> {
    pub conversation_id: &'a str,
    pub role: &'static str,
    pub succeeded: bool,
    pub error: Option<String>,
}

pub fn record_report_resolved(
    project_id: &str,
    profile_id: Option<&str>,
    generate_requested: bool,
    source: &'static str,
    latency: Duration,
) {
    let event = ReportResolvedEvent {
        project_id,
        profile_id,
        generate_requested,
        source,
        latency_ms: duration_to_ms(latency),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_REPORT_RESOLVED,
            project_id = event.project_id,
            source = event.source,
            latency_ms = event.latency_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_REPORT_RESOLVED,
            %err,
            "failed to encode report resolution event"
        ),
    }
}

pub fn record_transcript_persist(
    conversation_id: &str,
    role: &'static str,
    error: Option<String>,
) {
    let event = TranscriptPersistEvent {
        conversation_id,
        role,
        succeeded: error.is_none(),
        error,
    };

    match serde_json::to_string(&event) {
        Ok(payload) if event.succeeded => info!(
            target: TARGET,
            event = EVENT_TRANSCRIPT_PERSIST,
            conversation_id = event.conversation_id,
            role = event.role,
            payload = %payload
        ),
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_TRANSCRIPT_PERSIST,
            conversation_id = event.conversation_id,
            role = event.role,
            payload = %payload,
            "transcript turn was not persisted"
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TRANSCRIPT_PERSIST,
            %err,
            "failed to encode transcript persistence event"
        ),
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_clamps_to_u64() {
        let duration = Duration::new(u64::MAX, 0);
        assert_eq!(duration_to_ms(duration), u64::MAX);
    }

    #[test]
    fn persist_event_marks_failures() {
        let event = TranscriptPersistEvent {
            conversation_id: "c1",
            role: "user",
            succeeded: false,
            error: Some("HTTP 502".into()),
        };
        let payload = serde_json::to_value(&event).expect("encode");
        assert_eq!(payload["succeeded"], false);
        assert_eq!(payload["error"], "HTTP 502");
    }
}
