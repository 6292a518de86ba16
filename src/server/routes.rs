use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::{AppState, STATIC_REPORT_FILE};
use crate::error::ApiError;
use crate::profile::{Profile, ProfileSet};
use crate::report::ReportRequest;
use crate::store::ParrotStore;
use crate::transcript::{
    trimmed_id, RecentConversation, TranscriptEntry, TranscriptPayload, DEFAULT_RECENT_LIMIT,
};

const STORE_NOT_CONFIGURED: &str =
    "Convex not configured (set CONVEX_URL and CONVEX_ADMIN_KEY)";

pub(super) async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "status": "ok", "store": state.store_kind() }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConfigQuery {
    profile_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConfigResponse {
    anam_session_token: String,
    eleven_labs_agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    eleven_labs_api_key: Option<String>,
    profiles: Vec<Profile>,
    active_profile_id: String,
}

pub(super) async fn config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfigQuery>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let profiles = ProfileSet::resolve(&state.config).map_err(|err| {
        error!(target: "config_api", %err, "profile configuration incomplete");
        err
    })?;
    let selected = profiles.select(query.profile_id.as_deref()).clone();

    let token = state
        .avatar
        .issue_session_token(&profiles.anam_api_key, &selected.anam_avatar_id)
        .await
        .map_err(|err| {
            error!(
                target: "config_api",
                profile_id = %selected.id,
                status = err.status(),
                %err,
                "avatar session token request failed"
            );
            ApiError::Internal("Failed to get Anam session token".into())
        })?;

    Ok(Json(ConfigResponse {
        anam_session_token: token,
        eleven_labs_agent_id: selected.eleven_labs_agent_id.clone(),
        eleven_labs_api_key: state.config.elevenlabs_api_key.clone(),
        active_profile_id: selected.id.clone(),
        profiles: profiles.profiles,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReportQuery {
    project_id: Option<String>,
    profile_id: Option<String>,
    generate: Option<String>,
}

pub(super) async fn report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Json<Value> {
    let request = ReportRequest {
        project_id: trimmed_id(query.project_id)
            .unwrap_or_else(|| state.config.default_project_id().to_string()),
        profile_id: trimmed_id(query.profile_id),
        generate: query.generate.as_deref().map(is_truthy).unwrap_or(false),
    };
    Json(state.reports.resolve(&request).await.into_json())
}

pub(super) async fn append_transcript(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let store = require_store(&state)?;

    let payload: TranscriptPayload = serde_json::from_slice(&body).map_err(|err| {
        debug!(target: "transcript_api", %err, "rejecting malformed transcript body");
        ApiError::Validation("Invalid JSON".into())
    })?;
    let entry = payload.validate(state.config.default_project_id())?;

    store.append_transcript(&entry).await.map_err(|err| {
        error!(
            target: "transcript_api",
            conversation_id = %entry.conversation_id,
            store = store.kind(),
            %err,
            "failed to persist transcript"
        );
        ApiError::from_store(&err, "Failed to persist transcript")
    })?;

    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TranscriptQuery {
    conversation_id: Option<String>,
    project_id: Option<String>,
    limit: Option<String>,
    agent_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum TranscriptListing {
    Entries(Vec<TranscriptEntry>),
    Conversations(Vec<RecentConversation>),
}

pub(super) async fn list_transcript(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TranscriptQuery>,
) -> Result<Json<TranscriptListing>, ApiError> {
    let store = require_store(&state)?;

    if let Some(conversation_id) = trimmed_id(query.conversation_id) {
        let entries = store.list_transcript(&conversation_id).await.map_err(|err| {
            error!(
                target: "transcript_api",
                %conversation_id,
                store = store.kind(),
                %err,
                "failed to load transcript"
            );
            ApiError::from_store(&err, "Failed to load transcript")
        })?;
        return Ok(Json(TranscriptListing::Entries(entries)));
    }

    if let Some(project_id) = trimmed_id(query.project_id) {
        let limit = parse_limit(query.limit.as_deref())?;
        if let Some(agent_id) = trimmed_id(query.agent_id) {
            debug!(target: "transcript_api", %project_id, %agent_id, "agent filter is not applied to recent conversations");
        }
        let conversations = store
            .recent_conversations(&project_id, limit)
            .await
            .map_err(|err| {
                error!(
                    target: "transcript_api",
                    %project_id,
                    store = store.kind(),
                    %err,
                    "failed to list recent conversations"
                );
                ApiError::from_store(&err, "Failed to load conversations")
            })?;
        return Ok(Json(TranscriptListing::Conversations(conversations)));
    }

    Err(ApiError::Validation(
        "conversationId or projectId is required".into(),
    ))
}

pub(super) async fn static_report(State(state): State<Arc<AppState>>) -> Response {
    let path = state.config.public_dir.join(STATIC_REPORT_FILE);
    match tokio::fs::read(&path).await {
        Ok(contents) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            contents,
        )
            .into_response(),
        Err(err) => {
            warn!(target: "http", path = %path.display(), %err, "static report unavailable");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "report.json not found" })),
            )
                .into_response()
        }
    }
}

fn require_store(state: &AppState) -> Result<&dyn ParrotStore, ApiError> {
    state
        .store
        .as_deref()
        .ok_or_else(|| ApiError::NotConfigured(STORE_NOT_CONFIGURED.into()))
}

fn parse_limit(raw: Option<&str>) -> Result<usize, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(DEFAULT_RECENT_LIMIT),
        Some(value) => match value.parse::<usize>() {
            Ok(limit) if limit > 0 => Ok(limit),
            _ => Err(ApiError::Validation(
                "limit must be a positive integer".into(),
            )),
        },
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
