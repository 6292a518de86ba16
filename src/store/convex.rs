//! Hosted document store reached through its HTTP function API.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::warn;

use super::ParrotStore;
use crate::error::{FetchError, StoreError};
use crate::http::HttpClient;
use crate::report::{Report, ReportDraft};
use crate::transcript::{NewTranscriptEntry, RecentConversation, TranscriptEntry};

const TARGET: &str = "convex_store";

const STORE_REPORT: &str = "parrot:storeReport";
const LATEST_REPORT: &str = "parrot:getLatestReport";
const APPEND_TRANSCRIPT: &str = "parrot:appendTranscript";
const LIST_TRANSCRIPT: &str = "parrot:listTranscript";
const LIST_RECENT: &str = "parrot:listRecentConversations";

#[derive(Debug, Clone, Copy)]
enum Call {
    Mutation,
    Query,
}

impl Call {
    fn endpoint(&self) -> &'static str {
        match self {
            Call::Mutation => "api/mutation",
            Call::Query => "api/query",
        }
    }
}

/// Client for the deployment's `parrot:*` functions.
#[derive(Clone)]
pub struct ConvexStore {
    http: HttpClient,
    base_url: String,
    admin_key: Option<String>,
}

impl ConvexStore {
    pub fn new(http: HttpClient, base_url: impl Into<String>, admin_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_key,
        }
    }

    async fn call(&self, kind: Call, path: &'static str, args: Value) -> Result<Value, StoreError> {
        let url = format!("{}/{}", self.base_url, kind.endpoint());
        let mut headers = Vec::new();
        if let Some(key) = &self.admin_key {
            headers.push(("Authorization", format!("Bearer {key}")));
        }

        let envelope = self
            .http
            .post_json(
                &url,
                headers,
                json!({ "path": path, "args": args, "format": "json" }),
            )
            .await
            .map_err(|err| match err {
                FetchError::Status { status, body } => {
                    warn!(target: TARGET, path, status, body = %body, "function call rejected");
                    StoreError::Rejected {
                        operation: path,
                        status,
                        message: body,
                    }
                }
                other => {
                    warn!(target: TARGET, path, err = %other, "function call failed");
                    StoreError::Fetch(other)
                }
            })?;

        unwrap_envelope(path, envelope)
    }

    async fn query_as<T: DeserializeOwned>(
        &self,
        path: &'static str,
        args: Value,
    ) -> Result<T, StoreError> {
        let value = self.call(Call::Query, path, args).await?;
        serde_json::from_value(value).map_err(|err| {
            StoreError::Fetch(FetchError::Decode(format!("{path} returned {err}")))
        })
    }
}

fn unwrap_envelope(path: &'static str, envelope: Value) -> Result<Value, StoreError> {
    match envelope.get("status").and_then(Value::as_str) {
        Some("success") => Ok(envelope.get("value").cloned().unwrap_or(Value::Null)),
        Some("error") => {
            let message = envelope
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            warn!(target: TARGET, path, %message, "function returned an error");
            Err(StoreError::Function {
                operation: path,
                message,
            })
        }
        _ => Err(StoreError::Fetch(FetchError::Decode(format!(
            "{path} returned an unrecognised envelope"
        )))),
    }
}

#[async_trait]
impl ParrotStore for ConvexStore {
    fn kind(&self) -> &'static str {
        "convex"
    }

    async fn store_report(&self, draft: &ReportDraft) -> Result<(), StoreError> {
        let args = json!({
            "projectId": draft.project_id,
            "projectName": draft.project_name,
            "from": draft.from,
            "to": draft.to,
            "raw": draft.raw,
        });
        self.call(Call::Mutation, STORE_REPORT, args).await?;
        Ok(())
    }

    async fn latest_report(&self, project_id: &str) -> Result<Option<Report>, StoreError> {
        self.query_as(LATEST_REPORT, json!({ "projectId": project_id }))
            .await
    }

    async fn append_transcript(&self, entry: &NewTranscriptEntry) -> Result<(), StoreError> {
        let args = json!({
            "projectId": entry.project_id,
            "conversationId": entry.conversation_id,
            "role": entry.role.as_str(),
            "text": entry.text,
        });
        self.call(Call::Mutation, APPEND_TRANSCRIPT, args).await?;
        Ok(())
    }

    async fn list_transcript(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TranscriptEntry>, StoreError> {
        self.query_as(LIST_TRANSCRIPT, json!({ "conversationId": conversation_id }))
            .await
    }

    async fn recent_conversations(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<RecentConversation>, StoreError> {
        self.query_as(
            LIST_RECENT,
            json!({ "projectId": project_id, "limit": limit }),
        )
        .await
    }
}
