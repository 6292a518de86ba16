//! Conversation transcript models and the recent-conversation reduction.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::util::de_millis;

/// Default number of conversations returned by the recent listing.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Speaker of a transcript turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    /// Canonical value persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Role::User),
            "agent" => Ok(Role::Agent),
            "system" => Ok(Role::System),
            other => Err(ApiError::Validation(format!(
                "role must be one of user, agent, system (got {other})"
            ))),
        }
    }
}

/// One persisted conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub project_id: String,
    pub conversation_id: String,
    pub role: Role,
    pub text: String,
    #[serde(deserialize_with = "de_millis")]
    pub ts: i64,
}

/// Validated append command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewTranscriptEntry {
    pub project_id: String,
    pub conversation_id: String,
    pub role: Role,
    pub text: String,
}

impl NewTranscriptEntry {
    pub fn stamped(self, ts: i64) -> TranscriptEntry {
        TranscriptEntry {
            project_id: self.project_id,
            conversation_id: self.conversation_id,
            role: self.role,
            text: self.text,
            ts,
        }
    }
}

/// Raw body of `POST /api/transcript`; every field is optional until validated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptPayload {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl TranscriptPayload {
    /// Checks required fields and fills in the project id. Ids and the role
    /// are trimmed the same way the listing queries are; text is kept verbatim.
    pub fn validate(self, default_project_id: &str) -> Result<NewTranscriptEntry, ApiError> {
        let project_id =
            trimmed_id(self.project_id).unwrap_or_else(|| default_project_id.to_string());
        let (conversation_id, role, text) = match (
            trimmed_id(self.conversation_id),
            trimmed_id(self.role),
            self.text.filter(|text| !text.is_empty()),
        ) {
            (Some(conversation_id), Some(role), Some(text)) => (conversation_id, role, text),
            _ => {
                return Err(ApiError::Validation(
                    "conversationId, role, and text are required".into(),
                ))
            }
        };

        Ok(NewTranscriptEntry {
            project_id,
            conversation_id,
            role: role.parse()?,
            text,
        })
    }
}

/// Trims an identifier, treating blank values as absent.
pub fn trimmed_id(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// A conversation surfaced by the recent listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecentConversation {
    pub conversation_id: String,
    #[serde(deserialize_with = "de_millis")]
    pub last_ts: i64,
}

/// Reduces newest-first rows to distinct conversations.
///
/// Callers fetch at most `limit` rows before calling this, so a conversation
/// whose rows are pushed out of that window by chattier conversations does not
/// appear even when fewer than `limit` conversations are returned.
pub fn recent_conversations<'a, I>(rows: I, limit: usize) -> Vec<RecentConversation>
where
    I: IntoIterator<Item = &'a TranscriptEntry>,
{
    let mut seen = HashSet::new();
    let mut conversations = Vec::new();

    for row in rows {
        if conversations.len() >= limit {
            break;
        }
        if seen.insert(row.conversation_id.as_str()) {
            conversations.push(RecentConversation {
                conversation_id: row.conversation_id.clone(),
                last_ts: row.ts,
            });
        }
    }

    conversations.sort_by(|a, b| b.last_ts.cmp(&a.last_ts));
    conversations
}
