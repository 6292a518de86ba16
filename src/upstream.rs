//! Avatar vendor session tokens.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::FetchError;
use crate::http::HttpClient;

/// Mints short-lived avatar streaming sessions.
#[async_trait]
pub trait AvatarSessionIssuer: Send + Sync {
    async fn issue_session_token(&self, api_key: &str, avatar_id: &str)
        -> Result<String, FetchError>;
}

/// Anam `auth/session-token` client. Audio passthrough is always on because the
/// voice agent supplies the avatar's speech.
pub struct AnamSessionIssuer {
    http: HttpClient,
    url: String,
}

impl AnamSessionIssuer {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl AvatarSessionIssuer for AnamSessionIssuer {
    async fn issue_session_token(
        &self,
        api_key: &str,
        avatar_id: &str,
    ) -> Result<String, FetchError> {
        let body = json!({
            "personaConfig": {
                "avatarId": avatar_id,
                "enableAudioPassthrough": true,
            }
        });
        let response = self
            .http
            .post_json(
                &self.url,
                vec![("Authorization", format!("Bearer {api_key}"))],
                body,
            )
            .await?;

        response
            .get("sessionToken")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FetchError::Decode("sessionToken missing from response".into()))
    }
}
