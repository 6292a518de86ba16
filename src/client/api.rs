use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClientError, FetchError};
use crate::http::HttpClient;
use crate::profile::Profile;
use crate::report::Report;
use crate::transcript::NewTranscriptEntry;

/// Session bootstrap returned by `GET /api/config`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub anam_session_token: String,
    pub eleven_labs_agent_id: String,
    #[serde(default)]
    pub eleven_labs_api_key: Option<String>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub active_profile_id: Option<String>,
}

/// The facade endpoints the session client depends on.
#[async_trait]
pub trait ParrotApi: Send + Sync {
    async fn fetch_config(&self, profile_id: Option<&str>) -> Result<SessionConfig, ClientError>;

    async fn fetch_report(&self, project_id: Option<&str>) -> Result<Report, ClientError>;

    async fn append_transcript(&self, entry: &NewTranscriptEntry) -> Result<(), ClientError>;
}

/// [`ParrotApi`] over HTTP against a running facade.
pub struct HttpParrotApi {
    http: HttpClient,
    base_url: String,
}

impl HttpParrotApi {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl ParrotApi for HttpParrotApi {
    async fn fetch_config(&self, profile_id: Option<&str>) -> Result<SessionConfig, ClientError> {
        let query = profile_id
            .map(|id| vec![("profileId", id.to_string())])
            .unwrap_or_default();
        let value = self
            .http
            .get_json_with_query(&self.endpoint("/api/config"), query)
            .await
            .map_err(ClientError::Config)?;
        decode(value).map_err(ClientError::Config)
    }

    async fn fetch_report(&self, project_id: Option<&str>) -> Result<Report, ClientError> {
        let query = project_id
            .map(|id| vec![("projectId", id.to_string())])
            .unwrap_or_default();
        let value = self
            .http
            .get_json_with_query(&self.endpoint("/api/report"), query)
            .await
            .map_err(ClientError::Report)?;
        decode(value).map_err(ClientError::Report)
    }

    async fn append_transcript(&self, entry: &NewTranscriptEntry) -> Result<(), ClientError> {
        let body = serde_json::to_value(entry)
            .map_err(|err| ClientError::Transcript(FetchError::Decode(err.to_string())))?;
        self.http
            .post_json(&self.endpoint("/api/transcript"), Vec::new(), body)
            .await
            .map_err(ClientError::Transcript)?;
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, FetchError> {
    serde_json::from_value(value).map_err(|err| FetchError::Decode(err.to_string()))
}
