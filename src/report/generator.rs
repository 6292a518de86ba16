use async_trait::async_trait;
use serde_json::{json, Value};

use super::ReportWindow;
use crate::error::FetchError;
use crate::http::HttpClient;

/// Produces raw report groups for a time window.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, window: &ReportWindow) -> Result<Vec<Value>, FetchError>;
}

/// Calls the CodeRabbit report API.
pub struct CodeRabbitGenerator {
    http: HttpClient,
    url: String,
    api_key: String,
}

impl CodeRabbitGenerator {
    pub fn new(http: HttpClient, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ReportGenerator for CodeRabbitGenerator {
    async fn generate(&self, window: &ReportWindow) -> Result<Vec<Value>, FetchError> {
        let payload = self
            .http
            .post_json(
                &self.url,
                vec![("x-coderabbitai-api-key", self.api_key.clone())],
                json!({ "from": window.from, "to": window.to }),
            )
            .await?;

        match payload {
            Value::Array(groups) => Ok(groups),
            other => Err(FetchError::Decode(format!(
                "expected a list of report groups, got {}",
                kind(&other)
            ))),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
