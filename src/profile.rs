//! Profile resolution: which avatar and voice agent a session talks to.

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::ApiError;

pub const DEFAULT_PROFILE_ID: &str = "default";
pub const MISSING_ENV_MESSAGE: &str =
    "Missing environment variables. Check ANAM_API_KEY, ANAM_AVATAR_ID, and ELEVENLABS_AGENT_ID";

/// Named bundle of external identities used by a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub label: String,
    pub eleven_labs_agent_id: String,
    pub anam_avatar_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_user: Option<String>,
}

/// Resolved profile list plus the credential needed to mint avatar sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSet {
    pub anam_api_key: String,
    pub profiles: Vec<Profile>,
}

impl ProfileSet {
    /// Resolves profiles from `PROFILES_JSON`, or a single default profile from the
    /// avatar/agent identifiers when no list is supplied.
    pub fn resolve(config: &AppConfig) -> Result<Self, ApiError> {
        let listed = match config.profiles_json.as_deref() {
            Some(raw) => parse_profiles(raw)?,
            None => Vec::new(),
        };

        if !listed.is_empty() {
            let anam_api_key = config
                .anam_api_key
                .clone()
                .ok_or_else(|| ApiError::Configuration(MISSING_ENV_MESSAGE.into()))?;
            return Ok(Self {
                anam_api_key,
                profiles: listed,
            });
        }

        match (
            config.anam_api_key.as_ref(),
            config.anam_avatar_id.as_ref(),
            config.elevenlabs_agent_id.as_ref(),
        ) {
            (Some(api_key), Some(avatar_id), Some(agent_id)) => Ok(Self {
                anam_api_key: api_key.clone(),
                profiles: vec![Profile {
                    id: DEFAULT_PROFILE_ID.into(),
                    label: "Default".into(),
                    eleven_labs_agent_id: agent_id.clone(),
                    anam_avatar_id: avatar_id.clone(),
                    display_name: Some("Default".into()),
                    github_user: None,
                }],
            }),
            _ => Err(ApiError::Configuration(MISSING_ENV_MESSAGE.into())),
        }
    }

    /// Picks the requested profile, or the first one when the id is unknown.
    pub fn select(&self, requested: Option<&str>) -> &Profile {
        let requested = requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_PROFILE_ID);
        self.profiles
            .iter()
            .find(|profile| profile.id == requested)
            .unwrap_or(&self.profiles[0])
    }
}

fn parse_profiles(raw: &str) -> Result<Vec<Profile>, ApiError> {
    serde_json::from_str::<Vec<Profile>>(raw).map_err(|err| {
        ApiError::Configuration(format!("PROFILES_JSON is not a valid profile list: {err}"))
    })
}
