//! Inbound generation requests and their validation.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::GenerationError;
use crate::kind::JobKind;

/// Raw request body as sent by the client. Every field is optional here so
/// that validation, not deserialization, decides what is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    #[serde(default)]
    pub api_type: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub avatar_id: Option<String>,
}

/// A validated generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub kind: JobKind,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub voice_id: Option<String>,
    pub avatar_id: Option<String>,
}

impl GenerateBody {
    /// Validate the body into a [`GenerationRequest`].
    ///
    /// Checks run in a fixed order: prompt, apiType, dimensions, then the
    /// avatar identifiers.
    pub fn validate(self) -> Result<GenerationRequest, GenerationError> {
        let prompt = self
            .prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("Missing prompt"))?;

        let kind: JobKind = self
            .api_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| invalid("Missing apiType"))?
            .parse()?;

        let (default_width, default_height) = kind.default_dimensions();
        let width = dimension("width", self.width, default_width)?;
        let height = dimension("height", self.height, default_height)?;

        let voice_id = non_blank(self.voice_id);
        let avatar_id = non_blank(self.avatar_id);
        if kind == JobKind::Avatar && (voice_id.is_none() || avatar_id.is_none()) {
            return Err(invalid("Avatar generation requires both voiceId and avatarId"));
        }

        Ok(GenerationRequest {
            kind,
            prompt,
            width,
            height,
            voice_id,
            avatar_id,
        })
    }
}

/// Body of a one-shot status check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQueryBody {
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub api_type: Option<String>,
}

/// A validated status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusQuery {
    pub kind: JobKind,
    pub status_url: Url,
}

impl StatusQueryBody {
    pub fn validate(self) -> Result<StatusQuery, GenerationError> {
        let (Some(status_url), Some(api_type)) =
            (non_blank(self.status_url), non_blank(self.api_type))
        else {
            return Err(invalid("Missing statusUrl or apiType."));
        };
        let kind: JobKind = api_type.parse()?;
        let status_url = Url::parse(&status_url)
            .map_err(|e| invalid(&format!("statusUrl is not a valid URL: {}", e)))?;
        Ok(StatusQuery { kind, status_url })
    }
}

fn invalid(reason: &str) -> GenerationError {
    GenerationError::InvalidRequest {
        reason: reason.to_string(),
    }
}

fn dimension(name: &str, value: Option<i64>, default: u32) -> Result<u32, GenerationError> {
    match value {
        None => Ok(default),
        Some(v) if v > 0 => {
            u32::try_from(v).map_err(|_| invalid(&format!("{} is too large", name)))
        }
        Some(_) => Err(invalid(&format!("{} must be a positive integer", name))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
