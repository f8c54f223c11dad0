//! Per-kind submission payloads and status handle rules.

use serde::Serialize;
use url::Url;

use crate::config::{ProviderConfig, StatusTemplate};
use crate::error::{GenerationError, SubmissionError};
use crate::kind::JobKind;
use crate::request::GenerationRequest;

use super::SubmittedJob;

/// Camera and framing settings sent with every video job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub camera_motion: String,
    pub prompt_style: String,
    pub shot_angle: String,
    pub shot_size: String,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            camera_motion: "camera locked".to_string(),
            prompt_style: "cinematic".to_string(),
            shot_angle: "eye_level shot".to_string(),
            shot_size: "medium shot".to_string(),
        }
    }
}

const IMAGE_CONTENT_CLASS: &str = "photo";
const IMAGE_VISUAL_INTENSITY: u8 = 6;
const AVATAR_LOCALE: &str = "en-US";

/// How the status handle is obtained from the submission response.
#[derive(Debug, Clone, Copy)]
pub enum StatusRule<'a> {
    /// The response carries the status URL in `statusUrl`.
    Direct,
    /// The status URL is built from `jobId` and a template.
    Template(&'a StatusTemplate),
}

/// Everything needed to submit one job.
#[derive(Debug)]
pub struct SubmissionPlan<'a> {
    pub kind: JobKind,
    pub endpoint: &'a Url,
    pub payload: serde_json::Value,
    pub rule: StatusRule<'a>,
}

impl<'a> SubmissionPlan<'a> {
    /// Build the plan for a request. Audio has no submission path.
    pub fn for_request(
        request: &GenerationRequest,
        config: &'a ProviderConfig,
        seed: u32,
    ) -> Result<Self, GenerationError> {
        let kind = request.kind;
        let (endpoint, payload, rule) = match kind {
            JobKind::Video => (
                &config.video_url,
                video_payload(request, seed, &VideoSettings::default()),
                StatusRule::Direct,
            ),
            JobKind::Image => (
                &config.image_url,
                image_payload(request),
                StatusRule::Template(&config.image_status_template),
            ),
            JobKind::Avatar => (
                &config.avatar_url,
                avatar_payload(request)?,
                StatusRule::Template(&config.avatar_status_template),
            ),
            JobKind::Audio => return Err(GenerationError::NotImplemented { kind }),
        };
        Ok(Self {
            kind,
            endpoint,
            payload,
            rule,
        })
    }
}

pub fn video_payload(
    request: &GenerationRequest,
    seed: u32,
    settings: &VideoSettings,
) -> serde_json::Value {
    serde_json::json!({
        "prompt": request.prompt,
        "seeds": [seed],
        "sizes": [{"width": request.width, "height": request.height}],
        "videoSettings": settings,
    })
}

pub fn image_payload(request: &GenerationRequest) -> serde_json::Value {
    serde_json::json!({
        "prompt": request.prompt,
        "contentClass": IMAGE_CONTENT_CLASS,
        "numVariations": 1,
        "size": {"width": request.width, "height": request.height},
        "visualIntensity": IMAGE_VISUAL_INTENSITY,
    })
}

pub fn avatar_payload(request: &GenerationRequest) -> Result<serde_json::Value, GenerationError> {
    let (Some(voice_id), Some(avatar_id)) = (&request.voice_id, &request.avatar_id) else {
        return Err(GenerationError::InvalidRequest {
            reason: "Avatar generation requires both voiceId and avatarId".to_string(),
        });
    };
    Ok(serde_json::json!({
        "script": {
            "text": request.prompt,
            "mediaType": "text/plain",
            "localeCode": AVATAR_LOCALE,
        },
        "voiceId": voice_id,
        "avatarId": avatar_id,
        "output": {"mediaType": "video/mp4"},
    }))
}

/// Derive the pollable job from a submission response.
pub fn derive_submitted_job(
    kind: JobKind,
    rule: StatusRule<'_>,
    response: &serde_json::Value,
) -> Result<SubmittedJob, SubmissionError> {
    let job_id = identifier(response, "jobId");

    let status_handle = match rule {
        StatusRule::Direct => {
            let raw = identifier(response, "statusUrl").ok_or_else(|| {
                SubmissionError::MissingIdentifier {
                    kind,
                    field: "statusUrl",
                    details: response.clone(),
                }
            })?;
            Url::parse(&raw).map_err(|e| SubmissionError::InvalidStatusUrl {
                kind,
                url: raw.clone(),
                reason: e.to_string(),
            })?
        }
        StatusRule::Template(template) => {
            let id = job_id
                .as_deref()
                .ok_or_else(|| SubmissionError::MissingIdentifier {
                    kind,
                    field: "jobId",
                    details: response.clone(),
                })?;
            template
                .render(id)
                .map_err(|e| SubmissionError::InvalidStatusUrl {
                    kind,
                    url: template.as_str().to_string(),
                    reason: e.to_string(),
                })?
        }
    };

    Ok(SubmittedJob {
        kind,
        job_id,
        status_handle,
    })
}

/// Non-empty string or numeric identifier at `field`.
fn identifier(response: &serde_json::Value, field: &str) -> Option<String> {
    match response.get(field)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
