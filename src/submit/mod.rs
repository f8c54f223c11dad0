//! Job submission.
//!
//! Each kind has its own endpoint, payload and status-handle rule (see
//! [`payload`]). Selection is a closed `match` on [`JobKind`], so a
//! payload can only reach the endpoint of its own kind.

pub mod payload;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::config::ProviderConfig;
use crate::credential::Credential;
use crate::error::{GenerationError, SubmissionError};
use crate::kind::JobKind;
use crate::request::GenerationRequest;

pub use payload::{StatusRule, SubmissionPlan, VideoSettings, derive_submitted_job};

/// A job accepted by the provider, ready to be polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub kind: JobKind,
    pub job_id: Option<String>,
    pub status_handle: Url,
}

/// Submits generation jobs.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit_job(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<SubmittedJob, GenerationError>;
}

/// Submits jobs to the provider over HTTP.
pub struct HttpJobSubmitter {
    client: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl HttpJobSubmitter {
    pub fn new(client: reqwest::Client, config: Arc<ProviderConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl JobSubmitter for HttpJobSubmitter {
    async fn submit_job(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<SubmittedJob, GenerationError> {
        let plan = SubmissionPlan::for_request(request, &self.config, rand::random())?;
        let kind = plan.kind;

        tracing::debug!(%kind, endpoint = %plan.endpoint, "Submitting generation job");

        let response = self
            .client
            .post(plan.endpoint.clone())
            .bearer_auth(credential.expose_token())
            .header("x-api-key", &self.config.client_id)
            .json(&plan.payload)
            .send()
            .await
            .map_err(|e| SubmissionError::RequestFailed {
                kind,
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SubmissionError::RequestFailed {
                kind,
                reason: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(SubmissionError::Rejected {
                kind,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| SubmissionError::InvalidResponse {
                kind,
                reason: e.to_string(),
            })?;

        Ok(derive_submitted_job(kind, plan.rule, &parsed)?)
    }
}
