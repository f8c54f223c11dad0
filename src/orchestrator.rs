//! Generation orchestration.
//!
//! Turns one request into: credential → submission → polling → extraction,
//! and folds every way that can end into a [`GenerationOutcome`].
//!
//! ```text
//! Idle ──validate──> AwaitingCredential ──token──> SubmittingJob ──handle──> Polling
//!   │                      │                            │                      │
//!   └─ InvalidRequest      └─ CredentialError           ├─ SubmissionError     ├─ failed ──> Failed
//!      UnsupportedKind                                  │                      ├─ budget ──> TimedOut
//!      NotImplemented                                   │                      │
//!                                                       │                      ├─ budget, nothing readable ──> Failed
//!          │                                            └─ (accepted mode) ──> Accepted
//!          v                                                                   └─ succeeded
//!        Failed                                                                      │
//!                                          Succeeded (+warning if no URL) <── Extracting
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::StatusCode;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Origin;
use uuid::Uuid;

use crate::config::{Config, ResponseMode};
use crate::credential::{CredentialProvider, ImsCredentialProvider};
use crate::error::GenerationError;
use crate::extract::extract_output_url;
use crate::kind::JobKind;
use crate::poll::{HttpStatusSource, PollOutcome, PollStatus, Poller, TokioSleeper};
use crate::progress::ProgressSink;
use crate::request::{GenerateBody, GenerationRequest, StatusQueryBody};
use crate::submit::{HttpJobSubmitter, JobSubmitter, SubmittedJob};

/// Warning attached to a success whose payload had no output URL.
pub const OUTPUT_MISSING_WARNING: &str =
    "Job succeeded but the provider response contained no output URL";

/// Orchestration states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationState {
    Idle,
    AwaitingCredential,
    SubmittingJob,
    Polling,
    Extracting,
    Succeeded,
    Failed,
    TimedOut,
    /// Early return after submission (accepted mode).
    Accepted,
}

impl std::fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingCredential => "awaiting_credential",
            Self::SubmittingJob => "submitting_job",
            Self::Polling => "polling",
            Self::Extracting => "extracting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Accepted => "accepted",
        };
        f.write_str(s)
    }
}

/// Final artifact of a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub kind: JobKind,
    pub job_id: Option<String>,
    pub output_url: Option<String>,
}

/// How an orchestration ended.
#[derive(Debug)]
pub enum GenerationOutcome {
    Succeeded {
        result: GenerationResult,
        warning: Option<String>,
    },
    Accepted {
        job: SubmittedJob,
    },
    Failed(GenerationError),
}

impl GenerationOutcome {
    /// Terminal state reached.
    pub fn state(&self) -> OrchestrationState {
        match self {
            Self::Succeeded { .. } => OrchestrationState::Succeeded,
            Self::Accepted { .. } => OrchestrationState::Accepted,
            Self::Failed(GenerationError::Timeout { .. }) => OrchestrationState::TimedOut,
            Self::Failed(_) => OrchestrationState::Failed,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Succeeded { .. } => StatusCode::OK,
            Self::Accepted { .. } => StatusCode::ACCEPTED,
            Self::Failed(e) => e.status_code(),
        }
    }

    /// JSON response body.
    pub fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        match self {
            Self::Succeeded { result, warning } => {
                body.insert(
                    "message".into(),
                    format!("{} generated successfully", result.kind.label()).into(),
                );
                if let Some(job_id) = &result.job_id {
                    body.insert("jobId".into(), job_id.clone().into());
                }
                if let Some(url) = &result.output_url {
                    body.insert(result.kind.response_url_key().into(), url.clone().into());
                }
                if let Some(warning) = warning {
                    body.insert("warning".into(), warning.clone().into());
                }
            }
            Self::Accepted { job } => {
                body.insert(
                    "message".into(),
                    format!("{} job submitted", job.kind.label()).into(),
                );
                body.insert("statusUrl".into(), job.status_handle.to_string().into());
                if let Some(job_id) = &job.job_id {
                    body.insert("jobId".into(), job_id.clone().into());
                }
            }
            Self::Failed(err) => {
                body.insert("error".into(), err.to_string().into());
                body.insert("code".into(), err.code().into());
                if let Some(details) = err.details() {
                    body.insert("details".into(), details);
                }
                if let GenerationError::Timeout { status_url, .. }
                | GenerationError::EmptyResult { status_url, .. } = err
                {
                    body.insert("statusUrl".into(), status_url.clone().into());
                }
            }
        }
        serde_json::Value::Object(body)
    }
}

/// Result of a one-shot status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
}

/// Sequences the collaborators for one request at a time.
///
/// Holds no per-request state, so one instance serves concurrent requests.
pub struct Orchestrator {
    credentials: Arc<dyn CredentialProvider>,
    submitter: Arc<dyn JobSubmitter>,
    poller: Poller,
    progress: Arc<dyn ProgressSink>,
    mode: ResponseMode,
    /// Origins `check_status` may send the credential to.
    status_origins: Vec<Origin>,
}

impl Orchestrator {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        submitter: Arc<dyn JobSubmitter>,
        poller: Poller,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            credentials,
            submitter,
            poller,
            progress,
            mode: ResponseMode::Wait,
            status_origins: Vec::new(),
        }
    }

    /// Wire the HTTP-backed collaborators from configuration.
    pub fn from_config(config: &Config, progress: Arc<dyn ProgressSink>) -> Self {
        let client = config.http.build_client();
        let provider = Arc::new(config.provider.clone());
        let poller = Poller::new(
            Arc::new(HttpStatusSource::new(client.clone(), Arc::clone(&provider))),
            Arc::new(TokioSleeper),
            config.poll,
        );
        Self::new(
            Arc::new(ImsCredentialProvider::new(client.clone(), Arc::clone(&provider))),
            Arc::new(HttpJobSubmitter::new(client, provider)),
            poller,
            progress,
        )
        .with_mode(config.server.mode)
        .with_status_origins(config.provider.status_origins())
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Origins accepted by [`Orchestrator::check_status`]. Empty rejects
    /// every status URL.
    pub fn with_status_origins(mut self, origins: Vec<Origin>) -> Self {
        self.status_origins = origins;
        self
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub fn progress(&self) -> &Arc<dyn ProgressSink> {
        &self.progress
    }

    /// Validate a raw body and run it.
    pub async fn run(&self, body: GenerateBody, cancel: &CancellationToken) -> GenerationOutcome {
        match body.validate() {
            Ok(request) => self.execute(&request, cancel).await,
            Err(e) => {
                tracing::info!("Rejected generation request: {}", e);
                self.progress.set_status(&format!("Request rejected: {}", e));
                GenerationOutcome::Failed(e)
            }
        }
    }

    /// Run a validated request to completion.
    ///
    /// Panics inside a collaborator are caught here and reported as
    /// `UnexpectedError` instead of tearing down the caller.
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        let run_id = Uuid::new_v4();
        let kind = request.kind;
        let span = tracing::info_span!("generation", %run_id, %kind);

        let outcome = match AssertUnwindSafe(self.drive(run_id, request, cancel).instrument(span))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => GenerationOutcome::Failed(e),
            Err(panic) => GenerationOutcome::Failed(GenerationError::Unexpected {
                reason: panic_message(panic.as_ref()),
            }),
        };

        let state = outcome.state();
        match &outcome {
            GenerationOutcome::Failed(e) if e.is_client_error() => {
                tracing::info!(%run_id, %kind, %state, code = e.code(), "Generation rejected: {}", e);
                self.progress.set_status(&format!("{} request rejected: {}", kind.label(), e));
            }
            GenerationOutcome::Failed(e) => {
                tracing::error!(%run_id, %kind, %state, code = e.code(), "Generation ended: {}", e);
                self.progress.set_status(&format!("{} generation failed: {}", kind.label(), e));
            }
            GenerationOutcome::Succeeded { warning, .. } => {
                tracing::info!(%run_id, %kind, %state, warning = warning.is_some(), "Generation ended");
                self.progress.set_status(&format!("{} generation complete", kind.label()));
            }
            GenerationOutcome::Accepted { job } => {
                tracing::info!(%run_id, %kind, %state, status_url = %job.status_handle, "Generation handed off");
                self.progress.set_status(&format!("{} job submitted", kind.label()));
            }
        }
        outcome
    }

    async fn drive(
        &self,
        run_id: Uuid,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        let kind = request.kind;
        if !kind.has_submission_path() {
            return Err(GenerationError::NotImplemented { kind });
        }

        self.enter(run_id, OrchestrationState::AwaitingCredential, "Requesting access token");
        let credential = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled { attempts: 0 }),
            credential = self.credentials.obtain_credential() => credential?,
        };

        self.enter(
            run_id,
            OrchestrationState::SubmittingJob,
            &format!("Submitting {} job", kind),
        );
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled { attempts: 0 }),
            job = self.submitter.submit_job(request, &credential) => job?,
        };
        tracing::info!(%run_id, job_id = ?job.job_id, status_url = %job.status_handle, "Job submitted");

        if self.mode == ResponseMode::Accepted {
            return Ok(GenerationOutcome::Accepted { job });
        }

        self.enter(
            run_id,
            OrchestrationState::Polling,
            &format!("Waiting for {} job", kind),
        );
        let polled = self.poller.poll_until_terminal(
            &job.status_handle,
            &credential,
            kind,
            cancel,
            self.progress.as_ref(),
        );
        let attempt = match polled.await {
            PollOutcome::Terminal(attempt) => attempt,
            PollOutcome::TimedOut { attempts, last: None } => {
                return Err(GenerationError::EmptyResult {
                    attempts,
                    status_url: job.status_handle.to_string(),
                });
            }
            PollOutcome::TimedOut { attempts, .. } => {
                return Err(GenerationError::Timeout {
                    attempts,
                    status_url: job.status_handle.to_string(),
                });
            }
            PollOutcome::Cancelled { attempts } => {
                return Err(GenerationError::Cancelled { attempts });
            }
        };

        if attempt.status == PollStatus::Failed {
            return Err(GenerationError::GenerationFailed {
                job_id: job.job_id,
                details: attempt.raw_payload,
            });
        }

        self.enter(run_id, OrchestrationState::Extracting, "Reading generation result");
        let output_url = extract_output_url(kind, &attempt.raw_payload);
        let warning = if output_url.is_none() {
            tracing::warn!(%run_id, %kind, "Succeeded payload has no output URL");
            Some(OUTPUT_MISSING_WARNING.to_string())
        } else {
            None
        };

        Ok(GenerationOutcome::Succeeded {
            result: GenerationResult {
                kind,
                job_id: job.job_id,
                output_url,
            },
            warning,
        })
    }

    /// Fetch a fresh credential and query a status URL once.
    ///
    /// The URL must belong to one of the provider origins; anything else is
    /// rejected before a credential is requested.
    pub async fn check_status(
        &self,
        body: StatusQueryBody,
    ) -> Result<StatusReport, GenerationError> {
        let query = body.validate()?;
        if !self.status_origins.contains(&query.status_url.origin()) {
            tracing::warn!(
                host = query.status_url.host_str().unwrap_or_default(),
                "Refusing status URL outside the provider origins"
            );
            return Err(GenerationError::InvalidRequest {
                reason: "statusUrl does not point at a provider status endpoint".to_string(),
            });
        }
        let credential = self.credentials.obtain_credential().await?;
        let payload = self
            .poller
            .check_once(&query.status_url, &credential)
            .await
            .map_err(|e| GenerationError::Unexpected {
                reason: e.to_string(),
            })?;

        Ok(StatusReport {
            status: payload
                .get("status")
                .and_then(|s| s.as_str())
                .map(str::to_string),
            output_url: extract_output_url(query.kind, &payload),
        })
    }

    fn enter(&self, run_id: Uuid, state: OrchestrationState, message: &str) {
        tracing::info!(%run_id, %state, "{}", message);
        self.progress.set_status(message);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic during generation".to_string()
    }
}
