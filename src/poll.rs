//! Status polling for submitted jobs.
//!
//! The loop issues one status query per iteration and suspends for a fixed
//! delay between queries. It ends on a terminal status, when the attempt
//! budget is spent, or when its cancellation token fires. A bad response
//! (transport error, error status, non-JSON body) costs one attempt and is
//! otherwise ignored.
//!
//! ```text
//! query #1 --> pending --> sleep(delay) --> query #2 --> ... --> query #N
//!                                                               |
//!                               succeeded / failed -------------+--> Terminal
//!                               N == max_attempts, non-terminal ---> TimedOut
//!  cancel.cancelled() at any await point ----------------------------> Cancelled
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ProviderConfig;
use crate::credential::Credential;
use crate::error::PollError;
use crate::kind::JobKind;
use crate::progress::ProgressSink;

/// Normalized provider job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Succeeded,
    Failed,
    Unknown,
}

impl PollStatus {
    /// Map a provider status string. Matching is case-insensitive.
    pub fn from_provider(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Unknown;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" | "cancelled" | "canceled" => Self::Failed,
            "pending" | "running" | "waiting" | "in_progress" | "queued" => Self::Pending,
            _ => Self::Unknown,
        }
    }

    /// Read the `status` field of a status payload.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        Self::from_provider(payload.get("status").and_then(|s| s.as_str()))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One parsed status query.
#[derive(Debug, Clone)]
pub struct PollAttempt {
    /// 1-based index of the query that produced this attempt.
    pub attempt_index: u32,
    pub status: PollStatus,
    pub raw_payload: serde_json::Value,
}

/// How long to keep polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            delay: Duration::from_secs(5),
        }
    }
}

impl PollPolicy {
    /// `max_attempts` is raised to 1 if zero; at least one query always runs.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Total time spent sleeping when the budget is exhausted. Saturates at
    /// `Duration::MAX`.
    pub fn total_wait(&self) -> Duration {
        self.delay
            .checked_mul(self.max_attempts.saturating_sub(1))
            .unwrap_or(Duration::MAX)
    }
}

/// Performs a single status query.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(
        &self,
        handle: &Url,
        credential: &Credential,
    ) -> Result<serde_json::Value, PollError>;
}

/// Suspends the polling flow between attempts. Injected so tests do not wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// GETs the status URL with the bearer token and client id headers.
pub struct HttpStatusSource {
    client: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl HttpStatusSource {
    pub fn new(client: reqwest::Client, config: Arc<ProviderConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_status(
        &self,
        handle: &Url,
        credential: &Credential,
    ) -> Result<serde_json::Value, PollError> {
        let response = self
            .client
            .get(handle.clone())
            .bearer_auth(credential.expose_token())
            .header("x-api-key", &self.config.client_id)
            .send()
            .await
            .map_err(|e| PollError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PollError::Transport {
            reason: format!("Failed to read status body: {}", e),
        })?;

        if !status.is_success() {
            return Err(PollError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| PollError::Parse {
            reason: e.to_string(),
        })
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// A succeeded or failed status was observed.
    Terminal(PollAttempt),
    /// The attempt budget ran out without a terminal status.
    TimedOut {
        attempts: u32,
        last: Option<PollAttempt>,
    },
    /// The cancellation token fired; no further queries were issued.
    Cancelled { attempts: u32 },
}

/// Drives status queries for one job under a [`PollPolicy`].
pub struct Poller {
    source: Arc<dyn StatusSource>,
    sleeper: Arc<dyn Sleeper>,
    policy: PollPolicy,
}

impl Poller {
    pub fn new(
        source: Arc<dyn StatusSource>,
        sleeper: Arc<dyn Sleeper>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            source,
            sleeper,
            policy,
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Issue one status query without the loop.
    pub async fn check_once(
        &self,
        handle: &Url,
        credential: &Credential,
    ) -> Result<serde_json::Value, PollError> {
        self.source.fetch_status(handle, credential).await
    }

    /// Poll until a terminal status, budget exhaustion or cancellation.
    pub async fn poll_until_terminal(
        &self,
        handle: &Url,
        credential: &Credential,
        kind: JobKind,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> PollOutcome {
        let max_attempts = self.policy.max_attempts;
        let mut attempts = 0u32;
        let mut last: Option<PollAttempt> = None;

        while attempts < max_attempts {
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled { attempts };
            }

            if attempts > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return PollOutcome::Cancelled { attempts },
                    _ = self.sleeper.sleep(self.policy.delay) => {}
                }
            }

            attempts += 1;
            progress.set_status(&format!(
                "Checking {} job status ({}/{})",
                kind, attempts, max_attempts
            ));

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled { attempts },
                result = self.source.fetch_status(handle, credential) => result,
            };

            match result {
                Ok(payload) => {
                    let status = PollStatus::from_payload(&payload);
                    tracing::debug!(%kind, attempt = attempts, %status, "Status check");
                    let attempt = PollAttempt {
                        attempt_index: attempts,
                        status,
                        raw_payload: payload,
                    };
                    if status.is_terminal() {
                        return PollOutcome::Terminal(attempt);
                    }
                    last = Some(attempt);
                }
                Err(e) => {
                    tracing::warn!(%kind, attempt = attempts, "Status check failed, continuing: {}", e);
                }
            }
        }

        PollOutcome::TimedOut { attempts, last }
    }
}
