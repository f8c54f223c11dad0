//! Error types for the relay.

use axum::http::StatusCode;

use crate::kind::JobKind;

/// Top-level error type for the relay process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures while exchanging client credentials for a bearer token.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Token request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Token endpoint returned {status}")]
    Rejected { status: u16, body: String },

    #[error("Token endpoint returned an unreadable payload: {reason}")]
    InvalidResponse { reason: String, body: String },

    #[error("Failed to obtain access token")]
    MissingToken { details: serde_json::Value },
}

/// Failures while submitting a generation job.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("{kind} submission request failed: {reason}")]
    RequestFailed { kind: JobKind, reason: String },

    #[error("{kind} endpoint returned {status}: {body}")]
    Rejected {
        kind: JobKind,
        status: u16,
        body: String,
    },

    #[error("{kind} endpoint returned an unreadable payload: {reason}")]
    InvalidResponse { kind: JobKind, reason: String },

    #[error("{kind} submission response has no {field}")]
    MissingIdentifier {
        kind: JobKind,
        field: &'static str,
        details: serde_json::Value,
    },

    #[error("{kind} status handle {url} is not a valid URL: {reason}")]
    InvalidStatusUrl {
        kind: JobKind,
        url: String,
        reason: String,
    },
}

/// A single failed status query. Never fatal to the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Status request failed: {reason}")]
    Transport { reason: String },

    #[error("Status endpoint returned {status}")]
    Rejected { status: u16, body: String },

    #[error("Status response is not valid JSON: {reason}")]
    Parse { reason: String },
}

/// Outcome-level errors of one orchestration. Each maps to an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("{reason}")]
    InvalidRequest { reason: String },

    #[error("Unsupported apiType: {kind}")]
    UnsupportedKind { kind: String },

    #[error("{kind} generation is not implemented")]
    NotImplemented { kind: JobKind },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("Job did not finish within {attempts} status checks")]
    Timeout { attempts: u32, status_url: String },

    #[error("Provider reported the job as failed")]
    GenerationFailed {
        job_id: Option<String>,
        details: serde_json::Value,
    },

    #[error("No readable status payload after {attempts} status checks")]
    EmptyResult { attempts: u32, status_url: String },

    #[error("Orchestration cancelled after {attempts} status checks")]
    Cancelled { attempts: u32 },

    #[error("Unexpected error: {reason}")]
    Unexpected { reason: String },
}

impl GenerationError {
    /// HTTP status returned to the caller for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } | Self::UnsupportedKind { .. } => StatusCode::BAD_REQUEST,
            Self::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Credential(_)
            | Self::Submission(_)
            | Self::GenerationFailed { .. }
            | Self::EmptyResult { .. }
            | Self::Unexpected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::UnsupportedKind { .. } => "unsupported_kind",
            Self::NotImplemented { .. } => "not_implemented",
            Self::Credential(_) => "credential_error",
            Self::Submission(_) => "job_submission_error",
            Self::Timeout { .. } => "timeout",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::EmptyResult { .. } => "empty_result",
            Self::Cancelled { .. } => "cancelled",
            Self::Unexpected { .. } => "unexpected_error",
        }
    }

    /// Provider payload that is safe to hand back for diagnostics.
    ///
    /// Token endpoint bodies are withheld because they may echo client
    /// identity fields.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Submission(SubmissionError::MissingIdentifier { details, .. })
            | Self::GenerationFailed { details, .. } => Some(details.clone()),
            Self::Submission(SubmissionError::Rejected { body, .. }) => {
                Some(serde_json::from_str(body).unwrap_or_else(|_| body.clone().into()))
            }
            Self::Submission(other) => Some(other.to_string().into()),
            Self::Credential(CredentialError::MissingToken { .. }) => None,
            Self::Credential(other) => Some(other.to_string().into()),
            _ => None,
        }
    }

    /// True for errors caused by the caller rather than the provider.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// HTTP server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {reason}")]
    StartupFailed { addr: String, reason: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
