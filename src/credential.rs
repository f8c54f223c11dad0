//! Client-credentials token exchange.
//!
//! One token is fetched per orchestration and dropped with it. Tokens are
//! held as `SecretString` and never appear in `Debug` output or logs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::config::ProviderConfig;
use crate::error::CredentialError;

/// A bearer token scoped to a single orchestration.
#[derive(Clone)]
pub struct Credential {
    bearer_token: SecretString,
    obtained_at: DateTime<Utc>,
    expires_in: Option<u64>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("bearer_token", &"[REDACTED]")
            .field("obtained_at", &self.obtained_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl Credential {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            bearer_token: SecretString::from(bearer_token.into()),
            obtained_at: Utc::now(),
            expires_in: None,
        }
    }

    pub fn with_expires_in(mut self, seconds: Option<u64>) -> Self {
        self.expires_in = seconds;
        self
    }

    /// Expose the token value. Callers must not log or serialize it.
    pub fn expose_token(&self) -> &str {
        self.bearer_token.expose_secret()
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }
}

/// Source of bearer tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a fresh credential. A single attempt, no retry.
    async fn obtain_credential(&self) -> Result<Credential, CredentialError>;
}

/// Exchanges the configured client id and secret at the IMS token endpoint.
pub struct ImsCredentialProvider {
    client: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl ImsCredentialProvider {
    pub fn new(client: reqwest::Client, config: Arc<ProviderConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl CredentialProvider for ImsCredentialProvider {
    async fn obtain_credential(&self) -> Result<Credential, CredentialError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("grant_type", "client_credentials"),
            ("scope", self.config.scope.as_str()),
        ];

        let response = self
            .client
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| CredentialError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialError::RequestFailed {
                reason: format!("Failed to read token response body: {}", e),
            })?;

        let credential = parse_token_response(status.as_u16(), &body)?;
        tracing::debug!(
            obtained_at = %credential.obtained_at(),
            expires_in = ?credential.expires_in(),
            "Obtained provider access token"
        );
        Ok(credential)
    }
}

/// Turn a token endpoint response into a [`Credential`].
///
/// Error statuses, non-JSON bodies and payloads without a non-empty
/// `access_token` string are all failures.
pub fn parse_token_response(status: u16, body: &str) -> Result<Credential, CredentialError> {
    if !(200..300).contains(&status) {
        return Err(CredentialError::Rejected {
            status,
            body: body.to_string(),
        });
    }

    let payload: serde_json::Value =
        serde_json::from_str(body).map_err(|e| CredentialError::InvalidResponse {
            reason: e.to_string(),
            body: body.to_string(),
        })?;

    let token = payload
        .get("access_token")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty());

    match token {
        Some(token) => {
            let expires_in = payload.get("expires_in").and_then(|e| e.as_u64());
            Ok(Credential::new(token).with_expires_in(expires_in))
        }
        None => Err(CredentialError::MissingToken { details: payload }),
    }
}
