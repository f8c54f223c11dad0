//! Configuration for the relay.
//!
//! Everything is read from environment variables. `./.env` is loaded via
//! dotenvy first and never overrides variables that are already set.
//! Provider credentials have no defaults and must come from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::{Origin, Url};

use crate::error::ConfigError;
use crate::poll::PollPolicy;

const DEFAULT_TOKEN_URL: &str = "https://ims-na1.adobelogin.com/ims/token/v3";
const DEFAULT_SCOPE: &str = "session";
const DEFAULT_VIDEO_URL: &str = "https://firefly-api.adobe.io/v3/videos/generate";
const DEFAULT_IMAGE_URL: &str = "https://firefly-api.adobe.io/v3/images/generate-async";
const DEFAULT_AVATAR_URL: &str = "https://audio-video-api.adobe.io/v1/generate-avatar";
const DEFAULT_IMAGE_STATUS_TEMPLATE: &str = "https://firefly-api.adobe.io/v3/status/{jobId}";
const DEFAULT_AVATAR_STATUS_TEMPLATE: &str = "https://audio-video-api.adobe.io/v1/status/{jobId}";

/// Placeholder replaced by the provider job id in status templates.
pub const JOB_ID_PLACEHOLDER: &str = "{jobId}";

/// Stands in for the placeholder while a template is parsed, since `{` and
/// `}` are percent-encoded in a parsed path.
const JOB_ID_MARKER: &str = "__relay_job_id__";

/// Environment lookup used by the resolvers. `std::env::var` in production,
/// a map in tests.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Main configuration for the relay.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub poll: PollPolicy,
    pub http: HttpConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(env: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            provider: ProviderConfig::resolve(env)?,
            poll: resolve_poll_policy(env)?,
            http: HttpConfig::resolve(env)?,
            server: ServerConfig::resolve(env)?,
        })
    }
}

/// Provider identity and endpoints.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub token_url: Url,
    pub scope: String,
    pub video_url: Url,
    pub image_url: Url,
    pub avatar_url: Url,
    pub image_status_template: StatusTemplate,
    pub avatar_status_template: StatusTemplate,
    /// Origins from `FIREFLY_STATUS_HOSTS`, accepted for caller-supplied
    /// status URLs on top of the configured endpoints.
    pub extra_status_origins: Vec<Origin>,
}

impl ProviderConfig {
    pub(crate) fn resolve(env: Lookup<'_>) -> Result<Self, ConfigError> {
        let client_id = required_env(env, "FIREFLY_CLIENT_ID")?;
        // FIREFLY_SECRET is the older name for the same value.
        let client_secret = optional_env(env, "FIREFLY_CLIENT_SECRET")
            .or_else(|| optional_env(env, "FIREFLY_SECRET"))
            .ok_or_else(|| ConfigError::MissingEnvVar("FIREFLY_CLIENT_SECRET".to_string()))?;

        Ok(Self {
            client_id,
            client_secret: SecretString::from(client_secret),
            token_url: parse_url_env(env, "FIREFLY_TOKEN_URL", DEFAULT_TOKEN_URL)?,
            scope: parse_string_env(env, "FIREFLY_SCOPE", DEFAULT_SCOPE),
            video_url: parse_url_env(env, "FIREFLY_VIDEO_URL", DEFAULT_VIDEO_URL)?,
            image_url: parse_url_env(env, "FIREFLY_IMAGE_URL", DEFAULT_IMAGE_URL)?,
            avatar_url: parse_url_env(env, "FIREFLY_AVATAR_URL", DEFAULT_AVATAR_URL)?,
            image_status_template: parse_template_env(
                env,
                "FIREFLY_IMAGE_STATUS_TEMPLATE",
                DEFAULT_IMAGE_STATUS_TEMPLATE,
            )?,
            avatar_status_template: parse_template_env(
                env,
                "FIREFLY_AVATAR_STATUS_TEMPLATE",
                DEFAULT_AVATAR_STATUS_TEMPLATE,
            )?,
            extra_status_origins: parse_origins_env(env, "FIREFLY_STATUS_HOSTS")?,
        })
    }

    /// Configuration pointing every endpoint at `base`. Used by tests and
    /// local mocks of the provider.
    pub fn for_base_url(base: &Url, client_id: &str, client_secret: &str) -> Self {
        let join = |path: &str| base.join(path).unwrap_or_else(|_| base.clone());
        let template = |path: &str| StatusTemplate(format!("{}{}", join(path), JOB_ID_PLACEHOLDER));
        Self {
            client_id: client_id.to_string(),
            client_secret: SecretString::from(client_secret.to_string()),
            token_url: join("ims/token/v3"),
            scope: DEFAULT_SCOPE.to_string(),
            video_url: join("v3/videos/generate"),
            image_url: join("v3/images/generate-async"),
            avatar_url: join("v1/generate-avatar"),
            image_status_template: template("v3/status/"),
            avatar_status_template: template("v1/status/"),
            extra_status_origins: Vec::new(),
        }
    }

    /// Origins a caller-supplied status URL may point at: the submission
    /// endpoints, the status templates and `extra_status_origins`.
    pub fn status_origins(&self) -> Vec<Origin> {
        let mut origins = vec![
            self.video_url.origin(),
            self.image_url.origin(),
            self.avatar_url.origin(),
        ];
        for template in [&self.image_status_template, &self.avatar_status_template] {
            if let Ok(url) = template.render("job") {
                origins.push(url.origin());
            }
        }
        origins.extend(self.extra_status_origins.iter().cloned());
        origins.retain(Origin::is_tuple);
        let mut unique = Vec::with_capacity(origins.len());
        for origin in origins {
            if !unique.contains(&origin) {
                unique.push(origin);
            }
        }
        unique
    }
}

/// A status URL with a `{jobId}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTemplate(String);

impl StatusTemplate {
    /// Parse and validate a template. The placeholder must be present in
    /// the URL path and the template must form a valid URL once filled in.
    pub fn parse(template: &str) -> Result<Self, String> {
        if !template.contains(JOB_ID_PLACEHOLDER) {
            return Err(format!("template must contain {}", JOB_ID_PLACEHOLDER));
        }
        let url = Url::parse(&template.replace(JOB_ID_PLACEHOLDER, JOB_ID_MARKER))
            .map_err(|e| e.to_string())?;
        let in_path = url
            .path_segments()
            .is_some_and(|mut segments| segments.any(|s| s.contains(JOB_ID_MARKER)));
        if !in_path {
            return Err(format!("{} must appear in the URL path", JOB_ID_PLACEHOLDER));
        }
        Ok(Self(template.to_string()))
    }

    /// Interpolate a job id. The id is percent-encoded as a path segment.
    pub fn render(&self, job_id: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.0.replace(JOB_ID_PLACEHOLDER, JOB_ID_MARKER))?;
        let segments: Vec<String> = url
            .path_segments()
            .map(|segments| segments.map(str::to_string).collect())
            .unwrap_or_default();
        if let Ok(mut path) = url.path_segments_mut() {
            path.clear();
            for segment in &segments {
                path.push(&segment.replace(JOB_ID_MARKER, job_id));
            }
        }
        Ok(url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl HttpConfig {
    pub(crate) fn resolve(env: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            request_timeout: Duration::from_secs(parse_optional_env(
                env,
                "RELAY_REQUEST_TIMEOUT_SECS",
                60u64,
            )?),
        })
    }

    /// Build the shared reqwest client.
    pub fn build_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build configured HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            })
    }
}

/// Whether `/api/generate` waits for the job or returns after submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Poll until a terminal status and answer 200 (or an error).
    #[default]
    Wait,
    /// Answer 202 with the status URL right after submission.
    Accepted,
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(Self::Wait),
            "accepted" | "async" => Ok(Self::Accepted),
            other => Err(format!("expected 'wait' or 'accepted', got '{}'", other)),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub mode: ResponseMode,
    /// Hard ceiling for one orchestration, after which polling is cancelled.
    pub orchestration_budget: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7071)),
            mode: ResponseMode::Wait,
            orchestration_budget: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    pub(crate) fn resolve(env: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: parse_optional_env(
                env,
                "RELAY_BIND_ADDR",
                ServerConfig::default().bind_addr,
            )?,
            mode: parse_optional_env(env, "RELAY_RESPONSE_MODE", ResponseMode::Wait)?,
            orchestration_budget: Duration::from_secs(parse_optional_env(
                env,
                "RELAY_ORCHESTRATION_TIMEOUT_SECS",
                300u64,
            )?),
        })
    }
}

fn resolve_poll_policy(env: Lookup<'_>) -> Result<PollPolicy, ConfigError> {
    let defaults = PollPolicy::default();
    let max_attempts: u32 =
        parse_optional_env(env, "RELAY_POLL_MAX_ATTEMPTS", defaults.max_attempts())?;
    if max_attempts == 0 {
        return Err(ConfigError::InvalidValue {
            key: "RELAY_POLL_MAX_ATTEMPTS".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    let delay_ms: u64 = parse_optional_env(
        env,
        "RELAY_POLL_DELAY_MS",
        defaults.delay().as_millis() as u64,
    )?;
    Ok(PollPolicy::new(max_attempts, Duration::from_millis(delay_ms)))
}

// -- Helpers --

fn optional_env(env: Lookup<'_>, key: &str) -> Option<String> {
    env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required_env(env: Lookup<'_>, key: &str) -> Result<String, ConfigError> {
    optional_env(env, key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_string_env(env: Lookup<'_>, key: &str, default: &str) -> String {
    optional_env(env, key).unwrap_or_else(|| default.to_string())
}

fn parse_optional_env<T>(env: Lookup<'_>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(env, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_url_env(env: Lookup<'_>, key: &str, default: &str) -> Result<Url, ConfigError> {
    let raw = parse_string_env(env, key, default);
    Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Comma-separated hosts or origins. A bare host means `https://host`.
fn parse_origins_env(env: Lookup<'_>, key: &str) -> Result<Vec<Origin>, ConfigError> {
    let Some(raw) = optional_env(env, key) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let candidate = if entry.contains("://") {
                entry.to_string()
            } else {
                format!("https://{}", entry)
            };
            let url = Url::parse(&candidate).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{}: {}", entry, e),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{}: not an http(s) origin", entry),
                });
            }
            Ok(url.origin())
        })
        .collect()
}

fn parse_template_env(
    env: Lookup<'_>,
    key: &str,
    default: &str,
) -> Result<StatusTemplate, ConfigError> {
    let raw = parse_string_env(env, key, default);
    StatusTemplate::parse(&raw).map_err(|message| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    })
}
