//! Stub collaborators shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use crate::config::ProviderConfig;
use crate::credential::{Credential, CredentialProvider, parse_token_response};
use crate::error::{CredentialError, GenerationError, PollError};
use crate::orchestrator::Orchestrator;
use crate::poll::{PollPolicy, Poller, Sleeper, StatusSource};
use crate::progress::SharedProgress;
use crate::request::GenerationRequest;
use crate::submit::{JobSubmitter, SubmissionPlan, SubmittedJob, derive_submitted_job};

pub(crate) struct StubCredentials {
    token_body: &'static str,
    pub calls: AtomicU32,
}

impl StubCredentials {
    pub(crate) fn ok() -> Arc<Self> {
        Arc::new(Self {
            token_body: r#"{"access_token":"tok"}"#,
            calls: AtomicU32::new(0),
        })
    }

    pub(crate) fn without_token() -> Arc<Self> {
        Arc::new(Self {
            token_body: r#"{"error":"invalid_scope"}"#,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CredentialProvider for StubCredentials {
    async fn obtain_credential(&self) -> Result<Credential, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        parse_token_response(200, self.token_body)
    }
}

/// Answers submissions with a fixed provider response.
pub(crate) struct StubSubmitter {
    response: serde_json::Value,
    pub calls: AtomicU32,
    panic: bool,
}

impl StubSubmitter {
    pub(crate) fn responding(response: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicU32::new(0),
            panic: false,
        })
    }

    pub(crate) fn panicking() -> Arc<Self> {
        Arc::new(Self {
            response: json!({}),
            calls: AtomicU32::new(0),
            panic: true,
        })
    }
}

#[async_trait]
impl JobSubmitter for StubSubmitter {
    async fn submit_job(
        &self,
        request: &GenerationRequest,
        _credential: &Credential,
    ) -> Result<SubmittedJob, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("submitter exploded");
        }
        let config = test_provider();
        let plan = SubmissionPlan::for_request(request, &config, 7)?;
        Ok(derive_submitted_job(plan.kind, plan.rule, &self.response)?)
    }
}

/// An orchestrator wired to stubs, with handles to inspect them.
pub(crate) struct Harness {
    pub credentials: Arc<StubCredentials>,
    pub submitter: Arc<StubSubmitter>,
    pub source: Arc<ScriptedSource>,
    pub sleeper: Arc<RecordingSleeper>,
    pub orchestrator: Orchestrator,
}

pub(crate) fn test_provider() -> ProviderConfig {
    let base = Url::parse("https://provider.test/").unwrap();
    ProviderConfig::for_base_url(&base, "id", "secret")
}

pub(crate) fn harness(
    credentials: Arc<StubCredentials>,
    submitter: Arc<StubSubmitter>,
    source: ScriptedSource,
    max_attempts: u32,
) -> Harness {
    let source = Arc::new(source);
    let sleeper = Arc::new(RecordingSleeper::default());
    let poller = Poller::new(
        Arc::clone(&source) as Arc<dyn StatusSource>,
        Arc::clone(&sleeper) as Arc<dyn Sleeper>,
        PollPolicy::new(max_attempts, Duration::from_secs(5)),
    );
    let orchestrator = Orchestrator::new(
        Arc::clone(&credentials) as Arc<dyn CredentialProvider>,
        Arc::clone(&submitter) as Arc<dyn JobSubmitter>,
        poller,
        Arc::new(SharedProgress::new()),
    )
    .with_status_origins(test_provider().status_origins());
    Harness {
        credentials,
        submitter,
        source,
        sleeper,
        orchestrator,
    }
}

/// Returns scripted responses in order, repeating the last one forever.
pub(crate) struct ScriptedSource {
    script: Mutex<VecDeque<Result<serde_json::Value, String>>>,
    last: Mutex<Option<Result<serde_json::Value, String>>>,
    pub calls: AtomicU32,
}

impl ScriptedSource {
    pub(crate) fn new(script: Vec<Result<serde_json::Value, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// `pending` for `n - 1` queries, then `succeeded` with `payload`.
    pub(crate) fn succeeding_on(n: u32, payload: serde_json::Value) -> Self {
        let mut script: Vec<_> = (1..n).map(|_| Ok(json!({"status": "pending"}))).collect();
        script.push(Ok(payload));
        Self::new(script)
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch_status(
        &self,
        _handle: &Url,
        _credential: &Credential,
    ) -> Result<serde_json::Value, PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let item = match next {
            Some(item) => {
                *self.last.lock().unwrap() = Some(item.clone());
                item
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(json!({"status": "pending"}))),
        };
        item.map_err(|reason| PollError::Parse { reason })
    }
}

/// Records requested delays and returns immediately.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
