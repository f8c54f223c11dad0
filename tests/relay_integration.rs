//! End-to-end tests against an in-process mock of the provider APIs.
//!
//! The mock serves the token endpoint, the three submission endpoints and the
//! status endpoint on an ephemeral port. The relay is configured through the
//! same environment lookup used in production.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use firefly_relay::api::AppState;
use firefly_relay::config::{Config, ResponseMode};
use firefly_relay::orchestrator::{GenerationOutcome, OrchestrationState, Orchestrator};
use firefly_relay::progress::{ProgressSink, SharedProgress};
use firefly_relay::request::{GenerateBody, StatusQueryBody};
use firefly_relay::server::RelayServer;

const CLIENT_ID: &str = "relay-test-client";
const CLIENT_SECRET: &str = "relay-test-secret";
const TOKEN: &str = "mock-bearer-token";

#[derive(Clone)]
struct MockProvider {
    base: String,
    token_calls: Arc<AtomicU32>,
    status_calls: Arc<AtomicU32>,
    /// Status queries answered `running` before the job succeeds.
    pending_polls: u32,
    reject_token: bool,
}

async fn token(
    State(mock): State<MockProvider>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    mock.token_calls.fetch_add(1, Ordering::SeqCst);
    let valid = form.get("client_id").map(String::as_str) == Some(CLIENT_ID)
        && form.get("client_secret").map(String::as_str) == Some(CLIENT_SECRET)
        && form.get("grant_type").map(String::as_str) == Some("client_credentials");
    if mock.reject_token || !valid {
        return (StatusCode::OK, Json(json!({"error": "invalid_client"})));
    }
    (
        StatusCode::OK,
        Json(json!({"access_token": TOKEN, "token_type": "bearer", "expires_in": 86399})),
    )
}

fn authorized(headers: &HeaderMap) -> bool {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {}", TOKEN).as_str());
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(CLIENT_ID);
    bearer && api_key
}

async fn submit_video(
    State(mock): State<MockProvider>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    assert!(body["seeds"][0].is_u64());
    assert_eq!(body["videoSettings"]["promptStyle"], "cinematic");
    (
        StatusCode::OK,
        Json(json!({
            "jobId": "vid-1",
            "statusUrl": format!("{}/v3/status/vid-1", mock.base)
        })),
    )
}

async fn submit_image(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    if body["prompt"] == "forbidden" {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error_code": "validation_error"})),
        );
    }
    (StatusCode::OK, Json(json!({"jobId": "img-1"})))
}

async fn submit_avatar(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    assert_eq!(body["voiceId"], "voice-1");
    (StatusCode::OK, Json(json!({"jobId": "av-1"})))
}

async fn status(
    State(mock): State<MockProvider>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    let n = mock.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if n <= mock.pending_polls {
        return (StatusCode::OK, Json(json!({"status": "running", "progress": n})));
    }
    let media = match job_id.split('-').next() {
        Some("vid") => "video",
        Some("img") => "image",
        _ => "avatar",
    };
    (
        StatusCode::OK,
        Json(json!({
            "jobId": job_id,
            "status": "succeeded",
            "result": {"outputs": [{media: {"url": format!("https://cdn.test/{}", job_id)}}]}
        })),
    )
}

async fn start_mock(pending_polls: u32, reject_token: bool) -> MockProvider {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mock = MockProvider {
        base: format!("http://{}", addr),
        token_calls: Arc::new(AtomicU32::new(0)),
        status_calls: Arc::new(AtomicU32::new(0)),
        pending_polls,
        reject_token,
    };
    let app = Router::new()
        .route("/ims/token/v3", post(token))
        .route("/v3/videos/generate", post(submit_video))
        .route("/v3/images/generate-async", post(submit_image))
        .route("/v1/generate-avatar", post(submit_avatar))
        .route("/v3/status/{job_id}", get(status))
        .route("/v1/status/{job_id}", get(status))
        .with_state(mock.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    mock
}

fn config_for(mock: &MockProvider, max_attempts: u32) -> Config {
    let base = &mock.base;
    let vars: HashMap<String, String> = [
        ("FIREFLY_CLIENT_ID", CLIENT_ID.to_string()),
        ("FIREFLY_SECRET", CLIENT_SECRET.to_string()),
        ("FIREFLY_TOKEN_URL", format!("{}/ims/token/v3", base)),
        ("FIREFLY_VIDEO_URL", format!("{}/v3/videos/generate", base)),
        ("FIREFLY_IMAGE_URL", format!("{}/v3/images/generate-async", base)),
        ("FIREFLY_AVATAR_URL", format!("{}/v1/generate-avatar", base)),
        ("FIREFLY_IMAGE_STATUS_TEMPLATE", format!("{}/v3/status/{{jobId}}", base)),
        ("FIREFLY_AVATAR_STATUS_TEMPLATE", format!("{}/v1/status/{{jobId}}", base)),
        ("RELAY_POLL_MAX_ATTEMPTS", max_attempts.to_string()),
        ("RELAY_POLL_DELAY_MS", "10".to_string()),
        ("RELAY_BIND_ADDR", "127.0.0.1:0".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    Config::from_lookup(&move |key: &str| vars.get(key).cloned()).unwrap()
}

fn body(api_type: &str, prompt: &str) -> GenerateBody {
    GenerateBody {
        api_type: Some(api_type.to_string()),
        prompt: Some(prompt.to_string()),
        ..GenerateBody::default()
    }
}

#[tokio::test]
async fn video_generation_polls_until_succeeded() {
    let mock = start_mock(2, false).await;
    let progress = Arc::new(SharedProgress::new());
    let orchestrator = Orchestrator::from_config(&config_for(&mock, 10), progress.clone());

    let outcome = orchestrator
        .run(body("video", "waves at sunset"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.state(), OrchestrationState::Succeeded);
    assert_eq!(
        outcome.to_body(),
        json!({
            "message": "Video generated successfully",
            "jobId": "vid-1",
            "videoUrl": "https://cdn.test/vid-1"
        })
    );
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.status_calls.load(Ordering::SeqCst), 3);
    assert_eq!(progress.status(), "Video generation complete");
}

#[tokio::test]
async fn image_generation_uses_status_template() {
    let mock = start_mock(0, false).await;
    let orchestrator =
        Orchestrator::from_config(&config_for(&mock, 5), Arc::new(SharedProgress::new()));

    let outcome = orchestrator
        .run(body("image", "a red bicycle"), &CancellationToken::new())
        .await;

    match &outcome {
        GenerationOutcome::Succeeded { result, warning } => {
            assert_eq!(result.output_url.as_deref(), Some("https://cdn.test/img-1"));
            assert!(warning.is_none());
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(outcome.to_body()["imageUrl"], "https://cdn.test/img-1");
}

#[tokio::test]
async fn avatar_generation_reports_output_url() {
    let mock = start_mock(1, false).await;
    let orchestrator =
        Orchestrator::from_config(&config_for(&mock, 5), Arc::new(SharedProgress::new()));
    let mut request = body("avatar", "Welcome to the show");
    request.voice_id = Some("voice-1".to_string());
    request.avatar_id = Some("avatar-1".to_string());

    let outcome = orchestrator.run(request, &CancellationToken::new()).await;

    assert_eq!(outcome.status_code(), StatusCode::OK);
    assert_eq!(outcome.to_body()["outputUrl"], "https://cdn.test/av-1");
}

#[tokio::test]
async fn polling_budget_exhaustion_is_a_timeout() {
    let mock = start_mock(100, false).await;
    let orchestrator =
        Orchestrator::from_config(&config_for(&mock, 3), Arc::new(SharedProgress::new()));

    let outcome = orchestrator
        .run(body("image", "a red bicycle"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.state(), OrchestrationState::TimedOut);
    assert_eq!(outcome.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(mock.status_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn missing_access_token_stops_before_submission() {
    let mock = start_mock(0, true).await;
    let orchestrator =
        Orchestrator::from_config(&config_for(&mock, 5), Arc::new(SharedProgress::new()));

    let outcome = orchestrator
        .run(body("image", "a red bicycle"), &CancellationToken::new())
        .await;

    assert_eq!(outcome.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(outcome.to_body()["error"], "Failed to obtain access token");
    assert_eq!(mock.status_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_submission_surfaces_provider_details() {
    let mock = start_mock(0, false).await;
    let orchestrator =
        Orchestrator::from_config(&config_for(&mock, 5), Arc::new(SharedProgress::new()));

    let outcome = orchestrator
        .run(body("image", "forbidden"), &CancellationToken::new())
        .await;

    let body = outcome.to_body();
    assert_eq!(outcome.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "job_submission_error");
    assert_eq!(body["details"], json!({"error_code": "validation_error"}));
}

#[tokio::test]
async fn accepted_mode_round_trip_over_http() {
    let mock = start_mock(0, false).await;
    let mut config = config_for(&mock, 5);
    config.server.mode = ResponseMode::Accepted;
    let orchestrator = Orchestrator::from_config(&config, Arc::new(SharedProgress::new()));
    let state = AppState::new(Arc::new(orchestrator), Duration::from_secs(30));
    let mut server = RelayServer::new(config.server.bind_addr, state);
    server.start().await.unwrap();
    let addr: SocketAddr = server.local_addr().unwrap();
    let client = reqwest::Client::new();

    let accepted = client
        .post(format!("http://{}/api/generate", addr))
        .json(&json!({"apiType": "image", "prompt": "a red bicycle"}))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 202);
    let accepted: Value = accepted.json().await.unwrap();
    let status_url = accepted["statusUrl"].as_str().unwrap().to_string();
    assert_eq!(status_url, format!("{}/v3/status/img-1", mock.base));
    assert_eq!(mock.status_calls.load(Ordering::SeqCst), 0);

    let report: Value = client
        .post(format!("http://{}/api/status", addr))
        .json(&json!({"statusUrl": status_url, "apiType": "image"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        report,
        json!({"status": "succeeded", "outputUrl": "https://cdn.test/img-1"})
    );

    let progress: Value = client
        .get(format!("http://{}/api/progress", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(progress["status"], "Image job submitted");

    server.shutdown().await;
}

/// Records the credential headers of every request it receives.
async fn start_foreign_server() -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let app = Router::new().route(
        "/steal",
        get(move |headers: HeaderMap| {
            let recorder = Arc::clone(&recorder);
            async move {
                for name in ["authorization", "x-api-key"] {
                    if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                        recorder.lock().unwrap().push(format!("{}: {}", name, value));
                    }
                }
                Json(json!({"status": "succeeded"}))
            }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), seen)
}

#[tokio::test]
async fn status_check_never_sends_credentials_to_foreign_host() {
    let mock = start_mock(0, false).await;
    let (foreign, seen) = start_foreign_server().await;
    let orchestrator =
        Orchestrator::from_config(&config_for(&mock, 5), Arc::new(SharedProgress::new()));

    let err = orchestrator
        .check_status(StatusQueryBody {
            status_url: Some(format!("{}/steal", foreign)),
            api_type: Some("image".to_string()),
        })
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 0);
    assert!(seen.lock().unwrap().is_empty());

    let report = orchestrator
        .check_status(StatusQueryBody {
            status_url: Some(format!("{}/v3/status/img-1", mock.base)),
            api_type: Some("image".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(report.output_url.as_deref(), Some("https://cdn.test/img-1"));
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
}
