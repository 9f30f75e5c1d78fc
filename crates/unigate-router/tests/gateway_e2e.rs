use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use unigate_common::{CredentialEntry, GatewaySnapshot, RoutingStrategy};
use unigate_core::upstream::{
    UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse,
};
use unigate_core::{Authenticator, Dispatcher, GatewayState, Metrics, RateLimiter, Validator};
use unigate_provider::{OutcomeKind, ProviderRegistry, StaticTokenProvider};
use unigate_router::{build_router, AppContext, CorsPolicy};

const API_KEY: &str = "test-key";

#[derive(Debug, Clone)]
enum Scripted {
    Status {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
    },
    /// (delay before frame, frame bytes); the stream closes after the last.
    Stream {
        frames: Vec<(u64, &'static str)>,
    },
    Transport,
}

#[derive(Debug, Clone)]
struct Recorded {
    url: String,
    authorization: Option<String>,
}

struct MockUpstream {
    script: Mutex<VecDeque<Scripted>>,
    recorded: Mutex<Vec<Recorded>>,
}

impl MockUpstream {
    fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            recorded: Mutex::new(Vec::new()),
        }
    }

    fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().unwrap().clone()
    }
}

impl UpstreamClient for MockUpstream {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>> {
        let authorization = req
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.clone());
        self.recorded.lock().unwrap().push(Recorded {
            url: req.url.clone(),
            authorization,
        });
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Scripted::Status {
                    status,
                    headers,
                    body,
                }) => Ok(UpstreamResponse {
                    status,
                    headers: headers
                        .into_iter()
                        .map(|(name, value)| (name.to_string(), value.to_string()))
                        .collect(),
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                Some(Scripted::Stream { frames }) => {
                    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(8);
                    tokio::spawn(async move {
                        for (delay, frame) in frames {
                            tokio::time::sleep(Duration::from_secs(delay)).await;
                            if tx.send(Bytes::from_static(frame.as_bytes())).await.is_err() {
                                return;
                            }
                        }
                    });
                    Ok(UpstreamResponse {
                        status: 200,
                        headers: vec![("content-type".into(), "text/event-stream".into())],
                        body: UpstreamBody::Stream(rx),
                    })
                }
                Some(Scripted::Transport) | None => Err(UpstreamFailure {
                    kind: OutcomeKind::Connect,
                    timed_out: false,
                    message: "scripted transport failure".to_string(),
                }),
            }
        })
    }
}

fn credential(id: i64, provider: &str, key: &str) -> CredentialEntry {
    serde_json::from_value(json!({
        "id": id,
        "provider": provider,
        "static-key": { "api_key": key },
    }))
    .unwrap()
}

fn base_snapshot(credentials: Vec<CredentialEntry>) -> GatewaySnapshot {
    let mut snapshot = GatewaySnapshot::default();
    snapshot.routing.strategy = RoutingStrategy::FillFirst;
    snapshot.routing.keepalive_seconds = 10;
    snapshot.auth.api_keys = vec![API_KEY.to_string()];
    snapshot.credentials = credentials;
    snapshot
}

fn build_app(
    snapshot: GatewaySnapshot,
    script: Vec<Scripted>,
) -> (Router, Arc<MockUpstream>, Arc<GatewayState>) {
    let upstream = Arc::new(MockUpstream::new(script));
    let metrics = Arc::new(Metrics::new().unwrap());
    let state = Arc::new(GatewayState::new(snapshot.clone(), Vec::new()));
    let dispatcher = Arc::new(Dispatcher::new(
        state.clone(),
        Arc::new(ProviderRegistry::with_builtin()),
        upstream.clone(),
        Arc::new(StaticTokenProvider::default()),
        metrics.clone(),
    ));
    let ctx = AppContext {
        dispatcher,
        authenticator: Arc::new(Authenticator::new(&snapshot.auth)),
        limiter: Arc::new(RateLimiter::new(
            snapshot.rate_limit.requests_per_minute,
            Duration::from_secs(snapshot.rate_limit.cleanup_interval),
        )),
        validator: Arc::new(Validator::new(snapshot.limits.clone())),
        metrics,
        cors: Arc::new(CorsPolicy::new(snapshot.cors.allowed_origins.clone())),
    };
    (build_router(ctx, None), upstream, state)
}

fn chat_request(model: &str, stream: bool) -> Request<Body> {
    let body = json!({
        "model": model,
        "messages": [{"role": "user", "content": "hi"}],
        "stream": stream,
    });
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

const OPENAI_OK: &str = r#"{
    "id": "chatcmpl-1",
    "object": "chat.completion",
    "created": 1700000000,
    "model": "gpt-4",
    "choices": [{
        "index": 0,
        "message": {"role": "assistant", "content": "hi there"},
        "finish_reason": "stop"
    }],
    "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
}"#;

async fn settle() {
    // Lets the outcome observer drain its channel.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn happy_path_unary() {
    let snapshot = base_snapshot(vec![credential(1, "openai", "sk-A")]);
    let (app, upstream, state) = build_app(
        snapshot,
        vec![Scripted::Status {
            status: 200,
            headers: vec![("content-type", "application/json")],
            body: OPENAI_OK,
        }],
    );

    let response = app.oneshot(chat_request("gpt-4", false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hi there");

    let recorded = upstream.recorded();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].url.ends_with("/v1/chat/completions"));
    assert_eq!(recorded[0].authorization.as_deref(), Some("Bearer sk-A"));

    settle().await;
    let usage = state.runtime().pool.usage(1).await.unwrap();
    assert_eq!(usage, (1, 0));
}

#[tokio::test(start_paused = true)]
async fn failover_rotates_to_second_credential() {
    let snapshot = base_snapshot(vec![
        credential(1, "openai", "sk-A"),
        credential(2, "openai", "sk-B"),
    ]);
    let (app, upstream, state) = build_app(
        snapshot,
        vec![
            Scripted::Status {
                status: 503,
                headers: vec![],
                body: "overloaded",
            },
            Scripted::Status {
                status: 503,
                headers: vec![],
                body: "overloaded",
            },
            Scripted::Status {
                status: 200,
                headers: vec![("content-type", "application/json")],
                body: OPENAI_OK,
            },
        ],
    );

    let response = app.oneshot(chat_request("gpt-4", false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let recorded = upstream.recorded();
    let auths: Vec<_> = recorded
        .iter()
        .map(|req| req.authorization.as_deref().unwrap().to_string())
        .collect();
    assert_eq!(auths, vec!["Bearer sk-A", "Bearer sk-A", "Bearer sk-B"]);

    settle().await;
    assert_eq!(state.runtime().pool.usage(1).await.unwrap(), (0, 2));
    assert_eq!(state.runtime().pool.usage(2).await.unwrap(), (1, 0));
    // Two failures are below the default threshold of five.
    let key = unigate_provider::BreakerKey {
        provider: unigate_common::Provider::OpenAi,
        model: "gpt-4".to_string(),
        base_url: "https://api.openai.com".to_string(),
    };
    let snapshot = state.breakers().snapshot(&key).unwrap();
    assert_eq!(snapshot.state, unigate_provider::BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn quota_exhausted_credential_is_bypassed() {
    let snapshot = base_snapshot(vec![
        credential(1, "openai", "sk-A"),
        credential(2, "openai", "sk-B"),
    ]);
    let (app, upstream, state) = build_app(
        snapshot,
        vec![
            Scripted::Status {
                status: 429,
                headers: vec![("retry-after", "30")],
                body: "quota",
            },
            Scripted::Status {
                status: 200,
                headers: vec![("content-type", "application/json")],
                body: OPENAI_OK,
            },
            Scripted::Status {
                status: 200,
                headers: vec![("content-type", "application/json")],
                body: OPENAI_OK,
            },
        ],
    );

    let response = app
        .clone()
        .oneshot(chat_request("gpt-4", false))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    settle().await;
    assert_eq!(
        state.runtime().pool.status(1).await,
        Some(unigate_provider::CredentialStatus::QuotaExhausted)
    );

    // Within the quota window sk-A is not attempted at all.
    let response = app.oneshot(chat_request("gpt-4", false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let recorded = upstream.recorded();
    assert_eq!(recorded.len(), 3);
    assert_eq!(recorded[2].authorization.as_deref(), Some("Bearer sk-B"));
}

#[tokio::test(start_paused = true)]
async fn open_circuit_short_circuits_selection() {
    let mut snapshot = base_snapshot(vec![credential(1, "openai", "sk-A")]);
    snapshot.routing.request_retry = 1;
    snapshot.breaker.failure_threshold = 2;
    let (app, upstream, _state) = build_app(
        snapshot,
        vec![
            Scripted::Status {
                status: 503,
                headers: vec![],
                body: "down",
            },
            Scripted::Status {
                status: 503,
                headers: vec![],
                body: "down",
            },
        ],
    );

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(chat_request("gpt-4", false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        settle().await;
    }

    // The circuit is open; the third request never reaches the upstream.
    let response = app.oneshot(chat_request("gpt-4", false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(upstream.recorded().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn sse_keepalive_and_terminator() {
    let snapshot = base_snapshot(vec![credential(1, "openai", "sk-A")]);
    let (app, _upstream, _state) = build_app(
        snapshot,
        vec![Scripted::Stream {
            frames: vec![(
                25,
                "data: {\"id\":\"chatcmpl-1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
            )],
        }],
    );

    let response = app
        .clone()
        .oneshot(chat_request("gpt-4", true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("text/event-stream")
    );

    let body = body_string(response).await;
    let data_at = body.find("data: {").unwrap();
    let keepalives_before = body[..data_at].matches(": keep-alive").count();
    assert!(
        keepalives_before >= 2,
        "expected at least two keep-alives before data, got {keepalives_before} in {body:?}"
    );
    assert!(body.contains("\"content\":\"hi\""));
    assert!(body.trim_end().ends_with("data: [DONE]"));

    // Streamed bodies have no Content-Length; the pump accounts for every
    // byte it delivered, keep-alives and terminator included.
    settle().await;
    let exposition = body_string(
        app.oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap(),
    )
    .await;
    let recorded: u64 = exposition
        .lines()
        .find(|line| {
            line.starts_with("unigate_http_response_bytes_total")
                && line.contains("/v1/chat/completions")
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
        .expect("response byte counter missing from exposition");
    assert_eq!(recorded, body.len() as u64);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_second_request_rejected() {
    let mut snapshot = base_snapshot(vec![credential(1, "openai", "sk-A")]);
    snapshot.rate_limit.requests_per_minute = 1;
    let (app, _upstream, _state) = build_app(snapshot, Vec::new());

    let ok = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(
        ok.headers()
            .get("x-ratelimit-limit")
            .and_then(|value| value.to_str().ok()),
        Some("1")
    );

    let limited = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap();
    assert!(retry_after <= 60);
    assert_eq!(
        limited
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|value| value.to_str().ok()),
        Some("0")
    );
}

#[tokio::test(start_paused = true)]
async fn auth_rejects_missing_and_unknown_credentials() {
    let (app, _upstream, _state) = build_app(base_snapshot(Vec::new()), Vec::new());

    let missing = app
        .clone()
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = serde_json::from_str(&body_string(missing).await).unwrap();
    assert!(body["error"]["message"].is_string());

    let unknown = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header("authorization", "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(start_paused = true)]
async fn validation_rejects_oversize_and_traversal() {
    let (app, _upstream, _state) = build_app(base_snapshot(Vec::new()), Vec::new());

    let oversized = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("x-api-key", API_KEY)
                .header("content-type", "application/json")
                .header("content-length", (11 * 1024 * 1024).to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(oversized.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let long_query = format!("/v1/models?padding={}", "x".repeat(3000));
    let too_long = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(long_query)
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(too_long.status(), StatusCode::URI_TOO_LONG);

    let traversal = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/%2e%2e/secrets")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(traversal.status(), StatusCode::BAD_REQUEST);

    let media = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("x-api-key", API_KEY)
                .header("content-type", "application/xml")
                .body(Body::from("<x/>"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(media.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test(start_paused = true)]
async fn security_headers_and_request_id_on_every_response() {
    let (app, _upstream, _state) = build_app(base_snapshot(Vec::new()), Vec::new());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(
        headers.get("referrer-policy").unwrap(),
        "strict-origin-when-cross-origin"
    );
    assert!(headers.get("x-request-id").is_some());
    // Plain HTTP request: no HSTS.
    assert!(headers.get("strict-transport-security").is_none());
}

#[tokio::test(start_paused = true)]
async fn cors_preflight_and_echo() {
    let mut snapshot = base_snapshot(Vec::new());
    snapshot.cors.allowed_origins = vec!["http://localhost:*".to_string()];
    let (app, _upstream, _state) = build_app(snapshot, Vec::new());

    let preflight = app
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/models")
                .header("origin", "http://localhost:5173")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        preflight
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "http://localhost:5173"
    );

    let denied = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/models")
                .header("origin", "http://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(denied
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn transport_failure_retries_and_recovers() {
    let snapshot = base_snapshot(vec![credential(1, "openai", "sk-A")]);
    let (app, upstream, _state) = build_app(
        snapshot,
        vec![
            Scripted::Transport,
            Scripted::Status {
                status: 200,
                headers: vec![("content-type", "application/json")],
                body: OPENAI_OK,
            },
        ],
    );

    let response = app.oneshot(chat_request("gpt-4", false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.recorded().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn claude_dialect_client_on_openai_provider() {
    let snapshot = base_snapshot(vec![credential(1, "openai", "sk-A")]);
    let (app, _upstream, _state) = build_app(
        snapshot,
        vec![Scripted::Status {
            status: 200,
            headers: vec![("content-type", "application/json")],
            body: OPENAI_OK,
        }],
    );

    let body = json!({
        "model": "gpt-4",
        "max_tokens": 64,
        "messages": [{"role": "user", "content": "hi"}],
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("content-type", "application/json")
                .header("x-api-key", API_KEY)
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["text"], "hi there");
    assert_eq!(body["usage"]["input_tokens"], 3);
}

#[tokio::test(start_paused = true)]
async fn gemini_dialect_client_on_openai_provider() {
    let snapshot = base_snapshot(vec![credential(1, "openai", "sk-A")]);
    let (app, _upstream, _state) = build_app(
        snapshot,
        vec![Scripted::Status {
            status: 200,
            headers: vec![("content-type", "application/json")],
            body: OPENAI_OK,
        }],
    );

    let body = json!({
        "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1beta/models/gpt-4:generateContent")
                .header("content-type", "application/json")
                .header("x-api-key", API_KEY)
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "hi there");
    assert_eq!(body["candidates"][0]["finishReason"], "STOP");
}

#[tokio::test(start_paused = true)]
async fn no_credentials_yields_upstreams_unavailable() {
    let (app, _upstream, _state) = build_app(base_snapshot(Vec::new()), Vec::new());
    let response = app.oneshot(chat_request("gpt-4", false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["kind"], "upstreams_unavailable");
}
