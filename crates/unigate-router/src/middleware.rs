use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;

use unigate_common::{ErrorBody, ErrorKind, GatewayError, RequestId};
use unigate_core::auth::strip_bearer;
use unigate_core::ratelimit::identifier_from;

use crate::context::RequestContext;
use crate::{is_exempt_path, AppContext};

pub(crate) fn error_response(err: &GatewayError, request_id: Option<&str>) -> Response {
    let body = ErrorBody::new(err.kind, err.message.clone(), request_id);
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_json(),
    )
        .into_response()
}

fn request_id_of(req: &Request<Body>) -> Option<String> {
    req.extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.0.clone())
}

/// 1. Outermost: turns panics anywhere below into a 500 with a request id.
/// Never fails itself.
pub(crate) async fn recovery(
    State(_ctx): State<AppContext>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            // The panic may have fired before the id middleware ran, so
            // mint one rather than reach for request state.
            let request_id = RequestId::generate();
            tracing::error!(request_id = %request_id, panic = %detail, "handler panicked");
            error_response(
                &GatewayError::new(ErrorKind::Internal, "internal error"),
                Some(request_id.as_str()),
            )
        }
    }
}

/// 2. Assigns a request id (honouring an inbound `x-request-id`), attaches
/// the request context, and logs method/path/status/latency on completion.
pub(crate) async fn request_id(
    State(_ctx): State<AppContext>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(|value| RequestId(value.to_string()))
        .unwrap_or_else(RequestId::generate);

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let ctx = RequestContext::new(request_id.clone(), &path);
    let started = ctx.started;
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert("x-request-id", value);
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

/// 3. Fixed security response headers; HSTS only when the request arrived
/// over TLS (as reported by the forwarding proxy).
pub(crate) async fn security_headers(
    State(_ctx): State<AppContext>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let forwarded_https = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    const FIXED: [(&str, &str); 6] = [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("referrer-policy", "strict-origin-when-cross-origin"),
        ("cross-origin-opener-policy", "same-origin"),
        ("cross-origin-resource-policy", "same-origin"),
        ("cross-origin-embedder-policy", "require-corp"),
    ];
    for (name, value) in FIXED {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    if forwarded_https && let Ok(value) =
        HeaderValue::from_str("max-age=31536000; includeSubDomains; preload")
    {
        headers.insert("strict-transport-security", value);
    }
    response
}

/// 4. CORS: echoes the origin iff the allow-list admits it; answers
/// preflights with 204.
pub(crate) async fn cors(
    State(ctx): State<AppContext>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !ctx.cors.is_configured() {
        return next.run(req).await;
    }
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let allowed = origin
        .as_deref()
        .is_some_and(|origin| ctx.cors.allows(origin));

    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        if allowed && let Some(origin) = &origin {
            apply_cors_headers(&mut response, origin);
        }
        return response;
    }

    let mut response = next.run(req).await;
    if allowed && let Some(origin) = &origin {
        apply_cors_headers(&mut response, origin);
    }
    response
}

fn apply_cors_headers(response: &mut Response, origin: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert("access-control-allow-origin", value);
    }
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("authorization, content-type, x-api-key, x-request-id"),
    );
    headers.insert("vary", HeaderValue::from_static("origin"));
}

/// 5. Request validation: size limits, media type, header hygiene, path
/// traversal. Skips health and management paths.
pub(crate) async fn validation(
    State(ctx): State<AppContext>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if is_exempt_path(&path) {
        return next.run(req).await;
    }
    let request_id = request_id_of(&req);

    if let Err(err) = ctx.validator.check_path(&path) {
        return error_response(&err, request_id.as_deref());
    }
    if let Some(query) = req.uri().query()
        && let Err(err) = ctx.validator.check_query(query)
    {
        return error_response(&err, request_id.as_deref());
    }
    for (name, value) in req.headers() {
        if let Err(err) = ctx.validator.check_header(name.as_str(), value.as_bytes()) {
            return error_response(&err, request_id.as_deref());
        }
    }
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if let Err(err) = ctx
        .validator
        .check_content_type(req.method().as_str(), content_type.as_deref())
    {
        return error_response(&err, request_id.as_deref());
    }
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if let Err(err) = ctx.validator.check_content_length(declared) {
        return error_response(&err, request_id.as_deref());
    }

    next.run(req).await
}

/// 6. Fixed-window rate limiting; headers on every non-skipped response.
pub(crate) async fn rate_limit(
    State(ctx): State<AppContext>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if is_exempt_path(&path) {
        return next.run(req).await;
    }
    let request_id = request_id_of(&req);

    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let client_ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .unwrap_or("unknown")
        .to_string();
    let identifier = identifier_from(api_key, authorization, &client_ip);

    let decision = ctx.limiter.check(&identifier);
    if !decision.allowed {
        ctx.metrics
            .ratelimit_rejections
            .with_label_values(&[path.as_str()])
            .inc();
        let err = GatewayError::new(ErrorKind::TooManyRequests, "rate limit exceeded");
        let mut response = error_response(&err, request_id.as_deref());
        apply_rate_headers(&mut response, &decision);
        if let Ok(value) = HeaderValue::from_str(&decision.retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    let mut response = next.run(req).await;
    apply_rate_headers(&mut response, &decision);
    response
}

fn apply_rate_headers(response: &mut Response, decision: &unigate_core::RateDecision) {
    let headers = response.headers_mut();
    let pairs = [
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_epoch.to_string()),
    ];
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

/// 7. Authentication: static API key or session JWT. Runs after the rate
/// limiter so anonymous floods never reach credential checks.
pub(crate) async fn auth(
    State(ctx): State<AppContext>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if is_exempt_path(&path) {
        return next.run(req).await;
    }
    let request_id = request_id_of(&req);

    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(|value| strip_bearer(value).to_string())
        });

    let Some(presented) = presented else {
        let err = GatewayError::unauthorized("missing credentials");
        return error_response(&err, request_id.as_deref());
    };

    match ctx.authenticator.verify(&presented) {
        Ok(auth_ctx) => {
            req.extensions_mut().insert(auth_ctx);
            next.run(req).await
        }
        Err(err) => error_response(&err, request_id.as_deref()),
    }
}

/// 8. Innermost: request counter, latency histogram, response size.
/// Admission rejections short-circuit before this layer and are tracked at
/// their rejection site.
pub(crate) async fn metrics(
    State(ctx): State<AppContext>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let started = tokio::time::Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    ctx.metrics
        .http_requests
        .with_label_values(&[method.as_str(), path.as_str(), status.as_str()])
        .inc();
    ctx.metrics
        .http_duration
        .with_label_values(&[method.as_str(), path.as_str()])
        .observe(started.elapsed().as_secs_f64());
    if let Some(length) = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
    {
        ctx.metrics
            .http_response_bytes
            .with_label_values(&[path.as_str()])
            .inc_by(length);
    }
    response
}
