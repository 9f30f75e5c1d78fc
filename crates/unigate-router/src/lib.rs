//! HTTP surface: the route table and the ordered middleware chain.
//!
//! Chain order (outermost first): recovery, request-id/log, security
//! headers, CORS, validation, rate limit, auth, metrics. Recovery stays
//! outermost so nothing escapes it; rate limiting runs before auth so
//! anonymous floods are shed cheaply; metrics sit innermost so rejected
//! requests are still counted.

mod context;
mod cors;
mod handlers;
mod middleware;

pub use context::RequestContext;
pub use cors::CorsPolicy;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use unigate_core::{Authenticator, Dispatcher, Metrics, RateLimiter, Validator};

#[derive(Clone)]
pub struct AppContext {
    pub dispatcher: Arc<Dispatcher>,
    pub authenticator: Arc<Authenticator>,
    pub limiter: Arc<RateLimiter>,
    pub validator: Arc<Validator>,
    pub metrics: Arc<Metrics>,
    pub cors: Arc<CorsPolicy>,
}

/// Paths exempt from validation, rate limiting, and auth.
pub(crate) fn is_exempt_path(path: &str) -> bool {
    matches!(path, "/" | "/health" | "/healthz" | "/ready" | "/metrics")
        || path.starts_with("/v0/management")
        || path.ends_with("/oauth/callback")
}

pub fn build_router(ctx: AppContext, grid: Option<Router>) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::health))
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::health))
        .route("/ready", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::openai_chat))
        .route("/v1/messages", post(handlers::claude_messages))
        .route("/v1beta/models/{*model_verb}", post(handlers::gemini_generate));

    if let Some(grid) = grid {
        // The grid subtree carries its own state, so it mounts as a
        // finished service.
        router = router.nest_service("/v1/proxygrid", grid);
    }

    router
        // Hard cap on body reads; chunked bodies without a Content-Length
        // still cannot exceed the validator's limit.
        .layer(axum::extract::DefaultBodyLimit::max(
            ctx.validator.max_body_bytes(),
        ))
        .layer(from_fn_with_state(ctx.clone(), middleware::metrics))
        .layer(from_fn_with_state(ctx.clone(), middleware::auth))
        .layer(from_fn_with_state(ctx.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(ctx.clone(), middleware::validation))
        .layer(from_fn_with_state(ctx.clone(), middleware::cors))
        .layer(from_fn_with_state(ctx.clone(), middleware::security_headers))
        .layer(from_fn_with_state(ctx.clone(), middleware::request_id))
        .layer(from_fn_with_state(ctx.clone(), middleware::recovery))
        .with_state(ctx)
}
