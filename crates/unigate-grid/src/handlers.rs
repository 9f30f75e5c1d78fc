use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use prometheus::IntCounterVec;
use serde::Deserialize;

use unigate_common::GridConfig;

use crate::cache::{CacheLookup, GridCache};
use crate::catalog::GridService;
use crate::client::{GridClient, GridError};

/// Fetch seam; the wreq-backed [`GridClient`] implements it, tests script
/// their own.
pub trait GridFetch: Send + Sync {
    fn fetch<'a>(
        &'a self,
        service: GridService,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(Bytes, String), GridError>> + Send + 'a>>;
}

impl GridFetch for GridClient {
    fn fetch<'a>(
        &'a self,
        service: GridService,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(Bytes, String), GridError>> + Send + 'a>> {
        Box::pin(self.call(service, input))
    }
}

#[derive(Clone)]
pub struct GridRuntime {
    pub cache: Arc<GridCache>,
    pub fetcher: Arc<dyn GridFetch>,
    pub cache_metric: IntCounterVec,
}

#[derive(Debug, Deserialize)]
struct GridQuery {
    #[serde(alias = "input")]
    q: Option<String>,
}

/// Builds the `/v1/proxygrid` subtree, or `None` when the subsystem is not
/// safely configured: the base URL must be https and the secret non-empty.
pub fn grid_router(config: &GridConfig, cache_metric: IntCounterVec) -> Option<(Router, GridRuntime)> {
    if config.base_url.is_empty() && config.secret.is_empty() {
        return None;
    }
    if !config.base_url.starts_with("https://") || config.secret.is_empty() {
        tracing::warn!(
            base_url = %config.base_url,
            "proxy grid disabled: requires an https base URL and a shared secret"
        );
        return None;
    }

    let client = match GridClient::new(
        config.base_url.clone(),
        config.secret.clone(),
        Duration::from_secs(config.timeout),
    ) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "proxy grid disabled: client construction failed");
            return None;
        }
    };

    let runtime = GridRuntime {
        cache: Arc::new(GridCache::new()),
        fetcher: Arc::new(client),
        cache_metric,
    };
    let router = Router::new()
        .route("/{category}/{service}", get(grid_handler))
        .with_state(runtime.clone());
    Some((router, runtime))
}

async fn grid_handler(
    State(runtime): State<GridRuntime>,
    Path((category, service)): Path<(String, String)>,
    Query(query): Query<GridQuery>,
) -> Response {
    let Some(service) = GridService::resolve(&category, &service) else {
        return (StatusCode::NOT_FOUND, "unknown grid service").into_response();
    };
    let Some(input) = query.q.filter(|input| !input.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing q parameter").into_response();
    };

    match serve(&runtime, service, &input).await {
        Ok((payload, content_type)) => {
            ([(header::CONTENT_TYPE, content_type)], payload).into_response()
        }
        Err(GridError::Status(status)) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            "grid upstream error",
        )
            .into_response(),
        Err(GridError::Transport(_)) => {
            (StatusCode::BAD_GATEWAY, "grid upstream unreachable").into_response()
        }
    }
}

/// Cache-aside with stale-on-error: fresh hits short-circuit, a failed
/// refresh falls back to an expired artifact (logged), and a successful
/// refresh replaces the entry wholesale.
pub async fn serve(
    runtime: &GridRuntime,
    service: GridService,
    input: &str,
) -> Result<(Bytes, String), GridError> {
    let key = GridCache::key(service, input);
    let stale = match runtime.cache.lookup(&key) {
        CacheLookup::Fresh(artifact) => {
            runtime
                .cache_metric
                .with_label_values(&[service.label(), "hit"])
                .inc();
            return Ok((artifact.payload, artifact.content_type));
        }
        CacheLookup::Stale(artifact) => Some(artifact),
        CacheLookup::Miss => None,
    };

    match runtime.fetcher.fetch(service, input).await {
        Ok((payload, content_type)) => {
            runtime
                .cache_metric
                .with_label_values(&[service.label(), "miss"])
                .inc();
            runtime
                .cache
                .put(key, service, payload.clone(), content_type.clone());
            Ok((payload, content_type))
        }
        Err(err) => {
            if let Some(artifact) = stale {
                tracing::warn!(
                    service = service.label(),
                    error = %err,
                    "grid refresh failed; serving stale artifact"
                );
                runtime
                    .cache_metric
                    .with_label_values(&[service.label(), "stale"])
                    .inc();
                return Ok((artifact.payload, artifact.content_type));
            }
            runtime
                .cache_metric
                .with_label_values(&[service.label(), "error"])
                .inc();
            Err(err)
        }
    }
}
