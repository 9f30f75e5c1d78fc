use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;

use unigate_common::{ErrorKind, GatewayError, Provider, RequestId};
use unigate_protocol::openai::models::{Model, ModelList, ModelObjectType};
use unigate_protocol::sse::{SseDecoder, KEEP_ALIVE_FRAME, OPENAI_DONE_FRAME};
use unigate_provider::{
    parse_retry_after, CredentialId, Outcome, OutcomeKind, OutcomeReport, OutcomeSender,
    ProviderRegistry, Secret, SelectError, Selected, TokenProvider,
};
use unigate_transform::{
    error_event, translate_request, translate_response, ChatRequest, ChatResponse, Dialect,
    StreamTranslator,
};

use crate::metrics::Metrics;
use crate::state::{GatewayState, PoolRuntime};
use crate::upstream::{ByteStream, UpstreamBody, UpstreamClient, UpstreamRequest, UpstreamResponse};

/// Stable provider scan order for requests that do not pin a provider.
const PROVIDER_ORDER: [Provider; 6] = [
    Provider::OpenAi,
    Provider::Claude,
    Provider::Gemini,
    Provider::Qwen,
    Provider::IFlow,
    Provider::Vertex,
];

const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Retryable failures tolerated on one credential within one request
/// before rotating away from it.
const STRIKES_PER_CREDENTIAL: u32 = 2;

#[derive(Debug)]
pub struct ChatCall {
    pub request: ChatRequest,
    pub stream: bool,
    pub request_id: RequestId,
    /// Ingress path; labels the response-size counter for streamed
    /// replies, whose bodies never carry a Content-Length.
    pub path: String,
    /// Provider pinned by the route (Gemini-native paths); unset for the
    /// unified endpoints, where the model name decides.
    pub provider: Option<Provider>,
}

pub enum ChatReply {
    Unary { body: Bytes },
    /// SSE frames, already in the client dialect. The router flushes
    /// stream headers before first poll.
    Stream { frames: ByteStream },
}

pub struct Dispatcher {
    state: Arc<GatewayState>,
    registry: Arc<ProviderRegistry>,
    client: Arc<dyn UpstreamClient>,
    tokens: Arc<dyn TokenProvider>,
    metrics: Arc<Metrics>,
}

/// Reports `Canceled` if dropped while an attempt is in flight (the client
/// went away mid-call); otherwise reports whatever resolved it.
struct ReportGuard {
    outcomes: OutcomeSender,
    report: Option<OutcomeReport>,
}

impl ReportGuard {
    fn arm(outcomes: &OutcomeSender, report: OutcomeReport) -> Self {
        Self {
            outcomes: outcomes.clone(),
            report: Some(report),
        }
    }

    fn resolve(mut self, outcome: Outcome) {
        if let Some(mut report) = self.report.take() {
            report.outcome = outcome;
            self.outcomes.report(report);
        }
    }
}

impl Drop for ReportGuard {
    fn drop(&mut self) {
        if let Some(report) = self.report.take() {
            self.outcomes.report(report);
        }
    }
}

/// What one upstream attempt produced, after classification and reporting.
enum AttemptResult {
    Success(UpstreamResponse),
    Failed { outcome: Outcome, error: GatewayError },
}

impl Dispatcher {
    pub fn new(
        state: Arc<GatewayState>,
        registry: Arc<ProviderRegistry>,
        client: Arc<dyn UpstreamClient>,
        tokens: Arc<dyn TokenProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            state,
            registry,
            client,
            tokens,
            metrics,
        }
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Entry point for all three chat routes.
    pub async fn handle_chat(&self, call: ChatCall) -> Result<ChatReply, GatewayError> {
        if call.stream {
            self.handle_stream(call).await
        } else {
            self.handle_unary(call).await
        }
    }

    async fn handle_unary(&self, call: ChatCall) -> Result<ChatReply, GatewayError> {
        let config = self.state.config();
        let runtime = self.state.runtime();
        let client_dialect = call.request.dialect();
        let started = Instant::now();
        let request_deadline = Duration::from_secs(config.routing.request_timeout);

        let mut excluded: Vec<CredentialId> = Vec::new();
        let mut strikes: HashMap<CredentialId, u32> = HashMap::new();
        let max_attempts = config.routing.request_retry.max(1);
        let mut last_error = GatewayError::new(ErrorKind::UpstreamsUnavailable, "no attempt made");

        for attempt in 1..=max_attempts {
            if started.elapsed() >= request_deadline {
                last_error = GatewayError::new(ErrorKind::Timeout, "request deadline elapsed");
                break;
            }

            let selected = match self.select(&runtime, &call, &excluded).await {
                Ok(selected) => selected,
                Err(err) => {
                    last_error = select_error(err);
                    break;
                }
            };

            let attempt_timeout = Duration::from_secs(config.routing.attempt_timeout)
                .min(request_deadline.saturating_sub(started.elapsed()));
            let attempt_result = match self
                .attempt(&runtime, &call, &selected, false, attempt_timeout, attempt)
                .await
            {
                Ok(result) => result,
                Err(BuildError::Token(message)) => {
                    // Treat an unredeemable token like a connect failure on
                    // this credential and rotate.
                    tracing::warn!(
                        request_id = %call.request_id,
                        credential_id = selected.credential.id,
                        %message,
                        "token redemption failed"
                    );
                    excluded.push(selected.credential.id);
                    last_error = GatewayError::new(ErrorKind::UpstreamError, message);
                    continue;
                }
                Err(BuildError::Fatal(err)) => return Err(err),
            };

            match attempt_result {
                AttemptResult::Success(resp) => {
                    return self
                        .unary_reply(resp, &selected, client_dialect)
                        .map(|body| ChatReply::Unary { body });
                }
                AttemptResult::Failed { outcome, error } => {
                    last_error = error;
                    note_failure(&mut excluded, &mut strikes, selected.credential.id, &outcome);
                    if !outcome.is_retryable() || attempt == max_attempts {
                        break;
                    }
                    tokio::time::sleep(backoff(attempt, config.routing.max_retry_interval)).await;
                }
            }
        }

        Err(last_error)
    }

    async fn handle_stream(&self, call: ChatCall) -> Result<ChatReply, GatewayError> {
        let config = self.state.config();
        let runtime = self.state.runtime();
        let client_dialect = call.request.dialect();

        let mut excluded: Vec<CredentialId> = Vec::new();
        let mut strikes: HashMap<CredentialId, u32> = HashMap::new();
        // Bootstrap phase: nothing has reached the client yet, so a failed
        // open may rotate credentials like any unary retry. Once a stream
        // is returned the request is committed; later failures surface as
        // SSE error events, never a retry.
        let max_attempts = config.routing.bootstrap_retries + 1;
        let mut last_error = GatewayError::new(ErrorKind::UpstreamsUnavailable, "no attempt made");

        for attempt in 1..=max_attempts {
            let selected = match self.select(&runtime, &call, &excluded).await {
                Ok(selected) => selected,
                Err(err) => {
                    last_error = select_error(err);
                    break;
                }
            };

            let head_timeout = Duration::from_secs(config.routing.attempt_timeout);
            let generation = runtime
                .pool
                .breakers()
                .register_attempt(&selected.breaker_key);
            let upstream_req = match self
                .build_upstream_request(&call, &selected, true, head_timeout)
                .await
            {
                Ok(req) => req,
                Err(BuildError::Token(message)) => {
                    excluded.push(selected.credential.id);
                    last_error = GatewayError::new(ErrorKind::UpstreamError, message);
                    continue;
                }
                Err(BuildError::Fatal(err)) => return Err(err),
            };

            let guard = ReportGuard::arm(
                &runtime.outcomes,
                OutcomeReport {
                    credential_id: selected.credential.id,
                    breaker_key: selected.breaker_key.clone(),
                    generation,
                    outcome: Outcome::Canceled,
                },
            );

            // The head deadline covers status+headers only; the pump's
            // idle watchdog takes over once the stream is open.
            let opened = tokio::time::timeout(head_timeout, self.client.send(upstream_req)).await;
            let (outcome, failed_error) = match opened {
                Ok(Ok(resp)) if (200..300).contains(&resp.status) => {
                    match resp.body {
                        UpstreamBody::Stream(upstream_rx) => {
                            self.count_attempt(selected.breaker_key.provider, "success");
                            let frames = self.spawn_pump(
                                upstream_rx,
                                guard,
                                &selected,
                                client_dialect,
                                &config.routing,
                                call.request_id.clone(),
                                call.path.clone(),
                            );
                            return Ok(ChatReply::Stream { frames });
                        }
                        UpstreamBody::Bytes(_) => {
                            let outcome = Outcome::Retryable(OutcomeKind::Io);
                            guard.resolve(outcome.clone());
                            (
                                outcome,
                                GatewayError::upstream("upstream returned a non-streaming body"),
                            )
                        }
                    }
                }
                Ok(Ok(resp)) => {
                    let outcome = Outcome::from_status(
                        resp.status,
                        resp.header("retry-after").and_then(parse_retry_after),
                    );
                    guard.resolve(outcome.clone());
                    (
                        outcome,
                        GatewayError::upstream(format!("upstream returned status {}", resp.status)),
                    )
                }
                Ok(Err(failure)) => {
                    let outcome = failure.outcome();
                    guard.resolve(outcome.clone());
                    (outcome, GatewayError::upstream(failure.message))
                }
                Err(_) => {
                    guard.resolve(Outcome::Timeout);
                    (
                        Outcome::Timeout,
                        GatewayError::new(ErrorKind::Timeout, "upstream open timed out"),
                    )
                }
            };

            self.count_attempt(selected.breaker_key.provider, &outcome.label());
            last_error = failed_error;
            note_failure(&mut excluded, &mut strikes, selected.credential.id, &outcome);
            if !outcome.is_retryable() || attempt == max_attempts {
                break;
            }
            tokio::time::sleep(backoff(attempt, config.routing.max_retry_interval)).await;
        }

        Err(last_error)
    }

    /// One registered, classified, reported upstream attempt (unary path).
    async fn attempt(
        &self,
        runtime: &PoolRuntime,
        call: &ChatCall,
        selected: &Selected,
        stream: bool,
        timeout: Duration,
        attempt_no: u32,
    ) -> Result<AttemptResult, BuildError> {
        let generation = runtime
            .pool
            .breakers()
            .register_attempt(&selected.breaker_key);
        let upstream_req = self
            .build_upstream_request(call, selected, stream, timeout)
            .await?;

        let guard = ReportGuard::arm(
            &runtime.outcomes,
            OutcomeReport {
                credential_id: selected.credential.id,
                breaker_key: selected.breaker_key.clone(),
                generation,
                outcome: Outcome::Canceled,
            },
        );

        tracing::debug!(
            request_id = %call.request_id,
            provider = %selected.breaker_key.provider,
            credential_id = selected.credential.id,
            attempt = attempt_no,
            model = %selected.upstream_model,
            "dispatching upstream attempt"
        );

        let result = self.client.send(upstream_req).await;
        Ok(match result {
            Ok(resp) => {
                let outcome = Outcome::from_status(
                    resp.status,
                    resp.header("retry-after").and_then(parse_retry_after),
                );
                guard.resolve(outcome.clone());
                self.count_attempt(selected.breaker_key.provider, &outcome.label());
                if outcome.is_success() {
                    AttemptResult::Success(resp)
                } else {
                    let error = match &outcome {
                        Outcome::QuotaExceeded { .. } => {
                            GatewayError::upstream("upstream quota exhausted")
                        }
                        _ => GatewayError::upstream(format!(
                            "upstream returned status {}",
                            resp.status
                        )),
                    };
                    AttemptResult::Failed { outcome, error }
                }
            }
            Err(failure) => {
                let outcome = failure.outcome();
                guard.resolve(outcome.clone());
                self.count_attempt(selected.breaker_key.provider, &outcome.label());
                let error = if matches!(outcome, Outcome::Timeout) {
                    GatewayError::new(ErrorKind::Timeout, "upstream attempt timed out")
                } else {
                    GatewayError::upstream(failure.message)
                };
                AttemptResult::Failed { outcome, error }
            }
        })
    }

    fn count_attempt(&self, provider: Provider, outcome_label: &str) {
        self.metrics
            .upstream_attempts
            .with_label_values(&[provider.as_str(), outcome_label])
            .inc();
    }

    /// Forwards upstream SSE through the translator, injecting keep-alive
    /// comments while the upstream is silent and closing with the client
    /// dialect's terminator. Chunks keep upstream arrival order; a tick
    /// never splits an event because frames are written whole.
    ///
    /// Streamed bodies carry no Content-Length, so the pump owns the
    /// response-size accounting: every frame delivered downstream is
    /// tallied and recorded once the stream closes.
    #[allow(clippy::too_many_arguments)]
    fn spawn_pump(
        &self,
        mut upstream_rx: ByteStream,
        guard: ReportGuard,
        selected: &Selected,
        client_dialect: Dialect,
        routing: &unigate_common::RoutingConfig,
        request_id: RequestId,
        path: String,
    ) -> ByteStream {
        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let src_dialect = self
            .registry
            .get(selected.breaker_key.provider)
            .map(|adapter| adapter.dialect())
            .unwrap_or(client_dialect);
        let model = selected.client_model.clone();
        let metrics = self.metrics.clone();
        let keepalive = routing.keepalive_seconds;
        // The idle clock counts downstream writes, keep-alives included, so
        // a healthy client connection survives long upstream silences; with
        // keep-alives on, ticks land well inside the window and the
        // transport bridge bounds a truly dead upstream. With them off, the
        // watchdog cuts the stream after 30 s of silence.
        let idle_timeout = if keepalive == 0 {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(keepalive * 2)
        };

        tokio::spawn(async move {
            let created = time::OffsetDateTime::now_utc().unix_timestamp();
            let mut decoder = SseDecoder::new();
            let mut translator =
                StreamTranslator::new(src_dialect, client_dialect, &model, created);
            let mut last_write = Instant::now();
            let mut next_keepalive =
                (keepalive > 0).then(|| Instant::now() + Duration::from_secs(keepalive));
            let mut bytes_written: u64 = 0;
            let outcome;

            'pump: loop {
                let idle_due = last_write + idle_timeout;
                tokio::select! {
                    chunk = upstream_rx.recv() => {
                        match chunk {
                            Some(chunk) => {
                                last_write = Instant::now();
                                for event in decoder.feed(&chunk) {
                                    for frame in translator.on_event(&event) {
                                        let frame = frame.encode();
                                        let len = frame.len() as u64;
                                        if tx.send(frame).await.is_err() {
                                            outcome = Outcome::Canceled;
                                            break 'pump;
                                        }
                                        bytes_written += len;
                                    }
                                }
                            }
                            None => {
                                for event in decoder.finish() {
                                    for frame in translator.on_event(&event) {
                                        let frame = frame.encode();
                                        let len = frame.len() as u64;
                                        if tx.send(frame).await.is_err() {
                                            outcome = Outcome::Canceled;
                                            break 'pump;
                                        }
                                        bytes_written += len;
                                    }
                                }
                                for frame in translator.finish() {
                                    let frame = frame.encode();
                                    let len = frame.len() as u64;
                                    if tx.send(frame).await.is_err() {
                                        outcome = Outcome::Canceled;
                                        break 'pump;
                                    }
                                    bytes_written += len;
                                }
                                if client_dialect == Dialect::OpenAi {
                                    if tx.send(Bytes::from_static(OPENAI_DONE_FRAME)).await.is_err() {
                                        outcome = Outcome::Canceled;
                                        break 'pump;
                                    }
                                    bytes_written += OPENAI_DONE_FRAME.len() as u64;
                                }
                                outcome = Outcome::Success;
                                break 'pump;
                            }
                        }
                    }
                    _ = sleep_until_opt(next_keepalive), if next_keepalive.is_some() => {
                        if tx.send(Bytes::from_static(KEEP_ALIVE_FRAME)).await.is_err() {
                            outcome = Outcome::Canceled;
                            break 'pump;
                        }
                        bytes_written += KEEP_ALIVE_FRAME.len() as u64;
                        last_write = Instant::now();
                        next_keepalive = Some(last_write + Duration::from_secs(keepalive));
                    }
                    _ = tokio::time::sleep_until(idle_due) => {
                        tracing::warn!(request_id = %request_id, "stream idle timeout");
                        let frame = error_event(
                            client_dialect,
                            "upstream_error",
                            "stream idle timeout",
                        ).encode();
                        let len = frame.len() as u64;
                        if tx.send(frame).await.is_ok() {
                            bytes_written += len;
                        }
                        outcome = Outcome::Timeout;
                        break 'pump;
                    }
                }
            }

            metrics
                .http_response_bytes
                .with_label_values(&[path.as_str()])
                .inc_by(bytes_written);
            guard.resolve(outcome);
        });

        rx
    }

    async fn select(
        &self,
        runtime: &PoolRuntime,
        call: &ChatCall,
        excluded: &[CredentialId],
    ) -> Result<Selected, SelectError> {
        let model = call.request.model().to_string();
        if let Some(provider) = call.provider {
            return runtime.pool.select(provider, &model, excluded).await;
        }

        // Unified endpoints: the model name picks the provider. Scan the
        // configured providers in fixed order; the first whose policy
        // admits the model wins, with "unhealthy" reported over "unknown".
        let mut saw_unavailable = false;
        let mut any_configured = false;
        for provider in PROVIDER_ORDER {
            if !runtime.pool.has_credentials(provider) {
                continue;
            }
            any_configured = true;
            match runtime.pool.select(provider, &model, excluded).await {
                Ok(selected) => return Ok(selected),
                Err(SelectError::NoMatchingCredential(_)) => {}
                Err(SelectError::UpstreamsUnavailable) => saw_unavailable = true,
                Err(err @ SelectError::InvalidModelName(_)) => return Err(err),
            }
        }
        if saw_unavailable || !any_configured {
            Err(SelectError::UpstreamsUnavailable)
        } else {
            Err(SelectError::NoMatchingCredential(model))
        }
    }

    async fn build_upstream_request(
        &self,
        call: &ChatCall,
        selected: &Selected,
        stream: bool,
        timeout: Duration,
    ) -> Result<UpstreamRequest, BuildError> {
        let adapter = self
            .registry
            .get(selected.breaker_key.provider)
            .ok_or_else(|| {
                BuildError::Fatal(GatewayError::new(
                    ErrorKind::Internal,
                    "provider adapter missing",
                ))
            })?;

        let mut native = translate_request(call.request.clone(), adapter.dialect())
            .map_err(|err| BuildError::Fatal(GatewayError::invalid_request(err.to_string())))?;
        native.set_model(&selected.upstream_model);
        match &mut native {
            ChatRequest::OpenAi(req) => req.stream = stream.then_some(true).or(req.stream),
            ChatRequest::Claude(req) => req.stream = stream.then_some(true).or(req.stream),
            // Streaming rides in the URL verb for Gemini.
            ChatRequest::Gemini { .. } => {}
        }

        let body = match &native {
            ChatRequest::OpenAi(req) => serde_json::to_vec(req),
            ChatRequest::Claude(req) => serde_json::to_vec(req),
            ChatRequest::Gemini { body, .. } => serde_json::to_vec(body),
        }
        .map_err(|err| BuildError::Fatal(GatewayError::invalid_request(err.to_string())))?;

        let secret = match &selected.credential.secret {
            Secret::ApiKey(key) => key.clone(),
            Secret::OAuth(handle) => self
                .tokens
                .bearer(handle)
                .await
                .map_err(|err| BuildError::Token(err.to_string()))?,
        };

        let mut headers: Vec<(String, String)> = vec![
            ("content-type".to_string(), "application/json".to_string()),
            (
                "accept".to_string(),
                if stream {
                    "text/event-stream".to_string()
                } else {
                    "application/json".to_string()
                },
            ),
        ];
        for (name, value) in adapter.auth_headers(&secret) {
            header_set(&mut headers, &name, &value);
        }
        for (name, value) in &selected.credential.headers {
            header_set(&mut headers, name, value);
        }

        Ok(UpstreamRequest {
            url: adapter.chat_url(
                selected.credential.effective_base_url(),
                &selected.upstream_model,
                stream,
            ),
            headers,
            body: Bytes::from(body),
            stream,
            timeout,
            proxy: selected.credential.egress_proxy.clone(),
        })
    }

    fn unary_reply(
        &self,
        resp: UpstreamResponse,
        selected: &Selected,
        client_dialect: Dialect,
    ) -> Result<Bytes, GatewayError> {
        let UpstreamBody::Bytes(body) = resp.body else {
            return Err(GatewayError::upstream("expected a buffered upstream body"));
        };
        let provider_dialect = self
            .registry
            .get(selected.breaker_key.provider)
            .map(|adapter| adapter.dialect())
            .unwrap_or(client_dialect);

        let native = decode_response(provider_dialect, &body)
            .map_err(|err| GatewayError::upstream(format!("upstream body undecodable: {err}")))?;
        let created = time::OffsetDateTime::now_utc().unix_timestamp();
        let translated =
            translate_response(native, client_dialect, &selected.client_model, created)
                .map_err(|err| GatewayError::upstream(err.to_string()))?;

        let value = translated
            .to_json()
            .map_err(|err| GatewayError::upstream(err.to_string()))?;
        serde_json::to_vec(&value)
            .map(Bytes::from)
            .map_err(|err| GatewayError::upstream(err.to_string()))
    }

    /// Union of client-visible models across the active pool: exact allow
    /// entries plus alias names, with prefix-tagged variants for tagged
    /// credentials.
    pub async fn list_models(&self) -> ModelList {
        let runtime = self.state.runtime();
        let created = time::OffsetDateTime::now_utc().unix_timestamp();
        let mut seen: Vec<(String, Provider)> = Vec::new();

        for provider in PROVIDER_ORDER {
            for credential in runtime.pool.credentials_for(provider) {
                let mut names: Vec<String> = Vec::new();
                for pattern in credential.policy.allow_patterns() {
                    if !pattern.contains('*') {
                        names.extend(credential.policy.client_names(pattern));
                    }
                }
                for row in credential.policy.alias_rows() {
                    names.push(row.alias.clone());
                }
                for name in names {
                    let full = match &credential.prefix {
                        Some(tag) => format!("{tag}/{name}"),
                        None => name,
                    };
                    if !seen.iter().any(|(existing, _)| *existing == full) {
                        seen.push((full, provider));
                    }
                }
            }
        }

        seen.sort_by(|a, b| a.0.cmp(&b.0));
        ModelList::new(
            seen.into_iter()
                .map(|(id, provider)| Model {
                    id,
                    object: ModelObjectType::Model,
                    created,
                    owned_by: provider.as_str().to_string(),
                })
                .collect(),
        )
    }
}

enum BuildError {
    /// Token redemption failed; rotate to another credential.
    Token(String),
    Fatal(GatewayError),
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn header_set(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    let key = name.to_ascii_lowercase();
    if let Some(slot) = headers
        .iter_mut()
        .find(|(existing, _)| existing.to_ascii_lowercase() == key)
    {
        slot.1 = value.to_string();
        return;
    }
    headers.push((name.to_string(), value.to_string()));
}

fn decode_response(dialect: Dialect, body: &Bytes) -> Result<ChatResponse, serde_json::Error> {
    Ok(match dialect {
        Dialect::OpenAi => ChatResponse::OpenAi(serde_json::from_slice(body)?),
        Dialect::Claude => ChatResponse::Claude(serde_json::from_slice(body)?),
        Dialect::Gemini => ChatResponse::Gemini(serde_json::from_slice(body)?),
    })
}

fn select_error(err: SelectError) -> GatewayError {
    match err {
        SelectError::NoMatchingCredential(model) => GatewayError::new(
            ErrorKind::NotFound,
            format!("no configured credential serves model {model:?}"),
        ),
        SelectError::UpstreamsUnavailable => GatewayError::new(
            ErrorKind::UpstreamsUnavailable,
            "all credentials for the provider are unavailable",
        ),
        SelectError::InvalidModelName(model) => GatewayError::invalid_request(format!(
            "model {model:?} must carry a routing prefix"
        )),
    }
}

/// Quota and fatal outcomes bench the credential for the rest of the
/// request immediately; retryable ones get one more chance on the same
/// credential before rotation.
fn note_failure(
    excluded: &mut Vec<CredentialId>,
    strikes: &mut HashMap<CredentialId, u32>,
    id: CredentialId,
    outcome: &Outcome,
) {
    match outcome {
        Outcome::QuotaExceeded { .. } | Outcome::Fatal(_) => {
            if !excluded.contains(&id) {
                excluded.push(id);
            }
        }
        Outcome::Retryable(_) | Outcome::Timeout => {
            let count = strikes.entry(id).or_insert(0);
            *count += 1;
            if *count >= STRIKES_PER_CREDENTIAL && !excluded.contains(&id) {
                excluded.push(id);
            }
        }
        Outcome::Success | Outcome::Canceled => {}
    }
}

/// Truncated exponential backoff with ±20% jitter.
fn backoff(attempt: u32, max_interval_secs: u64) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << (attempt - 1).min(16));
    let capped = exp.min(Duration::from_secs(max_interval_secs.max(1)));
    let jitter = rand::rng().random_range(0.8..1.2f64);
    capped.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        for attempt in 1..=10 {
            let delay = backoff(attempt, 8);
            assert!(delay <= Duration::from_secs(10));
        }
        assert!(backoff(1, 8) >= Duration::from_millis(160));
        assert!(backoff(1, 8) <= Duration::from_millis(240));
    }

    #[test]
    fn strikes_rotate_after_two_retryable_failures() {
        let mut excluded = Vec::new();
        let mut strikes = HashMap::new();
        let retryable = Outcome::Retryable(OutcomeKind::HttpStatus(503));

        note_failure(&mut excluded, &mut strikes, 1, &retryable);
        assert!(excluded.is_empty());
        note_failure(&mut excluded, &mut strikes, 1, &retryable);
        assert_eq!(excluded, vec![1]);
    }

    #[test]
    fn quota_excludes_immediately() {
        let mut excluded = Vec::new();
        let mut strikes = HashMap::new();
        note_failure(
            &mut excluded,
            &mut strikes,
            9,
            &Outcome::QuotaExceeded { retry_after: None },
        );
        assert_eq!(excluded, vec![9]);
    }
}
