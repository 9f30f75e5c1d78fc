use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use unigate_common::GatewayError;
use unigate_core::dispatch::{ChatCall, ChatReply};
use unigate_core::upstream::ByteStream;
use unigate_transform::ChatRequest;

use crate::context::RequestContext;
use crate::middleware::error_response;
use crate::AppContext;

pub(crate) async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub(crate) async fn metrics(State(ctx): State<AppContext>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        ctx.metrics.render(),
    )
}

pub(crate) async fn list_models(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.dispatcher.list_models().await)
}

pub(crate) async fn openai_chat(
    State(ctx): State<AppContext>,
    Extension(request_ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let request: unigate_protocol::openai::chat::request::ChatCompletionRequest =
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(err) => {
                return error_response(
                    &GatewayError::invalid_request(format!("malformed request body: {err}")),
                    Some(request_ctx.request_id.as_str()),
                );
            }
        };
    let stream = request.wants_stream();
    dispatch_chat(
        &ctx,
        ChatCall {
            request: ChatRequest::OpenAi(request),
            stream,
            request_id: request_ctx.request_id.clone(),
            path: request_ctx.path.clone(),
            provider: None,
        },
        &request_ctx,
    )
    .await
}

pub(crate) async fn claude_messages(
    State(ctx): State<AppContext>,
    Extension(request_ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let request: unigate_protocol::claude::messages::request::CreateMessageRequest =
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(err) => {
                return error_response(
                    &GatewayError::invalid_request(format!("malformed request body: {err}")),
                    Some(request_ctx.request_id.as_str()),
                );
            }
        };
    let stream = request.wants_stream();
    dispatch_chat(
        &ctx,
        ChatCall {
            request: ChatRequest::Claude(request),
            stream,
            request_id: request_ctx.request_id.clone(),
            path: request_ctx.path.clone(),
            provider: None,
        },
        &request_ctx,
    )
    .await
}

/// `POST /v1beta/models/{model}:generateContent` and
/// `:streamGenerateContent`; the verb decides streaming.
pub(crate) async fn gemini_generate(
    State(ctx): State<AppContext>,
    Extension(request_ctx): Extension<RequestContext>,
    Path(model_verb): Path<String>,
    body: Bytes,
) -> Response {
    let Some((model, verb)) = model_verb.split_once(':') else {
        return error_response(
            &GatewayError::invalid_request("expected models/{model}:generateContent"),
            Some(request_ctx.request_id.as_str()),
        );
    };
    let stream = match verb {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return error_response(
                &GatewayError::new(
                    unigate_common::ErrorKind::NotFound,
                    format!("unknown generation verb {verb:?}"),
                ),
                Some(request_ctx.request_id.as_str()),
            );
        }
    };

    let request: unigate_protocol::gemini::generate::request::GenerateContentRequest =
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(err) => {
                return error_response(
                    &GatewayError::invalid_request(format!("malformed request body: {err}")),
                    Some(request_ctx.request_id.as_str()),
                );
            }
        };

    dispatch_chat(
        &ctx,
        ChatCall {
            request: ChatRequest::Gemini {
                model: model.to_string(),
                body: request,
            },
            stream,
            request_id: request_ctx.request_id.clone(),
            path: request_ctx.path.clone(),
            provider: None,
        },
        &request_ctx,
    )
    .await
}

async fn dispatch_chat(ctx: &AppContext, call: ChatCall, request_ctx: &RequestContext) -> Response {
    match ctx.dispatcher.handle_chat(call).await {
        Ok(ChatReply::Unary { body }) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Ok(ChatReply::Stream { frames }) => sse_response(frames),
        Err(err) => error_response(&err, Some(request_ctx.request_id.as_str())),
    }
}

/// Streams SSE frames. Headers flush as soon as axum writes the response
/// head, before the first upstream chunk arrives.
fn sse_response(frames: ByteStream) -> Response {
    let stream = ReceiverStream::new(frames).map(Ok::<Bytes, std::convert::Infallible>);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
