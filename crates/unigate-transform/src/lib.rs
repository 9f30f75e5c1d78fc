//! Dialect translation: rewriting a chat request from the client's wire
//! shape into the provider's, and the provider's response (unary or
//! streamed) back into the client's.
//!
//! Every directed pair gets its own module under [`chat`]; the entry points
//! here dispatch on (src, dst) and passthrough when the dialects match.

pub mod chat;
mod stream;

pub use stream::StreamTranslator;

use serde_json::Value as JsonValue;

use unigate_protocol::claude::messages::request::CreateMessageRequest;
use unigate_protocol::claude::messages::response::MessageResponse;
use unigate_protocol::gemini::generate::request::GenerateContentRequest;
use unigate_protocol::gemini::generate::response::GenerateContentResponse;
use unigate_protocol::openai::chat::request::ChatCompletionRequest;
use unigate_protocol::openai::chat::response::ChatCompletionResponse;
use unigate_protocol::sse::SseEvent;

/// A client-visible request/response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    OpenAi,
    Claude,
    Gemini,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "openai",
            Dialect::Claude => "claude",
            Dialect::Gemini => "gemini",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request shape does not match dialect {0:?}")]
    DialectMismatch(Dialect),
    #[error("empty candidate set in upstream response")]
    EmptyResponse,
}

/// A decoded chat request in one of the three dialects. Gemini carries the
/// model beside the body because the wire puts it in the URL.
#[derive(Debug, Clone)]
pub enum ChatRequest {
    OpenAi(ChatCompletionRequest),
    Claude(CreateMessageRequest),
    Gemini {
        model: String,
        body: GenerateContentRequest,
    },
}

impl ChatRequest {
    pub fn dialect(&self) -> Dialect {
        match self {
            ChatRequest::OpenAi(_) => Dialect::OpenAi,
            ChatRequest::Claude(_) => Dialect::Claude,
            ChatRequest::Gemini { .. } => Dialect::Gemini,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ChatRequest::OpenAi(req) => &req.model,
            ChatRequest::Claude(req) => &req.model,
            ChatRequest::Gemini { model, .. } => model,
        }
    }

    pub fn set_model(&mut self, name: impl Into<String>) {
        let name = name.into();
        match self {
            ChatRequest::OpenAi(req) => req.model = name,
            ChatRequest::Claude(req) => req.model = name,
            ChatRequest::Gemini { model, .. } => *model = name,
        }
    }

    pub fn wants_stream(&self) -> bool {
        match self {
            ChatRequest::OpenAi(req) => req.wants_stream(),
            ChatRequest::Claude(req) => req.wants_stream(),
            // Gemini signals streaming through the `:streamGenerateContent`
            // URL verb; the router sets it on the call, not the body.
            ChatRequest::Gemini { .. } => false,
        }
    }
}

/// A decoded chat response in one of the three dialects.
#[derive(Debug, Clone)]
pub enum ChatResponse {
    OpenAi(ChatCompletionResponse),
    Claude(MessageResponse),
    Gemini(GenerateContentResponse),
}

impl ChatResponse {
    pub fn dialect(&self) -> Dialect {
        match self {
            ChatResponse::OpenAi(_) => Dialect::OpenAi,
            ChatResponse::Claude(_) => Dialect::Claude,
            ChatResponse::Gemini(_) => Dialect::Gemini,
        }
    }

    pub fn to_json(&self) -> Result<JsonValue, TransformError> {
        let value = match self {
            ChatResponse::OpenAi(resp) => serde_json::to_value(resp)?,
            ChatResponse::Claude(resp) => serde_json::to_value(resp)?,
            ChatResponse::Gemini(resp) => serde_json::to_value(resp)?,
        };
        Ok(value)
    }
}

/// Rewrites `req` into the `dst` dialect. Same-dialect calls return the
/// input unchanged.
pub fn translate_request(req: ChatRequest, dst: Dialect) -> Result<ChatRequest, TransformError> {
    if req.dialect() == dst {
        return Ok(req);
    }
    let out = match (req, dst) {
        (ChatRequest::OpenAi(req), Dialect::Claude) => {
            ChatRequest::Claude(chat::openai2claude::request(req))
        }
        (ChatRequest::OpenAi(req), Dialect::Gemini) => {
            let (model, body) = chat::openai2gemini::request(req);
            ChatRequest::Gemini { model, body }
        }
        (ChatRequest::Claude(req), Dialect::OpenAi) => {
            ChatRequest::OpenAi(chat::claude2openai::request(req))
        }
        (ChatRequest::Claude(req), Dialect::Gemini) => {
            let (model, body) = chat::claude2gemini::request(req);
            ChatRequest::Gemini { model, body }
        }
        (ChatRequest::Gemini { model, body }, Dialect::OpenAi) => {
            ChatRequest::OpenAi(chat::gemini2openai::request(model, body))
        }
        (ChatRequest::Gemini { model, body }, Dialect::Claude) => {
            ChatRequest::Claude(chat::gemini2claude::request(model, body))
        }
        // Same-dialect pairs are handled above.
        (req, _) => req,
    };
    Ok(out)
}

/// Rewrites a provider response into the `dst` dialect. `model` is the
/// client-visible model name to surface (post alias/prefix handling).
pub fn translate_response(
    resp: ChatResponse,
    dst: Dialect,
    model: &str,
    created: i64,
) -> Result<ChatResponse, TransformError> {
    if resp.dialect() == dst {
        return Ok(resp);
    }
    let out = match (resp, dst) {
        (ChatResponse::Claude(resp), Dialect::OpenAi) => {
            ChatResponse::OpenAi(chat::claude2openai::response(resp, created))
        }
        (ChatResponse::Gemini(resp), Dialect::OpenAi) => {
            ChatResponse::OpenAi(chat::gemini2openai::response(resp, model, created)?)
        }
        (ChatResponse::OpenAi(resp), Dialect::Claude) => {
            ChatResponse::Claude(chat::openai2claude::response(resp)?)
        }
        (ChatResponse::Gemini(resp), Dialect::Claude) => {
            ChatResponse::Claude(chat::gemini2claude::response(resp, model, created)?)
        }
        (ChatResponse::OpenAi(resp), Dialect::Gemini) => {
            ChatResponse::Gemini(chat::openai2gemini::response(resp)?)
        }
        (ChatResponse::Claude(resp), Dialect::Gemini) => {
            ChatResponse::Gemini(chat::claude2gemini::response(resp))
        }
        (resp, _) => resp,
    };
    Ok(out)
}

/// Dialect-specific terminal error event for streams that fail after the
/// first byte.
pub fn error_event(dst: Dialect, kind: &str, message: &str) -> SseEvent {
    match dst {
        Dialect::OpenAi => {
            let body = unigate_protocol::openai::error::ErrorResponse::new(kind, message);
            SseEvent::data(serde_json::to_string(&body).unwrap_or_default())
        }
        Dialect::Claude => {
            let event = unigate_protocol::claude::messages::stream::StreamEvent::Error {
                error: unigate_protocol::claude::error::ErrorDetail {
                    kind: kind.to_string(),
                    message: message.to_string(),
                },
            };
            SseEvent::named(
                event.event_name(),
                serde_json::to_string(&event).unwrap_or_default(),
            )
        }
        Dialect::Gemini => {
            let body = unigate_protocol::gemini::error::ErrorResponse::new(
                502,
                "UNAVAILABLE",
                message,
            );
            SseEvent::data(serde_json::to_string(&body).unwrap_or_default())
        }
    }
}
