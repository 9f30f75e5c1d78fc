//! Gemini generateContent → Claude messages.

use serde_json::Map;

use unigate_protocol::claude::messages::request::CreateMessageRequest;
use unigate_protocol::claude::messages::response::{MessageObjectType, MessageResponse};
use unigate_protocol::claude::types as claude;
use unigate_protocol::gemini::generate::request::GenerateContentRequest;
use unigate_protocol::gemini::generate::response::GenerateContentResponse;
use unigate_protocol::gemini::types as gemini;

use super::helpers::{gemini_finish_to_stop_reason, DEFAULT_MAX_TOKENS};
use crate::TransformError;

pub fn request(model: String, body: GenerateContentRequest) -> CreateMessageRequest {
    let messages = body
        .contents
        .iter()
        .map(|content| {
            let role = match content.role.as_deref() {
                Some(gemini::ROLE_MODEL) => claude::MessageRole::Assistant,
                _ => claude::MessageRole::User,
            };
            claude::Message::text(role, content.flat_text())
        })
        .collect();

    let config = body.generation_config.unwrap_or_default();
    CreateMessageRequest {
        model,
        max_tokens: config.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: body
            .system_instruction
            .as_ref()
            .map(|instruction| claude::SystemPrompt::Text(instruction.flat_text())),
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        stop_sequences: config.stop_sequences,
        stream: None,
        metadata: None,
        extra: Map::new(),
    }
}

/// Gemini SSE → Claude SSE. The opening pair fires on the first chunk; the
/// closing triple fires at [`StreamState::finish`] because Gemini streams
/// end without a terminator event.
#[derive(Debug)]
pub struct StreamState {
    id: String,
    model: String,
    started: bool,
    finished: bool,
    stop_reason: Option<claude::StopReason>,
    usage: claude::Usage,
}

impl StreamState {
    pub fn new(model: &str, created: i64) -> Self {
        Self {
            id: format!("msg_{created}"),
            model: model.to_string(),
            started: false,
            finished: false,
            stop_reason: None,
            usage: claude::Usage::default(),
        }
    }

    pub fn on_event(
        &mut self,
        event: &unigate_protocol::sse::SseEvent,
    ) -> Vec<unigate_protocol::sse::SseEvent> {
        use unigate_protocol::claude::messages::stream::{BlockDelta, StreamEvent};

        let Ok(resp) = serde_json::from_str::<GenerateContentResponse>(&event.data) else {
            return Vec::new();
        };
        let Some(candidate) = resp.candidates.first() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            out.push(super::helpers::claude_frame(&StreamEvent::MessageStart {
                message: MessageResponse {
                    id: self.id.clone(),
                    object: MessageObjectType::Message,
                    role: claude::MessageRole::Assistant,
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: claude::Usage::default(),
                    extra: Map::new(),
                },
            }));
            out.push(super::helpers::claude_frame(
                &StreamEvent::ContentBlockStart {
                    index: 0,
                    content_block: claude::ContentBlock::Text {
                        text: String::new(),
                    },
                },
            ));
        }

        let text = candidate.content.flat_text();
        if !text.is_empty() {
            out.push(super::helpers::claude_frame(
                &StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::TextDelta { text },
                },
            ));
        }
        if let Some(reason) = candidate.finish_reason {
            self.stop_reason = Some(gemini_finish_to_stop_reason(reason));
        }
        if let Some(meta) = &resp.usage_metadata {
            self.usage.input_tokens = meta.prompt_token_count;
            self.usage.output_tokens = meta.candidates_token_count;
        }
        out
    }

    pub fn finish(&mut self) -> Vec<unigate_protocol::sse::SseEvent> {
        use unigate_protocol::claude::messages::stream::{MessageDelta, StreamEvent};

        if !self.started || self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![
            super::helpers::claude_frame(&StreamEvent::ContentBlockStop { index: 0 }),
            super::helpers::claude_frame(&StreamEvent::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some(self.stop_reason.unwrap_or(claude::StopReason::EndTurn)),
                    stop_sequence: None,
                },
                usage: Some(self.usage.clone()),
            }),
            super::helpers::claude_frame(&StreamEvent::MessageStop),
        ]
    }
}

/// Gemini response → Claude response (for Claude-dialect clients on a
/// Gemini-shaped provider).
pub fn response(
    resp: GenerateContentResponse,
    model: &str,
    created: i64,
) -> Result<MessageResponse, TransformError> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or(TransformError::EmptyResponse)?;

    let usage = resp
        .usage_metadata
        .map(|meta| claude::Usage {
            input_tokens: meta.prompt_token_count,
            output_tokens: meta.candidates_token_count,
            extra: Map::new(),
        })
        .unwrap_or_default();

    Ok(MessageResponse {
        id: format!("msg_{created}"),
        object: MessageObjectType::Message,
        role: claude::MessageRole::Assistant,
        model: model.to_string(),
        content: vec![claude::ContentBlock::Text {
            text: candidate.content.flat_text(),
        }],
        stop_reason: candidate.finish_reason.map(gemini_finish_to_stop_reason),
        stop_sequence: None,
        usage,
        extra: Map::new(),
    })
}
