//! Claude messages → Gemini generateContent.

use serde_json::Map;

use unigate_protocol::claude::messages::request::CreateMessageRequest;
use unigate_protocol::claude::messages::response::MessageResponse;
use unigate_protocol::claude::types as claude;
use unigate_protocol::gemini::generate::request::GenerateContentRequest;
use unigate_protocol::gemini::generate::response::{Candidate, GenerateContentResponse};
use unigate_protocol::gemini::types as gemini;

use super::helpers::stop_reason_to_gemini;

pub fn request(req: CreateMessageRequest) -> (String, GenerateContentRequest) {
    let contents = req
        .messages
        .iter()
        .map(|message| {
            let role = match message.role {
                claude::MessageRole::User => gemini::ROLE_USER,
                claude::MessageRole::Assistant => gemini::ROLE_MODEL,
            };
            gemini::Content::text(role, message.content.flat_text())
        })
        .collect();

    let body = GenerateContentRequest {
        contents,
        system_instruction: req.system.as_ref().map(|system| gemini::Content {
            role: None,
            parts: vec![gemini::Part::Text {
                text: system.flat_text(),
            }],
        }),
        generation_config: Some(gemini::GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            max_output_tokens: Some(req.max_tokens),
            stop_sequences: req.stop_sequences,
            candidate_count: None,
            extra: Map::new(),
        }),
        safety_settings: None,
        tools: None,
        extra: Map::new(),
    };
    (req.model, body)
}

/// Claude SSE → Gemini SSE.
#[derive(Debug)]
pub struct StreamState {
    model: String,
    input_tokens: i64,
}

impl StreamState {
    pub fn new(model: &str, _created: i64) -> Self {
        Self {
            model: model.to_string(),
            input_tokens: 0,
        }
    }

    pub fn on_event(
        &mut self,
        event: &unigate_protocol::sse::SseEvent,
    ) -> Vec<unigate_protocol::sse::SseEvent> {
        use unigate_protocol::claude::messages::stream::{BlockDelta, StreamEvent};

        let Ok(parsed) = serde_json::from_str::<StreamEvent>(&event.data) else {
            return Vec::new();
        };
        match parsed {
            StreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
                Vec::new()
            }
            StreamEvent::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
                ..
            } => {
                let resp = GenerateContentResponse {
                    candidates: vec![Candidate {
                        content: gemini::Content::text(gemini::ROLE_MODEL, text),
                        finish_reason: None,
                        index: Some(0),
                        extra: Map::new(),
                    }],
                    usage_metadata: None,
                    model_version: Some(self.model.clone()),
                    extra: Map::new(),
                };
                vec![super::helpers::json_frame(&resp)]
            }
            StreamEvent::MessageDelta { delta, usage } => {
                let Some(reason) = delta.stop_reason else {
                    return Vec::new();
                };
                let output_tokens = usage.map(|usage| usage.output_tokens).unwrap_or(0);
                let resp = GenerateContentResponse {
                    candidates: vec![Candidate {
                        content: gemini::Content::text(gemini::ROLE_MODEL, ""),
                        finish_reason: Some(stop_reason_to_gemini(reason)),
                        index: Some(0),
                        extra: Map::new(),
                    }],
                    usage_metadata: Some(gemini::UsageMetadata {
                        prompt_token_count: self.input_tokens,
                        candidates_token_count: output_tokens,
                        total_token_count: self.input_tokens + output_tokens,
                        extra: Map::new(),
                    }),
                    model_version: Some(self.model.clone()),
                    extra: Map::new(),
                };
                vec![super::helpers::json_frame(&resp)]
            }
            _ => Vec::new(),
        }
    }

    pub fn finish(&mut self) -> Vec<unigate_protocol::sse::SseEvent> {
        Vec::new()
    }
}

/// Claude response → Gemini response (for Gemini-dialect clients on a
/// Claude-shaped provider).
pub fn response(resp: MessageResponse) -> GenerateContentResponse {
    let text = resp
        .content
        .iter()
        .filter_map(|block| match block {
            claude::ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    GenerateContentResponse {
        candidates: vec![Candidate {
            content: gemini::Content::text(gemini::ROLE_MODEL, text),
            finish_reason: resp.stop_reason.map(stop_reason_to_gemini),
            index: Some(0),
            extra: Map::new(),
        }],
        usage_metadata: Some(gemini::UsageMetadata {
            prompt_token_count: resp.usage.input_tokens,
            candidates_token_count: resp.usage.output_tokens,
            total_token_count: resp.usage.input_tokens + resp.usage.output_tokens,
            extra: Map::new(),
        }),
        model_version: Some(resp.model),
        extra: Map::new(),
    }
}
