//! OpenAI chat completions → Gemini generateContent.

use serde_json::Map;

use unigate_protocol::gemini::generate::request::GenerateContentRequest;
use unigate_protocol::gemini::generate::response::GenerateContentResponse;
use unigate_protocol::gemini::types as gemini;
use unigate_protocol::openai::chat::request::ChatCompletionRequest;
use unigate_protocol::openai::chat::response::ChatCompletionResponse;
use unigate_protocol::openai::chat::types as oai;

use super::helpers::openai_finish_to_gemini;
use crate::TransformError;

pub fn request(req: ChatCompletionRequest) -> (String, GenerateContentRequest) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut contents: Vec<gemini::Content> = Vec::new();

    for message in &req.messages {
        let text = message
            .content
            .as_ref()
            .map(oai::MessageContent::flat_text)
            .unwrap_or_default();
        match message.role {
            oai::ChatRole::System | oai::ChatRole::Developer => system_parts.push(text),
            oai::ChatRole::User | oai::ChatRole::Tool => {
                contents.push(gemini::Content::text(gemini::ROLE_USER, text));
            }
            oai::ChatRole::Assistant => {
                contents.push(gemini::Content::text(gemini::ROLE_MODEL, text));
            }
        }
    }

    let has_config = req.temperature.is_some()
        || req.top_p.is_some()
        || req.completion_budget().is_some()
        || req.stop.is_some()
        || req.n.is_some();
    let generation_config = has_config.then(|| gemini::GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        max_output_tokens: req.completion_budget(),
        stop_sequences: req.stop.clone().map(oai::StopSequences::into_vec),
        candidate_count: req.n,
        extra: Map::new(),
    });

    let body = GenerateContentRequest {
        contents,
        system_instruction: (!system_parts.is_empty()).then(|| gemini::Content {
            role: None,
            parts: vec![gemini::Part::Text {
                text: system_parts.join("\n\n"),
            }],
        }),
        generation_config,
        safety_settings: None,
        tools: None,
        extra: Map::new(),
    };
    (req.model, body)
}

/// OpenAI chunk stream → Gemini SSE. Gemini streams have no terminator
/// event; `[DONE]` simply stops producing frames.
#[derive(Debug)]
pub struct StreamState {
    model: String,
}

impl StreamState {
    pub fn new(model: &str, _created: i64) -> Self {
        Self {
            model: model.to_string(),
        }
    }

    pub fn on_event(
        &mut self,
        event: &unigate_protocol::sse::SseEvent,
    ) -> Vec<unigate_protocol::sse::SseEvent> {
        use unigate_protocol::gemini::generate::response::Candidate;
        use unigate_protocol::openai::chat::stream::ChatCompletionChunk;

        if event.data.trim() == "[DONE]" {
            return Vec::new();
        }
        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
            return Vec::new();
        };
        let Some(choice) = chunk.choices.first() else {
            return Vec::new();
        };

        let text = choice.delta.content.clone().unwrap_or_default();
        if text.is_empty() && choice.finish_reason.is_none() {
            return Vec::new();
        }
        let resp = GenerateContentResponse {
            candidates: vec![Candidate {
                content: gemini::Content::text(gemini::ROLE_MODEL, text),
                finish_reason: choice.finish_reason.map(openai_finish_to_gemini),
                index: Some(0),
                extra: Map::new(),
            }],
            usage_metadata: chunk.usage.as_ref().map(|usage| gemini::UsageMetadata {
                prompt_token_count: usage.prompt_tokens,
                candidates_token_count: usage.completion_tokens,
                total_token_count: usage.total_tokens,
                extra: Map::new(),
            }),
            model_version: Some(self.model.clone()),
            extra: Map::new(),
        };
        vec![super::helpers::json_frame(&resp)]
    }

    pub fn finish(&mut self) -> Vec<unigate_protocol::sse::SseEvent> {
        Vec::new()
    }
}

/// OpenAI response → Gemini response (for Gemini-dialect clients on an
/// OpenAI-shaped provider).
pub fn response(resp: ChatCompletionResponse) -> Result<GenerateContentResponse, TransformError> {
    let usage = resp.usage.as_ref().map(|usage| gemini::UsageMetadata {
        prompt_token_count: usage.prompt_tokens,
        candidates_token_count: usage.completion_tokens,
        total_token_count: usage.total_tokens,
        extra: Map::new(),
    });

    let candidates = resp
        .choices
        .into_iter()
        .map(|choice| unigate_protocol::gemini::generate::response::Candidate {
            content: gemini::Content {
                role: Some(gemini::ROLE_MODEL.to_string()),
                parts: vec![gemini::Part::Text {
                    text: choice
                        .message
                        .content
                        .as_ref()
                        .map(oai::MessageContent::flat_text)
                        .unwrap_or_default(),
                }],
            },
            finish_reason: choice.finish_reason.map(openai_finish_to_gemini),
            index: Some(choice.index),
            extra: Map::new(),
        })
        .collect::<Vec<_>>();

    if candidates.is_empty() {
        return Err(TransformError::EmptyResponse);
    }

    Ok(GenerateContentResponse {
        candidates,
        usage_metadata: usage,
        model_version: Some(resp.model),
        extra: Map::new(),
    })
}
