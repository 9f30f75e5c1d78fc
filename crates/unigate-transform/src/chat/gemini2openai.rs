//! Gemini generateContent → OpenAI chat completions.

use serde_json::Map;

use unigate_protocol::gemini::generate::request::GenerateContentRequest;
use unigate_protocol::gemini::generate::response::GenerateContentResponse;
use unigate_protocol::gemini::types as gemini;
use unigate_protocol::openai::chat::request::ChatCompletionRequest;
use unigate_protocol::openai::chat::response::{
    ChatChoice, ChatCompletionObjectType, ChatCompletionResponse, ResponseMessage,
};
use unigate_protocol::openai::chat::types as oai;

use super::helpers::gemini_finish_to_openai;
use crate::TransformError;

pub fn request(model: String, body: GenerateContentRequest) -> ChatCompletionRequest {
    let mut messages: Vec<oai::ChatMessage> = Vec::new();

    if let Some(instruction) = &body.system_instruction {
        messages.push(oai::ChatMessage::text(
            oai::ChatRole::System,
            instruction.flat_text(),
        ));
    }
    for content in &body.contents {
        let role = match content.role.as_deref() {
            Some(gemini::ROLE_MODEL) => oai::ChatRole::Assistant,
            _ => oai::ChatRole::User,
        };
        messages.push(oai::ChatMessage::text(role, content.flat_text()));
    }

    let config = body.generation_config.unwrap_or_default();
    ChatCompletionRequest {
        model,
        messages,
        max_tokens: None,
        max_completion_tokens: config.max_output_tokens,
        temperature: config.temperature,
        top_p: config.top_p,
        n: config.candidate_count,
        stop: config.stop_sequences.map(oai::StopSequences::Many),
        stream: None,
        stream_options: None,
        tools: None,
        tool_choice: None,
        user: None,
        extra: Map::new(),
    }
}

/// Gemini response → OpenAI response (for OpenAI-dialect clients on a
/// Gemini-shaped provider).
pub fn response(
    resp: GenerateContentResponse,
    model: &str,
    created: i64,
) -> Result<ChatCompletionResponse, TransformError> {
    let usage = resp.usage_metadata.as_ref().map(|meta| oai::Usage {
        prompt_tokens: meta.prompt_token_count,
        completion_tokens: meta.candidates_token_count,
        total_tokens: meta.total_token_count,
        extra: Map::new(),
    });

    let choices = resp
        .candidates
        .into_iter()
        .enumerate()
        .map(|(position, candidate)| ChatChoice {
            index: candidate.index.unwrap_or(position as i64),
            message: ResponseMessage {
                role: oai::ChatRole::Assistant,
                content: Some(oai::MessageContent::Text(candidate.content.flat_text())),
                tool_calls: None,
            },
            finish_reason: candidate.finish_reason.map(gemini_finish_to_openai),
        })
        .collect::<Vec<_>>();

    if choices.is_empty() {
        return Err(TransformError::EmptyResponse);
    }

    Ok(ChatCompletionResponse {
        id: format!("chatcmpl-{created}"),
        object: ChatCompletionObjectType::ChatCompletion,
        created,
        model: model.to_string(),
        choices,
        usage,
        extra: Map::new(),
    })
}

/// Gemini SSE → OpenAI chunk stream. Each upstream chunk is a full
/// `GenerateContentResponse` carrying partial candidate text.
#[derive(Debug)]
pub struct StreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
}

impl StreamState {
    pub fn new(model: &str, created: i64) -> Self {
        Self {
            id: format!("chatcmpl-{created}"),
            model: model.to_string(),
            created,
            role_sent: false,
        }
    }

    pub fn on_event(
        &mut self,
        event: &unigate_protocol::sse::SseEvent,
    ) -> Vec<unigate_protocol::sse::SseEvent> {
        use unigate_protocol::openai::chat::stream::ChatCompletionChunk;

        let Ok(resp) = serde_json::from_str::<GenerateContentResponse>(&event.data) else {
            return Vec::new();
        };
        let Some(candidate) = resp.candidates.first() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if !self.role_sent {
            self.role_sent = true;
            let mut chunk =
                ChatCompletionChunk::text_delta(&self.id, &self.model, self.created, "");
            chunk.choices[0].delta.role = Some(oai::ChatRole::Assistant);
            chunk.choices[0].delta.content = None;
            out.push(super::helpers::json_frame(&chunk));
        }

        let text = candidate.content.flat_text();
        if !text.is_empty() {
            out.push(super::helpers::json_frame(&ChatCompletionChunk::text_delta(
                &self.id,
                &self.model,
                self.created,
                text,
            )));
        }
        if let Some(reason) = candidate.finish_reason {
            let mut chunk = ChatCompletionChunk::finish(
                &self.id,
                &self.model,
                self.created,
                gemini_finish_to_openai(reason),
            );
            chunk.usage = resp.usage_metadata.as_ref().map(|meta| oai::Usage {
                prompt_tokens: meta.prompt_token_count,
                completion_tokens: meta.candidates_token_count,
                total_tokens: meta.total_token_count,
                extra: Map::new(),
            });
            out.push(super::helpers::json_frame(&chunk));
        }
        out
    }

    pub fn finish(&mut self) -> Vec<unigate_protocol::sse::SseEvent> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unigate_protocol::gemini::generate::response::Candidate;

    #[test]
    fn candidate_text_becomes_choice_content() {
        let resp = GenerateContentResponse {
            candidates: vec![Candidate {
                content: gemini::Content::text(gemini::ROLE_MODEL, "pong"),
                finish_reason: Some(gemini::FinishReason::Stop),
                index: None,
                extra: Map::new(),
            }],
            usage_metadata: None,
            model_version: None,
            extra: Map::new(),
        };
        let out = response(resp, "gemini-2.0-flash", 1_700_000_000).unwrap();
        assert_eq!(
            out.choices[0].message.content,
            Some(oai::MessageContent::Text("pong".into()))
        );
        assert_eq!(
            out.choices[0].finish_reason,
            Some(oai::FinishReason::Stop)
        );
    }
}
