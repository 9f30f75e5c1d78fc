//! Claude messages → OpenAI chat completions.

use serde_json::Map;

use unigate_protocol::claude::messages::request::CreateMessageRequest;
use unigate_protocol::claude::messages::response::MessageResponse;
use unigate_protocol::claude::types as claude;
use unigate_protocol::openai::chat::request::ChatCompletionRequest;
use unigate_protocol::openai::chat::response::{
    ChatChoice, ChatCompletionObjectType, ChatCompletionResponse, ResponseMessage,
};
use unigate_protocol::openai::chat::types as oai;

use super::helpers::stop_reason_to_openai;

pub fn request(req: CreateMessageRequest) -> ChatCompletionRequest {
    let mut messages: Vec<oai::ChatMessage> = Vec::new();

    if let Some(system) = &req.system {
        messages.push(oai::ChatMessage::text(
            oai::ChatRole::System,
            system.flat_text(),
        ));
    }

    for message in req.messages {
        let role = match message.role {
            claude::MessageRole::User => oai::ChatRole::User,
            claude::MessageRole::Assistant => oai::ChatRole::Assistant,
        };
        match message.content {
            claude::MessageContent::Text(text) => {
                messages.push(oai::ChatMessage::text(role, text));
            }
            claude::MessageContent::Blocks(blocks) => {
                let mut text_parts: Vec<String> = Vec::new();
                let mut tool_calls: Vec<oai::ToolCall> = Vec::new();
                for block in blocks {
                    match block {
                        claude::ContentBlock::Text { text } => text_parts.push(text),
                        claude::ContentBlock::ToolUse { id, name, input } => {
                            tool_calls.push(oai::ToolCall {
                                id,
                                kind: "function".to_string(),
                                function: oai::FunctionCall {
                                    name,
                                    arguments: input.to_string(),
                                },
                            });
                        }
                        claude::ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                        } => {
                            messages.push(oai::ChatMessage {
                                role: oai::ChatRole::Tool,
                                content: content.map(|value| {
                                    oai::MessageContent::Text(match value {
                                        serde_json::Value::String(text) => text,
                                        other => other.to_string(),
                                    })
                                }),
                                name: None,
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id),
                            });
                        }
                        claude::ContentBlock::Other(_) => {}
                    }
                }
                if !text_parts.is_empty() || !tool_calls.is_empty() {
                    messages.push(oai::ChatMessage {
                        role,
                        content: if text_parts.is_empty() {
                            None
                        } else {
                            Some(oai::MessageContent::Text(text_parts.join("")))
                        },
                        name: None,
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                        tool_call_id: None,
                    });
                }
            }
        }
    }

    ChatCompletionRequest {
        model: req.model,
        messages,
        max_tokens: Some(req.max_tokens),
        max_completion_tokens: None,
        temperature: req.temperature,
        top_p: req.top_p,
        n: None,
        stop: req.stop_sequences.map(oai::StopSequences::Many),
        stream: req.stream,
        stream_options: None,
        tools: None,
        tool_choice: None,
        user: None,
        extra: Map::new(),
    }
}

/// Claude response → OpenAI response (for OpenAI-dialect clients on a
/// Claude-shaped provider).
pub fn response(resp: MessageResponse, created: i64) -> ChatCompletionResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<oai::ToolCall> = Vec::new();
    for block in resp.content {
        match block {
            claude::ContentBlock::Text { text } => text_parts.push(text),
            claude::ContentBlock::ToolUse { id, name, input } => tool_calls.push(oai::ToolCall {
                id,
                kind: "function".to_string(),
                function: oai::FunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            _ => {}
        }
    }

    let usage = oai::Usage {
        prompt_tokens: resp.usage.input_tokens,
        completion_tokens: resp.usage.output_tokens,
        total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        extra: Map::new(),
    };

    ChatCompletionResponse {
        id: resp.id,
        object: ChatCompletionObjectType::ChatCompletion,
        created,
        model: resp.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: oai::ChatRole::Assistant,
                content: if text_parts.is_empty() {
                    None
                } else {
                    Some(oai::MessageContent::Text(text_parts.join("")))
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: resp.stop_reason.map(stop_reason_to_openai),
        }],
        usage: Some(usage),
        extra: Map::new(),
    }
}

/// Claude SSE → OpenAI chunk stream.
///
/// The upstream `message_stop` produces no frame of its own; the pump
/// appends the OpenAI `[DONE]` terminator after [`StreamState::finish`].
#[derive(Debug)]
pub struct StreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    usage: Option<oai::Usage>,
}

impl StreamState {
    pub fn new(model: &str, created: i64) -> Self {
        Self {
            id: format!("chatcmpl-{created}"),
            model: model.to_string(),
            created,
            role_sent: false,
            usage: None,
        }
    }

    pub fn on_event(
        &mut self,
        event: &unigate_protocol::sse::SseEvent,
    ) -> Vec<unigate_protocol::sse::SseEvent> {
        use unigate_protocol::claude::messages::stream::{BlockDelta, StreamEvent};
        use unigate_protocol::openai::chat::stream::ChatCompletionChunk;

        // Unknown event shapes pass silently; they carry nothing the OpenAI
        // dialect can express.
        let Ok(parsed) = serde_json::from_str::<StreamEvent>(&event.data) else {
            return Vec::new();
        };
        match parsed {
            StreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                self.usage = Some(oai::Usage {
                    prompt_tokens: message.usage.input_tokens,
                    completion_tokens: 0,
                    total_tokens: message.usage.input_tokens,
                    extra: Map::new(),
                });
                self.role_sent = true;
                let mut chunk =
                    ChatCompletionChunk::text_delta(&self.id, &self.model, self.created, "");
                chunk.choices[0].delta.role = Some(oai::ChatRole::Assistant);
                chunk.choices[0].delta.content = None;
                vec![super::helpers::json_frame(&chunk)]
            }
            StreamEvent::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
                ..
            } => {
                let chunk =
                    ChatCompletionChunk::text_delta(&self.id, &self.model, self.created, text);
                vec![super::helpers::json_frame(&chunk)]
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let (Some(acc), Some(delta_usage)) = (self.usage.as_mut(), usage) {
                    acc.completion_tokens = delta_usage.output_tokens;
                    acc.total_tokens = acc.prompt_tokens + delta_usage.output_tokens;
                }
                let Some(reason) = delta.stop_reason else {
                    return Vec::new();
                };
                let mut chunk = ChatCompletionChunk::finish(
                    &self.id,
                    &self.model,
                    self.created,
                    stop_reason_to_openai(reason),
                );
                chunk.usage = self.usage.clone();
                vec![super::helpers::json_frame(&chunk)]
            }
            // Block bookkeeping, pings, and message_stop have no OpenAI
            // counterpart.
            _ => Vec::new(),
        }
    }

    pub fn finish(&mut self) -> Vec<unigate_protocol::sse::SseEvent> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unigate_protocol::claude::messages::response::MessageObjectType;

    #[test]
    fn round_trip_preserves_role_and_text() {
        let resp = MessageResponse {
            id: "msg_1".into(),
            object: MessageObjectType::Message,
            role: claude::MessageRole::Assistant,
            model: "claude-3-7-sonnet".into(),
            content: vec![claude::ContentBlock::Text {
                text: "hello".into(),
            }],
            stop_reason: Some(claude::StopReason::EndTurn),
            stop_sequence: None,
            usage: claude::Usage {
                input_tokens: 4,
                output_tokens: 2,
                extra: Map::new(),
            },
            extra: Map::new(),
        };
        let out = response(resp, 1_700_000_000);
        let choice = &out.choices[0];
        assert!(matches!(choice.message.role, oai::ChatRole::Assistant));
        assert_eq!(
            choice.message.content,
            Some(oai::MessageContent::Text("hello".into()))
        );
        assert_eq!(out.usage.as_ref().unwrap().total_tokens, 6);
    }
}
