//! OpenAI chat completions → Claude messages.

use serde_json::Map;

use unigate_protocol::claude::messages::request::CreateMessageRequest;
use unigate_protocol::claude::messages::response::MessageResponse;
use unigate_protocol::claude::types as claude;
use unigate_protocol::openai::chat::request::ChatCompletionRequest;
use unigate_protocol::openai::chat::response::ChatCompletionResponse;
use unigate_protocol::openai::chat::types as oai;

use super::helpers::{openai_finish_to_stop_reason, DEFAULT_MAX_TOKENS};
use crate::TransformError;

pub fn request(req: ChatCompletionRequest) -> CreateMessageRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<claude::Message> = Vec::new();

    for message in req.messages {
        match message.role {
            oai::ChatRole::System | oai::ChatRole::Developer => {
                if let Some(content) = &message.content {
                    system_parts.push(content.flat_text());
                }
            }
            oai::ChatRole::User => {
                let text = message
                    .content
                    .as_ref()
                    .map(oai::MessageContent::flat_text)
                    .unwrap_or_default();
                messages.push(claude::Message::text(claude::MessageRole::User, text));
            }
            oai::ChatRole::Assistant => {
                let mut blocks: Vec<claude::ContentBlock> = Vec::new();
                if let Some(content) = &message.content {
                    let text = content.flat_text();
                    if !text.is_empty() {
                        blocks.push(claude::ContentBlock::Text { text });
                    }
                }
                if let Some(tool_calls) = message.tool_calls {
                    for call in tool_calls {
                        let input = serde_json::from_str(&call.function.arguments)
                            .unwrap_or(serde_json::Value::Null);
                        blocks.push(claude::ContentBlock::ToolUse {
                            id: call.id,
                            name: call.function.name,
                            input,
                        });
                    }
                }
                messages.push(claude::Message {
                    role: claude::MessageRole::Assistant,
                    content: claude::MessageContent::Blocks(blocks),
                });
            }
            oai::ChatRole::Tool => {
                let block = claude::ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.unwrap_or_default(),
                    content: message
                        .content
                        .as_ref()
                        .map(|content| serde_json::Value::String(content.flat_text())),
                };
                messages.push(claude::Message {
                    role: claude::MessageRole::User,
                    content: claude::MessageContent::Blocks(vec![block]),
                });
            }
        }
    }

    CreateMessageRequest {
        model: req.model,
        max_tokens: req
            .max_completion_tokens
            .or(req.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(claude::SystemPrompt::Text(system_parts.join("\n\n")))
        },
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences: req.stop.map(oai::StopSequences::into_vec),
        stream: req.stream,
        metadata: None,
        extra: Map::new(),
    }
}

/// OpenAI response → Claude response (for Claude-dialect clients on an
/// OpenAI-shaped provider).
pub fn response(resp: ChatCompletionResponse) -> Result<MessageResponse, TransformError> {
    let choice = resp.choices.into_iter().next().ok_or(TransformError::EmptyResponse)?;

    let mut content: Vec<claude::ContentBlock> = Vec::new();
    if let Some(text) = choice.message.content.as_ref().map(oai::MessageContent::flat_text)
        && !text.is_empty()
    {
        content.push(claude::ContentBlock::Text { text });
    }
    if let Some(tool_calls) = choice.message.tool_calls {
        for call in tool_calls {
            let input =
                serde_json::from_str(&call.function.arguments).unwrap_or(serde_json::Value::Null);
            content.push(claude::ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }
    }

    let usage = resp
        .usage
        .map(|usage| claude::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            extra: Map::new(),
        })
        .unwrap_or_default();

    Ok(MessageResponse {
        id: resp.id,
        object: unigate_protocol::claude::messages::response::MessageObjectType::Message,
        role: claude::MessageRole::Assistant,
        model: resp.model,
        content,
        stop_reason: choice.finish_reason.map(openai_finish_to_stop_reason),
        stop_sequence: None,
        usage,
        extra: Map::new(),
    })
}

/// OpenAI chunk stream → Claude SSE.
///
/// The opening (`message_start`, `content_block_start`) fires on the first
/// upstream chunk; the closing triple fires on `[DONE]` or at
/// [`StreamState::finish`], whichever comes first.
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
        use unigate_protocol::openai::chat::stream::ChatCompletionChunk;

        if event.data.trim() == "[DONE]" {
            return self.closing();
        }
        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            if !chunk.id.is_empty() {
                self.id = chunk.id.clone();
            }
            self.model = chunk.model.clone();
            out.push(super::helpers::claude_frame(&StreamEvent::MessageStart {
                message: MessageResponse {
                    id: self.id.clone(),
                    object: unigate_protocol::claude::messages::response::MessageObjectType::Message,
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

        if let Some(usage) = &chunk.usage {
            self.usage.input_tokens = usage.prompt_tokens;
            self.usage.output_tokens = usage.completion_tokens;
        }
        for choice in &chunk.choices {
            if let Some(text) = &choice.delta.content
                && !text.is_empty()
            {
                out.push(super::helpers::claude_frame(
                    &StreamEvent::ContentBlockDelta {
                        index: 0,
                        delta: BlockDelta::TextDelta { text: text.clone() },
                    },
                ));
            }
            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(openai_finish_to_stop_reason(reason));
            }
        }
        out
    }

    pub fn finish(&mut self) -> Vec<unigate_protocol::sse::SseEvent> {
        self.closing()
    }

    fn closing(&mut self) -> Vec<unigate_protocol::sse::SseEvent> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use unigate_protocol::openai::chat::types::{ChatMessage, ChatRole};

    #[test]
    fn system_messages_fold_into_system_prompt() {
        let req = ChatCompletionRequest {
            model: "gpt-4".into(),
            messages: vec![
                ChatMessage::text(ChatRole::System, "be brief"),
                ChatMessage::text(ChatRole::User, "hi"),
            ],
            max_tokens: Some(128),
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            n: None,
            stop: None,
            stream: None,
            stream_options: None,
            tools: None,
            tool_choice: None,
            user: None,
            extra: Map::new(),
        };
        let out = request(req);
        assert_eq!(out.max_tokens, 128);
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(
            out.system,
            Some(claude::SystemPrompt::Text(ref text)) if text == "be brief"
        ));
    }
}
