use unigate_protocol::sse::SseEvent;

use crate::chat;
use crate::Dialect;

/// Per-request stream translation state machine. Feed decoded upstream SSE
/// events in arrival order; client-dialect frames come back, already framed
/// (named events for Claude, bare `data:` frames otherwise).
///
/// Terminator policy: for an OpenAI-dialect client the pump appends the
/// `[DONE]` frame after [`StreamTranslator::finish`]; the translator never
/// emits it (upstream `[DONE]` markers are absorbed).
pub enum StreamTranslator {
    Passthrough {
        src: Dialect,
    },
    ClaudeToOpenAi(chat::claude2openai::StreamState),
    OpenAiToClaude(chat::openai2claude::StreamState),
    GeminiToOpenAi(chat::gemini2openai::StreamState),
    OpenAiToGemini(chat::openai2gemini::StreamState),
    ClaudeToGemini(chat::claude2gemini::StreamState),
    GeminiToClaude(chat::gemini2claude::StreamState),
}

impl StreamTranslator {
    /// `model` is the client-visible model name; `created` seeds synthetic
    /// ids and timestamps in the destination dialect.
    pub fn new(src: Dialect, dst: Dialect, model: &str, created: i64) -> Self {
        match (src, dst) {
            (src, dst) if src == dst => StreamTranslator::Passthrough { src },
            (Dialect::Claude, Dialect::OpenAi) => {
                StreamTranslator::ClaudeToOpenAi(chat::claude2openai::StreamState::new(
                    model, created,
                ))
            }
            (Dialect::OpenAi, Dialect::Claude) => {
                StreamTranslator::OpenAiToClaude(chat::openai2claude::StreamState::new(
                    model, created,
                ))
            }
            (Dialect::Gemini, Dialect::OpenAi) => {
                StreamTranslator::GeminiToOpenAi(chat::gemini2openai::StreamState::new(
                    model, created,
                ))
            }
            (Dialect::OpenAi, Dialect::Gemini) => {
                StreamTranslator::OpenAiToGemini(chat::openai2gemini::StreamState::new(
                    model, created,
                ))
            }
            (Dialect::Claude, Dialect::Gemini) => {
                StreamTranslator::ClaudeToGemini(chat::claude2gemini::StreamState::new(
                    model, created,
                ))
            }
            (Dialect::Gemini, Dialect::Claude) => {
                StreamTranslator::GeminiToClaude(chat::gemini2claude::StreamState::new(
                    model, created,
                ))
            }
            // Covered by the same-dialect guard above.
            _ => StreamTranslator::Passthrough { src },
        }
    }

    pub fn on_event(&mut self, event: &SseEvent) -> Vec<SseEvent> {
        match self {
            StreamTranslator::Passthrough { src } => {
                if *src == Dialect::OpenAi && event.data.trim() == "[DONE]" {
                    return Vec::new();
                }
                vec![event.clone()]
            }
            StreamTranslator::ClaudeToOpenAi(state) => state.on_event(event),
            StreamTranslator::OpenAiToClaude(state) => state.on_event(event),
            StreamTranslator::GeminiToOpenAi(state) => state.on_event(event),
            StreamTranslator::OpenAiToGemini(state) => state.on_event(event),
            StreamTranslator::ClaudeToGemini(state) => state.on_event(event),
            StreamTranslator::GeminiToClaude(state) => state.on_event(event),
        }
    }

    /// Flush closing frames once the upstream ends.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        match self {
            StreamTranslator::Passthrough { .. } => Vec::new(),
            StreamTranslator::ClaudeToOpenAi(state) => state.finish(),
            StreamTranslator::OpenAiToClaude(state) => state.finish(),
            StreamTranslator::GeminiToOpenAi(state) => state.finish(),
            StreamTranslator::OpenAiToGemini(state) => state.finish(),
            StreamTranslator::ClaudeToGemini(state) => state.finish(),
            StreamTranslator::GeminiToClaude(state) => state.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude_events() -> Vec<SseEvent> {
        vec![
            SseEvent::named(
                "message_start",
                r#"{"type":"message_start","message":{"id":"msg_x","type":"message","role":"assistant","model":"claude-3-7-sonnet","content":[],"usage":{"input_tokens":7,"output_tokens":0}}}"#,
            ),
            SseEvent::named(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
            ),
            SseEvent::named(
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":7,"output_tokens":3}}"#,
            ),
            SseEvent::named("message_stop", r#"{"type":"message_stop"}"#),
        ]
    }

    #[test]
    fn claude_to_openai_orders_chunks() {
        let mut translator =
            StreamTranslator::new(Dialect::Claude, Dialect::OpenAi, "claude-3-7-sonnet", 1);
        let mut frames = Vec::new();
        for event in claude_events() {
            frames.extend(translator.on_event(&event));
        }
        frames.extend(translator.finish());

        // role chunk, text chunk, finish chunk; [DONE] is the pump's job.
        assert_eq!(frames.len(), 3);
        let text: serde_json::Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(text["choices"][0]["delta"]["content"], "hi");
        let fin: serde_json::Value = serde_json::from_str(&frames[2].data).unwrap();
        assert_eq!(fin["choices"][0]["finish_reason"], "stop");
        assert_eq!(fin["usage"]["total_tokens"], 10);
    }

    #[test]
    fn openai_to_claude_emits_envelope() {
        let mut translator =
            StreamTranslator::new(Dialect::OpenAi, Dialect::Claude, "gpt-4", 1);
        let chunks = [
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-4","choices":[{"index":0,"delta":{"role":"assistant","content":"he"},"finish_reason":null}]}"#,
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-4","choices":[{"index":0,"delta":{"content":"y"},"finish_reason":null}]}"#,
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"gpt-4","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ];
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(translator.on_event(&SseEvent::data(chunk)));
        }
        frames.extend(translator.finish());

        let names: Vec<_> = frames.iter().filter_map(|f| f.event.as_deref()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn openai_passthrough_absorbs_done() {
        let mut translator = StreamTranslator::new(Dialect::OpenAi, Dialect::OpenAi, "gpt-4", 1);
        assert_eq!(
            translator.on_event(&SseEvent::data("{\"id\":\"x\"}")).len(),
            1
        );
        assert!(translator.on_event(&SseEvent::data("[DONE]")).is_empty());
    }

    #[test]
    fn claude_to_gemini_emits_delta_then_final_chunk() {
        let mut translator =
            StreamTranslator::new(Dialect::Claude, Dialect::Gemini, "claude-3-7-sonnet", 1);
        let mut frames = Vec::new();
        for event in claude_events() {
            frames.extend(translator.on_event(&event));
        }
        frames.extend(translator.finish());

        // message_start and message_stop produce nothing; the text delta
        // and the stop-carrying message_delta become Gemini chunks.
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame.event.is_none()));

        let delta: serde_json::Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(delta["candidates"][0]["content"]["parts"][0]["text"], "hi");
        assert_eq!(delta["candidates"][0]["content"]["role"], "model");
        assert!(delta["candidates"][0]["finishReason"].is_null());

        let fin: serde_json::Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(fin["candidates"][0]["finishReason"], "STOP");
        assert_eq!(fin["usageMetadata"]["promptTokenCount"], 7);
        assert_eq!(fin["usageMetadata"]["candidatesTokenCount"], 3);
        assert_eq!(fin["usageMetadata"]["totalTokenCount"], 10);
    }

    #[test]
    fn gemini_to_claude_closes_on_finish() {
        let mut translator =
            StreamTranslator::new(Dialect::Gemini, Dialect::Claude, "gemini-2.0-flash", 1);
        let chunk = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"pong"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":1,"totalTokenCount":3}}"#;
        let mut frames = translator.on_event(&SseEvent::data(chunk));
        frames.extend(translator.finish());
        let names: Vec<_> = frames.iter().filter_map(|f| f.event.as_deref()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }
}
