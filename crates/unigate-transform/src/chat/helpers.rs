use unigate_protocol::claude::types::StopReason;
use unigate_protocol::gemini::types::FinishReason as GeminiFinishReason;
use unigate_protocol::openai::chat::types::FinishReason as OpenAiFinishReason;

pub fn stop_reason_to_openai(reason: StopReason) -> OpenAiFinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence | StopReason::Refusal => {
            OpenAiFinishReason::Stop
        }
        StopReason::MaxTokens => OpenAiFinishReason::Length,
        StopReason::ToolUse => OpenAiFinishReason::ToolCalls,
    }
}

pub fn openai_finish_to_stop_reason(reason: OpenAiFinishReason) -> StopReason {
    match reason {
        OpenAiFinishReason::Stop | OpenAiFinishReason::ContentFilter => StopReason::EndTurn,
        OpenAiFinishReason::Length => StopReason::MaxTokens,
        OpenAiFinishReason::ToolCalls | OpenAiFinishReason::FunctionCall => StopReason::ToolUse,
    }
}

pub fn gemini_finish_to_openai(reason: GeminiFinishReason) -> OpenAiFinishReason {
    match reason {
        GeminiFinishReason::Stop | GeminiFinishReason::Other => OpenAiFinishReason::Stop,
        GeminiFinishReason::MaxTokens => OpenAiFinishReason::Length,
        GeminiFinishReason::Safety | GeminiFinishReason::Recitation => {
            OpenAiFinishReason::ContentFilter
        }
    }
}

pub fn openai_finish_to_gemini(reason: OpenAiFinishReason) -> GeminiFinishReason {
    match reason {
        OpenAiFinishReason::Stop
        | OpenAiFinishReason::ToolCalls
        | OpenAiFinishReason::FunctionCall => GeminiFinishReason::Stop,
        OpenAiFinishReason::Length => GeminiFinishReason::MaxTokens,
        OpenAiFinishReason::ContentFilter => GeminiFinishReason::Safety,
    }
}

pub fn stop_reason_to_gemini(reason: StopReason) -> GeminiFinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence | StopReason::ToolUse => {
            GeminiFinishReason::Stop
        }
        StopReason::MaxTokens => GeminiFinishReason::MaxTokens,
        StopReason::Refusal => GeminiFinishReason::Safety,
    }
}

pub fn gemini_finish_to_stop_reason(reason: GeminiFinishReason) -> StopReason {
    match reason {
        GeminiFinishReason::Stop | GeminiFinishReason::Other => StopReason::EndTurn,
        GeminiFinishReason::MaxTokens => StopReason::MaxTokens,
        GeminiFinishReason::Safety | GeminiFinishReason::Recitation => StopReason::Refusal,
    }
}

/// Claude requires `max_tokens`; this is the stand-in when the source
/// dialect did not carry a budget.
pub const DEFAULT_MAX_TOKENS: i64 = 4096;

use serde::Serialize;
use unigate_protocol::claude::messages::stream::StreamEvent as ClaudeStreamEvent;
use unigate_protocol::sse::SseEvent;

/// Frames a value as a bare `data:` SSE event (OpenAI / Gemini dialects).
pub fn json_frame<T: Serialize>(value: &T) -> SseEvent {
    SseEvent::data(serde_json::to_string(value).unwrap_or_default())
}

/// Frames a Claude stream event with its named `event:` line.
pub fn claude_frame(event: &ClaudeStreamEvent) -> SseEvent {
    SseEvent::named(
        event.event_name(),
        serde_json::to_string(event).unwrap_or_default(),
    )
}
