use serde_json::Map;

use unigate_protocol::claude::messages::request::CreateMessageRequest;
use unigate_protocol::claude::types as claude;
use unigate_protocol::gemini::generate::request::GenerateContentRequest;
use unigate_protocol::gemini::types as gemini;
use unigate_protocol::openai::chat::request::ChatCompletionRequest;
use unigate_protocol::openai::chat::types as oai;
use unigate_transform::{translate_request, ChatRequest, Dialect};

const SYSTEM: &str = "be terse";
const QUESTION: &str = "what is a monad?";

fn openai_request() -> ChatRequest {
    ChatRequest::OpenAi(ChatCompletionRequest {
        model: "m".into(),
        messages: vec![
            oai::ChatMessage::text(oai::ChatRole::System, SYSTEM),
            oai::ChatMessage::text(oai::ChatRole::User, QUESTION),
        ],
        max_tokens: Some(64),
        max_completion_tokens: None,
        temperature: Some(0.2),
        top_p: None,
        n: None,
        stop: None,
        stream: None,
        stream_options: None,
        tools: None,
        tool_choice: None,
        user: None,
        extra: Map::new(),
    })
}

fn claude_request() -> ChatRequest {
    ChatRequest::Claude(CreateMessageRequest {
        model: "m".into(),
        max_tokens: 64,
        messages: vec![claude::Message::text(claude::MessageRole::User, QUESTION)],
        system: Some(claude::SystemPrompt::Text(SYSTEM.into())),
        temperature: Some(0.2),
        top_p: None,
        top_k: None,
        stop_sequences: None,
        stream: None,
        metadata: None,
        extra: Map::new(),
    })
}

fn gemini_request() -> ChatRequest {
    ChatRequest::Gemini {
        model: "m".into(),
        body: GenerateContentRequest {
            contents: vec![gemini::Content::text(gemini::ROLE_USER, QUESTION)],
            system_instruction: Some(gemini::Content {
                role: None,
                parts: vec![gemini::Part::Text {
                    text: SYSTEM.into(),
                }],
            }),
            generation_config: Some(gemini::GenerationConfig {
                temperature: Some(0.2),
                top_p: None,
                top_k: None,
                max_output_tokens: Some(64),
                stop_sequences: None,
                candidate_count: None,
                extra: Map::new(),
            }),
            safety_settings: None,
            tools: None,
            extra: Map::new(),
        },
    }
}

/// (system text, user text, budget) as observed in any dialect.
fn essence(req: &ChatRequest) -> (String, String, Option<i64>) {
    match req {
        ChatRequest::OpenAi(req) => {
            let system = req
                .messages
                .iter()
                .filter(|message| {
                    matches!(message.role, oai::ChatRole::System | oai::ChatRole::Developer)
                })
                .filter_map(|message| message.content.as_ref())
                .map(oai::MessageContent::flat_text)
                .collect::<Vec<_>>()
                .join("\n\n");
            let user = req
                .messages
                .iter()
                .filter(|message| matches!(message.role, oai::ChatRole::User))
                .filter_map(|message| message.content.as_ref())
                .map(oai::MessageContent::flat_text)
                .collect::<Vec<_>>()
                .join("");
            (system, user, req.completion_budget())
        }
        ChatRequest::Claude(req) => {
            let system = req
                .system
                .as_ref()
                .map(claude::SystemPrompt::flat_text)
                .unwrap_or_default();
            let user = req
                .messages
                .iter()
                .filter(|message| matches!(message.role, claude::MessageRole::User))
                .map(|message| message.content.flat_text())
                .collect::<Vec<_>>()
                .join("");
            (system, user, Some(req.max_tokens))
        }
        ChatRequest::Gemini { body, .. } => {
            let system = body
                .system_instruction
                .as_ref()
                .map(gemini::Content::flat_text)
                .unwrap_or_default();
            let user = body
                .contents
                .iter()
                .filter(|content| content.role.as_deref() != Some(gemini::ROLE_MODEL))
                .map(gemini::Content::flat_text)
                .collect::<Vec<_>>()
                .join("");
            let budget = body
                .generation_config
                .as_ref()
                .and_then(|config| config.max_output_tokens);
            (system, user, budget)
        }
    }
}

#[test]
fn every_directed_pair_preserves_roles_and_content() {
    let sources = [openai_request(), claude_request(), gemini_request()];
    let targets = [Dialect::OpenAi, Dialect::Claude, Dialect::Gemini];

    for source in &sources {
        let reference = essence(source);
        for target in targets {
            let translated = translate_request(source.clone(), target).unwrap();
            assert_eq!(translated.dialect(), target);
            let observed = essence(&translated);
            assert_eq!(
                observed, reference,
                "{:?} -> {:?} lost structure",
                source.dialect(),
                target
            );
        }
    }
}

#[test]
fn translating_back_restores_the_original_shape() {
    for target in [Dialect::Claude, Dialect::Gemini] {
        let there = translate_request(openai_request(), target).unwrap();
        let back = translate_request(there, Dialect::OpenAi).unwrap();
        assert_eq!(essence(&back), essence(&openai_request()));
    }
}
