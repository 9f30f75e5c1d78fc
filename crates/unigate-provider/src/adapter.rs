use std::collections::HashMap;
use std::sync::Arc;

use unigate_common::Provider;
use unigate_transform::Dialect;

/// Wire-level knowledge about one provider: its native dialect, how its
/// chat endpoint is addressed, and how a secret becomes auth headers.
/// Anything deeper than this is the upstream's business.
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// The dialect this provider speaks natively.
    fn dialect(&self) -> Dialect;

    /// Full URL of the chat endpoint.
    fn chat_url(&self, base_url: &str, model: &str, stream: bool) -> String;

    /// Auth headers carrying `secret` (an API key or a redeemed bearer).
    fn auth_headers(&self, secret: &str) -> Vec<(String, String)>;
}

struct OpenAiAdapter;
struct ClaudeAdapter;
struct GeminiAdapter;
struct QwenAdapter;
struct IFlowAdapter;
struct VertexAdapter;

fn bearer_headers(secret: &str) -> Vec<(String, String)> {
    vec![("authorization".to_string(), format!("Bearer {secret}"))]
}

fn openai_style_url(base_url: &str) -> String {
    format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
}

fn gemini_style_url(base_url: &str, prefix: &str, model: &str, stream: bool) -> String {
    let base = base_url.trim_end_matches('/');
    if stream {
        format!("{base}/{prefix}/models/{model}:streamGenerateContent?alt=sse")
    } else {
        format!("{base}/{prefix}/models/{model}:generateContent")
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn dialect(&self) -> Dialect {
        Dialect::OpenAi
    }

    fn chat_url(&self, base_url: &str, _model: &str, _stream: bool) -> String {
        openai_style_url(base_url)
    }

    fn auth_headers(&self, secret: &str) -> Vec<(String, String)> {
        bearer_headers(secret)
    }
}

impl ProviderAdapter for ClaudeAdapter {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn dialect(&self) -> Dialect {
        Dialect::Claude
    }

    fn chat_url(&self, base_url: &str, _model: &str, _stream: bool) -> String {
        format!("{}/v1/messages", base_url.trim_end_matches('/'))
    }

    fn auth_headers(&self, secret: &str) -> Vec<(String, String)> {
        vec![
            ("x-api-key".to_string(), secret.to_string()),
            ("anthropic-version".to_string(), "2023-06-01".to_string()),
        ]
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn dialect(&self) -> Dialect {
        Dialect::Gemini
    }

    fn chat_url(&self, base_url: &str, model: &str, stream: bool) -> String {
        gemini_style_url(base_url, "v1beta", model, stream)
    }

    fn auth_headers(&self, secret: &str) -> Vec<(String, String)> {
        vec![("x-goog-api-key".to_string(), secret.to_string())]
    }
}

impl ProviderAdapter for QwenAdapter {
    fn provider(&self) -> Provider {
        Provider::Qwen
    }

    fn dialect(&self) -> Dialect {
        Dialect::OpenAi
    }

    fn chat_url(&self, base_url: &str, _model: &str, _stream: bool) -> String {
        openai_style_url(base_url)
    }

    fn auth_headers(&self, secret: &str) -> Vec<(String, String)> {
        bearer_headers(secret)
    }
}

impl ProviderAdapter for IFlowAdapter {
    fn provider(&self) -> Provider {
        Provider::IFlow
    }

    fn dialect(&self) -> Dialect {
        Dialect::OpenAi
    }

    fn chat_url(&self, base_url: &str, _model: &str, _stream: bool) -> String {
        openai_style_url(base_url)
    }

    fn auth_headers(&self, secret: &str) -> Vec<(String, String)> {
        bearer_headers(secret)
    }
}

impl ProviderAdapter for VertexAdapter {
    fn provider(&self) -> Provider {
        Provider::Vertex
    }

    fn dialect(&self) -> Dialect {
        Dialect::Gemini
    }

    fn chat_url(&self, base_url: &str, model: &str, stream: bool) -> String {
        gemini_style_url(base_url, "v1/publishers/google", model, stream)
    }

    fn auth_headers(&self, secret: &str) -> Vec<(String, String)> {
        // Vertex authenticates with OAuth bearers, never API keys.
        bearer_headers(secret)
    }
}

pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with every supported provider wired in.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiAdapter));
        registry.register(Arc::new(ClaudeAdapter));
        registry.register(Arc::new(GeminiAdapter));
        registry.register(Arc::new(QwenAdapter));
        registry.register(Arc::new(IFlowAdapter));
        registry.register(Arc::new(VertexAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_all_providers() {
        let registry = ProviderRegistry::with_builtin();
        for provider in [
            Provider::OpenAi,
            Provider::Claude,
            Provider::Gemini,
            Provider::Qwen,
            Provider::IFlow,
            Provider::Vertex,
        ] {
            assert!(registry.get(provider).is_some(), "missing {provider}");
        }
    }

    #[test]
    fn gemini_stream_url_uses_sse_alt() {
        let adapter = GeminiAdapter;
        let url = adapter.chat_url(
            "https://generativelanguage.googleapis.com",
            "gemini-2.0-flash",
            true,
        );
        assert!(url.ends_with("models/gemini-2.0-flash:streamGenerateContent?alt=sse"));
    }
}
