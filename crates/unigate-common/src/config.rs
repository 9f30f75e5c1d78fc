use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Claude,
    Gemini,
    Qwen,
    IFlow,
    Vertex,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
            Provider::Qwen => "qwen",
            Provider::IFlow => "iflow",
            Provider::Vertex => "vertex",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Some(Provider::OpenAi),
            "claude" | "anthropic" => Some(Provider::Claude),
            "gemini" | "google" => Some(Provider::Gemini),
            "qwen" => Some(Provider::Qwen),
            "iflow" => Some(Provider::IFlow),
            "vertex" => Some(Provider::Vertex),
            _ => None,
        }
    }

    /// Default API base used when a credential does not pin one.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com",
            Provider::Claude => "https://api.anthropic.com",
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::Qwen => "https://dashscope.aliyuncs.com/compatible-mode",
            Provider::IFlow => "https://apis.iflow.cn",
            Provider::Vertex => "https://aiplatform.googleapis.com",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a credential authenticates against its provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    /// A static API key carried verbatim in the snapshot.
    StaticKey { api_key: String },
    /// An OAuth identity; the bearer is resolved through the token provider
    /// at send time and never stored here.
    OauthToken { token_ref: String },
}

/// A model alias row: the upstream name and the client-visible alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAlias {
    pub upstream: String,
    pub alias: String,
    /// Additive aliases are listed *alongside* the upstream name in
    /// `/v1/models`; replacing aliases hide it.
    #[serde(default)]
    pub replace: bool,
}

/// One configured way to reach one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub id: i64,
    pub provider: Provider,
    #[serde(flatten)]
    pub kind: CredentialKind,
    /// Routing prefix tag; requests for `tag/model` land on credentials
    /// carrying `prefix = tag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-credential egress proxy URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_proxy: Option<String>,
    /// Model patterns admitted by this credential. Empty means all.
    /// Patterns: exact, `prefix*`, `*suffix`, `*substring*`.
    #[serde(default)]
    pub model_allow: Vec<String>,
    #[serde(default)]
    pub model_deny: Vec<String>,
    #[serde(default)]
    pub model_aliases: Vec<ModelAlias>,
    /// Extra headers attached to every upstream request on this credential.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    #[default]
    RoundRobin,
    FillFirst,
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8317
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    /// Require `prefix/model` names and pin selection to the tagged subset.
    #[serde(default)]
    pub force_model_prefix: bool,
    #[serde(default = "default_request_retry")]
    pub request_retry: u32,
    /// Cap on the exponential backoff between attempts, in seconds.
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval: u64,
    /// Streaming retries permitted before the first byte is flushed.
    #[serde(default = "default_bootstrap_retries")]
    pub bootstrap_retries: u32,
    /// SSE keep-alive comment interval; 0 disables.
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,
    /// Per-attempt upstream deadline, in seconds.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: u64,
    /// Whole-request deadline for unary calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_request_retry() -> u32 {
    3
}

fn default_max_retry_interval() -> u64 {
    8
}

fn default_bootstrap_retries() -> u32 {
    2
}

fn default_keepalive_seconds() -> u64 {
    15
}

fn default_attempt_timeout() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            force_model_prefix: false,
            request_retry: default_request_retry(),
            max_retry_interval: default_max_retry_interval(),
            bootstrap_retries: default_bootstrap_retries(),
            keepalive_seconds: default_keepalive_seconds(),
            attempt_timeout: default_attempt_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Seconds an open circuit stays open before admitting a probe.
    #[serde(default = "default_open_timeout")]
    pub open_timeout: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_open_timeout() -> u64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout: default_open_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    /// Sweep interval for idle buckets, in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

fn default_rpm() -> u32 {
    120
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
    #[serde(default = "default_max_header")]
    pub max_header_bytes: usize,
    #[serde(default = "default_max_query")]
    pub max_query_bytes: usize,
}

fn default_max_body() -> usize {
    10 * 1024 * 1024
}

fn default_max_header() -> usize {
    8 * 1024
}

fn default_max_query() -> usize {
    2 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body(),
            max_header_bytes: default_max_header(),
            max_query_bytes: default_max_query(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted static API keys.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// HMAC secret for session JWTs; empty disables JWT auth.
    #[serde(default)]
    pub session_secret: String,
    #[serde(default)]
    pub jwt_issuer: String,
    /// Paths exempt from auth beyond the built-in health routes.
    #[serde(default)]
    pub skip_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; supports `scheme://host:*` port globs.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridConfig {
    /// Must be https for the subsystem to register routes.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub secret: String,
    /// Per-call timeout, seconds.
    #[serde(default = "default_grid_timeout")]
    pub timeout: u64,
}

fn default_grid_timeout() -> u64 {
    30
}

/// The immutable configuration snapshot the core runs against.
///
/// Reload builds a fresh snapshot and atomically swaps it; in-flight
/// requests finish under the snapshot they started with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySnapshot {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
}

/// Optional layer merged over a snapshot: CLI > ENV > file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub management_password: Option<String>,
}

impl GatewayPatch {
    pub fn overlay(&mut self, other: GatewayPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.management_password.is_some() {
            self.management_password = other.management_password;
        }
    }

    pub fn apply(self, snapshot: &mut GatewaySnapshot) {
        if let Some(host) = self.host {
            snapshot.server.host = host;
        }
        if let Some(port) = self.port {
            snapshot.server.port = port;
        }
        if let Some(password) = self.management_password
            && !password.is_empty()
        {
            snapshot.auth.api_keys.push(password);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_defaults_are_spec_defaults() {
        let snap: GatewaySnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snap.server.port, 8317);
        assert_eq!(snap.routing.request_retry, 3);
        assert_eq!(snap.breaker.failure_threshold, 5);
        assert_eq!(snap.limits.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(snap.rate_limit.cleanup_interval, 300);
        assert_eq!(snap.grid.timeout, 30);
    }

    #[test]
    fn credential_entry_parses_static_key() {
        let value = serde_json::json!({
            "id": 1,
            "provider": "openai",
            "static-key": { "api_key": "sk-A" },
            "model_allow": ["gpt-*"],
            "weight": 3
        });
        let entry: CredentialEntry = serde_json::from_value(value).unwrap();
        assert_eq!(entry.provider, Provider::OpenAi);
        assert!(matches!(entry.kind, CredentialKind::StaticKey { ref api_key } if api_key == "sk-A"));
        assert_eq!(entry.weight, 3);
        assert!(entry.enabled);
    }

    #[test]
    fn patch_overlay_prefers_latest() {
        let mut patch = GatewayPatch {
            host: Some("127.0.0.1".into()),
            port: Some(9000),
            management_password: None,
        };
        patch.overlay(GatewayPatch {
            host: None,
            port: Some(9001),
            management_password: Some("secret".into()),
        });
        let mut snap = GatewaySnapshot::default();
        patch.apply(&mut snap);
        assert_eq!(snap.server.host, "127.0.0.1");
        assert_eq!(snap.server.port, 9001);
        assert_eq!(snap.auth.api_keys, vec!["secret".to_string()]);
    }
}
