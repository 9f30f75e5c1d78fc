//! Shared types for the unigate workspace: the typed configuration snapshot
//! consumed by the core, and the error kinds exposed on the client wire.
//!
//! This crate intentionally carries no IO and no async; every other crate in
//! the workspace may depend on it.

mod config;
mod error;

pub use config::{
    AuthConfig, BreakerConfig, CorsConfig, CredentialEntry, CredentialKind, GatewayPatch,
    GatewaySnapshot, GridConfig, LimitsConfig, ModelAlias, Provider, RateLimitConfig,
    RoutingConfig, RoutingStrategy, ServerConfig,
};
pub use error::{ErrorBody, ErrorDetail, ErrorKind, GatewayError};

/// Per-request identifier, minted at middleware entry and echoed in error
/// bodies and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
