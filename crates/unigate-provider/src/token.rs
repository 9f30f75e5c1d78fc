use std::collections::HashMap;

use crate::credential::TokenHandle;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("unknown token handle: {0}")]
    UnknownHandle(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

/// Boundary for OAuth material. The selector and breaker only ever see
/// [`TokenHandle`]s; the upstream client redeems the handle immediately
/// before sending and does not store the result.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Yields a currently-valid bearer for `handle`. Refresh, caching, and
    /// expiry policy live behind this seam.
    async fn bearer(&self, handle: &TokenHandle) -> Result<String, TokenError>;
}

/// Fixed handle → bearer map; used in tests and for tokens provisioned out
/// of band.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenProvider {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer(&self, handle: &TokenHandle) -> Result<String, TokenError> {
        self.tokens
            .get(handle.as_ref_str())
            .cloned()
            .ok_or_else(|| TokenError::UnknownHandle(handle.as_ref_str().to_string()))
    }
}
