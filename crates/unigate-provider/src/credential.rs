use std::collections::HashMap;

use unigate_common::{CredentialEntry, CredentialKind, Provider};

use crate::policy::ModelPolicy;

pub type CredentialId = i64;

/// Opaque reference into the token provider. Holding one never grants
/// access to token bytes; only the upstream client redeems it, at send
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenHandle(pub(crate) String);

impl TokenHandle {
    pub fn new(token_ref: impl Into<String>) -> Self {
        Self(token_ref.into())
    }

    pub fn as_ref_str(&self) -> &str {
        &self.0
    }
}

/// Secret material kind. API keys are carried inline (they arrive in the
/// config snapshot); OAuth bearers stay behind the token-provider boundary.
#[derive(Clone)]
pub enum Secret {
    ApiKey(String),
    OAuth(TokenHandle),
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::ApiKey(_) => f.write_str("Secret::ApiKey(..)"),
            Secret::OAuth(handle) => write!(f, "Secret::OAuth({})", handle.0),
        }
    }
}

/// One routable identity to one provider, as loaded from the snapshot.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: CredentialId,
    pub provider: Provider,
    pub secret: Secret,
    pub prefix: Option<String>,
    pub base_url: Option<String>,
    pub egress_proxy: Option<String>,
    pub policy: ModelPolicy,
    pub headers: HashMap<String, String>,
    pub weight: u32,
}

impl Credential {
    pub fn from_entry(entry: &CredentialEntry) -> Self {
        let secret = match &entry.kind {
            CredentialKind::StaticKey { api_key } => Secret::ApiKey(api_key.clone()),
            CredentialKind::OauthToken { token_ref } => {
                Secret::OAuth(TokenHandle::new(token_ref.clone()))
            }
        };
        Self {
            id: entry.id,
            provider: entry.provider,
            secret,
            prefix: entry.prefix.clone(),
            base_url: entry.base_url.clone(),
            egress_proxy: entry.egress_proxy.clone(),
            policy: ModelPolicy::new(
                entry.model_allow.clone(),
                entry.model_deny.clone(),
                entry.model_aliases.clone(),
            ),
            headers: entry.headers.clone(),
            weight: entry.weight.max(1),
        }
    }

    /// Effective upstream base for this credential.
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

/// Lifecycle status tracked per credential inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Active,
    /// Quota window exhausted; skipped until the deadline passes.
    QuotaExhausted,
    /// Repeated failures; skipped until the cooldown passes.
    Failing,
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_never_prints_key_material() {
        let secret = Secret::ApiKey("sk-super-secret".into());
        let printed = format!("{secret:?}");
        assert!(!printed.contains("super-secret"));
    }
}
