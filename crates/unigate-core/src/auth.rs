use std::collections::HashMap;
use std::sync::RwLock;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use unigate_common::{AuthConfig, ErrorKind, GatewayError};

/// Attached to the request context on successful authentication.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: Option<String>,
    pub via_api_key: bool,
    /// Non-registered JWT claims, kept opaque; nothing downstream branches
    /// on them.
    pub claims: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct SessionClaims {
    iss: String,
    sub: Option<String>,
    exp: i64,
    #[serde(default)]
    nbf: Option<i64>,
    token_type: String,
    #[serde(flatten)]
    extra: Map<String, JsonValue>,
}

/// Verifies static API keys (constant-time) and HMAC session JWTs, with a
/// revocation set for the latter.
pub struct Authenticator {
    key_hashes: Vec<blake3::Hash>,
    session_secret: Option<Vec<u8>>,
    issuer: String,
    /// token string → natural expiry (epoch seconds).
    revoked: RwLock<HashMap<String, i64>>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            key_hashes: config
                .api_keys
                .iter()
                .map(|key| blake3::hash(key.as_bytes()))
                .collect(),
            session_secret: (!config.session_secret.is_empty())
                .then(|| config.session_secret.as_bytes().to_vec()),
            issuer: config.jwt_issuer.clone(),
            revoked: RwLock::new(HashMap::new()),
        }
    }

    /// Verifies the presented credential: a configured API key or a session
    /// JWT. `raw` is the header value with any "Bearer " prefix already
    /// stripped by [`strip_bearer`].
    pub fn verify(&self, raw: &str) -> Result<AuthContext, GatewayError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GatewayError::unauthorized("missing credentials"));
        }
        if self.key_matches(raw) {
            return Ok(AuthContext {
                subject: None,
                via_api_key: true,
                claims: None,
            });
        }
        if let Some(secret) = &self.session_secret {
            return self.verify_jwt(raw, secret);
        }
        Err(GatewayError::unauthorized("unrecognized credentials"))
    }

    /// Constant-time membership check: fixed-length digest comparison with
    /// a fold rather than early exit.
    fn key_matches(&self, presented: &str) -> bool {
        let digest = blake3::hash(presented.as_bytes());
        let mut matched = false;
        for known in &self.key_hashes {
            let mut diff = 0u8;
            for (a, b) in digest.as_bytes().iter().zip(known.as_bytes()) {
                diff |= a ^ b;
            }
            matched |= diff == 0;
        }
        matched
    }

    fn verify_jwt(&self, token: &str, secret: &[u8]) -> Result<AuthContext, GatewayError> {
        if self.is_revoked(token) {
            return Err(GatewayError::unauthorized("token revoked"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_nbf = true;

        let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)
            .map_err(|err| {
                GatewayError::new(ErrorKind::Unauthorized, format!("invalid token: {err}"))
            })?;

        let claims = data.claims;
        if claims.token_type != "access" && claims.token_type != "refresh" {
            return Err(GatewayError::unauthorized("unsupported token type"));
        }

        Ok(AuthContext {
            subject: claims.sub,
            via_api_key: false,
            claims: (!claims.extra.is_empty()).then(|| JsonValue::Object(claims.extra)),
        })
    }

    /// Adds a token to the revocation set. Revoking twice is a no-op; the
    /// entry evaporates once the token would have expired anyway.
    pub fn revoke(&self, token: &str, natural_expiry: i64) {
        let mut revoked = self.revoked.write().expect("revocation set poisoned");
        revoked.insert(token.to_string(), natural_expiry);
    }

    fn is_revoked(&self, token: &str) -> bool {
        let now = now_epoch();
        let revoked = self.revoked.read().expect("revocation set poisoned");
        revoked.get(token).is_some_and(|expiry| *expiry > now)
    }

    /// Drops revocation entries whose natural expiry has passed.
    pub fn prune_revoked(&self) {
        let now = now_epoch();
        let mut revoked = self.revoked.write().expect("revocation set poisoned");
        revoked.retain(|_, expiry| *expiry > now);
    }

    pub fn revoked_len(&self) -> usize {
        self.revoked.read().expect("revocation set poisoned").len()
    }
}

fn now_epoch() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Strips a leading "Bearer " (any case) from an Authorization value.
pub fn strip_bearer(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.len() >= 7 && trimmed[..7].eq_ignore_ascii_case("bearer ") {
        trimmed[7..].trim()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn config() -> AuthConfig {
        AuthConfig {
            api_keys: vec!["gw-key-1".into()],
            session_secret: "0123456789abcdef0123456789abcdef".into(),
            jwt_issuer: "unigate".into(),
            skip_paths: Vec::new(),
        }
    }

    fn token(claims: &JsonValue) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(config().session_secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn api_key_accepted() {
        let auth = Authenticator::new(&config());
        let ctx = auth.verify("gw-key-1").unwrap();
        assert!(ctx.via_api_key);
        assert!(auth.verify("gw-key-2").is_err());
    }

    #[test]
    fn bearer_prefix_any_case() {
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("BEARER abc"), "abc");
        assert_eq!(strip_bearer("abc"), "abc");
    }

    #[test]
    fn jwt_happy_path_and_claims() {
        let auth = Authenticator::new(&config());
        let now = now_epoch();
        let token = token(&json!({
            "iss": "unigate",
            "sub": "user-9",
            "exp": now + 300,
            "nbf": now - 10,
            "token_type": "access",
            "team": "infra"
        }));
        let ctx = auth.verify(&token).unwrap();
        assert_eq!(ctx.subject.as_deref(), Some("user-9"));
        assert_eq!(ctx.claims.unwrap()["team"], "infra");
    }

    #[test]
    fn wrong_issuer_and_expiry_rejected() {
        let auth = Authenticator::new(&config());
        let now = now_epoch();
        let bad_issuer = token(&json!({
            "iss": "someone-else",
            "exp": now + 300,
            "token_type": "access"
        }));
        assert!(auth.verify(&bad_issuer).is_err());

        let expired = token(&json!({
            "iss": "unigate",
            "exp": now - 10,
            "token_type": "access"
        }));
        assert!(auth.verify(&expired).is_err());
    }

    #[test]
    fn unknown_token_type_rejected() {
        let auth = Authenticator::new(&config());
        let now = now_epoch();
        let token = token(&json!({
            "iss": "unigate",
            "exp": now + 300,
            "token_type": "session"
        }));
        assert!(auth.verify(&token).is_err());
    }

    #[test]
    fn revocation_is_idempotent_and_prunable() {
        let auth = Authenticator::new(&config());
        let now = now_epoch();
        let token = token(&json!({
            "iss": "unigate",
            "exp": now + 300,
            "token_type": "access"
        }));
        assert!(auth.verify(&token).is_ok());

        auth.revoke(&token, now + 300);
        auth.revoke(&token, now + 300);
        assert_eq!(auth.revoked_len(), 1);
        assert!(auth.verify(&token).is_err());

        auth.revoke("long-gone", now - 5);
        auth.prune_revoked();
        assert_eq!(auth.revoked_len(), 1);
    }
}
