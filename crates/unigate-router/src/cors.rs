/// Origin allow-list with `scheme://host:*` port globs.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: Vec<String>) -> Self {
        Self { origins }
    }

    pub fn is_configured(&self) -> bool {
        !self.origins.is_empty()
    }

    /// Whether `origin` may be echoed back.
    pub fn allows(&self, origin: &str) -> bool {
        self.origins.iter().any(|allowed| {
            if allowed == "*" {
                return true;
            }
            if let Some(prefix) = allowed.strip_suffix(":*") {
                // `scheme://host:*` matches any port, and the bare
                // host without a port.
                return origin == prefix
                    || origin
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with(':'));
            }
            allowed == origin
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_glob_matches_any_port() {
        let policy = CorsPolicy::new(vec!["http://localhost:*".into()]);
        assert!(policy.allows("http://localhost:3000"));
        assert!(policy.allows("http://localhost:8080"));
        assert!(policy.allows("http://localhost"));
        assert!(!policy.allows("http://evil.example"));
        assert!(!policy.allows("http://localhost.evil.example"));
    }

    #[test]
    fn exact_origin_must_match_fully() {
        let policy = CorsPolicy::new(vec!["https://app.example".into()]);
        assert!(policy.allows("https://app.example"));
        assert!(!policy.allows("https://app.example:444"));
    }
}
