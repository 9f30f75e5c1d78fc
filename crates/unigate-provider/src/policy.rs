use unigate_common::ModelAlias;

/// Model admission rules plus the alias table for one credential.
///
/// Pattern grammar: exact match, `prefix*`, `*suffix`, `*substring*`.
/// An empty allow list admits everything; deny rules are checked first and
/// always win.
#[derive(Debug, Clone, Default)]
pub struct ModelPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
    aliases: Vec<ModelAlias>,
}

impl ModelPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>, aliases: Vec<ModelAlias>) -> Self {
        Self {
            allow,
            deny,
            aliases,
        }
    }

    /// Whether this credential may serve `model` (a client-visible name,
    /// routing prefix already stripped).
    pub fn admits(&self, model: &str) -> bool {
        let upstream = self.resolve_upstream(model);
        if self.deny.iter().any(|pattern| matches(pattern, &upstream))
            || self.deny.iter().any(|pattern| matches(pattern, model))
        {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|pattern| matches(pattern, &upstream))
            || self.allow.iter().any(|pattern| matches(pattern, model))
    }

    /// Maps a client-visible name through the alias table to the upstream
    /// name. Names without an alias row pass through unchanged.
    pub fn resolve_upstream(&self, model: &str) -> String {
        self.aliases
            .iter()
            .find(|alias| alias.alias == model)
            .map(|alias| alias.upstream.clone())
            .unwrap_or_else(|| model.to_string())
    }

    /// Client-visible names for an upstream model: the upstream name itself
    /// unless every alias row for it is replacing, plus all aliases.
    pub fn client_names(&self, upstream: &str) -> Vec<String> {
        let rows: Vec<&ModelAlias> = self
            .aliases
            .iter()
            .filter(|alias| alias.upstream == upstream)
            .collect();
        let mut names = Vec::new();
        if rows.is_empty() || rows.iter().any(|row| !row.replace) {
            names.push(upstream.to_string());
        }
        for row in &rows {
            if !names.contains(&row.alias) {
                names.push(row.alias.clone());
            }
        }
        names
    }

    pub fn alias_rows(&self) -> &[ModelAlias] {
        &self.aliases
    }

    pub fn allow_patterns(&self) -> &[String] {
        &self.allow
    }
}

fn matches(pattern: &str, model: &str) -> bool {
    if let Some(inner) = pattern
        .strip_prefix('*')
        .and_then(|rest| rest.strip_suffix('*'))
    {
        return model.contains(inner);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return model.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return model.ends_with(suffix);
    }
    pattern == model
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allow: &[&str], deny: &[&str]) -> ModelPolicy {
        ModelPolicy::new(
            allow.iter().map(|s| s.to_string()).collect(),
            deny.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
        )
    }

    #[test]
    fn empty_allow_admits_all() {
        assert!(policy(&[], &[]).admits("gpt-4"));
    }

    #[test]
    fn pattern_shapes() {
        let p = policy(&["gpt-*", "*-preview", "*turbo*", "o3"], &[]);
        assert!(p.admits("gpt-4"));
        assert!(p.admits("model-preview"));
        assert!(p.admits("gpt-3.5-turbo-0613"));
        assert!(p.admits("o3"));
        assert!(!p.admits("claude-3"));
    }

    #[test]
    fn deny_wins_over_allow() {
        let p = policy(&["gpt-*"], &["gpt-4-32k"]);
        assert!(p.admits("gpt-4"));
        assert!(!p.admits("gpt-4-32k"));
    }

    #[test]
    fn alias_resolution_and_listing() {
        let p = ModelPolicy::new(
            vec![],
            vec![],
            vec![
                ModelAlias {
                    upstream: "gpt-4o".into(),
                    alias: "fast".into(),
                    replace: false,
                },
                ModelAlias {
                    upstream: "gpt-4.1".into(),
                    alias: "best".into(),
                    replace: true,
                },
            ],
        );
        assert_eq!(p.resolve_upstream("fast"), "gpt-4o");
        assert_eq!(p.resolve_upstream("gpt-4o"), "gpt-4o");
        assert_eq!(p.client_names("gpt-4o"), vec!["gpt-4o", "fast"]);
        assert_eq!(p.client_names("gpt-4.1"), vec!["best"]);
    }

    #[test]
    fn denied_alias_target_is_rejected() {
        let p = ModelPolicy::new(
            vec![],
            vec!["gpt-4o".into()],
            vec![ModelAlias {
                upstream: "gpt-4o".into(),
                alias: "fast".into(),
                replace: false,
            }],
        );
        assert!(!p.admits("fast"));
    }
}
