use std::fmt;

/// Matches a string attribute using the wildcard forms accepted by authorization policies: an
/// exact value, `prefix*`, `*suffix`, or `*` for any non-empty value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueMatch {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Presence,
}

// === impl ValueMatch ===

impl ValueMatch {
    pub fn parse(value: &str) -> Self {
        if value == "*" {
            return Self::Presence;
        }
        if let Some(suffix) = value.strip_prefix('*') {
            return Self::Suffix(suffix.to_string());
        }
        if let Some(prefix) = value.strip_suffix('*') {
            return Self::Prefix(prefix.to_string());
        }
        Self::Exact(value.to_string())
    }

    /// Parses a principal, ignoring any `spiffe://` scheme.
    pub fn principal(value: &str) -> Self {
        Self::parse(strip_spiffe(value))
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Presence => !value.is_empty(),
            Self::Exact(v) => v == value,
            Self::Prefix(p) => value.starts_with(p.as_str()),
            Self::Suffix(s) => value.ends_with(s.as_str()),
        }
    }

    pub fn matches_ignore_case(&self, value: &str) -> bool {
        match self {
            Self::Presence => !value.is_empty(),
            Self::Exact(v) => v.eq_ignore_ascii_case(value),
            Self::Prefix(p) => value
                .get(..p.len())
                .map_or(false, |head| head.eq_ignore_ascii_case(p)),
            Self::Suffix(s) => value
                .len()
                .checked_sub(s.len())
                .and_then(|start| value.get(start..))
                .map_or(false, |tail| tail.eq_ignore_ascii_case(s)),
        }
    }

    pub fn matches_principal(&self, principal: &str) -> bool {
        self.matches(strip_spiffe(principal))
    }
}

impl fmt::Display for ValueMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence => f.write_str("*"),
            Self::Exact(v) => v.fmt(f),
            Self::Prefix(p) => write!(f, "{}*", p),
            Self::Suffix(s) => write!(f, "*{}", s),
        }
    }
}

fn strip_spiffe(value: &str) -> &str {
    value.strip_prefix("spiffe://").unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_values() {
        for (pattern, value, matches) in [
            ("GET", "GET", true),
            ("GET", "POST", false),
            ("/api/*", "/api/v1", true),
            ("/api/*", "/health", false),
            ("*.internal", "db.internal", true),
            ("*", "anything", true),
            ("*", "", false),
        ] {
            assert_eq!(
                ValueMatch::parse(pattern).matches(value),
                matches,
                "{pattern} ~ {value}"
            );
        }
    }

    #[test]
    fn principals_ignore_spiffe_scheme() {
        let m = ValueMatch::principal("spiffe://cluster.local/ns/default/sa/productpage");
        assert_eq!(
            m,
            ValueMatch::Exact("cluster.local/ns/default/sa/productpage".to_string())
        );
        assert!(m.matches_principal("cluster.local/ns/default/sa/productpage"));
        assert!(m.matches_principal("spiffe://cluster.local/ns/default/sa/productpage"));
        assert!(ValueMatch::principal("cluster.local/ns/default/*")
            .matches_principal("spiffe://cluster.local/ns/default/sa/reviews"));
    }

    #[test]
    fn matches_hosts_ignoring_case() {
        assert!(ValueMatch::parse("*.Example.com").matches_ignore_case("api.example.COM"));
        assert!(ValueMatch::parse("API.*").matches_ignore_case("api.example.com"));
        assert!(!ValueMatch::parse("*.example.com").matches_ignore_case("com"));
        assert_eq!(ValueMatch::parse("*.example.com").to_string(), "*.example.com");
    }
}
