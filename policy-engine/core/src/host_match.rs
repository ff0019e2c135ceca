use std::fmt;

/// Matches a request's host against a configured hostname.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HostMatch {
    /// An exact, lower-cased hostname.
    Exact(String),

    /// A wildcard such as `*.example.com`. Labels are stored in reverse order so that the most
    /// significant label comes first.
    Suffix { reverse_labels: Vec<String> },

    /// The `*` wildcard, matching every host.
    Any,
}

/// Orders host matches from least to most specific. An exact host is more specific than any
/// wildcard, and a wildcard with more labels is more specific than one with fewer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Specificity {
    Any,
    Suffix(usize, usize),
    Exact,
}

// === impl HostMatch ===

impl HostMatch {
    pub fn parse(host: &str) -> Self {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host == "*" {
            return Self::Any;
        }
        match host.strip_prefix("*.") {
            Some(suffix) => Self::Suffix {
                reverse_labels: suffix.split('.').rev().map(ToString::to_string).collect(),
            },
            None => Self::Exact(host),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self, Self::Exact(_))
    }

    /// Returns true if `host` is matched. A suffix match requires at least one label in addition
    /// to the suffix.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.');
        match self {
            Self::Any => true,
            Self::Exact(name) => name.eq_ignore_ascii_case(host),
            Self::Suffix { reverse_labels } => {
                let mut labels = host.rsplit('.');
                for expected in reverse_labels {
                    match labels.next() {
                        Some(label) if label.eq_ignore_ascii_case(expected) => {}
                        _ => return false,
                    }
                }
                labels.next().map_or(false, |l| !l.is_empty())
            }
        }
    }

    /// Returns true if every host matched by `other` is also matched by this host. This is used
    /// to check whether a gateway or sidecar admits a configured (possibly wildcard) host.
    pub fn covers(&self, other: &HostMatch) -> bool {
        match (self, other) {
            (Self::Any, _) => true,
            (_, Self::Any) => false,
            (_, Self::Exact(name)) => self.matches(name),
            (Self::Exact(_), Self::Suffix { .. }) => false,
            (
                Self::Suffix { reverse_labels: ours },
                Self::Suffix {
                    reverse_labels: theirs,
                },
            ) => theirs.len() >= ours.len() && theirs.iter().zip(ours).all(|(t, o)| t == o),
        }
    }

    /// Returns true if some host could be matched by both.
    pub fn intersects(&self, other: &HostMatch) -> bool {
        self.covers(other) || other.covers(self)
    }

    pub fn specificity(&self) -> Specificity {
        match self {
            Self::Any => Specificity::Any,
            Self::Exact(_) => Specificity::Exact,
            Self::Suffix { reverse_labels } => {
                Specificity::Suffix(reverse_labels.len(), reverse_labels.iter().map(String::len).sum())
            }
        }
    }
}

impl fmt::Display for HostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(name) => name.fmt(f),
            Self::Suffix { reverse_labels } => {
                f.write_str("*")?;
                for label in reverse_labels.iter().rev() {
                    write!(f, ".{}", label)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_hosts() {
        for (pattern, host, matches) in [
            ("reviews.bookinfo.svc.cluster.local", "reviews.bookinfo.svc.cluster.local", true),
            ("reviews.bookinfo.svc.cluster.local", "REVIEWS.bookinfo.svc.cluster.local.", true),
            ("reviews.bookinfo.svc.cluster.local", "ratings.bookinfo.svc.cluster.local", false),
            ("*.example.com", "api.example.com", true),
            ("*.example.com", "a.b.example.com", true),
            ("*.example.com", "example.com", false),
            ("*.example.com", "api.example.org", false),
            ("*", "anything.at.all", true),
        ] {
            assert_eq!(
                HostMatch::parse(pattern).matches(host),
                matches,
                "{pattern} ~ {host}"
            );
        }
    }

    #[test]
    fn orders_by_specificity() {
        let mut hosts = vec![
            HostMatch::parse("*"),
            HostMatch::parse("api.example.com"),
            HostMatch::parse("*.com"),
            HostMatch::parse("*.example.com"),
        ];
        hosts.sort_by_key(|h| std::cmp::Reverse(h.specificity()));
        assert_eq!(
            hosts.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["api.example.com", "*.example.com", "*.com", "*"]
        );
    }

    #[test]
    fn covers_hosts() {
        let wildcard = HostMatch::parse("*.example.com");
        assert!(wildcard.covers(&HostMatch::parse("api.example.com")));
        assert!(wildcard.covers(&HostMatch::parse("*.eu.example.com")));
        assert!(!wildcard.covers(&HostMatch::parse("*.com")));
        assert!(wildcard.intersects(&HostMatch::parse("*.com")));
        assert!(!HostMatch::parse("api.example.com").covers(&wildcard));
        assert!(HostMatch::Any.covers(&wildcard));
    }
}
