use ahash::AHashMap as HashMap;
use mesh_policy_core::HostMatch;
use std::sync::Arc;

/// Indexes values by the hosts they declare.
///
/// Values must be inserted in priority order. A lookup returns the values bound to the most
/// specific host pattern that matches, preserving insertion order.
#[derive(Debug)]
pub(crate) struct HostIndex<T> {
    exact: HashMap<String, (HostMatch, Vec<Arc<T>>)>,

    /// Sorted from most to least specific.
    wildcards: Vec<(HostMatch, Arc<T>)>,
}

/// The values bound to the most specific host pattern that matched a lookup.
#[derive(Debug)]
pub(crate) struct Resolved<'i, T> {
    pub host: &'i HostMatch,
    pub values: Vec<&'i Arc<T>>,
}

// === impl HostIndex ===

impl<T> HostIndex<T> {
    pub(crate) fn new<'h>(items: impl IntoIterator<Item = (&'h [HostMatch], Arc<T>)>) -> Self {
        let mut exact = HashMap::<String, (HostMatch, Vec<Arc<T>>)>::default();
        let mut wildcards = Vec::new();
        for (hosts, value) in items {
            for host in hosts {
                match host {
                    HostMatch::Exact(h) => exact
                        .entry(h.clone())
                        .or_insert_with(|| (host.clone(), Vec::new()))
                        .1
                        .push(value.clone()),
                    wildcard => wildcards.push((wildcard.clone(), value.clone())),
                }
            }
        }
        // Stable, so values bound to the same pattern keep their priority order.
        wildcards.sort_by(|(a, _), (b, _)| b.specificity().cmp(&a.specificity()));
        Self { exact, wildcards }
    }

    /// Finds the most specific pattern matching `host` that binds at least one value accepted by
    /// `visible`.
    pub(crate) fn resolve<'i>(
        &'i self,
        host: &str,
        visible: impl Fn(&T) -> bool,
    ) -> Option<Resolved<'i, T>> {
        if let Some((pattern, values)) = self.exact.get(host) {
            let values = values.iter().filter(|v| visible(&***v)).collect::<Vec<_>>();
            if !values.is_empty() {
                return Some(Resolved {
                    host: pattern,
                    values,
                });
            }
        }

        let (pattern, _) = self
            .wildcards
            .iter()
            .find(|(pattern, value)| pattern.matches(host) && visible(&**value))?;
        let values = self
            .wildcards
            .iter()
            .filter(|(p, v)| p == pattern && visible(&**v))
            .map(|(_, v)| v)
            .collect();
        Some(Resolved {
            host: pattern,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(entries: Vec<(&str, &'static str)>) -> HostIndex<&'static str> {
        let entries = entries
            .into_iter()
            .map(|(host, value)| (vec![HostMatch::parse(host)], Arc::new(value)))
            .collect::<Vec<_>>();
        HostIndex::new(entries.iter().map(|(h, v)| (h.as_slice(), v.clone())))
    }

    #[test]
    fn most_specific_pattern_wins() {
        let idx = index(vec![
            ("*", "any"),
            ("*.example.com", "short"),
            ("*.api.example.com", "long"),
            ("v1.api.example.com", "exact"),
        ]);

        let r = idx.resolve("v1.api.example.com", |_| true).unwrap();
        assert_eq!(r.values.iter().map(|v| ***v).collect::<Vec<_>>(), vec!["exact"]);
        let r = idx.resolve("v2.api.example.com", |_| true).unwrap();
        assert_eq!(r.host.to_string(), "*.api.example.com");
        let r = idx.resolve("www.example.com", |_| true).unwrap();
        assert_eq!(r.values.iter().map(|v| ***v).collect::<Vec<_>>(), vec!["short"]);
        let r = idx.resolve("example.org", |_| true).unwrap();
        assert_eq!(r.host, &HostMatch::Any);
    }

    #[test]
    fn invisible_values_fall_through() {
        let idx = index(vec![
            ("reviews.example.com", "hidden"),
            ("*.example.com", "a"),
            ("*.example.com", "b"),
        ]);
        let r = idx
            .resolve("reviews.example.com", |v| *v != "hidden")
            .unwrap();
        assert_eq!(r.values.iter().map(|v| ***v).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(idx.resolve("example.com", |_| true).is_none());
    }
}
