use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// A workload's labels.
///
/// Labels are shared between every index entry that refers to a workload, so cloning is cheap.
#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

/// Selects workloads by label, in the `{ matchLabels: {...} }` form used by security resources.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub match_labels: Map,
}

/// Selects workloads by label, in the `{ labels: {...} }` form used by networking resources.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
pub struct WorkloadSelector {
    #[serde(default)]
    pub labels: Map,
}

// === impl Selector ===

impl Selector {
    pub fn from_map(match_labels: Map) -> Self {
        Self { match_labels }
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        contains_all(&self.match_labels, labels.as_ref())
    }

    /// An empty selector selects every workload in its namespace.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

// === impl WorkloadSelector ===

impl WorkloadSelector {
    pub fn matches(&self, labels: &Labels) -> bool {
        contains_all(&self.labels, labels.as_ref())
    }
}

impl From<WorkloadSelector> for Selector {
    fn from(WorkloadSelector { labels }: WorkloadSelector) -> Self {
        Self::from_map(labels)
    }
}

// === impl Labels ===

impl Labels {
    /// Returns true if every label in `subset` is set to the same value in these labels.
    pub fn contains_all(&self, subset: &Map) -> bool {
        contains_all(subset, self.as_ref())
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

fn contains_all(selector: &Map, labels: &Map) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("app", "reviews"))),
                Labels::from_iter(Some(("app", "reviews"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("app", "reviews"))),
                Labels::from_iter(vec![("app", "reviews"), ("version", "v1")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(vec![("app", "reviews"), ("version", "v2")]),
                Labels::from_iter(vec![("app", "reviews"), ("version", "v1")]),
                false,
                "value mismatch",
            ),
            (
                Selector::from_iter(Some(("app", "reviews"))),
                Labels::default(),
                false,
                "missing label",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }
}
