use chrono::{offset::Utc, DateTime};
use std::{cmp::Ordering, fmt};

/// Identifies a configuration resource and orders resources of the same kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceMeta {
    pub namespace: String,
    pub name: String,

    /// Used to order resources: older resources take precedence. Resources without a timestamp
    /// are treated as older than any resource that has one.
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// Controls which namespaces a resource is visible to.
///
/// An empty list exports the resource to every namespace. `.` refers to the resource's own
/// namespace, `*` to every namespace and `~` to none.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExportTo(Vec<String>);

// === impl ResourceMeta ===

impl ResourceMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            creation_timestamp: None,
        }
    }
}

impl Ord for ResourceMeta {
    fn cmp(&self, other: &Self) -> Ordering {
        self.creation_timestamp
            .cmp(&other.creation_timestamp)
            .then_with(|| self.namespace.cmp(&other.namespace))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for ResourceMeta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ResourceMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl ExportTo ===

impl ExportTo {
    pub fn is_visible(&self, owner_ns: &str, client_ns: &str) -> bool {
        if self.0.is_empty() {
            return true;
        }
        self.0.iter().any(|ns| match ns.as_str() {
            "*" => true,
            "~" => false,
            "." => owner_ns == client_ns,
            ns => ns == client_ns,
        })
    }
}

impl From<Vec<String>> for ExportTo {
    fn from(namespaces: Vec<String>) -> Self {
        Self(namespaces)
    }
}
