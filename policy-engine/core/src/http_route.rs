use crate::{retry::RetryPolicy, ExportTo, HostMatch, Request, ResourceMeta};
use anyhow::{ensure, Result};
pub use http::{header::HeaderName, Method, StatusCode};
use mesh_policy_k8s_api::labels::Map;
use regex::Regex;
use std::{fmt, num::NonZeroU16, sync::Arc, time::Duration};

/// A compiled `VirtualService`.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteSet {
    pub meta: ResourceMeta,
    pub hosts: Vec<HostMatch>,

    /// The gateways that apply these routes; `mesh` refers to every sidecar.
    pub gateways: Vec<String>,
    pub export_to: ExportTo,
    pub rules: Vec<Arc<HttpRoute>>,
}

/// A single routing rule.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRoute {
    pub name: Option<String>,

    /// The rule applies if any match applies. An empty list matches every request.
    pub matches: Vec<HttpRouteMatch>,
    pub destinations: Vec<WeightedDestination>,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub fault: Option<FaultInjection>,
    pub mirror: Option<Mirror>,
}

/// A set of request predicates, all of which must hold.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpRouteMatch {
    pub uri: Option<StringMatch>,
    pub ignore_uri_case: bool,
    pub method: Option<StringMatch>,
    pub authority: Option<StringMatch>,
    pub headers: Vec<HeaderMatch>,
    pub without_headers: Vec<HeaderMatch>,
    pub query_params: Vec<QueryParamMatch>,
    pub port: Option<NonZeroU16>,
    pub source_labels: Map,
    pub source_namespace: Option<String>,

    /// Overrides the route set's gateways when non-empty.
    pub gateways: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

/// Matches a header by name. A match without a value tests only for the header's presence.
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderMatch {
    pub name: HeaderName,
    pub value: Option<StringMatch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryParamMatch {
    pub name: String,
    pub value: Option<StringMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination {
    /// A fully-qualified hostname.
    pub host: String,
    pub subset: Option<String>,
    pub port: Option<NonZeroU16>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WeightedDestination {
    pub destination: Destination,
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mirror {
    pub destination: Destination,
    pub percentage: Percentage,
}

/// A percentage of requests, between 0 and 100 inclusive.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct Percentage(f64);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaultInjection {
    pub delay: Option<DelayFault>,
    pub abort: Option<AbortFault>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DelayFault {
    pub fixed_delay: Duration,
    pub percentage: Percentage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AbortFault {
    pub kind: AbortKind,
    pub percentage: Percentage,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbortKind {
    Http(StatusCode),
    Grpc(u32),
}

// === impl HttpRoute ===

impl HttpRoute {
    /// A rule that sends all traffic to a single destination.
    pub fn default_to(destination: Destination) -> Self {
        Self {
            name: None,
            matches: vec![],
            destinations: vec![WeightedDestination {
                destination,
                weight: 100,
            }],
            timeout: None,
            retry: RetryPolicy::default(),
            fault: None,
            mirror: None,
        }
    }

    pub fn matches(&self, req: &Request, gateway: &str) -> bool {
        self.matches.is_empty() || self.matches.iter().any(|m| m.matches(req, gateway))
    }
}

// === impl HttpRouteMatch ===

impl HttpRouteMatch {
    /// Returns true if the request satisfies every predicate. `gateway` is the gateway context of
    /// the request: either `mesh` or the gateway's `namespace/name`.
    pub fn matches(&self, req: &Request, gateway: &str) -> bool {
        if !self.gateways.is_empty() && !self.gateways.iter().any(|gw| gw == gateway) {
            return false;
        }

        if let Some(uri) = &self.uri {
            let path = req.path_only();
            let matched = if self.ignore_uri_case {
                uri.is_match_ignore_case(path)
            } else {
                uri.is_match(path)
            };
            if !matched {
                return false;
            }
        }

        if let Some(method) = &self.method {
            if !method.is_match(req.method.as_str()) {
                return false;
            }
        }

        if let Some(authority) = &self.authority {
            if !authority.is_match(&req.authority) {
                return false;
            }
        }

        if let Some(port) = self.port {
            if req.port() != Some(port) {
                return false;
            }
        }

        if !self.headers.iter().all(|h| h.matches(req)) {
            return false;
        }
        if self.without_headers.iter().any(|h| h.matches(req)) {
            return false;
        }
        if !self.query_params.iter().all(|q| q.matches(req)) {
            return false;
        }

        if !req.source.labels.contains_all(&self.source_labels) {
            return false;
        }
        if let Some(ns) = &self.source_namespace {
            if req.source.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }

        true
    }
}

// === impl StringMatch ===

impl StringMatch {
    /// Compiles a regular expression that must match the entire value.
    pub fn regex(s: &str) -> Result<Self> {
        Ok(Self::Regex(Regex::new(&format!("^(?:{})$", s))?))
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Exact(v) => v == value,
            Self::Prefix(p) => value.starts_with(p.as_str()),
            Self::Regex(re) => re.is_match(value),
        }
    }

    /// Compares exact and prefix values case-insensitively. Regular expressions are unaffected.
    pub fn is_match_ignore_case(&self, value: &str) -> bool {
        match self {
            Self::Exact(v) => v.eq_ignore_ascii_case(value),
            Self::Prefix(p) => value
                .get(..p.len())
                .map_or(false, |head| head.eq_ignore_ascii_case(p)),
            Self::Regex(re) => re.is_match(value),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Self::Exact(s) | Self::Prefix(s) => s,
            Self::Regex(re) => re.as_str(),
        }
    }
}

impl PartialEq for StringMatch {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.as_str() == other.as_str()
    }
}

impl fmt::Display for StringMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "exact:{}", v),
            Self::Prefix(p) => write!(f, "prefix:{}", p),
            Self::Regex(re) => write!(f, "regex:{}", re.as_str()),
        }
    }
}

// === impl HeaderMatch ===

impl HeaderMatch {
    pub fn matches(&self, req: &Request) -> bool {
        match &self.value {
            None => req.headers.contains_key(&self.name),
            Some(m) => req
                .header_values(self.name.as_str())
                .any(|v| m.is_match(v)),
        }
    }
}

// === impl QueryParamMatch ===

impl QueryParamMatch {
    pub fn matches(&self, req: &Request) -> bool {
        req.query_params()
            .filter(|(name, _)| *name == self.name)
            .any(|(_, value)| self.value.as_ref().map_or(true, |m| m.is_match(value)))
    }
}

// === impl Destination ===

impl Destination {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            subset: None,
            port: None,
        }
    }

    pub fn with_subset(mut self, subset: impl Into<String>) -> Self {
        self.subset = Some(subset.into());
        self
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.host.fmt(f)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if let Some(subset) = &self.subset {
            write!(f, " ({})", subset)?;
        }
        Ok(())
    }
}

// === impl Percentage ===

impl Percentage {
    pub const ALL: Self = Self(100.0);
    pub const NONE: Self = Self(0.0);

    pub fn new(value: f64) -> Result<Self> {
        ensure!(
            (0.0..=100.0).contains(&value),
            "percentage must be between 0 and 100, got {value}"
        );
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// === impl AbortKind ===

impl fmt::Display for AbortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(status) => write!(f, "HTTP {}", status.as_u16()),
            Self::Grpc(code) => write!(f, "gRPC status {}", code),
        }
    }
}
