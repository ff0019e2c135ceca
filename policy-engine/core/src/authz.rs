use crate::{NetworkMatch, Request, ResourceMeta, ValueMatch, Workload};
use anyhow::{bail, Result};
use http::header::HeaderName;
use mesh_policy_k8s_api::labels::Selector;
use std::{fmt, net::IpAddr, str::FromStr};

/// A compiled `AuthorizationPolicy`.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizationPolicy {
    pub meta: ResourceMeta,
    pub action: Action,
    pub selector: Option<Selector>,
    pub rules: Vec<AuthorizationRule>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Allow,
    Deny,
    Audit,
}

/// A policy matches a request when any of its rules does. Within a rule, `from`, `to` and `when`
/// must all match; an empty `from` or `to` matches any request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthorizationRule {
    pub from: Vec<SourceMatch>,
    pub to: Vec<OperationMatch>,
    pub when: Vec<Condition>,
}

/// Every field must match. Negated fields match when no value matches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceMatch {
    pub principals: Vec<ValueMatch>,
    pub not_principals: Vec<ValueMatch>,
    pub request_principals: Vec<ValueMatch>,
    pub not_request_principals: Vec<ValueMatch>,
    pub namespaces: Vec<ValueMatch>,
    pub not_namespaces: Vec<ValueMatch>,
    pub ip_blocks: Vec<NetworkMatch>,
    pub not_ip_blocks: Vec<NetworkMatch>,
    pub remote_ip_blocks: Vec<NetworkMatch>,
    pub not_remote_ip_blocks: Vec<NetworkMatch>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperationMatch {
    pub hosts: Vec<ValueMatch>,
    pub not_hosts: Vec<ValueMatch>,
    pub ports: Vec<u16>,
    pub not_ports: Vec<u16>,
    pub methods: Vec<ValueMatch>,
    pub not_methods: Vec<ValueMatch>,
    pub paths: Vec<ValueMatch>,
    pub not_paths: Vec<ValueMatch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub key: ConditionKey,
    pub values: ConditionValues,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConditionKey {
    RequestHeader(HeaderName),
    SourceIp,
    RemoteIp,
    SourceNamespace,
    SourcePrincipal,
    RequestPrincipal,
    DestinationPort,
    ConnectionSni,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConditionValues {
    Values {
        values: Vec<ValueMatch>,
        not_values: Vec<ValueMatch>,
    },
    Networks {
        values: Vec<NetworkMatch>,
        not_values: Vec<NetworkMatch>,
    },
}

// === impl AuthorizationPolicy ===

impl AuthorizationPolicy {
    /// Returns true if this policy applies to requests addressed to `workload`. Policies in the
    /// root namespace apply across the mesh; other policies apply within their own namespace.
    pub fn applies_to(&self, workload: &Workload, root_namespace: &str) -> bool {
        if self.meta.namespace != root_namespace && self.meta.namespace != workload.namespace {
            return false;
        }
        self.selector
            .as_ref()
            .map_or(true, |s| s.matches(&workload.labels))
    }

    /// Returns the index of the first rule that matches the request.
    pub fn matching_rule(&self, req: &Request) -> Option<usize> {
        self.rules.iter().position(|r| r.matches(req))
    }
}

// === impl Action ===

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("ALLOW"),
            Self::Deny => f.write_str("DENY"),
            Self::Audit => f.write_str("AUDIT"),
        }
    }
}

// === impl AuthorizationRule ===

impl AuthorizationRule {
    pub fn matches(&self, req: &Request) -> bool {
        (self.from.is_empty() || self.from.iter().any(|s| s.matches(req)))
            && (self.to.is_empty() || self.to.iter().any(|o| o.matches(req)))
            && self.when.iter().all(|c| c.matches(req))
    }
}

// === impl SourceMatch ===

impl SourceMatch {
    pub fn matches(&self, req: &Request) -> bool {
        let src = &req.source;
        let principal = src.principal.as_deref();
        check(&self.principals, &self.not_principals, principal, |m, v| {
            m.matches_principal(v)
        }) && check(
            &self.request_principals,
            &self.not_request_principals,
            src.request_principal.as_deref(),
            ValueMatch::matches,
        ) && check(
            &self.namespaces,
            &self.not_namespaces,
            src.namespace.as_deref(),
            ValueMatch::matches,
        ) && check_networks(&self.ip_blocks, &self.not_ip_blocks, src.ip)
            && check_networks(
                &self.remote_ip_blocks,
                &self.not_remote_ip_blocks,
                src.remote_ip.or(src.ip),
            )
    }
}

// === impl OperationMatch ===

impl OperationMatch {
    pub fn matches(&self, req: &Request) -> bool {
        let port = req.port().map(|p| p.get());
        check(
            &self.hosts,
            &self.not_hosts,
            Some(req.host()),
            ValueMatch::matches_ignore_case,
        ) && check(&self.ports, &self.not_ports, port, |a, b| *a == b)
            && check(
                &self.methods,
                &self.not_methods,
                Some(req.method.as_str()),
                ValueMatch::matches,
            )
            && check(
                &self.paths,
                &self.not_paths,
                Some(req.path_only()),
                ValueMatch::matches,
            )
    }
}

// === impl Condition ===

impl Condition {
    pub fn matches(&self, req: &Request) -> bool {
        match &self.values {
            ConditionValues::Networks { values, not_values } => {
                let ip = match self.key {
                    ConditionKey::RemoteIp => req.source.remote_ip.or(req.source.ip),
                    _ => req.source.ip,
                };
                check_networks(values, not_values, ip)
            }
            ConditionValues::Values { values, not_values } => {
                let port;
                let value = match &self.key {
                    ConditionKey::RequestHeader(name) => {
                        // Any of a header's values may satisfy the condition.
                        let headers = req.header_values(name.as_str()).collect::<Vec<_>>();
                        let positive = values.is_empty()
                            || headers.iter().any(|h| values.iter().any(|m| m.matches(h)));
                        let negative = headers
                            .iter()
                            .any(|h| not_values.iter().any(|m| m.matches(h)));
                        return positive && !negative;
                    }
                    ConditionKey::SourceNamespace => req.source.namespace.as_deref(),
                    ConditionKey::SourcePrincipal => {
                        return check(
                            values,
                            not_values,
                            req.source.principal.as_deref(),
                            |m, v| m.matches_principal(v),
                        )
                    }
                    ConditionKey::RequestPrincipal => req.source.request_principal.as_deref(),
                    ConditionKey::DestinationPort => {
                        port = req.port().map(|p| p.get().to_string());
                        port.as_deref()
                    }
                    ConditionKey::ConnectionSni => req.sni.as_deref(),
                    ConditionKey::SourceIp | ConditionKey::RemoteIp => None,
                };
                check(values, not_values, value, ValueMatch::matches)
            }
        }
    }
}

// === impl ConditionKey ===

impl ConditionKey {
    /// Keys whose values are CIDRs rather than strings.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::SourceIp | Self::RemoteIp)
    }
}

impl FromStr for ConditionKey {
    type Err = anyhow::Error;

    fn from_str(key: &str) -> Result<Self> {
        if let Some(name) = key
            .strip_prefix("request.headers[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return Ok(Self::RequestHeader(HeaderName::from_bytes(name.as_bytes())?));
        }
        Ok(match key {
            "source.ip" => Self::SourceIp,
            "remote.ip" => Self::RemoteIp,
            "source.namespace" => Self::SourceNamespace,
            "source.principal" => Self::SourcePrincipal,
            "request.auth.principal" => Self::RequestPrincipal,
            "destination.port" => Self::DestinationPort,
            "connection.sni" => Self::ConnectionSni,
            _ => bail!("unsupported condition key: {key}"),
        })
    }
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestHeader(name) => write!(f, "request.headers[{}]", name),
            Self::SourceIp => f.write_str("source.ip"),
            Self::RemoteIp => f.write_str("remote.ip"),
            Self::SourceNamespace => f.write_str("source.namespace"),
            Self::SourcePrincipal => f.write_str("source.principal"),
            Self::RequestPrincipal => f.write_str("request.auth.principal"),
            Self::DestinationPort => f.write_str("destination.port"),
            Self::ConnectionSni => f.write_str("connection.sni"),
        }
    }
}

/// A positive list must contain a match for a present value; a negative list must not.
fn check<M, V: Copy>(
    positive: &[M],
    negative: &[M],
    value: Option<V>,
    matches: impl Fn(&M, V) -> bool,
) -> bool {
    if !positive.is_empty() {
        match value {
            Some(v) if positive.iter().any(|m| matches(m, v)) => {}
            _ => return false,
        }
    }
    match value {
        Some(v) => !negative.iter().any(|m| matches(m, v)),
        None => true,
    }
}

fn check_networks(positive: &[NetworkMatch], negative: &[NetworkMatch], ip: Option<IpAddr>) -> bool {
    check(positive, negative, ip, |net, ip| net.contains(ip))
}
