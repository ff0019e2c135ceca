use crate::{HostMatch, ResourceMeta};
use anyhow::{bail, Result};
use mesh_policy_k8s_api::labels::{Labels, Map};
use std::{fmt, num::NonZeroU16, str::FromStr};

/// How a proxy treats requests for hosts that are not in the service registry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutboundTrafficPolicy {
    /// Requests are passed through to the requested host.
    #[default]
    AllowAny,

    /// Requests are rejected.
    RegistryOnly,
}

/// A compiled `Sidecar`.
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyScope {
    pub meta: ResourceMeta,

    /// Selects workloads in the sidecar's namespace. Without a selector, the sidecar applies to
    /// every workload in its namespace (or, in the root namespace, the whole mesh).
    pub selector: Option<Map>,

    /// Hosts the selected workloads may reach. Empty means every host.
    pub egress_hosts: Vec<ScopedHost>,
    pub outbound_policy: Option<OutboundTrafficPolicy>,
}

/// A host qualified by the namespace of the configuration that declares it, in `namespace/host`
/// form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopedHost {
    pub namespace: NamespaceScope,
    pub host: HostMatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NamespaceScope {
    /// `*/host`
    Any,

    /// `./host`: the namespace of the resource that refers to the host.
    Local,

    /// `~/host`
    None,
    Named(String),
}

/// A compiled `Gateway`.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayListener {
    pub meta: ResourceMeta,
    pub selector: Map,
    pub servers: Vec<GatewayServer>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayServer {
    pub name: Option<String>,
    pub port: NonZeroU16,
    pub protocol: String,
    pub hosts: Vec<ScopedHost>,
}

// === impl OutboundTrafficPolicy ===

impl FromStr for OutboundTrafficPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "allow-any" => Ok(Self::AllowAny),
            "registry-only" => Ok(Self::RegistryOnly),
            _ => bail!("invalid outbound traffic policy: {s}"),
        }
    }
}

impl fmt::Display for OutboundTrafficPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowAny => f.write_str("ALLOW_ANY"),
            Self::RegistryOnly => f.write_str("REGISTRY_ONLY"),
        }
    }
}

// === impl ProxyScope ===

impl ProxyScope {
    /// Returns true if this scope applies to a workload in its own namespace.
    pub fn selects(&self, namespace: &str, labels: &Labels) -> bool {
        self.meta.namespace == namespace
            && self
                .selector
                .as_ref()
                .map_or(true, |selector| labels.contains_all(selector))
    }

    /// Returns true if a host declared in `config_ns` is visible to the selected workloads.
    pub fn admits(&self, host: &str, config_ns: &str) -> bool {
        self.egress_hosts.is_empty()
            || self
                .egress_hosts
                .iter()
                .any(|h| h.admits(host, config_ns, &self.meta.namespace))
    }
}

// === impl ScopedHost ===

impl ScopedHost {
    /// Parses a `namespace/host` value. Values without a namespace apply to any namespace.
    pub fn parse(s: &str) -> Result<Self> {
        let (namespace, host) = match s.split_once('/') {
            Some((ns, host)) => (NamespaceScope::parse(ns)?, host),
            None => (NamespaceScope::Any, s),
        };
        if host.is_empty() {
            bail!("missing host in {s:?}");
        }
        Ok(Self {
            namespace,
            host: HostMatch::parse(host),
        })
    }

    /// Returns true if `host`, declared in `config_ns`, is admitted. `local_ns` is the namespace
    /// of the resource holding this host.
    pub fn admits(&self, host: &str, config_ns: &str, local_ns: &str) -> bool {
        let ns_matches = match &self.namespace {
            NamespaceScope::Any => true,
            NamespaceScope::Local => config_ns == local_ns,
            NamespaceScope::None => false,
            NamespaceScope::Named(ns) => ns == config_ns,
        };
        ns_matches && self.host.matches(host)
    }
}

impl fmt::Display for ScopedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            NamespaceScope::Any => write!(f, "*/{}", self.host),
            NamespaceScope::Local => write!(f, "./{}", self.host),
            NamespaceScope::None => write!(f, "~/{}", self.host),
            NamespaceScope::Named(ns) => write!(f, "{}/{}", ns, self.host),
        }
    }
}

// === impl NamespaceScope ===

impl NamespaceScope {
    fn parse(ns: &str) -> Result<Self> {
        Ok(match ns {
            "*" => Self::Any,
            "." => Self::Local,
            "~" => Self::None,
            "" => bail!("empty namespace"),
            ns => Self::Named(ns.to_string()),
        })
    }
}

// === impl GatewayListener ===

impl GatewayListener {
    /// Returns true if a server on this gateway exposes `host` (declared in `config_ns`). When a
    /// port is given, only servers on that port are considered.
    pub fn admits(&self, host: &str, port: Option<NonZeroU16>, config_ns: &str) -> bool {
        self.servers
            .iter()
            .filter(|s| port.map_or(true, |p| p == s.port))
            .flat_map(|s| s.hosts.iter())
            .any(|h| h.admits(host, config_ns, &self.meta.namespace))
    }
}
