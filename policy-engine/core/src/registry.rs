use crate::{ExportTo, HostMatch, ResourceMeta, Workload};
use mesh_policy_k8s_api::labels::Labels;
use std::{fmt, num::NonZeroU16};

/// A compiled `ServiceEntry`: hosts known to the service registry and their endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceRegistration {
    pub meta: ResourceMeta,
    pub hosts: Vec<HostMatch>,
    pub ports: Vec<ServicePort>,
    pub location: Location,
    pub resolution: Resolution,
    pub endpoints: Vec<Endpoint>,
    pub export_to: ExportTo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicePort {
    pub number: NonZeroU16,
    pub name: String,
    pub protocol: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Location {
    External,
    #[default]
    Internal,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Resolution {
    /// Connections are forwarded to the requested address as-is.
    Passthrough,
    #[default]
    Static,
    Dns,
    DnsRoundRobin,
}

/// A single backend of a registered service.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    /// An IP address or DNS name.
    pub address: String,
    pub port: Option<NonZeroU16>,
    pub labels: Labels,

    /// The endpoint's share of load balancing among its peers.
    pub weight: u32,
    pub service_account: Option<String>,

    /// The namespace of the workload backing this endpoint.
    pub namespace: String,
}

/// Identifies an endpoint of a destination host for health tracking.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub host: String,

    /// The endpoint's address and, if known, port: e.g. `10.0.0.1:8080`.
    pub addr: String,
}

// === impl ServiceRegistration ===

impl ServiceRegistration {
    pub fn matches_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.matches(host))
    }
}

// === impl Endpoint ===

impl Endpoint {
    pub const DEFAULT_WEIGHT: u32 = 1;

    pub fn key(&self, host: &str) -> EndpointKey {
        let addr = match self.port {
            Some(port) if self.address.contains(':') => format!("[{}]:{}", self.address, port),
            Some(port) => format!("{}:{}", self.address, port),
            None => self.address.clone(),
        };
        EndpointKey {
            host: host.to_string(),
            addr,
        }
    }

    /// The workload that requests sent to this endpoint are addressed to.
    pub fn workload(&self) -> Workload {
        Workload {
            namespace: self.namespace.clone(),
            labels: self.labels.clone(),
        }
    }
}

// === impl EndpointKey ===

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.host, self.addr)
    }
}
