#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authz;
pub mod destination;
mod error;
mod host_match;
pub mod http_route;
mod meta;
mod network_match;
pub mod registry;
mod request;
pub mod retry;
pub mod scope;
mod value_match;

pub use self::{
    error::RouteError,
    host_match::{HostMatch, Specificity},
    meta::{ExportTo, ResourceMeta},
    network_match::NetworkMatch,
    request::{Request, Source, Workload},
    value_match::ValueMatch,
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
pub use mesh_policy_k8s_api::labels::{Labels, Map as LabelMap};

/// The reserved gateway name that refers to every sidecar in the mesh.
pub const MESH_GATEWAY: &str = "mesh";
