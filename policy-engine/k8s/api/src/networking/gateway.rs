use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes a load balancer at the edge of the mesh and the hosts it admits.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1",
    kind = "Gateway",
    namespaced
)]
pub struct GatewaySpec {
    #[serde(default)]
    pub servers: Vec<Server>,

    /// Selects the gateway workloads by label.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Server {
    pub port: Port,

    /// Hosts exposed by this server, optionally prefixed by a namespace (`ns/host`).
    #[serde(default)]
    pub hosts: Vec<String>,

    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Port {
    pub number: u32,
    pub protocol: String,
    pub name: Option<String>,
}
