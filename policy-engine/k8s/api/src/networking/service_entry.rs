use super::workload_entry::WorkloadEntrySpec;
use crate::labels::WorkloadSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Adds entries to the mesh's service registry.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1",
    kind = "ServiceEntry",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntrySpec {
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub ports: Vec<ServicePort>,

    pub location: Option<Location>,

    pub resolution: Option<Resolution>,

    /// Inline endpoints. Mutually exclusive with `workloadSelector`.
    #[serde(default)]
    pub endpoints: Vec<WorkloadEntrySpec>,

    /// Selects `WorkloadEntry` resources in the same namespace as endpoints.
    pub workload_selector: Option<WorkloadSelector>,

    #[serde(default)]
    pub export_to: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub number: u32,
    pub protocol: Option<String>,
    pub name: String,
    pub target_port: Option<u32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Location {
    MeshExternal,
    MeshInternal,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Resolution {
    #[serde(rename = "NONE")]
    Passthrough,
    #[serde(rename = "STATIC")]
    Static,
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "DNS_ROUND_ROBIN")]
    DnsRoundRobin,
}
