use crate::labels::WorkloadSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Scopes the configuration visible to a set of workloads and sets how they treat traffic for
/// hosts outside the service registry.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1",
    kind = "Sidecar",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    /// Selects the workloads this sidecar applies to. A sidecar without a selector applies to
    /// every workload in its namespace.
    pub workload_selector: Option<WorkloadSelector>,

    #[serde(default)]
    pub egress: Vec<EgressListener>,

    pub outbound_traffic_policy: Option<OutboundTrafficPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EgressListener {
    /// Hosts in `namespace/dnsName` form.
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct OutboundTrafficPolicy {
    pub mode: OutboundTrafficPolicyMode,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundTrafficPolicyMode {
    RegistryOnly,
    AllowAny,
}
