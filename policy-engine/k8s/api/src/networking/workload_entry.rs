use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes a single non-Kubernetes workload, such as a VM, so that it can be selected by a
/// `ServiceEntry`. The same shape is used for a `ServiceEntry`'s inline endpoints.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1",
    kind = "WorkloadEntry",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEntrySpec {
    /// An IP address or DNS name.
    pub address: Option<String>,

    /// Port name to port number overrides.
    #[serde(default)]
    pub ports: BTreeMap<String, u32>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    pub network: Option<String>,

    pub locality: Option<String>,

    /// The load balancing weight of this endpoint. Defaults to 1.
    pub weight: Option<u32>,

    pub service_account: Option<String>,
}
