use crate::duration::MeshDuration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configures how requests addressed to a set of hosts are routed.
///
/// Routing rules are evaluated in order and the first matching rule wins.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1",
    kind = "VirtualService",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    /// Destination hosts to which traffic is being sent. Short names are interpreted relative to
    /// the resource's namespace.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Gateways and sidecars that should apply these routes. The reserved name `mesh` refers to
    /// all sidecars in the mesh; it is implied when the list is empty.
    #[serde(default)]
    pub gateways: Vec<String>,

    #[serde(default)]
    pub http: Vec<HttpRoute>,

    #[serde(default)]
    pub export_to: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    pub name: Option<String>,

    /// Match conditions. Conditions within a single block are AND'ed; blocks are OR'ed.
    #[serde(default, rename = "match")]
    pub matches: Vec<HttpMatchRequest>,

    #[serde(default)]
    pub route: Vec<HttpRouteDestination>,

    pub timeout: Option<MeshDuration>,

    pub retries: Option<HttpRetry>,

    pub fault: Option<HttpFaultInjection>,

    pub mirror: Option<Destination>,

    pub mirror_percentage: Option<Percent>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatchRequest {
    pub name: Option<String>,
    pub uri: Option<StringMatch>,
    pub method: Option<StringMatch>,
    pub authority: Option<StringMatch>,
    #[serde(default)]
    pub headers: BTreeMap<String, StringMatch>,
    #[serde(default)]
    pub without_headers: BTreeMap<String, StringMatch>,
    #[serde(default)]
    pub query_params: BTreeMap<String, StringMatch>,
    pub port: Option<u32>,
    #[serde(default)]
    pub source_labels: BTreeMap<String, String>,
    pub source_namespace: Option<String>,
    #[serde(default)]
    pub gateways: Vec<String>,
    #[serde(default)]
    pub ignore_uri_case: bool,
}

/// Matches a string value. At most one of the fields may be set; an empty match tests only for
/// the presence of a value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct StringMatch {
    pub exact: Option<String>,
    pub prefix: Option<String>,
    pub regex: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct HttpRouteDestination {
    pub destination: Destination,
    pub weight: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Destination {
    pub host: String,
    pub subset: Option<String>,
    pub port: Option<PortSelector>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct PortSelector {
    pub number: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRetry {
    /// The number of retries, not counting the initial attempt.
    pub attempts: Option<u32>,
    pub per_try_timeout: Option<MeshDuration>,

    /// A comma-separated list of retry conditions.
    pub retry_on: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct HttpFaultInjection {
    pub delay: Option<Delay>,
    pub abort: Option<Abort>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Delay {
    pub fixed_delay: MeshDuration,
    pub percentage: Option<Percent>,

    /// Deprecated integer form of `percentage`.
    pub percent: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Abort {
    pub http_status: Option<u32>,
    pub grpc_status: Option<String>,
    pub percentage: Option<Percent>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Percent {
    pub value: f64,
}
