//! Mesh Policy Index
//!
//! The index compiles mesh configuration documents into immutable [`Snapshot`]s and answers
//! lookups against them. It understands the following resources:
//!
//! - A `VirtualService` binds HTTP routing rules to one or more hosts, scoped by gateway and
//!   `exportTo`.
//! - A `DestinationRule` describes the subsets of a host along with their connection-pool and
//!   outlier-detection policies.
//! - A `ServiceEntry` adds a host (and, optionally, its endpoints) to the service registry.
//!   `WorkloadEntry` resources provide endpoints to entries that select them.
//! - A `Sidecar` limits the hosts a workload may reach and sets its outbound traffic policy.
//! - A `Gateway` exposes hosts on an ingress listener.
//! - An `AuthorizationPolicy` admits or denies requests to the workloads it selects.
//!
//! ```text
//! [ VirtualService ] -> [ host ] <- [ DestinationRule ] -> [ subset ] -> [ ServiceEntry endpoints ]
//! ```
//!
//! Snapshots are built by a [`Writer`] as a whole and published over a watch. A configuration
//! that fails validation is never published, so [`Reader`]s always observe the last good
//! snapshot.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authorization_policy;
pub mod destination_rule;
pub mod gateway;
mod host_index;
pub mod http_route;
mod lookup;
mod mesh_info;
pub mod metrics;
pub mod service_entry;
pub mod sidecar;
mod snapshot;
mod store;
pub mod virtual_service;


pub use self::{
    lookup::{MatchedRule, RouteMatch, RouteSource},
    mesh_info::MeshInfo,
    snapshot::{InvalidResources, ResourceCounts, Snapshot},
    store::{pair, Reader, Writer},
};
use mesh_policy_core::ResourceMeta;
use mesh_policy_k8s_api::ObjectMeta;

/// Extracts the identity of a resource. Resources without a namespace are placed in the mesh's
/// default namespace.
pub(crate) fn resource_meta(meta: &ObjectMeta, mesh: &MeshInfo) -> ResourceMeta {
    ResourceMeta {
        namespace: meta
            .namespace
            .clone()
            .unwrap_or_else(|| mesh.default_namespace.clone()),
        name: meta.name.clone().unwrap_or_default(),
        creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
    }
}
