use crate::{
    authorization_policy::authorization_policy, destination_rule::destination_policy,
    gateway::listener, host_index::HostIndex, service_entry::registration, sidecar::proxy_scope,
    virtual_service::route_set, MeshInfo,
};
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, Result};
use mesh_policy_core::{
    authz::AuthorizationPolicy,
    destination::DestinationPolicy,
    http_route::{Destination, RouteSet},
    registry::ServiceRegistration,
    scope::{GatewayListener, ProxyScope},
    ResourceMeta,
};
use mesh_policy_k8s_api::{networking::WorkloadEntry, Document, ResourceKey};
use std::{collections::BTreeMap, fmt, sync::Arc};
use tracing::debug;

/// An immutable, validated view of the mesh configuration.
#[derive(Debug)]
pub struct Snapshot {
    pub(crate) mesh: Arc<MeshInfo>,
    generation: u64,

    pub(crate) route_sets: HostIndex<RouteSet>,
    pub(crate) destination_policies: HostIndex<DestinationPolicy>,
    pub(crate) registry: HostIndex<ServiceRegistration>,

    /// Sorted by priority.
    pub(crate) virtual_services: Vec<Arc<RouteSet>>,

    /// Sorted by priority.
    pub(crate) registrations: Vec<Arc<ServiceRegistration>>,

    /// Sorted by priority.
    pub(crate) authorization_policies: Vec<Arc<AuthorizationPolicy>>,

    /// Sorted by priority.
    pub(crate) scopes: Vec<Arc<ProxyScope>>,

    /// Indexed by `namespace/name`.
    pub(crate) gateways: HashMap<String, Arc<GatewayListener>>,

    ignored: Vec<ResourceKey>,
    counts: ResourceCounts,
}

/// The number of resources of each kind in a snapshot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub virtual_services: usize,
    pub destination_rules: usize,
    pub gateways: usize,
    pub service_entries: usize,
    pub workload_entries: usize,
    pub sidecars: usize,
    pub authorization_policies: usize,
    pub ignored: usize,
}

/// Every resource that failed validation while building a snapshot.
#[derive(Debug, thiserror::Error)]
#[error("{} invalid resource(s):{}", .0.len(), DisplayErrors(.0))]
pub struct InvalidResources(Vec<(ResourceKey, anyhow::Error)>);

struct DisplayErrors<'e>(&'e [(ResourceKey, anyhow::Error)]);

#[derive(Default)]
struct Compiled {
    route_sets: Vec<Arc<RouteSet>>,
    destination_policies: Vec<Arc<DestinationPolicy>>,
    registrations: Vec<Arc<ServiceRegistration>>,
    authorization_policies: Vec<Arc<AuthorizationPolicy>>,
    scopes: Vec<Arc<ProxyScope>>,
    gateways: Vec<Arc<GatewayListener>>,
    ignored: Vec<ResourceKey>,
    counts: ResourceCounts,
}

// === impl Snapshot ===

impl Snapshot {
    /// An empty snapshot, published before any configuration has been loaded.
    pub fn empty(mesh: Arc<MeshInfo>) -> Self {
        Self::from_compiled(mesh, 0, Compiled::default())
    }

    /// Compiles and validates a complete set of documents.
    ///
    /// Every invalid document is reported; the returned error downcasts to
    /// [`InvalidResources`].
    pub fn build<'d>(
        docs: impl IntoIterator<Item = &'d Document>,
        mesh: Arc<MeshInfo>,
        generation: u64,
    ) -> Result<Self> {
        let mut errors = Vec::new();

        let mut by_key = BTreeMap::new();
        for doc in docs {
            let key = doc.key(&mesh.default_namespace);
            if by_key.insert(key.clone(), doc).is_some() {
                errors.push((key, anyhow!("duplicate resource")));
            }
        }

        let workload_entries = by_key
            .values()
            .filter_map(|doc| match doc {
                Document::WorkloadEntry(we) => Some(we),
                _ => None,
            })
            .collect::<Vec<&WorkloadEntry>>();

        let mut compiled = Compiled::default();
        for (key, doc) in &by_key {
            let res = compiled.add(doc, &workload_entries, &mesh);
            if let Err(error) = res {
                errors.push((key.clone(), error));
            }
        }
        compiled.sort();

        let snapshot = Self::from_compiled(mesh, generation, compiled);
        errors.extend(snapshot.check_subsets());

        if !errors.is_empty() {
            errors.sort_by(|(a, _), (b, _)| a.cmp(b));
            return Err(InvalidResources(errors).into());
        }
        Ok(snapshot)
    }

    fn from_compiled(mesh: Arc<MeshInfo>, generation: u64, compiled: Compiled) -> Self {
        let Compiled {
            route_sets,
            destination_policies,
            registrations,
            authorization_policies,
            scopes,
            gateways,
            ignored,
            counts,
        } = compiled;

        let route_set_index = HostIndex::new(
            route_sets
                .iter()
                .map(|rs| (rs.hosts.as_slice(), rs.clone())),
        );
        let destination_policies = HostIndex::new(
            destination_policies
                .iter()
                .map(|dp| (std::slice::from_ref(&dp.host), dp.clone())),
        );
        let registry = HostIndex::new(
            registrations
                .iter()
                .map(|reg| (reg.hosts.as_slice(), reg.clone())),
        );

        Self {
            mesh,
            generation,
            route_sets: route_set_index,
            destination_policies,
            registry,
            virtual_services: route_sets,
            registrations,
            authorization_policies,
            scopes,
            gateways: gateways
                .into_iter()
                .map(|gw| (gw.meta.to_string(), gw))
                .collect(),
            ignored,
            counts,
        }
    }

    /// Every subset referenced by a route or mirror must be defined by the `DestinationRule`
    /// visible to the route's namespace.
    fn check_subsets(&self) -> Vec<(ResourceKey, anyhow::Error)> {
        let mut errors = Vec::new();
        for rs in &self.virtual_services {
            let ns = &rs.meta.namespace;
            for (idx, rule) in rs.rules.iter().enumerate() {
                let dsts = rule
                    .destinations
                    .iter()
                    .map(|wd| &wd.destination)
                    .chain(rule.mirror.as_ref().map(|m| &m.destination));
                for dst in dsts {
                    if let Err(error) = self.check_subset(dst, ns) {
                        errors.push((
                            key("VirtualService", &rs.meta),
                            error.context(format!("http[{idx}]")),
                        ));
                    }
                }
            }
        }
        errors
    }

    fn check_subset(&self, dst: &Destination, ns: &str) -> Result<()> {
        let subset = match dst.subset.as_deref() {
            Some(subset) => subset,
            None => return Ok(()),
        };
        let policy = self
            .destination_policy(&dst.host, ns)
            .ok_or_else(|| anyhow!("no DestinationRule defines subsets for {}", dst.host))?;
        if policy.subset(subset).is_none() {
            return Err(anyhow!(
                "subset {subset:?} of {} is not defined by DestinationRule {}",
                dst.host,
                policy.meta
            ));
        }
        Ok(())
    }

    pub fn mesh(&self) -> &MeshInfo {
        &self.mesh
    }

    /// Increases with each published snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn counts(&self) -> ResourceCounts {
        self.counts
    }

    /// Documents that were accepted but have no effect on decisions.
    pub fn ignored(&self) -> &[ResourceKey] {
        &self.ignored
    }
}

fn key(kind: &str, meta: &ResourceMeta) -> ResourceKey {
    ResourceKey {
        kind: kind.to_string(),
        namespace: meta.namespace.clone(),
        name: meta.name.clone(),
    }
}

// === impl Compiled ===

impl Compiled {
    fn add(
        &mut self,
        doc: &Document,
        workload_entries: &[&WorkloadEntry],
        mesh: &MeshInfo,
    ) -> Result<()> {
        match doc {
            Document::VirtualService(vs) => {
                self.counts.virtual_services += 1;
                self.route_sets.push(Arc::new(route_set(vs.clone(), mesh)?));
            }
            Document::DestinationRule(dr) => {
                self.counts.destination_rules += 1;
                self.destination_policies
                    .push(Arc::new(destination_policy(dr.clone(), mesh)?));
            }
            Document::Gateway(gw) => {
                self.counts.gateways += 1;
                self.gateways.push(Arc::new(listener(gw.clone(), mesh)?));
            }
            Document::ServiceEntry(se) => {
                self.counts.service_entries += 1;
                let reg = registration(se.clone(), workload_entries.iter().copied(), mesh)?;
                self.registrations.push(Arc::new(reg));
            }
            Document::WorkloadEntry(_) => {
                // Consumed by the service entries that select them.
                self.counts.workload_entries += 1;
            }
            Document::Sidecar(sc) => {
                self.counts.sidecars += 1;
                self.scopes.push(Arc::new(proxy_scope(sc.clone(), mesh)?));
            }
            Document::AuthorizationPolicy(ap) => {
                self.counts.authorization_policies += 1;
                self.authorization_policies
                    .push(Arc::new(authorization_policy(ap.clone(), mesh)?));
            }
            Document::Ignored(_) => {
                let key = doc.key(&mesh.default_namespace);
                debug!(%key, "ignoring document");
                self.counts.ignored += 1;
                self.ignored.push(key);
            }
        }
        Ok(())
    }

    fn sort(&mut self) {
        self.route_sets.sort_by(|a, b| a.meta.cmp(&b.meta));
        self.destination_policies.sort_by(|a, b| a.meta.cmp(&b.meta));
        self.registrations.sort_by(|a, b| a.meta.cmp(&b.meta));
        self.authorization_policies
            .sort_by(|a, b| a.meta.cmp(&b.meta));
        self.scopes.sort_by(|a, b| a.meta.cmp(&b.meta));
    }
}

// === impl ResourceCounts ===

impl ResourceCounts {
    /// Pairs each count with the kind of resource it counts.
    pub fn by_kind(&self) -> [(&'static str, usize); 8] {
        [
            ("VirtualService", self.virtual_services),
            ("DestinationRule", self.destination_rules),
            ("Gateway", self.gateways),
            ("ServiceEntry", self.service_entries),
            ("WorkloadEntry", self.workload_entries),
            ("Sidecar", self.sidecars),
            ("AuthorizationPolicy", self.authorization_policies),
            ("Ignored", self.ignored),
        ]
    }

    pub fn total(&self) -> usize {
        self.by_kind().iter().map(|(_, n)| n).sum()
    }
}

// === impl InvalidResources ===

impl InvalidResources {
    pub fn errors(&self) -> &[(ResourceKey, anyhow::Error)] {
        &self.0
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.0.iter().map(|(key, _)| key)
    }
}

impl fmt::Display for DisplayErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, error) in self.0 {
            write!(f, "\n  {key}: {error:#}")?;
        }
        Ok(())
    }
}
