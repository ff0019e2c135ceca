use crate::{virtual_service::normalize_gateway, Snapshot};
use mesh_policy_core::{
    authz::AuthorizationPolicy,
    destination::DestinationPolicy,
    http_route::{Destination, HttpRoute, RouteSet},
    registry::{Endpoint, EndpointKey, ServiceRegistration},
    scope::{GatewayListener, OutboundTrafficPolicy, ProxyScope},
    HostMatch, Labels, Request, ResourceMeta, RouteError, Workload, MESH_GATEWAY,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// The route selected for a request.
#[derive(Clone, Debug)]
pub struct RouteMatch {
    /// The fully-qualified host the request was resolved to.
    pub host: String,
    pub source: RouteSource,
    pub route: Arc<HttpRoute>,
}

/// Where a [`RouteMatch`] came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteSource {
    /// A rule in a `VirtualService`, identified by its index in the `http` list.
    VirtualService { meta: ResourceMeta, rule: usize },

    /// The default route for a registered host without a `VirtualService`.
    Registry { meta: ResourceMeta },

    /// The host is unknown and the outbound traffic policy allows any host.
    Passthrough,
}

/// A rule that applies to a request.
#[derive(Clone, Debug)]
pub struct MatchedRule {
    pub virtual_service: ResourceMeta,
    pub host: HostMatch,
    pub index: usize,
    pub route: Arc<HttpRoute>,
}

/// The attributes of a request that determine which configuration it may observe.
struct Context<'s> {
    host: String,
    client_ns: &'s str,

    /// `mesh` or `namespace/name`.
    gateway_name: String,
    gateway: Option<&'s GatewayListener>,
    scope: Option<&'s ProxyScope>,
}

// === impl Snapshot ===

impl Snapshot {
    /// Selects the route for a request.
    ///
    /// Rules of the `VirtualService`s bound to the most specific matching host are tried in
    /// priority order. A host without a `VirtualService` is routed to as-is if it is in the
    /// service registry. Unknown hosts are handled according to the outbound traffic policy.
    pub fn route_for(&self, req: &Request) -> Result<RouteMatch, RouteError> {
        let ctx = self.context(req)?;

        if let Some(candidates) = self.candidates(&ctx, req) {
            for (rs, index, route) in candidates {
                if route.matches(req, &ctx.gateway_name) {
                    debug!(host = %ctx.host, vs = %rs.meta, rule = index, "matched route");
                    return Ok(RouteMatch {
                        host: ctx.host,
                        source: RouteSource::VirtualService {
                            meta: rs.meta.clone(),
                            rule: index,
                        },
                        route: route.clone(),
                    });
                }
            }
            debug!(host = %ctx.host, "no rule matched the request");
            return Err(RouteError::NotFound { host: ctx.host });
        }

        if ctx.gateway.is_some() {
            debug!(host = %ctx.host, gateway = %ctx.gateway_name, "no route bound to gateway");
            return Err(RouteError::NotFound { host: ctx.host });
        }

        if let Some(reg) = self.registrations_for(&ctx).into_iter().next() {
            trace!(host = %ctx.host, service_entry = %reg.meta, "using registry route");
            return Ok(RouteMatch {
                route: Arc::new(HttpRoute::default_to(Destination::new(ctx.host.clone()))),
                host: ctx.host,
                source: RouteSource::Registry {
                    meta: reg.meta.clone(),
                },
            });
        }

        let policy = self.outbound_policy(ctx.client_ns, &req.source.labels);
        debug!(host = %ctx.host, %policy, "host is not registered");
        match policy {
            OutboundTrafficPolicy::AllowAny => Ok(RouteMatch {
                route: Arc::new(HttpRoute::default_to(Destination::new(ctx.host.clone()))),
                host: ctx.host,
                source: RouteSource::Passthrough,
            }),
            OutboundTrafficPolicy::RegistryOnly => Err(RouteError::BlackHole { host: ctx.host }),
        }
    }

    /// Lists every rule that matches the request, in the order they are tried.
    pub fn matching_rules(&self, req: &Request) -> Vec<MatchedRule> {
        let ctx = match self.context(req) {
            Ok(ctx) => ctx,
            Err(_) => return vec![],
        };
        let resolved = match self.route_sets.resolve(&ctx.host, |rs| self.is_visible(&ctx, req, rs)) {
            Some(resolved) => resolved,
            None => return vec![],
        };
        let host = resolved.host.clone();
        resolved
            .values
            .into_iter()
            .flat_map(|rs| {
                rs.rules
                    .iter()
                    .enumerate()
                    .map(move |(index, route)| (rs, index, route))
            })
            .filter(|(_, _, route)| route.matches(req, &ctx.gateway_name))
            .map(|(rs, index, route)| MatchedRule {
                virtual_service: rs.meta.clone(),
                host: host.clone(),
                index,
                route: route.clone(),
            })
            .collect()
    }

    /// Finds the `DestinationRule` for a host, as seen from `client_ns`. A rule in the client's
    /// namespace is preferred over rules in other namespaces.
    pub fn destination_policy(&self, host: &str, client_ns: &str) -> Option<&Arc<DestinationPolicy>> {
        let resolved = self.destination_policies.resolve(host, |dp| {
            dp.export_to.is_visible(&dp.meta.namespace, client_ns)
        })?;
        resolved
            .values
            .iter()
            .find(|dp| dp.meta.namespace == client_ns)
            .or_else(|| resolved.values.first())
            .copied()
    }

    /// Returns true if `host` is in the service registry as seen from `client_ns`.
    pub fn is_registered(&self, host: &str, client_ns: &str) -> bool {
        self.registry
            .resolve(host, |reg| reg.export_to.is_visible(&reg.meta.namespace, client_ns))
            .is_some()
    }

    /// Lists the endpoints of a destination. When the destination names a subset, only
    /// endpoints carrying the subset's labels are returned.
    pub fn endpoints(&self, dst: &Destination, client_ns: &str) -> Vec<&Endpoint> {
        let resolved = match self.registry.resolve(&dst.host, |reg| {
            reg.export_to.is_visible(&reg.meta.namespace, client_ns)
        }) {
            Some(resolved) => resolved,
            None => return vec![],
        };

        let subset_labels = match dst.subset.as_deref() {
            None => None,
            Some(name) => match self
                .destination_policy(&dst.host, client_ns)
                .and_then(|dp| dp.subset(name))
            {
                Some(subset) => Some(&subset.labels),
                None => return vec![],
            },
        };

        resolved
            .values
            .into_iter()
            .flat_map(|reg| reg.endpoints.iter())
            .filter(|ep| subset_labels.map_or(true, |labels| ep.labels.contains_all(labels)))
            .collect()
    }

    /// Identifies every endpoint of every registered host.
    pub fn endpoint_keys(&self) -> impl Iterator<Item = EndpointKey> + '_ {
        self.registrations.iter().flat_map(|reg| {
            reg.hosts
                .iter()
                .filter_map(|h| match h {
                    HostMatch::Exact(host) => Some(host),
                    _ => None,
                })
                .flat_map(move |host| reg.endpoints.iter().map(move |ep| ep.key(host)))
        })
    }

    /// Lists the authorization policies that apply to a workload, in priority order.
    pub fn authorization_policies_for(&self, workload: &Workload) -> Vec<&Arc<AuthorizationPolicy>> {
        self.authorization_policies
            .iter()
            .filter(|p| p.applies_to(workload, &self.mesh.root_namespace))
            .collect()
    }

    /// Finds the `Sidecar` that applies to a workload: one that selects it in its namespace, then
    /// one without a selector in its namespace, then one without a selector in the root
    /// namespace.
    pub fn scope_for(&self, ns: &str, labels: &Labels) -> Option<&Arc<ProxyScope>> {
        let in_ns = || self.scopes.iter().filter(move |s| s.meta.namespace == ns);
        in_ns()
            .find(|s| s.selector.is_some() && s.selects(ns, labels))
            .or_else(|| in_ns().find(|s| s.selector.is_none()))
            .or_else(|| self.root_scope())
    }

    /// The outbound traffic policy of a workload's `Sidecar`, then of the root namespace's
    /// `Sidecar`, then of the mesh.
    pub fn outbound_policy(&self, ns: &str, labels: &Labels) -> OutboundTrafficPolicy {
        self.scope_for(ns, labels)
            .and_then(|s| s.outbound_policy)
            .or_else(|| self.root_scope().and_then(|s| s.outbound_policy))
            .unwrap_or(self.mesh.outbound_traffic_policy)
    }

    /// Looks up a gateway by `namespace/name`.
    pub fn gateway(&self, name: &str) -> Option<&Arc<GatewayListener>> {
        self.gateways.get(name)
    }

    fn root_scope(&self) -> Option<&Arc<ProxyScope>> {
        self.scopes
            .iter()
            .find(|s| s.meta.namespace == self.mesh.root_namespace && s.selector.is_none())
    }

    fn context<'s>(&'s self, req: &'s Request) -> Result<Context<'s>, RouteError> {
        let client_ns = req
            .source
            .namespace
            .as_deref()
            .unwrap_or(&self.mesh.default_namespace);
        let host = self.mesh.qualify(req.host(), client_ns);

        let gateway_name = match req.gateway.as_deref() {
            None | Some(MESH_GATEWAY) => {
                return Ok(Context {
                    scope: self.scope_for(client_ns, &req.source.labels).map(|s| &**s),
                    gateway_name: MESH_GATEWAY.to_string(),
                    gateway: None,
                    client_ns,
                    host,
                })
            }
            Some(gw) => normalize_gateway(gw, client_ns),
        };

        match self.gateways.get(&gateway_name) {
            Some(gateway) => Ok(Context {
                host,
                client_ns: &gateway.meta.namespace,
                gateway_name,
                gateway: Some(&**gateway),
                scope: None,
            }),
            None => {
                debug!(gateway = %gateway_name, "unknown gateway");
                Err(RouteError::NotFound { host })
            }
        }
    }

    fn is_visible(&self, ctx: &Context<'_>, req: &Request, rs: &RouteSet) -> bool {
        let config_ns = &rs.meta.namespace;
        if !rs.gateways.iter().any(|gw| *gw == ctx.gateway_name) {
            return false;
        }
        match ctx.gateway {
            Some(gateway) => gateway.admits(&ctx.host, req.port(), config_ns),
            None => {
                rs.export_to.is_visible(config_ns, ctx.client_ns)
                    && ctx.scope.map_or(true, |s| s.admits(&ctx.host, config_ns))
            }
        }
    }

    fn candidates<'s>(
        &'s self,
        ctx: &Context<'_>,
        req: &Request,
    ) -> Option<impl Iterator<Item = (&'s Arc<RouteSet>, usize, &'s Arc<HttpRoute>)>> {
        let resolved = self
            .route_sets
            .resolve(&ctx.host, |rs| self.is_visible(ctx, req, rs))?;
        Some(resolved.values.into_iter().flat_map(|rs| {
            rs.rules
                .iter()
                .enumerate()
                .map(move |(index, route)| (rs, index, route))
        }))
    }

    fn registrations_for(&self, ctx: &Context<'_>) -> Vec<&Arc<ServiceRegistration>> {
        self.registry
            .resolve(&ctx.host, |reg| {
                let ns = &reg.meta.namespace;
                reg.export_to.is_visible(ns, ctx.client_ns)
                    && ctx.scope.map_or(true, |s| s.admits(&ctx.host, ns))
            })
            .map(|resolved| resolved.values)
            .unwrap_or_default()
    }
}
