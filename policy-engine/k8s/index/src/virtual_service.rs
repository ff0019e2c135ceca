use crate::{http_route, resource_meta, MeshInfo};
use anyhow::{bail, ensure, Context, Result};
use mesh_policy_core::{
    http_route::{Destination, HttpRoute, Mirror, RouteSet, WeightedDestination},
    HostMatch, MESH_GATEWAY,
};
use mesh_policy_k8s_api::networking::{virtual_service as api, VirtualService};
use std::sync::Arc;

pub fn route_set(vs: VirtualService, mesh: &MeshInfo) -> Result<RouteSet> {
    let meta = resource_meta(&vs.metadata, mesh);
    let ns = meta.namespace.clone();
    let api::VirtualServiceSpec {
        hosts,
        gateways,
        http,
        export_to,
    } = vs.spec;

    ensure!(!hosts.is_empty(), "hosts must not be empty");
    let hosts = hosts
        .iter()
        .map(|h| HostMatch::parse(&mesh.qualify(h, &ns)))
        .collect();

    let gateway_ref = |gw: &str| normalize_gateway(gw, &ns);
    let gateways = if gateways.is_empty() {
        vec![MESH_GATEWAY.to_string()]
    } else {
        gateways.iter().map(|gw| gateway_ref(gw)).collect()
    };

    let rules = http
        .into_iter()
        .enumerate()
        .map(|(idx, route)| {
            let name = route.name.clone();
            http_rule(route, &ns, mesh, &gateway_ref)
                .map(Arc::new)
                .with_context(|| match name {
                    Some(name) => format!("http[{idx}] ({name})"),
                    None => format!("http[{idx}]"),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RouteSet {
        meta,
        hosts,
        gateways,
        export_to: export_to.into(),
        rules,
    })
}

/// Gateways are referred to as `namespace/name`; a bare name refers to a gateway in the same
/// namespace as the referring resource.
pub(crate) fn normalize_gateway(gw: &str, ns: &str) -> String {
    if gw == MESH_GATEWAY || gw.contains('/') {
        gw.to_string()
    } else {
        format!("{}/{}", ns, gw)
    }
}

fn http_rule(
    api::HttpRoute {
        name,
        matches,
        route,
        timeout,
        retries,
        fault,
        mirror,
        mirror_percentage,
    }: api::HttpRoute,
    ns: &str,
    mesh: &MeshInfo,
    gateway_ref: &impl Fn(&str) -> String,
) -> Result<HttpRoute> {
    let matches = matches
        .into_iter()
        .enumerate()
        .map(|(idx, m)| {
            http_route::try_match(m, gateway_ref).with_context(|| format!("match[{idx}]"))
        })
        .collect::<Result<Vec<_>>>()?;

    let destinations = weighted_destinations(route, ns, mesh)?;

    let fault = fault
        .map(http_route::fault_injection)
        .transpose()
        .context("fault")?;
    let retry = http_route::retry_policy(retries).context("retries")?;
    let mirror = mirror
        .map(|d| {
            Ok::<_, anyhow::Error>(Mirror {
                destination: destination(d, ns, mesh)?,
                percentage: http_route::percentage(mirror_percentage, None)?,
            })
        })
        .transpose()
        .context("mirror")?;

    Ok(HttpRoute {
        name,
        matches,
        destinations,
        timeout: timeout.map(Into::into).filter(|t: &std::time::Duration| !t.is_zero()),
        retry,
        fault,
        mirror,
    })
}

/// A lone destination may omit its weight. Otherwise, weights must be set and sum to 100.
fn weighted_destinations(
    route: Vec<api::HttpRouteDestination>,
    ns: &str,
    mesh: &MeshInfo,
) -> Result<Vec<WeightedDestination>> {
    ensure!(!route.is_empty(), "route must have at least one destination");

    if let [api::HttpRouteDestination {
        destination: d,
        weight: None,
    }] = route.as_slice()
    {
        return Ok(vec![WeightedDestination {
            destination: destination(d.clone(), ns, mesh)?,
            weight: 100,
        }]);
    }

    if route.iter().all(|r| r.weight.is_none()) {
        bail!("weights must be set when a route has more than one destination");
    }

    let total = route
        .iter()
        .map(|r| u64::from(r.weight.unwrap_or(0)))
        .sum::<u64>();
    ensure!(total == 100, "route weights must sum to 100, got {total}");

    route
        .into_iter()
        .map(|r| {
            Ok(WeightedDestination {
                destination: destination(r.destination, ns, mesh)?,
                weight: r.weight.unwrap_or(0),
            })
        })
        .collect()
}

fn destination(
    api::Destination { host, subset, port }: api::Destination,
    ns: &str,
    mesh: &MeshInfo,
) -> Result<Destination> {
    ensure!(!host.is_empty(), "destination host must be set");
    ensure!(!host.contains('*'), "destination host {host:?} must not be a wildcard");
    Ok(Destination {
        host: mesh.qualify(&host, ns),
        subset,
        port: port
            .map(|api::PortSelector { number }| http_route::port_number(number))
            .transpose()?,
    })
}
