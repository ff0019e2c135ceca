use crate::{http_route::port_number, resource_meta, MeshInfo};
use anyhow::{bail, ensure, Context, Result};
use mesh_policy_core::{
    registry::{Endpoint, Location, Resolution, ServicePort, ServiceRegistration},
    HostMatch, Labels,
};
use mesh_policy_k8s_api::networking::{
    service_entry as api, workload_entry::WorkloadEntrySpec, ServiceEntry, WorkloadEntry,
};

/// Compiles a `ServiceEntry`. Endpoints come either from the entry itself or from the
/// `WorkloadEntry` resources its selector matches in the same namespace.
pub fn registration<'w>(
    se: ServiceEntry,
    workload_entries: impl IntoIterator<Item = &'w WorkloadEntry>,
    mesh: &MeshInfo,
) -> Result<ServiceRegistration> {
    let meta = resource_meta(&se.metadata, mesh);
    let api::ServiceEntrySpec {
        hosts,
        addresses: _,
        ports,
        location,
        resolution,
        endpoints,
        workload_selector,
        export_to,
    } = se.spec;

    ensure!(!hosts.is_empty(), "hosts must not be empty");
    let hosts = hosts
        .iter()
        .map(|h| HostMatch::parse(&mesh.qualify(h, &meta.namespace)))
        .collect::<Vec<_>>();

    let ports = ports
        .into_iter()
        .map(
            |api::ServicePort {
                 number,
                 protocol,
                 name,
                 target_port: _,
             }| {
                Ok(ServicePort {
                    number: port_number(number)?,
                    name,
                    protocol,
                })
            },
        )
        .collect::<Result<Vec<_>>>()
        .context("ports")?;

    let resolution = match resolution {
        None | Some(api::Resolution::Passthrough) => Resolution::Passthrough,
        Some(api::Resolution::Static) => Resolution::Static,
        Some(api::Resolution::Dns) => Resolution::Dns,
        Some(api::Resolution::DnsRoundRobin) => Resolution::DnsRoundRobin,
    };
    let location = match location {
        Some(api::Location::MeshExternal) => Location::External,
        Some(api::Location::MeshInternal) | None => Location::Internal,
    };

    if !endpoints.is_empty() && workload_selector.is_some() {
        bail!("endpoints and workloadSelector are mutually exclusive");
    }

    let first_port = ports.first();
    let endpoints = match workload_selector {
        Some(selector) => workload_entries
            .into_iter()
            .filter(|we| {
                let ns = we.metadata.namespace.as_deref();
                ns.unwrap_or(&mesh.default_namespace) == meta.namespace
            })
            .filter(|we| selector.matches(&Labels::from(we.spec.labels.clone())))
            .filter_map(|we| {
                let name = we.metadata.name.as_deref().unwrap_or_default();
                endpoint(we.spec.clone(), first_port, &meta.namespace)
                    .with_context(|| format!("WorkloadEntry {name}"))
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?,
        None => endpoints
            .into_iter()
            .enumerate()
            .filter_map(|(idx, ep)| {
                endpoint(ep, first_port, &meta.namespace)
                    .with_context(|| format!("endpoints[{idx}]"))
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?,
    };

    if resolution == Resolution::Static {
        ensure!(
            !endpoints.is_empty(),
            "STATIC resolution requires at least one endpoint"
        );
        ensure!(
            hosts.iter().all(|h| !h.is_wildcard()),
            "STATIC resolution does not support wildcard hosts"
        );
    }

    Ok(ServiceRegistration {
        meta,
        hosts,
        ports,
        location,
        resolution,
        endpoints,
        export_to: export_to.into(),
    })
}

/// Converts an endpoint. Endpoints without an address are skipped.
fn endpoint(
    WorkloadEntrySpec {
        address,
        ports,
        labels,
        network: _,
        locality: _,
        weight,
        service_account,
    }: WorkloadEntrySpec,
    port: Option<&ServicePort>,
    ns: &str,
) -> Result<Option<Endpoint>> {
    let address = match address {
        Some(address) if !address.is_empty() => address,
        _ => return Ok(None),
    };

    let port = match port {
        Some(port) => match ports.get(&port.name) {
            Some(&number) => Some(port_number(number)?),
            None => Some(port.number),
        },
        None => None,
    };

    let weight = weight.unwrap_or(Endpoint::DEFAULT_WEIGHT);
    ensure!(weight > 0, "weight must be positive");

    Ok(Some(Endpoint {
        address,
        port,
        labels: labels.into(),
        weight,
        service_account,
        namespace: ns.to_string(),
    }))
}
