use crate::{resource_meta, MeshInfo};
use anyhow::{Context, Result};
use mesh_policy_core::scope::{OutboundTrafficPolicy, ProxyScope, ScopedHost};
use mesh_policy_k8s_api::networking::{
    sidecar::{self as api, OutboundTrafficPolicyMode},
    Sidecar,
};

pub fn proxy_scope(sidecar: Sidecar, mesh: &MeshInfo) -> Result<ProxyScope> {
    let meta = resource_meta(&sidecar.metadata, mesh);
    let api::SidecarSpec {
        workload_selector,
        egress,
        outbound_traffic_policy,
    } = sidecar.spec;

    let egress_hosts = egress
        .into_iter()
        .flat_map(|listener| listener.hosts)
        .map(|host| {
            ScopedHost::parse(&host).with_context(|| format!("invalid egress host {host:?}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ProxyScope {
        meta,
        selector: workload_selector
            .map(|s| s.labels)
            .filter(|labels| !labels.is_empty()),
        egress_hosts,
        outbound_policy: outbound_traffic_policy.map(|p| match p.mode {
            OutboundTrafficPolicyMode::AllowAny => OutboundTrafficPolicy::AllowAny,
            OutboundTrafficPolicyMode::RegistryOnly => OutboundTrafficPolicy::RegistryOnly,
        }),
    })
}
