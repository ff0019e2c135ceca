use crate::{http_route::port_number, resource_meta, MeshInfo};
use anyhow::{ensure, Context, Result};
use mesh_policy_core::scope::{GatewayListener, GatewayServer, ScopedHost};
use mesh_policy_k8s_api::networking::{gateway as api, Gateway};

pub fn listener(gw: Gateway, mesh: &MeshInfo) -> Result<GatewayListener> {
    let meta = resource_meta(&gw.metadata, mesh);
    let api::GatewaySpec { servers, selector } = gw.spec;

    ensure!(!servers.is_empty(), "servers must not be empty");
    let servers = servers
        .into_iter()
        .enumerate()
        .map(|(idx, server)| server_config(server).with_context(|| format!("servers[{idx}]")))
        .collect::<Result<Vec<_>>>()?;

    Ok(GatewayListener {
        meta,
        selector,
        servers,
    })
}

fn server_config(api::Server { port, hosts, name }: api::Server) -> Result<GatewayServer> {
    ensure!(!hosts.is_empty(), "hosts must not be empty");
    let hosts = hosts
        .iter()
        .map(|h| ScopedHost::parse(h))
        .collect::<Result<Vec<_>>>()?;
    Ok(GatewayServer {
        name,
        port: port_number(port.number)?,
        protocol: port.protocol,
        hosts,
    })
}
