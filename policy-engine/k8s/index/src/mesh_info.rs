use mesh_policy_core::scope::OutboundTrafficPolicy;

/// Holds mesh-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshInfo {
    /// E.g. "cluster.local"
    pub cluster_domain: String,

    /// The namespace whose unselected policies apply across the mesh.
    pub root_namespace: String,

    /// The namespace of resources that do not set one.
    pub default_namespace: String,

    /// Applies to workloads whose `Sidecar` does not set a policy.
    pub outbound_traffic_policy: OutboundTrafficPolicy,
}

// === impl MeshInfo ===

impl MeshInfo {
    /// Qualifies a short service name (one without dots) relative to `ns`. Other hosts are
    /// returned lower-cased and without a trailing dot.
    pub fn qualify(&self, host: &str, ns: &str) -> String {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.contains('.') || host.contains('*') || host.parse::<std::net::IpAddr>().is_ok() {
            return host;
        }
        self.service_host(ns, &host)
    }

    pub fn service_host(&self, ns: &str, name: &str) -> String {
        format!("{}.{}.svc.{}", name, ns, self.cluster_domain)
    }
}

impl Default for MeshInfo {
    fn default() -> Self {
        Self {
            cluster_domain: "cluster.local".to_string(),
            root_namespace: "istio-system".to_string(),
            default_namespace: "default".to_string(),
            outbound_traffic_policy: OutboundTrafficPolicy::AllowAny,
        }
    }
}
