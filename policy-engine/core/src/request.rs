use http::{HeaderMap, Method};
use mesh_policy_k8s_api::labels::Labels;
use std::{net::IpAddr, num::NonZeroU16};

/// The attributes of a request that routing and authorization decisions are made on.
#[derive(Clone, Debug)]
pub struct Request {
    /// The `:authority` (or `Host`) of the request, optionally including a port.
    pub authority: String,

    /// The destination port, when it is not part of the authority.
    pub port: Option<NonZeroU16>,

    pub method: Method,

    /// The request path, optionally including a query string.
    pub path: String,

    pub headers: HeaderMap,

    pub source: Source,

    /// The `namespace/name` of the gateway handling the request, if any. Requests without a
    /// gateway are handled by the client's sidecar.
    pub gateway: Option<String>,

    /// The TLS server name of the connection, if any.
    pub sni: Option<String>,
}

/// Describes the client that issued a request.
#[derive(Clone, Debug, Default)]
pub struct Source {
    pub namespace: Option<String>,

    /// The peer's mTLS identity, e.g. `cluster.local/ns/default/sa/productpage`.
    pub principal: Option<String>,

    /// The identity of the end user, as `issuer/subject`.
    pub request_principal: Option<String>,

    /// The address of the peer connection.
    pub ip: Option<IpAddr>,

    /// The original client address, as determined from `X-Forwarded-For`.
    pub remote_ip: Option<IpAddr>,

    pub labels: Labels,
}

/// A workload that requests are addressed to.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub namespace: String,
    pub labels: Labels,
}

// === impl Request ===

impl Request {
    pub fn new(method: Method, authority: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            port: None,
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            source: Source::default(),
            gateway: None,
            sni: None,
        }
    }

    /// The requested host, without a port and without a trailing dot.
    pub fn host(&self) -> &str {
        let authority = self.authority.as_str();
        let host = match authority.rsplit_once(':') {
            // Bracketed IPv6 literals contain colons.
            Some((host, port)) if !port.contains(']') && port.parse::<u16>().is_ok() => host,
            _ => authority,
        };
        host.trim_end_matches('.')
    }

    /// The destination port: either set explicitly or taken from the authority.
    pub fn port(&self) -> Option<NonZeroU16> {
        self.port.or_else(|| {
            let (_, port) = self.authority.rsplit_once(':')?;
            port.parse().ok()
        })
    }

    /// The request path without its query string.
    pub fn path_only(&self) -> &str {
        match self.path.split_once('?') {
            Some((path, _)) => path,
            None => &self.path,
        }
    }

    /// Iterates over the query parameters of the request. Values are not percent-decoded.
    pub fn query_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.path
            .split_once('?')
            .map(|(_, query)| query)
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
    }

    /// Returns all values of a header that are valid strings.
    pub fn header_values<'r>(&'r self, name: &str) -> impl Iterator<Item = &'r str> + 'r {
        self.headers
            .get_all(name)
            .into_iter()
            .filter_map(|v| v.to_str().ok())
    }
}
