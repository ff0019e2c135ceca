//! JSON representations of requests and decisions, as accepted and produced by the CLI and the
//! admin server.

use crate::engine::{Decision, Routed};
use anyhow::{Context, Result};
use http::{header::HeaderName, HeaderValue, Method};
use mesh_policy_core::{
    http_route::Destination, retry::RetryPolicy, Labels, Request, Source, Workload,
};
use mesh_policy_decide::{
    authz::Evaluation, outlier::Recorded, traffic::TrafficDecision,
};
use mesh_policy_k8s_index::RouteSource;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::IpAddr, num::NonZeroU16, time::Duration};

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestSpec {
    pub authority: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub port: Option<NonZeroU16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// `namespace/name` of the gateway handling the request.
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub sni: Option<String>,
    #[serde(default)]
    pub source: SourceSpec,

    /// The workload the request is addressed to. Authorization is only evaluated when this is
    /// set.
    #[serde(default)]
    pub workload: Option<WorkloadSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceSpec {
    pub namespace: Option<String>,
    pub principal: Option<String>,
    pub request_principal: Option<String>,
    pub ip: Option<IpAddr>,
    pub remote_ip: Option<IpAddr>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadSpec {
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// An upstream outcome to feed to outlier detection.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReportSpec {
    pub host: String,
    #[serde(default)]
    pub subset: Option<String>,

    /// The endpoint's address, e.g. `10.0.0.1:8080`.
    pub endpoint: String,

    /// The namespace of the client. Defaults to the mesh's default namespace.
    #[serde(default)]
    pub namespace: Option<String>,

    /// A status code, `grpc-<code>`, `connect-failure`, `refused-stream`, `reset` or `timeout`.
    pub outcome: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionView {
    /// `routed`, `denied` or the reason the request could not be routed.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthzView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic: Option<TrafficView>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthzView {
    pub allowed: bool,
    pub decision: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub audited: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteView {
    pub host: String,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficView {
    pub destination: DestinationView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<DestinationView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    pub retry: RetryView,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub panic: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationView {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryView {
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_try_timeout: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportView {
    /// `healthy`, `counted`, `ejected`, `newly_ejected`, `cap_reached` or `untracked`.
    pub recorded: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ejection: Option<String>,
}

// === impl RequestSpec ===

impl RequestSpec {
    pub fn into_request(self) -> Result<(Request, Option<Workload>)> {
        let Self {
            authority,
            method,
            path,
            port,
            headers,
            gateway,
            sni,
            source,
            workload,
        } = self;

        let method = match method {
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid method: {m:?}"))?,
            None => Method::GET,
        };
        let mut req = Request::new(method, authority, path.unwrap_or_else(|| "/".to_string()));
        req.port = port;
        req.gateway = gateway;
        req.sni = sni;
        for (name, value) in headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name: {name:?}"))?;
            let value = HeaderValue::from_str(&value)
                .with_context(|| format!("invalid value for header {name}"))?;
            req.headers.append(header, value);
        }

        let SourceSpec {
            namespace,
            principal,
            request_principal,
            ip,
            remote_ip,
            labels,
        } = source;
        req.source = Source {
            namespace,
            principal,
            request_principal,
            ip,
            remote_ip,
            labels: Labels::from(labels),
        };

        let workload = workload.map(|w| Workload {
            namespace: w.namespace,
            labels: Labels::from(w.labels),
        });
        Ok((req, workload))
    }
}

// === impl DecisionView ===

impl From<&Decision> for DecisionView {
    fn from(decision: &Decision) -> Self {
        let outcome = decision.outcome();
        let status = decision.status().map(|s| s.as_u16());
        match decision {
            Decision::Denied(eval) => Self {
                outcome,
                status,
                error: None,
                authorization: Some(eval.into()),
                route: None,
                traffic: None,
            },
            Decision::Failed { authz, error } => Self {
                outcome,
                status,
                error: Some(error.to_string()),
                authorization: authz.as_ref().map(Into::into),
                route: None,
                traffic: None,
            },
            Decision::Routed(Routed {
                authz,
                route,
                traffic,
                ..
            }) => Self {
                outcome,
                status,
                error: None,
                authorization: authz.as_ref().map(Into::into),
                route: Some(RouteView {
                    host: route.host.clone(),
                    source: route_source(&route.source),
                }),
                traffic: Some(traffic.into()),
            },
        }
    }
}

fn route_source(source: &RouteSource) -> String {
    match source {
        RouteSource::VirtualService { meta, rule } => {
            format!("VirtualService {meta} http[{rule}]")
        }
        RouteSource::Registry { meta } => format!("ServiceEntry {meta}"),
        RouteSource::Passthrough => "passthrough".to_string(),
    }
}

impl From<&Evaluation> for AuthzView {
    fn from(eval: &Evaluation) -> Self {
        Self {
            allowed: eval.decision.is_allowed(),
            decision: eval.decision.to_string(),
            audited: eval.audited.iter().map(ToString::to_string).collect(),
        }
    }
}

impl From<&TrafficDecision> for TrafficView {
    fn from(traffic: &TrafficDecision) -> Self {
        Self {
            destination: (&traffic.destination).into(),
            endpoint: traffic.endpoint.as_ref().map(|ep| ep.addr.clone()),
            delay: traffic.fault.delay.map(duration),
            abort: traffic.fault.abort.map(|a| a.to_string()),
            mirror: traffic.mirror.as_ref().map(Into::into),
            timeout: traffic.timeout.map(duration),
            retry: (&traffic.retry).into(),
            panic: traffic.panic,
        }
    }
}

impl From<&Destination> for DestinationView {
    fn from(dst: &Destination) -> Self {
        Self {
            host: dst.host.clone(),
            subset: dst.subset.clone(),
            port: dst.port.map(NonZeroU16::get),
        }
    }
}

impl From<&RetryPolicy> for RetryView {
    fn from(retry: &RetryPolicy) -> Self {
        Self {
            attempts: retry.attempts,
            per_try_timeout: retry.per_try_timeout.map(duration),
            retry_on: retry.conditions.iter().map(ToString::to_string).collect(),
        }
    }
}

fn duration(d: Duration) -> String {
    format!("{d:?}")
}

// === impl ReportView ===

impl From<Option<Recorded>> for ReportView {
    fn from(recorded: Option<Recorded>) -> Self {
        let (recorded, reason, ejection) = match recorded {
            None | Some(Recorded::Untracked) => ("untracked", None, None),
            Some(Recorded::Healthy) => ("healthy", None, None),
            Some(Recorded::Counted) => ("counted", None, None),
            Some(Recorded::Ejected) => ("ejected", None, None),
            Some(Recorded::NewlyEjected { reason, duration: d }) => {
                ("newly_ejected", Some(reason.as_str()), Some(duration(d)))
            }
            Some(Recorded::CapReached { reason }) => ("cap_reached", Some(reason.as_str()), None),
        };
        Self {
            recorded,
            reason,
            ejection,
        }
    }
}
