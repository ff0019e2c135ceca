use anyhow::{anyhow, bail, ensure, Context, Result};
use mesh_policy_core::{
    http_route::{
        self as routes, AbortFault, AbortKind, DelayFault, FaultInjection, HeaderMatch,
        HeaderName, Percentage, QueryParamMatch, StatusCode,
    },
    retry::{grpc, RetryPolicy},
};
use mesh_policy_k8s_api::networking::virtual_service as api;
use std::{collections::BTreeMap, num::NonZeroU16};

pub fn try_match(
    api::HttpMatchRequest {
        name: _,
        uri,
        method,
        authority,
        headers,
        without_headers,
        query_params,
        port,
        source_labels,
        source_namespace,
        gateways,
        ignore_uri_case,
    }: api::HttpMatchRequest,
    normalize_gateway: impl Fn(&str) -> String,
) -> Result<routes::HttpRouteMatch> {
    let uri = uri.map(string_match).transpose().context("uri")?;
    let method = method.map(string_match).transpose().context("method")?;
    let authority = authority
        .map(string_match)
        .transpose()
        .context("authority")?;

    let headers = header_matches(headers).context("headers")?;
    let without_headers = header_matches(without_headers).context("withoutHeaders")?;

    let query_params = query_params
        .into_iter()
        .map(|(name, m)| {
            Ok(QueryParamMatch {
                name,
                value: optional_string_match(m)?,
            })
        })
        .collect::<Result<_>>()
        .context("queryParams")?;

    let port = port.map(port_number).transpose()?;

    Ok(routes::HttpRouteMatch {
        uri,
        ignore_uri_case,
        method,
        authority,
        headers,
        without_headers,
        query_params,
        port,
        source_labels,
        source_namespace,
        gateways: gateways.iter().map(|gw| normalize_gateway(gw)).collect(),
    })
}

/// Converts a string match that must specify a value.
pub fn string_match(m: api::StringMatch) -> Result<routes::StringMatch> {
    optional_string_match(m)?.ok_or_else(|| anyhow!("a string match must set exact, prefix or regex"))
}

/// Converts a string match. A match without any value tests only for presence.
pub fn optional_string_match(
    api::StringMatch {
        exact,
        prefix,
        regex,
    }: api::StringMatch,
) -> Result<Option<routes::StringMatch>> {
    match (exact, prefix, regex) {
        (None, None, None) => Ok(None),
        (Some(exact), None, None) => Ok(Some(routes::StringMatch::Exact(exact))),
        (None, Some(prefix), None) => Ok(Some(routes::StringMatch::Prefix(prefix))),
        (None, None, Some(regex)) => routes::StringMatch::regex(&regex)
            .map(Some)
            .with_context(|| format!("invalid regex {regex:?}")),
        _ => bail!("a string match may set only one of exact, prefix or regex"),
    }
}

fn header_matches(headers: BTreeMap<String, api::StringMatch>) -> Result<Vec<HeaderMatch>> {
    headers
        .into_iter()
        .map(|(name, m)| {
            let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
                .with_context(|| format!("invalid header name {name:?}"))?;
            Ok(HeaderMatch {
                name,
                value: optional_string_match(m)?,
            })
        })
        .collect()
}

pub fn port_number(port: u32) -> Result<NonZeroU16> {
    u16::try_from(port)
        .ok()
        .and_then(NonZeroU16::new)
        .ok_or_else(|| anyhow!("invalid port {port}"))
}

pub fn percentage(p: Option<api::Percent>, percent: Option<u32>) -> Result<Percentage> {
    match (p, percent) {
        (Some(api::Percent { value }), _) => Percentage::new(value),
        (None, Some(percent)) => Percentage::new(percent as f64),
        (None, None) => Ok(Percentage::ALL),
    }
}

pub fn retry_policy(retries: Option<api::HttpRetry>) -> Result<RetryPolicy> {
    let api::HttpRetry {
        attempts,
        per_try_timeout,
        retry_on,
    } = match retries {
        Some(retries) => retries,
        None => return Ok(RetryPolicy::default()),
    };

    let attempts = attempts.unwrap_or(RetryPolicy::DEFAULT_ATTEMPTS);
    if attempts == 0 {
        return Ok(RetryPolicy::disabled());
    }

    let conditions = match retry_on.as_deref() {
        Some(retry_on) => RetryPolicy::parse_conditions(retry_on)?,
        None => RetryPolicy::default_conditions(),
    };
    ensure!(
        !conditions.is_empty(),
        "retryOn must name at least one condition"
    );

    Ok(RetryPolicy {
        attempts,
        per_try_timeout: per_try_timeout
            .map(Into::into)
            .filter(|t: &std::time::Duration| !t.is_zero()),
        conditions,
    })
}

pub fn fault_injection(
    api::HttpFaultInjection { delay, abort }: api::HttpFaultInjection,
) -> Result<FaultInjection> {
    let delay = delay
        .map(
            |api::Delay {
                 fixed_delay,
                 percentage: p,
                 percent,
             }| {
                Ok::<_, anyhow::Error>(DelayFault {
                    fixed_delay: fixed_delay.into(),
                    percentage: percentage(p, percent)?,
                })
            },
        )
        .transpose()
        .context("delay")?;

    let abort = abort
        .map(
            |api::Abort {
                 http_status,
                 grpc_status,
                 percentage: p,
             }| {
                let kind = match (http_status, grpc_status) {
                    (Some(status), None) => {
                        let status = u16::try_from(status)
                            .ok()
                            .and_then(|s| StatusCode::from_u16(s).ok())
                            .filter(|s| (200..600).contains(&s.as_u16()))
                            .ok_or_else(|| anyhow!("invalid httpStatus {status}"))?;
                        AbortKind::Http(status)
                    }
                    (None, Some(status)) => AbortKind::Grpc(
                        grpc::parse_code(&status)
                            .ok_or_else(|| anyhow!("invalid grpcStatus {status:?}"))?,
                    ),
                    (None, None) => bail!("abort must set httpStatus or grpcStatus"),
                    (Some(_), Some(_)) => bail!("abort may set only one of httpStatus or grpcStatus"),
                };
                Ok::<_, anyhow::Error>(AbortFault {
                    kind,
                    percentage: percentage(p, None)?,
                })
            },
        )
        .transpose()
        .context("abort")?;

    Ok(FaultInjection { delay, abort })
}
