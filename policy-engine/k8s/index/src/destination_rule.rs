use crate::{resource_meta, MeshInfo};
use anyhow::{ensure, Context, Result};
use mesh_policy_core::{
    destination::{ConnectionPool, DestinationPolicy, OutlierDetection, Subset, TrafficPolicy},
    HostMatch,
};
use mesh_policy_k8s_api::networking::{destination_rule as api, DestinationRule};
use std::{collections::HashSet, time::Duration};

pub fn destination_policy(dr: DestinationRule, mesh: &MeshInfo) -> Result<DestinationPolicy> {
    let meta = resource_meta(&dr.metadata, mesh);
    let api::DestinationRuleSpec {
        host,
        traffic_policy,
        subsets,
        export_to,
    } = dr.spec;

    ensure!(!host.is_empty(), "host must be set");
    let host = HostMatch::parse(&mesh.qualify(&host, &meta.namespace));

    let traffic_policy = traffic_policy
        .map(convert_traffic_policy)
        .transpose()
        .context("trafficPolicy")?
        .unwrap_or_default();

    let mut names = HashSet::new();
    let subsets = subsets
        .into_iter()
        .map(|api::Subset {
                 name,
                 labels,
                 traffic_policy: subset_policy,
             }| {
            ensure!(!name.is_empty(), "subset name must be set");
            ensure!(names.insert(name.clone()), "duplicate subset {name:?}");
            let policy = subset_policy
                .map(convert_traffic_policy)
                .transpose()
                .with_context(|| format!("subset {name:?}"))?
                .unwrap_or_default()
                .inherit(&traffic_policy);
            Ok(Subset {
                name,
                labels,
                traffic_policy: policy,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DestinationPolicy {
        meta,
        host,
        traffic_policy,
        subsets,
        export_to: export_to.into(),
    })
}

fn convert_traffic_policy(
    api::TrafficPolicy {
        connection_pool,
        outlier_detection,
    }: api::TrafficPolicy,
) -> Result<TrafficPolicy> {
    Ok(TrafficPolicy {
        connection_pool: connection_pool.map(convert_connection_pool),
        outlier_detection: outlier_detection
            .map(convert_outlier_detection)
            .transpose()
            .context("outlierDetection")?,
    })
}

fn convert_connection_pool(
    api::ConnectionPoolSettings { tcp, http }: api::ConnectionPoolSettings,
) -> ConnectionPool {
    let tcp = tcp.unwrap_or_default();
    let http = http.unwrap_or_default();
    ConnectionPool {
        max_connections: tcp.max_connections,
        max_pending_requests: http.http1_max_pending_requests,
        max_requests: http.http2_max_requests,
        max_retries: http.max_retries,
        connect_timeout: tcp.connect_timeout.map(Into::into),
    }
}

fn convert_outlier_detection(
    api::OutlierDetection {
        consecutive_5xx_errors,
        consecutive_gateway_errors,
        interval,
        base_ejection_time,
        max_ejection_percent,
        min_health_percent,
    }: api::OutlierDetection,
) -> Result<OutlierDetection> {
    let defaults = OutlierDetection::default();

    let interval = interval.map(Duration::from).unwrap_or(defaults.interval);
    ensure!(!interval.is_zero(), "interval must be positive");
    let base_ejection_time = base_ejection_time
        .map(Duration::from)
        .unwrap_or(defaults.base_ejection_time);
    ensure!(
        !base_ejection_time.is_zero(),
        "baseEjectionTime must be positive"
    );

    let max_ejection_percent = max_ejection_percent.unwrap_or(defaults.max_ejection_percent);
    ensure!(
        max_ejection_percent <= 100,
        "maxEjectionPercent must not exceed 100"
    );
    let min_health_percent = min_health_percent.unwrap_or(defaults.min_health_percent);
    ensure!(
        min_health_percent <= 100,
        "minHealthPercent must not exceed 100"
    );

    Ok(OutlierDetection {
        consecutive_5xx_errors: consecutive_5xx_errors.unwrap_or(defaults.consecutive_5xx_errors),
        consecutive_gateway_errors: consecutive_gateway_errors
            .unwrap_or(defaults.consecutive_gateway_errors),
        interval,
        base_ejection_time,
        max_ejection_percent,
        min_health_percent,
        ..defaults
    })
}
