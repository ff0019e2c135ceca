use crate::{ExportTo, HostMatch, ResourceMeta};
use mesh_policy_k8s_api::labels::Map;
use std::time::Duration;

/// A compiled `DestinationRule`.
#[derive(Clone, Debug, PartialEq)]
pub struct DestinationPolicy {
    pub meta: ResourceMeta,
    pub host: HostMatch,
    pub traffic_policy: TrafficPolicy,
    pub subsets: Vec<Subset>,
    pub export_to: ExportTo,
}

/// A named partition of a host's endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct Subset {
    pub name: String,
    pub labels: Map,

    /// The subset's own policy, with unset fields inherited from the host-level policy.
    pub traffic_policy: TrafficPolicy,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrafficPolicy {
    pub connection_pool: Option<ConnectionPool>,
    pub outlier_detection: Option<OutlierDetection>,
}

/// Limits on the requests that may be outstanding to a destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionPool {
    pub max_connections: Option<u32>,
    pub max_pending_requests: Option<u32>,
    pub max_requests: Option<u32>,
    pub max_retries: Option<u32>,
    pub connect_timeout: Option<Duration>,
}

/// Configures how endpoints are ejected after consecutive errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutlierDetection {
    /// Zero disables the check.
    pub consecutive_5xx_errors: u32,

    /// Zero disables the check.
    pub consecutive_gateway_errors: u32,

    /// Errors only count as consecutive when they occur within this interval of the first.
    pub interval: Duration,
    pub base_ejection_time: Duration,
    pub max_ejection_time: Duration,
    pub max_ejection_percent: u32,

    /// When fewer than this percentage of a destination's endpoints are healthy, ejections are
    /// ignored for load balancing.
    pub min_health_percent: u32,
}

// === impl DestinationPolicy ===

impl DestinationPolicy {
    pub fn subset(&self, name: &str) -> Option<&Subset> {
        self.subsets.iter().find(|s| s.name == name)
    }

    /// The traffic policy that applies to a subset, or to the host as a whole.
    pub fn traffic_policy_for(&self, subset: Option<&str>) -> &TrafficPolicy {
        subset
            .and_then(|name| self.subset(name))
            .map(|s| &s.traffic_policy)
            .unwrap_or(&self.traffic_policy)
    }
}

// === impl TrafficPolicy ===

impl TrafficPolicy {
    /// Fills unset fields from a parent policy.
    pub fn inherit(self, parent: &TrafficPolicy) -> Self {
        Self {
            connection_pool: self
                .connection_pool
                .or_else(|| parent.connection_pool.clone()),
            outlier_detection: self
                .outlier_detection
                .or_else(|| parent.outlier_detection.clone()),
        }
    }
}

// === impl ConnectionPool ===

impl ConnectionPool {
    /// The number of requests that may be in flight at once. Requests beyond `maxConnections`
    /// are queued as pending until the pending limit is reached.
    pub fn max_in_flight(&self) -> Option<u32> {
        let queued = match (self.max_connections, self.max_pending_requests) {
            (Some(conns), Some(pending)) => Some(conns.saturating_add(pending)),
            _ => None,
        };
        [self.max_requests, queued].into_iter().flatten().min()
    }
}

// === impl OutlierDetection ===

impl OutlierDetection {
    pub const DEFAULT_CONSECUTIVE_ERRORS: u32 = 5;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_BASE_EJECTION_TIME: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_EJECTION_TIME: Duration = Duration::from_secs(300);

    /// The cap is applied strictly: an ejection happens only if the ejected endpoints, including
    /// the new one, stay within this share of the host. At 10%, a host with fewer than 10
    /// endpoints never ejects any of them; such hosts need a higher `maxEjectionPercent`.
    pub const DEFAULT_MAX_EJECTION_PERCENT: u32 = 10;

    /// The ejection duration for an endpoint's `n`th consecutive ejection.
    pub fn ejection_time(&self, ejections: u32) -> Duration {
        let exp = ejections.saturating_sub(1).min(31);
        self.base_ejection_time
            .checked_mul(1 << exp)
            .unwrap_or(self.max_ejection_time)
            .min(self.max_ejection_time.max(self.base_ejection_time))
    }
}

impl Default for OutlierDetection {
    fn default() -> Self {
        Self {
            consecutive_5xx_errors: Self::DEFAULT_CONSECUTIVE_ERRORS,
            consecutive_gateway_errors: 0,
            interval: Self::DEFAULT_INTERVAL,
            base_ejection_time: Self::DEFAULT_BASE_EJECTION_TIME,
            max_ejection_time: Self::DEFAULT_MAX_EJECTION_TIME,
            max_ejection_percent: Self::DEFAULT_MAX_EJECTION_PERCENT,
            min_health_percent: 0,
        }
    }
}
