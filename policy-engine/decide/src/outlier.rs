//! Tracks the health of endpoints and ejects those that fail repeatedly.
//!
//! Each endpoint moves between two states:
//!
//! ```text
//! HEALTHY --(consecutive errors within interval)--> EJECTED --(ejection time elapsed)--> HEALTHY
//! ```
//!
//! An endpoint's ejection time doubles with each consecutive ejection, up to the configured
//! maximum. The ejection count decays by one for every base ejection time an endpoint spends
//! healthy. Within a host, ejections stop once `maxEjectionPercent` of its endpoints are ejected.

use ahash::AHashMap as HashMap;
use mesh_policy_core::{
    destination::OutlierDetection,
    registry::EndpointKey,
    retry::UpstreamOutcome,
};
use parking_lot::{Mutex, RwLock};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info};

/// A view of endpoint health, as consulted when picking an endpoint.
pub trait Health {
    fn is_ejected(&self, key: &EndpointKey) -> bool;
}

/// Every endpoint is healthy.
#[derive(Copy, Clone, Debug, Default)]
pub struct AllHealthy;

#[derive(Debug, Default)]
pub struct OutlierTracker {
    hosts: RwLock<HashMap<String, Arc<Mutex<HostHealth>>>>,
}

/// The tracker's view of endpoint health at a point in time.
#[derive(Copy, Clone, Debug)]
pub struct HealthAt<'t> {
    tracker: &'t OutlierTracker,
    now: Instant,
}

/// What recording an outcome did to an endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recorded {
    /// The endpoint is healthy; any error streak has been reset.
    Healthy,

    /// The error was counted but no threshold was reached.
    Counted,

    /// The endpoint is already ejected.
    Ejected,

    /// The endpoint has just been ejected.
    NewlyEjected {
        reason: EjectionReason,
        duration: Duration,
    },

    /// A threshold was reached but the host's ejection cap prevented an ejection.
    CapReached { reason: EjectionReason },

    /// The endpoint is not among its host's synced endpoints, so nothing was recorded.
    Untracked,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EjectionReason {
    Consecutive5xx,
    ConsecutiveGatewayErrors,
}

/// A summary of a host's endpoints.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HostStatus {
    pub endpoints: usize,
    pub ejected: usize,
}

#[derive(Debug, Default)]
struct HostHealth {
    /// Indexed by endpoint address.
    endpoints: HashMap<String, EndpointHealth>,
}

#[derive(Clone, Debug, Default)]
struct EndpointHealth {
    consecutive_5xx: u32,
    consecutive_gateway: u32,
    streak_started: Option<Instant>,

    ejected_until: Option<Instant>,

    /// The number of recent ejections, which determines the next ejection's duration.
    ejections: u32,

    /// When the ejection count last decayed or the endpoint was last re-admitted.
    decay_from: Option<Instant>,
}

// === impl OutlierTracker ===

impl OutlierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a request to an endpoint.
    ///
    /// Only endpoints that have been [synced](OutlierTracker::sync) are tracked. Outcomes for any
    /// other endpoint are ignored so that they cannot skew a host's ejection cap.
    pub fn record(
        &self,
        key: &EndpointKey,
        outcome: &UpstreamOutcome,
        config: &OutlierDetection,
        now: Instant,
    ) -> Recorded {
        let host = match self.hosts.read().get(&key.host) {
            Some(host) => host.clone(),
            None => {
                debug!(endpoint = %key, "untracked host");
                return Recorded::Untracked;
            }
        };
        let mut host = host.lock();
        host.refresh(config, now);

        let ejected = host.ejected_count();
        let total = host.endpoints.len();
        let ep = match host.endpoints.get_mut(&key.addr) {
            Some(ep) => ep,
            None => {
                debug!(endpoint = %key, "untracked endpoint");
                return Recorded::Untracked;
            }
        };

        if ep.ejected_until.is_some() {
            return Recorded::Ejected;
        }

        let is_5xx = outcome.is_server_error();
        let is_gateway = outcome.is_gateway_error();
        if !is_5xx && !is_gateway {
            ep.reset_streak();
            return Recorded::Healthy;
        }

        match ep.streak_started {
            Some(started) if now.saturating_duration_since(started) <= config.interval => {}
            _ => {
                ep.reset_streak();
                ep.streak_started = Some(now);
            }
        }
        if is_5xx {
            ep.consecutive_5xx += 1;
        }
        if is_gateway {
            ep.consecutive_gateway += 1;
        }

        let reason = if config.consecutive_gateway_errors > 0
            && ep.consecutive_gateway >= config.consecutive_gateway_errors
        {
            EjectionReason::ConsecutiveGatewayErrors
        } else if config.consecutive_5xx_errors > 0
            && ep.consecutive_5xx >= config.consecutive_5xx_errors
        {
            EjectionReason::Consecutive5xx
        } else {
            return Recorded::Counted;
        };

        if !may_eject(ejected, total, config.max_ejection_percent) {
            debug!(endpoint = %key, ?reason, ejected, total, "ejection cap reached");
            return Recorded::CapReached { reason };
        }

        ep.ejections += 1;
        let duration = config.ejection_time(ep.ejections);
        ep.ejected_until = Some(now + duration);
        ep.decay_from = None;
        ep.reset_streak();
        info!(
            endpoint = %key,
            ?reason,
            ejections = ep.ejections,
            duration = ?duration,
            "ejected endpoint"
        );
        Recorded::NewlyEjected { reason, duration }
    }

    /// Returns true if the endpoint is ejected at `now`. Endpoints whose ejection has elapsed
    /// are re-admitted.
    pub fn is_ejected(&self, key: &EndpointKey, now: Instant) -> bool {
        let host = match self.hosts.read().get(&key.host) {
            Some(host) => host.clone(),
            None => return false,
        };
        let mut host = host.lock();
        host.readmit(now);
        host.endpoints
            .get(&key.addr)
            .map_or(false, |ep| ep.ejected_until.is_some())
    }

    /// Views endpoint health at `now`.
    pub fn at(&self, now: Instant) -> HealthAt<'_> {
        HealthAt { tracker: self, now }
    }

    /// Summarizes a host's endpoints at `now`.
    pub fn host_status(&self, host: &str, now: Instant) -> HostStatus {
        let host = match self.hosts.read().get(host) {
            Some(host) => host.clone(),
            None => return HostStatus::default(),
        };
        let mut host = host.lock();
        host.readmit(now);
        HostStatus {
            endpoints: host.endpoints.len(),
            ejected: host.ejected_count(),
        }
    }

    /// Replaces the set of known endpoints. State is kept for endpoints that remain; all other
    /// state is discarded.
    pub fn sync(&self, keys: impl IntoIterator<Item = EndpointKey>) {
        let mut by_host = HashMap::<String, Vec<String>>::new();
        for EndpointKey { host, addr } in keys {
            by_host.entry(host).or_default().push(addr);
        }

        let mut hosts = self.hosts.write();
        let before = hosts.len();
        hosts.retain(|host, _| by_host.contains_key(host));
        for (host, addrs) in by_host {
            let health = hosts.entry(host).or_default();
            let mut health = health.lock();
            health.endpoints.retain(|addr, _| addrs.contains(addr));
            for addr in addrs {
                health.endpoints.entry(addr).or_default();
            }
        }
        debug!(
            hosts = hosts.len(),
            removed = before.saturating_sub(hosts.len()),
            "synced endpoints"
        );
    }
}

/// An ejection is allowed only while the ejected endpoints, including the new one, stay within
/// `max_percent` of all endpoints.
fn may_eject(ejected: usize, total: usize, max_percent: u32) -> bool {
    (ejected + 1) * 100 <= max_percent as usize * total
}

// === impl HostHealth ===

impl HostHealth {
    fn ejected_count(&self) -> usize {
        self.endpoints
            .values()
            .filter(|ep| ep.ejected_until.is_some())
            .count()
    }

    fn readmit(&mut self, now: Instant) {
        for ep in self.endpoints.values_mut() {
            if let Some(until) = ep.ejected_until {
                if now >= until {
                    ep.ejected_until = None;
                    ep.decay_from = Some(until);
                    ep.reset_streak();
                }
            }
        }
    }

    fn refresh(&mut self, config: &OutlierDetection, now: Instant) {
        self.readmit(now);
        for ep in self.endpoints.values_mut() {
            ep.decay(config.base_ejection_time, now);
        }
    }
}

// === impl EndpointHealth ===

impl EndpointHealth {
    fn reset_streak(&mut self) {
        self.consecutive_5xx = 0;
        self.consecutive_gateway = 0;
        self.streak_started = None;
    }

    fn decay(&mut self, base: Duration, now: Instant) {
        let from = match self.decay_from {
            Some(from) if self.ejections > 0 && !base.is_zero() => from,
            _ => return,
        };
        let periods = (now.saturating_duration_since(from).as_nanos() / base.as_nanos()) as u32;
        if periods == 0 {
            return;
        }
        self.ejections = self.ejections.saturating_sub(periods);
        self.decay_from = Some(from + base * periods);
    }
}

// === impl HealthAt ===

impl Health for HealthAt<'_> {
    fn is_ejected(&self, key: &EndpointKey) -> bool {
        self.tracker.is_ejected(key, self.now)
    }
}

impl Health for AllHealthy {
    fn is_ejected(&self, _: &EndpointKey) -> bool {
        false
    }
}

// === impl EjectionReason ===

impl EjectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consecutive5xx => "consecutive_5xx",
            Self::ConsecutiveGatewayErrors => "consecutive_gateway_errors",
        }
    }
}
