use crate::outlier::Health;
use mesh_policy_core::{
    destination::TrafficPolicy,
    http_route::{AbortKind, Destination, HttpRoute, Percentage},
    registry::{Endpoint, EndpointKey},
    retry::RetryPolicy,
    RouteError, Workload,
};
use mesh_policy_k8s_index::{RouteMatch, Snapshot};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, trace};

/// A route along with everything needed to pick one of its endpoints.
#[derive(Clone, Debug)]
pub struct ResolvedRoute<'r> {
    /// The host the request was addressed to.
    pub host: &'r str,
    pub route: &'r HttpRoute,
    pub backends: Vec<Backend<'r>>,
}

/// One of a route's weighted destinations.
#[derive(Clone, Debug)]
pub struct Backend<'r> {
    pub destination: &'r Destination,
    pub weight: u32,

    /// Empty when the destination's endpoints are not known, e.g. for hosts resolved by DNS.
    pub endpoints: Vec<&'r Endpoint>,
    pub traffic_policy: Option<&'r TrafficPolicy>,
}

/// Where a request is sent and what happens to it on the way.
#[derive(Clone, Debug, PartialEq)]
pub struct TrafficDecision {
    pub destination: Destination,

    /// Unset when the destination's endpoints are not known.
    pub endpoint: Option<EndpointKey>,

    /// The workload backing the chosen endpoint.
    pub workload: Option<Workload>,
    pub fault: FaultAction,

    /// A destination that receives a copy of the request.
    pub mirror: Option<Destination>,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,

    /// Ejections were ignored because too few of the destination's endpoints are healthy.
    pub panic: bool,
}

/// The faults injected into a request. A request may be both delayed and aborted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultAction {
    pub delay: Option<Duration>,
    pub abort: Option<AbortKind>,
}

struct Candidates<'r> {
    endpoints: Vec<&'r Endpoint>,
    panic: bool,
}

/// Picks a destination and endpoint for a request and draws its faults.
///
/// Destinations are drawn in proportion to their weights. A destination whose endpoints are all
/// ejected is skipped and its share is spread across the others; if every destination is
/// skipped, the request fails with [`RouteError::NoHealthyUpstream`].
pub fn decide<H, R>(
    route: &ResolvedRoute<'_>,
    health: &H,
    rng: &mut R,
) -> Result<TrafficDecision, RouteError>
where
    H: Health + ?Sized,
    R: Rng,
{
    let active = route
        .backends
        .iter()
        .filter(|b| b.weight > 0)
        .filter_map(|b| Some((b, b.candidates(health)?)))
        .collect::<Vec<_>>();

    let total = active.iter().map(|(b, _)| b.weight as u64).sum::<u64>();
    if total == 0 {
        debug!(host = route.host, "no healthy destinations");
        return Err(RouteError::NoHealthyUpstream {
            host: route.host.to_string(),
        });
    }

    let mut pick = rng.gen_range(0..total);
    let (backend, candidates) = active
        .into_iter()
        .find(|(b, _)| {
            let w = b.weight as u64;
            if pick < w {
                return true;
            }
            pick -= w;
            false
        })
        .ok_or_else(|| RouteError::NoHealthyUpstream {
            host: route.host.to_string(),
        })?;

    let dst = backend.destination;
    let picked = pick_endpoint(&candidates.endpoints, rng);
    let endpoint = picked.map(|ep| ep.key(&dst.host));
    let workload = picked.map(Endpoint::workload);
    if candidates.panic {
        debug!(destination = %dst, "too few healthy endpoints; ignoring ejections");
    }

    let fault = match &route.route.fault {
        Some(fault) => FaultAction {
            delay: fault
                .delay
                .as_ref()
                .filter(|d| draw(d.percentage, rng))
                .map(|d| d.fixed_delay),
            abort: fault
                .abort
                .as_ref()
                .filter(|a| draw(a.percentage, rng))
                .map(|a| a.kind),
        },
        None => FaultAction::default(),
    };

    let mirror = route
        .route
        .mirror
        .as_ref()
        .filter(|m| draw(m.percentage, rng))
        .map(|m| m.destination.clone());

    trace!(
        destination = %dst,
        endpoint = ?endpoint,
        delay = ?fault.delay,
        abort = ?fault.abort,
        "decided"
    );
    Ok(TrafficDecision {
        destination: dst.clone(),
        endpoint,
        workload,
        fault,
        mirror,
        retry: route.route.retry.clone(),
        timeout: route.route.timeout,
        panic: candidates.panic,
    })
}

fn pick_endpoint<'e, R: Rng>(endpoints: &[&'e Endpoint], rng: &mut R) -> Option<&'e Endpoint> {
    let total = endpoints.iter().map(|ep| ep.weight as u64).sum::<u64>();
    if total == 0 {
        return None;
    }
    let mut pick = rng.gen_range(0..total);
    for &ep in endpoints {
        let w = ep.weight as u64;
        if pick < w {
            return Some(ep);
        }
        pick -= w;
    }
    None
}

/// Returns true for the given percentage of calls.
fn draw<R: Rng>(percentage: Percentage, rng: &mut R) -> bool {
    let pct = percentage.value();
    if pct <= 0.0 {
        return false;
    }
    pct >= 100.0 || rng.gen::<f64>() * 100.0 < pct
}

// === impl ResolvedRoute ===

impl<'r> ResolvedRoute<'r> {
    /// Resolves the endpoints and policies of a route's destinations as seen from `client_ns`.
    pub fn new(snapshot: &'r Snapshot, rm: &'r RouteMatch, client_ns: &str) -> Self {
        let backends = rm
            .route
            .destinations
            .iter()
            .map(|wd| {
                let dst = &wd.destination;
                Backend {
                    destination: dst,
                    weight: wd.weight,
                    endpoints: snapshot.endpoints(dst, client_ns),
                    traffic_policy: snapshot
                        .destination_policy(&dst.host, client_ns)
                        .map(|dp| dp.traffic_policy_for(dst.subset.as_deref())),
                }
            })
            .collect();
        Self {
            host: &rm.host,
            route: &rm.route,
            backends,
        }
    }
}

// === impl Backend ===

impl<'r> Backend<'r> {
    /// Lists the endpoints that may receive requests, or `None` if every endpoint is ejected.
    fn candidates<H: Health + ?Sized>(&self, health: &H) -> Option<Candidates<'r>> {
        if self.endpoints.is_empty() {
            return Some(Candidates {
                endpoints: vec![],
                panic: false,
            });
        }

        let healthy = self
            .endpoints
            .iter()
            .copied()
            .filter(|ep| !health.is_ejected(&ep.key(&self.destination.host)))
            .collect::<Vec<_>>();

        let min_health_percent = self
            .traffic_policy
            .and_then(|tp| tp.outlier_detection.as_ref())
            .map_or(0, |od| od.min_health_percent) as usize;
        if healthy.len() * 100 < min_health_percent * self.endpoints.len() {
            return Some(Candidates {
                endpoints: self.endpoints.clone(),
                panic: true,
            });
        }

        if healthy.is_empty() {
            trace!(destination = %self.destination, "every endpoint is ejected");
            return None;
        }
        Some(Candidates {
            endpoints: healthy,
            panic: false,
        })
    }

    /// The key of each of this destination's endpoints.
    pub fn endpoint_keys(&self) -> impl Iterator<Item = EndpointKey> + '_ {
        self.endpoints
            .iter()
            .map(move |ep| ep.key(&self.destination.host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outlier::AllHealthy;
    use mesh_policy_core::{
        destination::OutlierDetection,
        http_route::{AbortFault, DelayFault, FaultInjection, StatusCode, WeightedDestination},
        Labels,
    };
    use rand::{rngs::StdRng, SeedableRng};
    use std::{collections::HashMap, num::NonZeroU16};

    const REVIEWS: &str = "reviews.bookinfo.svc.cluster.local";

    struct Ejected(Vec<EndpointKey>);

    impl Health for Ejected {
        fn is_ejected(&self, key: &EndpointKey) -> bool {
            self.0.contains(key)
        }
    }

    fn endpoint(addr: &str, weight: u32) -> Endpoint {
        Endpoint {
            address: addr.to_string(),
            port: NonZeroU16::new(9080),
            labels: Labels::default(),
            weight,
            service_account: None,
            namespace: "bookinfo".to_string(),
        }
    }

    fn key(addr: &str) -> EndpointKey {
        endpoint(addr, 1).key(REVIEWS)
    }

    fn split(weights: &[(&str, u32)]) -> HttpRoute {
        HttpRoute {
            destinations: weights
                .iter()
                .map(|(subset, weight)| WeightedDestination {
                    destination: Destination::new(REVIEWS).with_subset(*subset),
                    weight: *weight,
                })
                .collect(),
            ..HttpRoute::default_to(Destination::new(REVIEWS))
        }
    }

    fn resolve<'r>(route: &'r HttpRoute, endpoints: &'r [Vec<Endpoint>]) -> ResolvedRoute<'r> {
        ResolvedRoute {
            host: REVIEWS,
            route,
            backends: route
                .destinations
                .iter()
                .zip(endpoints)
                .map(|(wd, eps)| Backend {
                    destination: &wd.destination,
                    weight: wd.weight,
                    endpoints: eps.iter().collect(),
                    traffic_policy: None,
                })
                .collect(),
        }
    }

    fn subsets<H: Health>(route: &ResolvedRoute<'_>, health: &H, n: usize) -> HashMap<String, usize> {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts = HashMap::new();
        for _ in 0..n {
            let decision = decide(route, health, &mut rng).expect("request must be routed");
            *counts
                .entry(decision.destination.subset.unwrap_or_default())
                .or_default() += 1;
        }
        counts
    }

    #[test]
    fn splits_by_weight() {
        let route = split(&[("v1", 80), ("v3", 20)]);
        let endpoints = vec![vec![endpoint("10.0.0.1", 1)], vec![endpoint("10.0.0.3", 1)]];
        let counts = subsets(&resolve(&route, &endpoints), &AllHealthy, 10_000);
        let v1 = counts["v1"];
        assert!((7_700..=8_300).contains(&v1), "v1 received {v1} of 10000");
        assert_eq!(counts["v1"] + counts["v3"], 10_000);
    }

    #[test]
    fn ejected_destinations_are_skipped() {
        let route = split(&[("v1", 80), ("v3", 20)]);
        let endpoints = vec![
            vec![endpoint("10.0.0.1", 1), endpoint("10.0.0.2", 1)],
            vec![endpoint("10.0.0.3", 1)],
        ];
        let resolved = resolve(&route, &endpoints);

        let health = Ejected(vec![key("10.0.0.1"), key("10.0.0.2")]);
        let counts = subsets(&resolved, &health, 1_000);
        assert_eq!(counts.get("v1"), None);
        assert_eq!(counts["v3"], 1_000);

        // With one endpoint left, v1 keeps its share but only that endpoint is used.
        let health = Ejected(vec![key("10.0.0.1")]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let decision = decide(&resolved, &health, &mut rng).unwrap();
            assert_ne!(decision.endpoint, Some(key("10.0.0.1")));
        }

        let health = Ejected(vec![key("10.0.0.1"), key("10.0.0.2"), key("10.0.0.3")]);
        let err = decide(&resolved, &health, &mut rng).expect_err("nothing is healthy");
        assert_eq!(
            err,
            RouteError::NoHealthyUpstream {
                host: REVIEWS.to_string()
            }
        );
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn zero_weight_destinations_receive_nothing() {
        let route = split(&[("v1", 100), ("v2", 0)]);
        let endpoints = vec![vec![], vec![]];
        let counts = subsets(&resolve(&route, &endpoints), &AllHealthy, 1_000);
        assert_eq!(counts["v1"], 1_000);

        // A zero-weight destination does not absorb another's share.
        let health = Ejected(vec![key("10.0.0.1")]);
        let endpoints = vec![vec![endpoint("10.0.0.1", 1)], vec![endpoint("10.0.0.2", 1)]];
        let resolved = resolve(&route, &endpoints);
        let mut rng = StdRng::seed_from_u64(2);
        assert!(decide(&resolved, &health, &mut rng).is_err());
    }

    #[test]
    fn endpoints_are_weighted() {
        let route = split(&[("v1", 100)]);
        let endpoints = vec![vec![endpoint("10.0.0.1", 1), endpoint("10.0.0.2", 3)]];
        let resolved = resolve(&route, &endpoints);

        let mut rng = StdRng::seed_from_u64(3);
        let heavy = (0..10_000)
            .filter(|_| {
                let decision = decide(&resolved, &AllHealthy, &mut rng).unwrap();
                decision.endpoint == Some(key("10.0.0.2"))
            })
            .count();
        assert!((7_200..=7_800).contains(&heavy), "heavy endpoint received {heavy}");
    }

    #[test]
    fn unknown_endpoints() {
        let route = HttpRoute::default_to(Destination::new("httpbin.org"));
        let resolved = ResolvedRoute {
            host: "httpbin.org",
            route: &route,
            backends: vec![Backend {
                destination: &route.destinations[0].destination,
                weight: 100,
                endpoints: vec![],
                traffic_policy: None,
            }],
        };
        let mut rng = StdRng::seed_from_u64(4);
        let decision = decide(&resolved, &AllHealthy, &mut rng).unwrap();
        assert_eq!(decision.destination, Destination::new("httpbin.org"));
        assert_eq!(decision.endpoint, None);
        assert_eq!(decision.fault, FaultAction::default());
        assert!(!decision.panic);
    }

    #[test]
    fn panic_mode_ignores_ejections() {
        let route = split(&[("v1", 100)]);
        let endpoints = vec![vec![
            endpoint("10.0.0.1", 1),
            endpoint("10.0.0.2", 1),
            endpoint("10.0.0.3", 1),
        ]];
        let policy = TrafficPolicy {
            outlier_detection: Some(OutlierDetection {
                min_health_percent: 50,
                ..OutlierDetection::default()
            }),
            ..TrafficPolicy::default()
        };
        let mut resolved = resolve(&route, &endpoints);
        resolved.backends[0].traffic_policy = Some(&policy);
        let mut rng = StdRng::seed_from_u64(5);

        // Two of three endpoints are healthy: ejections are honored.
        let health = Ejected(vec![key("10.0.0.1")]);
        let decision = decide(&resolved, &health, &mut rng).unwrap();
        assert!(!decision.panic);

        // Only one of three is healthy, so every endpoint is used.
        let health = Ejected(vec![key("10.0.0.1"), key("10.0.0.2")]);
        let picked = (0..300)
            .map(|_| decide(&resolved, &health, &mut rng).unwrap())
            .inspect(|d| assert!(d.panic))
            .filter(|d| d.endpoint == Some(key("10.0.0.1")))
            .count();
        assert!(picked > 0, "ejected endpoints are used in panic mode");
    }

    #[test]
    fn faults_are_drawn_independently() {
        let mut route = split(&[("v1", 100)]);
        route.fault = Some(FaultInjection {
            delay: Some(DelayFault {
                fixed_delay: Duration::from_secs(5),
                percentage: Percentage::new(50.0).unwrap(),
            }),
            abort: Some(AbortFault {
                kind: AbortKind::Http(StatusCode::SERVICE_UNAVAILABLE),
                percentage: Percentage::new(50.0).unwrap(),
            }),
        });
        let endpoints = vec![vec![]];
        let resolved = resolve(&route, &endpoints);

        let mut rng = StdRng::seed_from_u64(6);
        let (mut delayed, mut aborted, mut both) = (0, 0, 0);
        for _ in 0..10_000 {
            let FaultAction { delay, abort } = decide(&resolved, &AllHealthy, &mut rng)
                .unwrap()
                .fault;
            if let Some(delay) = delay {
                assert_eq!(delay, Duration::from_secs(5));
                delayed += 1;
            }
            if let Some(abort) = abort {
                assert_eq!(abort, AbortKind::Http(StatusCode::SERVICE_UNAVAILABLE));
                aborted += 1;
            }
            if delay.is_some() && abort.is_some() {
                both += 1;
            }
        }
        assert!((4_700..=5_300).contains(&delayed), "delayed {delayed}");
        assert!((4_700..=5_300).contains(&aborted), "aborted {aborted}");
        assert!((2_200..=2_800).contains(&both), "delayed and aborted {both}");
    }

    #[test]
    fn full_and_empty_percentages() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..1_000).all(|_| draw(Percentage::ALL, &mut rng)));
        assert!((0..1_000).all(|_| !draw(Percentage::NONE, &mut rng)));
    }

    #[test]
    fn resolves_routes_against_a_snapshot() {
        let docs = mesh_policy_k8s_api::decode_documents(
            r#"
apiVersion: networking.istio.io/v1
kind: ServiceEntry
metadata:
  name: reviews
  namespace: bookinfo
spec:
  hosts: [reviews.bookinfo.svc.cluster.local]
  ports:
  - {number: 9080, name: http}
  resolution: STATIC
  endpoints:
  - {address: 10.0.0.1, labels: {version: v1}}
  - {address: 10.0.0.2, labels: {version: v2}}
---
apiVersion: networking.istio.io/v1
kind: DestinationRule
metadata:
  name: reviews
  namespace: bookinfo
spec:
  host: reviews
  trafficPolicy:
    outlierDetection: {minHealthPercent: 30}
  subsets:
  - {name: v1, labels: {version: v1}}
  - {name: v2, labels: {version: v2}}
---
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: reviews
  namespace: bookinfo
spec:
  hosts: [reviews]
  http:
  - route:
    - destination: {host: reviews, subset: v2}
"#,
        )
        .unwrap();
        let snapshot =
            Snapshot::build(&docs, Default::default(), 1).expect("configuration must be valid");
        let mut req = mesh_policy_core::Request::new(
            mesh_policy_core::http_route::Method::GET,
            "reviews:9080",
            "/",
        );
        req.source.namespace = Some("bookinfo".to_string());
        let rm = snapshot.route_for(&req).unwrap();

        let resolved = ResolvedRoute::new(&snapshot, &rm, "bookinfo");
        assert_eq!(resolved.backends.len(), 1);
        let keys = resolved.backends[0].endpoint_keys().collect::<Vec<_>>();
        assert_eq!(keys, vec![key("10.0.0.2")]);
        assert_eq!(
            resolved.backends[0]
                .traffic_policy
                .and_then(|tp| tp.outlier_detection.as_ref())
                .map(|od| od.min_health_percent),
            Some(30)
        );

        let mut rng = StdRng::seed_from_u64(8);
        let decision = decide(&resolved, &AllHealthy, &mut rng).unwrap();
        assert_eq!(decision.endpoint, Some(key("10.0.0.2")));
    }
}
