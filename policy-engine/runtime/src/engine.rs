use crate::metrics::Metrics;
use ahash::AHashSet as HashSet;
use mesh_policy_core::{
    destination::TrafficPolicy,
    http_route::{AbortKind, Destination, StatusCode},
    registry::EndpointKey,
    retry::UpstreamOutcome,
    Request, RouteError, Workload,
};
use mesh_policy_decide::{
    authz::{self, AuthzDecision, Evaluation},
    outlier::{OutlierTracker, Recorded},
    retry::{self, AttemptError, Backoff, UpstreamError},
    traffic::{self, FaultAction, ResolvedRoute, TrafficDecision},
    Permit, PoolLimiter,
};
use mesh_policy_k8s_index::{Reader, RouteMatch, Snapshot};
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use std::{future::Future, sync::Arc};
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument};

/// Evaluates requests against the active configuration and tracks upstream health.
#[derive(Debug)]
pub struct Engine {
    reader: Reader,
    tracker: OutlierTracker,
    pools: PoolLimiter,
    rng: Mutex<StdRng>,
    metrics: Metrics,
}

#[derive(Clone, Debug)]
pub enum Decision {
    /// The authorization policies of the target workload, or of the chosen endpoint's workload,
    /// reject the request.
    Denied(Evaluation),

    /// The request was authorized, or no workload was given, but could not be routed.
    Failed {
        authz: Option<Evaluation>,
        error: RouteError,
    },

    Routed(Routed),
}

/// A routed request, along with the snapshot it was routed against.
#[derive(Clone, Debug)]
pub struct Routed {
    /// Unset when no target workload was given and no endpoint was chosen.
    pub authz: Option<Evaluation>,
    pub route: RouteMatch,

    /// The namespace the request's hosts were resolved in.
    pub client_ns: String,
    pub traffic: TrafficDecision,
    snapshot: Arc<Snapshot>,
}

/// Where an upstream attempt is sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub destination: Destination,
    pub endpoint: Option<EndpointKey>,

    /// Starts at 1.
    pub attempt: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error("request {0}")]
    Denied(AuthzDecision),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("injected fault: {0}")]
    Aborted(AbortKind),

    #[error("{0}")]
    Upstream(AttemptError<E>),
}

/// Reports the outcome of an upstream attempt. An attempt dropped before it completes, e.g. by a
/// timeout, is reported as timed out.
struct AttemptGuard<'a> {
    engine: &'a Engine,
    routed: &'a Routed,
    destination: Destination,
    endpoint: Option<EndpointKey>,
}

// === impl Engine ===

impl Engine {
    pub fn new(reader: Reader, metrics: Metrics) -> Self {
        Self {
            reader,
            tracker: OutlierTracker::new(),
            pools: PoolLimiter::new(),
            rng: Mutex::new(StdRng::from_entropy()),
            metrics,
        }
    }

    /// Makes traffic draws reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.reader.snapshot()
    }

    pub fn tracker(&self) -> &OutlierTracker {
        &self.tracker
    }

    pub fn decide(&self, req: &Request, workload: Option<&Workload>) -> Decision {
        self.decide_at(req, workload, Instant::now())
    }

    /// Authorizes and routes a request, observing endpoint health as of `now`.
    ///
    /// When no target workload is given, the request is authorized against the workload of the
    /// endpoint it is routed to. Requests to destinations without known endpoints are not
    /// authorized.
    #[instrument(skip_all, fields(host = %req.host(), path = %req.path))]
    pub fn decide_at(&self, req: &Request, workload: Option<&Workload>, now: Instant) -> Decision {
        let start = Instant::now();
        let decision = self.evaluate(req, workload, now);
        self.metrics.decided(decision.outcome(), start.elapsed());
        decision
    }

    fn evaluate(&self, req: &Request, workload: Option<&Workload>, now: Instant) -> Decision {
        let snapshot = self.reader.snapshot();

        let authz = match workload {
            Some(workload) => match authorize(&snapshot, workload, req) {
                Ok(eval) => Some(eval),
                Err(eval) => return Decision::Denied(eval),
            },
            None => None,
        };

        let route = match snapshot.route_for(req) {
            Ok(route) => route,
            Err(error) => return Decision::Failed { authz, error },
        };
        let client_ns = req
            .source
            .namespace
            .clone()
            .unwrap_or_else(|| snapshot.mesh().default_namespace.clone());

        let traffic = match self.traffic(&snapshot, &route, &client_ns, now) {
            Ok(traffic) => traffic,
            Err(error) => return Decision::Failed { authz, error },
        };

        // Without a named target, the request is authorized against the workload behind the
        // endpoint it was routed to.
        let authz = match (authz, &traffic.workload) {
            (Some(eval), _) => Some(eval),
            (None, Some(target)) => match authorize(&snapshot, target, req) {
                Ok(eval) => Some(eval),
                Err(eval) => return Decision::Denied(eval),
            },
            (None, None) => None,
        };

        Decision::Routed(Routed {
            authz,
            route,
            client_ns,
            traffic,
            snapshot,
        })
    }

    fn traffic(
        &self,
        snapshot: &Snapshot,
        route: &RouteMatch,
        client_ns: &str,
        now: Instant,
    ) -> Result<TrafficDecision, RouteError> {
        let resolved = ResolvedRoute::new(snapshot, route, client_ns);
        let health = self.tracker.at(now);
        let mut rng = self.rng.lock();
        traffic::decide(&resolved, &health, &mut *rng)
    }

    /// Feeds the outcome of a routed request to outlier detection.
    ///
    /// Returns `None` if no endpoint was picked or if the destination does not configure outlier
    /// detection.
    pub fn report(&self, routed: &Routed, outcome: UpstreamOutcome) -> Option<Recorded> {
        let endpoint = routed.traffic.endpoint.as_ref()?;
        self.report_at(
            &routed.snapshot,
            &routed.client_ns,
            &routed.traffic.destination,
            endpoint,
            outcome,
            Instant::now(),
        )
    }

    pub fn report_at(
        &self,
        snapshot: &Snapshot,
        client_ns: &str,
        dst: &Destination,
        endpoint: &EndpointKey,
        outcome: UpstreamOutcome,
        now: Instant,
    ) -> Option<Recorded> {
        let config = policy_for(snapshot, client_ns, dst)?
            .outlier_detection
            .as_ref()?;
        let recorded = self.tracker.record(endpoint, &outcome, config, now);
        if let Recorded::NewlyEjected { reason, .. } = recorded {
            self.metrics.ejected(&endpoint.host, reason.as_str());
        }
        Some(recorded)
    }

    /// Takes a slot in the routed destination's connection pool.
    pub fn acquire(&self, routed: &Routed) -> Result<Permit, RouteError> {
        let dst = &routed.traffic.destination;
        let pool = policy_for(&routed.snapshot, &routed.client_ns, dst)
            .and_then(|tp| tp.connection_pool.as_ref());
        self.pools.try_acquire(dst, pool)
    }

    /// Runs a request through the whole decision path: authorization, routing, the connection
    /// pool, fault injection and retries.
    ///
    /// `send` is called once per attempt. Each attempt's outcome is reported to outlier detection
    /// and retries are routed afresh, so a retry may be sent to a different endpoint.
    pub async fn call<T, E, F, Fut>(
        &self,
        req: &Request,
        workload: Option<&Workload>,
        mut send: F,
    ) -> Result<T, CallError<E>>
    where
        E: UpstreamError,
        F: FnMut(Target) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let routed = match self.decide(req, workload) {
            Decision::Routed(routed) => routed,
            Decision::Denied(eval) => return Err(CallError::Denied(eval.decision)),
            Decision::Failed { error, .. } => return Err(CallError::Route(error)),
        };
        let _permit = self.acquire(&routed)?;

        let FaultAction { delay, abort } = routed.traffic.fault.clone();
        if let Some(delay) = delay {
            debug!(?delay, "delaying request");
            time::sleep(delay).await;
        }
        if let Some(abort) = abort {
            debug!(?abort, "aborting request");
            return Err(CallError::Aborted(abort));
        }

        let routed = &routed;
        let send = &mut send;
        retry::execute(
            &routed.traffic.retry,
            routed.traffic.timeout,
            Backoff::default(),
            move |attempt| {
                let traffic = if attempt == 1 {
                    routed.traffic.clone()
                } else {
                    self.retarget(routed, req, workload.is_none())
                };
                let guard = AttemptGuard {
                    engine: self,
                    routed,
                    destination: traffic.destination.clone(),
                    endpoint: traffic.endpoint.clone(),
                };
                let rsp = send(Target {
                    destination: traffic.destination,
                    endpoint: traffic.endpoint,
                    attempt,
                });
                async move {
                    let res = rsp.await;
                    guard.finish(match &res {
                        Ok(_) => UpstreamOutcome::Status(StatusCode::OK),
                        Err(error) => error.outcome(),
                    });
                    res
                }
            },
        )
        .await
        .map_err(CallError::Upstream)
    }

    /// Routes a retry afresh. When the original request was authorized against its endpoint's
    /// workload, a retry may only move to an endpoint whose workload also admits it.
    fn retarget(&self, routed: &Routed, req: &Request, by_endpoint: bool) -> TrafficDecision {
        let traffic = match self.traffic(
            &routed.snapshot,
            &routed.route,
            &routed.client_ns,
            Instant::now(),
        ) {
            Ok(traffic) => traffic,
            Err(error) => {
                debug!(%error, "retrying the original endpoint");
                return routed.traffic.clone();
            }
        };
        if by_endpoint && traffic.workload != routed.traffic.workload {
            if let Some(target) = &traffic.workload {
                if authorize(&routed.snapshot, target, req).is_err() {
                    debug!(
                        endpoint = ?traffic.endpoint,
                        "retry denied; retrying the original endpoint"
                    );
                    return routed.traffic.clone();
                }
            }
        }
        traffic
    }

    /// Discards health and pool state for endpoints that are no longer configured.
    pub fn sync(&self, snapshot: &Snapshot) {
        self.tracker.sync(snapshot.endpoint_keys());
        let hosts = snapshot
            .endpoint_keys()
            .map(|key| key.host)
            .collect::<HashSet<_>>();
        self.pools.retain(|dst| hosts.contains(&dst.host));
    }

    /// Syncs with every snapshot as it is published. Completes when the store is dropped.
    pub async fn sync_endpoints(self: Arc<Self>) {
        let mut snapshots = self.reader.watch();
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            self.sync(&snapshot);
            if snapshots.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Evaluates the authorization policies that apply to `workload`, returning the evaluation as an
/// error if the request is denied.
fn authorize(
    snapshot: &Snapshot,
    workload: &Workload,
    req: &Request,
) -> Result<Evaluation, Evaluation> {
    let policies = snapshot.authorization_policies_for(workload);
    let eval = authz::evaluate(policies.into_iter().map(|p| &**p), req);
    for rule in &eval.audited {
        info!(policy = %rule.policy, rule = rule.rule, decision = %eval.decision, "audit");
    }
    if eval.decision.is_allowed() {
        Ok(eval)
    } else {
        Err(eval)
    }
}

fn policy_for<'s>(
    snapshot: &'s Snapshot,
    client_ns: &str,
    dst: &Destination,
) -> Option<&'s TrafficPolicy> {
    snapshot
        .destination_policy(&dst.host, client_ns)
        .map(|dp| dp.traffic_policy_for(dst.subset.as_deref()))
}

// === impl Decision ===

impl Decision {
    /// A short label for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Denied(_) => "denied",
            Self::Failed { error, .. } => error.reason(),
            Self::Routed(_) => "routed",
        }
    }

    /// The status returned to a client whose request is not sent upstream.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Denied(eval) => eval.decision.status(),
            Self::Failed { error, .. } => Some(error.status()),
            Self::Routed(_) => None,
        }
    }
}

// === impl CallError ===

impl<E: UpstreamError> CallError<E> {
    /// The status returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Denied(_) => StatusCode::FORBIDDEN,
            Self::Route(error) => error.status(),
            Self::Aborted(AbortKind::Http(status)) => *status,
            // gRPC errors are carried in trailers.
            Self::Aborted(AbortKind::Grpc(_)) => StatusCode::OK,
            Self::Upstream(error) => match error.outcome() {
                UpstreamOutcome::Status(status) => status,
                UpstreamOutcome::Grpc(_) => StatusCode::OK,
                UpstreamOutcome::Timeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

// === impl AttemptGuard ===

impl AttemptGuard<'_> {
    fn finish(mut self, outcome: UpstreamOutcome) {
        self.report(outcome);
    }

    fn report(&mut self, outcome: UpstreamOutcome) {
        if let Some(endpoint) = self.endpoint.take() {
            self.engine.report_at(
                &self.routed.snapshot,
                &self.routed.client_ns,
                &self.destination,
                &endpoint,
                outcome,
                Instant::now(),
            );
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.report(UpstreamOutcome::Timeout);
    }
}
