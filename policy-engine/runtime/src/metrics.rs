use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::time::Duration;

/// Counts decisions, ejections and configuration reloads.
#[derive(Clone, Debug)]
pub struct Metrics {
    decisions: Family<DecisionLabels, Counter>,
    decision_duration: Histogram,
    ejections: Family<EjectionLabels, Counter>,
    reloads: Family<ReloadLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct DecisionLabels {
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct EjectionLabels {
    host: String,
    reason: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ReloadLabels {
    result: &'static str,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "decisions",
            "Total number of requests evaluated, by outcome",
            decisions.clone(),
        );

        let decision_duration =
            Histogram::new([0.000_01, 0.000_1, 0.001, 0.01, 0.1].into_iter());
        reg.register_with_unit(
            "decision_duration",
            "Time spent evaluating a request",
            Unit::Seconds,
            decision_duration.clone(),
        );

        let ejections = Family::<EjectionLabels, Counter>::default();
        reg.register(
            "ejections",
            "Total number of endpoints ejected by outlier detection",
            ejections.clone(),
        );

        let reloads = Family::<ReloadLabels, Counter>::default();
        reg.register(
            "config_reloads",
            "Total number of configuration reloads, by result",
            reloads.clone(),
        );

        Self {
            decisions,
            decision_duration,
            ejections,
            reloads,
        }
    }

    /// Records a decision. `outcome` is `routed`, `denied` or the reason a request failed to
    /// route.
    pub fn decided(&self, outcome: &'static str, elapsed: Duration) {
        self.decisions
            .get_or_create(&DecisionLabels { outcome })
            .inc();
        self.decision_duration.observe(elapsed.as_secs_f64());
    }

    pub fn ejected(&self, host: &str, reason: &'static str) {
        self.ejections
            .get_or_create(&EjectionLabels {
                host: host.to_string(),
                reason,
            })
            .inc();
    }

    pub fn reloaded(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.reloads.get_or_create(&ReloadLabels { result }).inc();
    }
}

impl Default for Metrics {
    /// Metrics that are not registered anywhere.
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
