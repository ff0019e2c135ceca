use crate::engine::{Decision, Engine};
use mesh_policy_core::{Request, Workload};
use serde::Serialize;
use std::{collections::BTreeMap, fmt};

/// Tallies the decisions made for repeated evaluations of a single request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub requests: u64,
    pub outcomes: BTreeMap<&'static str, u64>,
    pub destinations: BTreeMap<String, u64>,
    pub endpoints: BTreeMap<String, u64>,
    pub delayed: u64,
    pub aborted: u64,
    pub delayed_and_aborted: u64,
    pub mirrored: u64,
}

pub fn run(
    engine: &Engine,
    req: &Request,
    workload: Option<&Workload>,
    requests: u64,
) -> Summary {
    let mut summary = Summary {
        requests,
        ..Summary::default()
    };
    for _ in 0..requests {
        let decision = engine.decide(req, workload);
        *summary.outcomes.entry(decision.outcome()).or_default() += 1;

        let Decision::Routed(routed) = decision else {
            continue;
        };
        let traffic = &routed.traffic;
        *summary
            .destinations
            .entry(traffic.destination.to_string())
            .or_default() += 1;
        if let Some(ep) = &traffic.endpoint {
            *summary.endpoints.entry(ep.to_string()).or_default() += 1;
        }

        let (delay, abort) = (traffic.fault.delay.is_some(), traffic.fault.abort.is_some());
        summary.delayed += u64::from(delay);
        summary.aborted += u64::from(abort);
        summary.delayed_and_aborted += u64::from(delay && abort);
        summary.mirrored += u64::from(traffic.mirror.is_some());
    }
    summary
}

// === impl Summary ===

impl Summary {
    fn percent(&self, n: u64) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        n as f64 * 100.0 / self.requests as f64
    }

    fn section(&self, f: &mut fmt::Formatter<'_>, name: &str, counts: &[(&str, u64)]) -> fmt::Result {
        if counts.is_empty() {
            return Ok(());
        }
        writeln!(f, "{name}:")?;
        for (key, n) in counts {
            writeln!(f, "  {key:<48} {n:>8} {:>6.2}%", self.percent(*n))?;
        }
        Ok(())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "requests: {}", self.requests)?;
        let outcomes = self.outcomes.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>();
        self.section(f, "outcomes", &outcomes)?;
        let destinations = self.destinations.iter().map(|(k, v)| (k.as_str(), *v)).collect::<Vec<_>>();
        self.section(f, "destinations", &destinations)?;
        let endpoints = self.endpoints.iter().map(|(k, v)| (k.as_str(), *v)).collect::<Vec<_>>();
        self.section(f, "endpoints", &endpoints)?;
        writeln!(f, "faults:")?;
        for (name, n) in [
            ("delayed", self.delayed),
            ("aborted", self.aborted),
            ("delayed and aborted", self.delayed_and_aborted),
        ] {
            writeln!(f, "  {name:<48} {n:>8} {:>6.2}%", self.percent(n))?;
        }
        write!(
            f,
            "mirrored: {} {:.2}%",
            self.mirrored,
            self.percent(self.mirrored)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{mk_request, TestConfig};

    const CONFIG: &str = r#"
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
  - fault:
      delay:
        fixedDelay: 1s
        percentage: {value: 50}
      abort:
        httpStatus: 503
        percentage: {value: 10}
    route:
    - destination: {host: reviews, subset: v1}
      weight: 80
    - destination: {host: reviews, subset: v2}
      weight: 20
"#;

    #[test]
    fn tallies_splits_and_faults() {
        let test = TestConfig::default();
        let engine = test.engine(CONFIG);
        let req = mk_request("reviews:9080", "/", "bookinfo");

        let summary = run(&engine, &req, None, 10_000);
        assert_eq!(summary.requests, 10_000);
        assert_eq!(summary.outcomes.get("routed"), Some(&10_000));

        let v1 = summary.destinations["reviews.bookinfo.svc.cluster.local (v1)"];
        let v2 = summary.destinations["reviews.bookinfo.svc.cluster.local (v2)"];
        assert_eq!(v1 + v2, 10_000);
        assert!((7700..=8300).contains(&v1), "v1={v1}");

        assert_eq!(
            summary.endpoints["reviews.bookinfo.svc.cluster.local@10.0.0.1:9080"],
            v1
        );
        assert!((4500..=5500).contains(&summary.delayed), "{summary:?}");
        assert!((700..=1300).contains(&summary.aborted), "{summary:?}");
        assert!(
            (250..=750).contains(&summary.delayed_and_aborted),
            "{summary:?}"
        );
        assert_eq!(summary.mirrored, 0);

        let text = summary.to_string();
        assert!(text.starts_with("requests: 10000\n"), "{text}");
        assert!(text.contains("destinations:"), "{text}");
        assert!(text.ends_with("mirrored: 0 0.00%"), "{text}");
    }

    #[test]
    fn passthrough_requests_have_no_endpoint() {
        let test = TestConfig::default();
        let engine = test.engine(CONFIG);
        let req = mk_request("httpbin.org", "/", "bookinfo");

        let summary = run(&engine, &req, None, 10);
        assert_eq!(summary.outcomes.get("routed"), Some(&10));
        assert_eq!(summary.destinations.get("httpbin.org"), Some(&10));
        assert!(summary.endpoints.is_empty());
        assert_eq!(summary.delayed + summary.aborted, 0);
    }
}
