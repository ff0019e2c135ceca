use super::*;
use crate::InvalidResources;

#[test]
fn undefined_subsets_are_rejected() {
    let test = TestConfig::default();
    let err = test.build_error(
        r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: reviews
  namespace: bookinfo
spec:
  hosts: [reviews]
  http:
  - route:
    - destination: {host: reviews, subset: v4}
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
"#,
    );

    let invalid = err
        .downcast_ref::<InvalidResources>()
        .expect("error must list invalid resources");
    let keys = invalid.keys().map(ToString::to_string).collect::<Vec<_>>();
    assert_eq!(keys, vec!["VirtualService bookinfo/reviews"]);

    let msg = err.to_string();
    assert!(msg.contains("http[0]"), "{msg}");
    assert!(msg.contains("\"v4\""), "{msg}");
}

#[test]
fn subsets_require_a_destination_rule() {
    let test = TestConfig::default();
    let err = test.build_error(
        r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: ratings
  namespace: bookinfo
spec:
  hosts: [ratings]
  http:
  - route:
    - destination: {host: ratings, subset: v1}
"#,
    );
    assert!(err.to_string().contains("no DestinationRule"), "{err}");
}

#[test]
fn every_invalid_resource_is_reported() {
    let test = TestConfig::default();
    let err = test.build_error(
        r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: split
  namespace: web
spec:
  hosts: [www.example.com]
  http:
  - route:
    - destination: {host: a.web.svc.cluster.local}
      weight: 50
    - destination: {host: b.web.svc.cluster.local}
      weight: 40
---
apiVersion: networking.istio.io/v1
kind: ServiceEntry
metadata:
  name: static
  namespace: web
spec:
  hosts: [db.example.com]
  ports:
  - {number: 5432, name: tcp, protocol: TCP}
  resolution: STATIC
---
apiVersion: networking.istio.io/v1
kind: ServiceEntry
metadata:
  name: valid
  namespace: web
spec:
  hosts: [api.example.com]
  ports:
  - {number: 443, name: https, protocol: TLS}
  resolution: DNS
"#,
    );

    let invalid = err
        .downcast_ref::<InvalidResources>()
        .expect("error must list invalid resources");
    let keys = invalid.keys().map(ToString::to_string).collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec!["ServiceEntry web/static", "VirtualService web/split"]
    );

    let msg = err.to_string();
    assert!(msg.starts_with("2 invalid resource(s)"), "{msg}");
    assert!(msg.contains("must sum to 100"), "{msg}");
    assert!(msg.contains("STATIC resolution"), "{msg}");
}

#[test]
fn duplicate_resources_are_rejected() {
    let test = TestConfig::default();
    let err = test.build_error(
        r#"
apiVersion: networking.istio.io/v1
kind: ServiceEntry
metadata:
  name: httpbin
spec:
  hosts: [httpbin.org]
  resolution: DNS
---
apiVersion: networking.istio.io/v1
kind: ServiceEntry
metadata:
  name: httpbin
  namespace: default
spec:
  hosts: [httpbin.org]
  resolution: DNS
"#,
    );
    assert!(err.to_string().contains("duplicate resource"), "{err}");
}

#[test]
fn unsupported_kinds_are_ignored() {
    let test = TestConfig::default();
    let snapshot = test.snapshot(
        r#"
apiVersion: networking.istio.io/v1alpha3
kind: EnvoyFilter
metadata:
  name: lua
  namespace: istio-system
spec:
  configPatches: []
---
apiVersion: telemetry.istio.io/v1
kind: Telemetry
metadata:
  name: mesh-default
  namespace: istio-system
spec:
  accessLogging:
  - providers: [{name: envoy}]
---
apiVersion: networking.istio.io/v1
kind: ServiceEntry
metadata:
  name: httpbin
  namespace: egress
spec:
  hosts: [httpbin.org]
  resolution: DNS
"#,
    );

    let counts = snapshot.counts();
    assert_eq!(counts.ignored, 2);
    assert_eq!(counts.service_entries, 1);
    assert_eq!(counts.total(), 3);

    let ignored = snapshot
        .ignored()
        .iter()
        .map(|k| k.kind.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ignored, vec!["EnvoyFilter", "Telemetry"]);
}

#[test]
fn custom_authorization_is_rejected() {
    let test = TestConfig::default();
    let err = test.build_error(
        r#"
apiVersion: security.istio.io/v1
kind: AuthorizationPolicy
metadata:
  name: ext-authz
  namespace: web
spec:
  action: CUSTOM
  provider: {name: opa}
  rules:
  - to:
    - operation: {paths: ["/admin/*"]}
"#,
    );
    let msg = format!("{err}");
    assert!(msg.contains("AuthorizationPolicy web/ext-authz"), "{msg}");
    assert!(msg.contains("CUSTOM"), "{msg}");
}
