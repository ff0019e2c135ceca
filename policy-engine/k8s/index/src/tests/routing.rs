use super::*;
use mesh_policy_core::{http_route::StatusCode, RouteError};

const BOOKINFO: &str = r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: reviews
  namespace: bookinfo
spec:
  hosts: [reviews]
  http:
  - name: jason
    match:
    - headers:
        end-user: {exact: jason}
    route:
    - destination: {host: reviews, subset: v2}
  - name: canary
    route:
    - destination: {host: reviews, subset: v1}
      weight: 80
    - destination: {host: reviews, subset: v3}
      weight: 20
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
  - {name: v3, labels: {version: v3}}
"#;

const REVIEWS: &str = "reviews.bookinfo.svc.cluster.local";

#[test]
fn first_matching_rule_wins() {
    let test = TestConfig::default();
    let snapshot = test.snapshot(BOOKINFO);

    let mut req = mk_request_from("reviews:9080", "/reviews/1", "bookinfo", None);
    req.headers
        .insert("end-user", http::HeaderValue::from_static("jason"));
    let rm = snapshot.route_for(&req).expect("request must be routed");
    assert_eq!(rm.host, REVIEWS);
    assert_eq!(vs_rule(&rm), Some(("bookinfo/reviews".to_string(), 0)));
    assert_eq!(
        destinations(&rm),
        vec![Destination::new(REVIEWS).with_subset("v2")]
    );

    let req = mk_request_from("reviews:9080", "/reviews/1", "bookinfo", None);
    let rm = snapshot.route_for(&req).expect("request must be routed");
    assert_eq!(vs_rule(&rm), Some(("bookinfo/reviews".to_string(), 1)));
    let weights = rm
        .route
        .destinations
        .iter()
        .map(|wd| wd.weight)
        .collect::<Vec<_>>();
    assert_eq!(weights, vec![80, 20]);
}

#[test]
fn short_names_resolve_in_the_client_namespace() {
    let test = TestConfig::default();
    let snapshot = test.snapshot(BOOKINFO);

    // From another namespace, `reviews` names a different (unknown) host.
    let req = mk_request_from("reviews", "/", "other", None);
    let rm = snapshot.route_for(&req).expect("unknown hosts pass through");
    assert_eq!(rm.host, "reviews.other.svc.cluster.local");
    assert_eq!(rm.source, RouteSource::Passthrough);

    let req = mk_request_from(REVIEWS, "/", "other", None);
    let rm = snapshot.route_for(&req).expect("request must be routed");
    assert_eq!(vs_rule(&rm), Some(("bookinfo/reviews".to_string(), 1)));
}

#[test]
fn unmatched_request_is_not_found() {
    let test = TestConfig::default();
    let snapshot = test.snapshot(
        r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: api
  namespace: web
spec:
  hosts: [api.example.com]
  http:
  - match:
    - uri: {prefix: /v1/}
      method: {exact: GET}
    - uri: {regex: "/v2/[a-z]+"}
    route:
    - destination: {host: api-v1.web.svc.cluster.local}
"#,
    );

    assert!(snapshot
        .route_for(&mk_request("api.example.com", "/v1/users"))
        .is_ok());
    assert!(snapshot
        .route_for(&mk_request("api.example.com", "/v2/users?page=2"))
        .is_ok());

    let err = snapshot
        .route_for(&mk_request("api.example.com", "/v2/users/1"))
        .expect_err("regex must match the whole path");
    assert_eq!(
        err,
        RouteError::NotFound {
            host: "api.example.com".to_string()
        }
    );
    assert_eq!(err.status(), StatusCode::NOT_FOUND);

    let mut post = mk_request("api.example.com", "/v1/users");
    post.method = Method::POST;
    assert!(snapshot.route_for(&post).is_err());
    assert!(snapshot.matching_rules(&post).is_empty());
}

#[test]
fn exact_host_wins_over_wildcards() {
    let test = TestConfig::default();
    let snapshot = test.snapshot(
        r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: any
  namespace: web
spec:
  hosts: ["*"]
  http:
  - route:
    - destination: {host: any.backend.internal}
---
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: wildcard
  namespace: web
spec:
  hosts: ["*.example.com"]
  http:
  - route:
    - destination: {host: wildcard.backend.internal}
---
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: api-wildcard
  namespace: web
spec:
  hosts: ["*.api.example.com"]
  http:
  - route:
    - destination: {host: api.backend.internal}
---
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: exact
  namespace: web
spec:
  hosts: [www.example.com]
  http:
  - route:
    - destination: {host: exact.backend.internal}
"#,
    );

    for (authority, expected) in [
        ("www.example.com", "exact.backend.internal"),
        ("WWW.Example.com:80", "exact.backend.internal"),
        ("shop.example.com", "wildcard.backend.internal"),
        ("v1.api.example.com", "api.backend.internal"),
        ("example.org", "any.backend.internal"),
    ] {
        let rm = snapshot
            .route_for(&mk_request(authority, "/"))
            .expect("request must be routed");
        assert_eq!(
            destinations(&rm),
            vec![Destination::new(expected)],
            "{authority}"
        );
    }
}

#[test]
fn older_virtual_services_take_precedence() {
    let test = TestConfig::default();
    let snapshot = test.snapshot(
        r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: aaa-newer
  namespace: web
  creationTimestamp: "2024-02-01T00:00:00Z"
spec:
  hosts: [www.example.com]
  http:
  - route:
    - destination: {host: newer.backend.internal}
---
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: zzz-older
  namespace: web
  creationTimestamp: "2024-01-01T00:00:00Z"
spec:
  hosts: [www.example.com]
  http:
  - match:
    - uri: {prefix: /admin}
    route:
    - destination: {host: admin.backend.internal}
  - route:
    - destination: {host: older.backend.internal}
"#,
    );

    let req = mk_request("www.example.com", "/admin/users");
    let rules = snapshot
        .matching_rules(&req)
        .into_iter()
        .map(|r| (r.virtual_service.name, r.index))
        .collect::<Vec<_>>();
    assert_eq!(
        rules,
        vec![
            ("zzz-older".to_string(), 0),
            ("zzz-older".to_string(), 1),
            ("aaa-newer".to_string(), 0),
        ]
    );

    let rm = snapshot.route_for(&req).unwrap();
    assert_eq!(destinations(&rm), vec![Destination::new("admin.backend.internal")]);
    let rm = snapshot.route_for(&mk_request("www.example.com", "/")).unwrap();
    assert_eq!(destinations(&rm), vec![Destination::new("older.backend.internal")]);
}

#[test]
fn gateways_scope_virtual_services() {
    let test = TestConfig::default();
    let snapshot = test.snapshot(
        r#"
apiVersion: networking.istio.io/v1
kind: Gateway
metadata:
  name: ingress
  namespace: istio-system
spec:
  selector: {istio: ingressgateway}
  servers:
  - port: {number: 80, name: http, protocol: HTTP}
    hosts: ["*.example.com"]
---
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: www
  namespace: web
spec:
  hosts: [www.example.com]
  gateways: [istio-system/ingress]
  http:
  - route:
    - destination: {host: frontend}
"#,
    );

    // Within the mesh, the host is unknown.
    let rm = snapshot
        .route_for(&mk_request("www.example.com", "/"))
        .unwrap();
    assert_eq!(rm.source, RouteSource::Passthrough);

    let mut req = mk_request("www.example.com", "/");
    req.gateway = Some("istio-system/ingress".to_string());
    let rm = snapshot.route_for(&req).expect("gateway must route");
    assert_eq!(
        destinations(&rm),
        vec![Destination::new("frontend.web.svc.cluster.local")]
    );

    // Port 443 is not exposed by the gateway.
    let mut req = mk_request("www.example.com:443", "/");
    req.gateway = Some("istio-system/ingress".to_string());
    assert!(matches!(
        snapshot.route_for(&req),
        Err(RouteError::NotFound { .. })
    ));

    let mut req = mk_request("www.example.com", "/");
    req.gateway = Some("istio-system/egress".to_string());
    assert!(matches!(
        snapshot.route_for(&req),
        Err(RouteError::NotFound { .. })
    ));
}

#[test]
fn export_to_limits_visibility() {
    let test = TestConfig::default();
    let snapshot = test.snapshot(
        r#"
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata:
  name: private
  namespace: team-a
spec:
  hosts: [db.example.com]
  exportTo: ["."]
  http:
  - route:
    - destination: {host: db.team-a.svc.cluster.local}
"#,
    );

    let rm = snapshot
        .route_for(&mk_request_from("db.example.com", "/", "team-a", None))
        .unwrap();
    assert!(vs_rule(&rm).is_some());

    let rm = snapshot
        .route_for(&mk_request_from("db.example.com", "/", "team-b", None))
        .unwrap();
    assert_eq!(rm.source, RouteSource::Passthrough);
}
