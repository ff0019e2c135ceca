use crate::{
    api::{DecisionView, ReportSpec, ReportView, RequestSpec},
    Engine,
};
use anyhow::{Context, Result};
use futures::future;
use hyper::{
    header::{self, HeaderValue},
    Body, Method, Request, Response, StatusCode,
};
use mesh_policy_core::{http_route::Destination, registry::EndpointKey, retry::UpstreamOutcome};
use prometheus_client::registry::Registry;
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Shared by every admin request.
pub struct State {
    pub engine: Arc<Engine>,
    pub registry: Registry,
}

#[instrument(skip(state))]
pub async fn serve(addr: SocketAddr, state: Arc<State>) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let state = state.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    let state = state.clone();
                    async move { Ok::<_, hyper::Error>(handle(&state, req).await) }
                },
            ))
        }));
    let addr = server.local_addr();
    info!(%addr, "HTTP admin server listening");
    server.await
}

pub(crate) async fn handle(state: &State, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match (path.as_str(), &method) {
        ("/live", &Method::GET | &Method::HEAD) => text(StatusCode::OK, "live\n"),
        ("/ready", &Method::GET | &Method::HEAD) => handle_ready(state),
        ("/metrics", &Method::GET) => handle_metrics(state),
        ("/decide", &Method::POST) => match handle_decide(state, req).await {
            Ok(rsp) => rsp,
            Err(error) => bad_request(error),
        },
        ("/report", &Method::POST) => match handle_report(state, req).await {
            Ok(rsp) => rsp,
            Err(error) => bad_request(error),
        },
        ("/live" | "/ready" | "/metrics" | "/decide" | "/report", _) => {
            empty(StatusCode::METHOD_NOT_ALLOWED)
        }
        _ => empty(StatusCode::NOT_FOUND),
    }
}

/// Ready once a configuration has been loaded.
fn handle_ready(state: &State) -> Response<Body> {
    if state.engine.snapshot().generation() > 0 {
        text(StatusCode::OK, "ready\n")
    } else {
        text(StatusCode::INTERNAL_SERVER_ERROR, "not ready\n")
    }
}

fn handle_metrics(state: &State) -> Response<Body> {
    let mut buf = String::new();
    if let Err(error) = prometheus_client::encoding::text::encode(&mut buf, &state.registry) {
        return text(StatusCode::INTERNAL_SERVER_ERROR, format!("{error}\n"));
    }
    let mut rsp = Response::new(Body::from(buf));
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/openmetrics-text; version=1.0.0; charset=utf-8"),
    );
    rsp
}

async fn handle_decide(state: &State, req: Request<Body>) -> Result<Response<Body>> {
    let spec = read_json::<RequestSpec>(req).await?;
    let (req, workload) = spec.into_request()?;
    let decision = state.engine.decide(&req, workload.as_ref());
    Ok(json(StatusCode::OK, &DecisionView::from(&decision)))
}

async fn handle_report(state: &State, req: Request<Body>) -> Result<Response<Body>> {
    let ReportSpec {
        host,
        subset,
        endpoint,
        namespace,
        outcome,
    } = read_json(req).await?;
    let outcome = outcome
        .parse::<UpstreamOutcome>()
        .with_context(|| format!("invalid outcome: {outcome:?}"))?;

    let snapshot = state.engine.snapshot();
    let client_ns = namespace.unwrap_or_else(|| snapshot.mesh().default_namespace.clone());
    let mut dst = Destination::new(host.clone());
    dst.subset = subset;
    let key = EndpointKey {
        host,
        addr: endpoint,
    };
    debug!(endpoint = %key, %outcome, "Reported");
    let recorded = state
        .engine
        .report_at(&snapshot, &client_ns, &dst, &key, outcome, Instant::now());
    Ok(json(StatusCode::OK, &ReportView::from(recorded)))
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Body>) -> Result<T> {
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .context("failed to read request body")?;
    serde_json::from_slice(&body).context("invalid request body")
}

fn bad_request(error: anyhow::Error) -> Response<Body> {
    #[derive(Serialize)]
    struct Error {
        error: String,
    }

    json(
        StatusCode::BAD_REQUEST,
        &Error {
            error: format!("{error:#}"),
        },
    )
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec_pretty(body) {
        Ok(mut buf) => {
            buf.push(b'\n');
            let mut rsp = Response::new(Body::from(buf));
            *rsp.status_mut() = status;
            rsp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            rsp
        }
        Err(error) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("{error}\n")),
    }
}

fn text(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut rsp = Response::new(body.into());
    *rsp.status_mut() = status;
    rsp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    rsp
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::empty());
    *rsp.status_mut() = status;
    rsp
}
