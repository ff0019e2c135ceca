use crate::{
    admin,
    api::{DecisionView, RequestSpec},
    core::{http_route::Method, scope::OutboundTrafficPolicy, Request},
    index::{self, MeshInfo},
    loader,
    log::{LogFilter, LogFormat},
    reload::Reloader,
    simulate, Engine, Metrics,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prometheus_client::registry::Registry;
use std::{fs, io::Read, net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[clap(name = "mesh-policy", about = "Evaluates service mesh routing and security policies")]
pub struct Args {
    #[clap(
        long,
        global = true,
        default_value = "mesh_policy=info,warn",
        env = "MESH_POLICY_LOG"
    )]
    log_level: LogFilter,

    #[clap(long, global = true, default_value = "plain")]
    log_format: LogFormat,

    #[clap(long, global = true, default_value = "cluster.local")]
    cluster_domain: String,

    /// The namespace whose unselected policies apply across the mesh.
    #[clap(long, global = true, default_value = "istio-system")]
    root_namespace: String,

    /// The namespace of resources and clients that do not set one.
    #[clap(long, global = true, default_value = "default")]
    default_namespace: String,

    /// Either `allow-any` or `registry-only`.
    #[clap(long, global = true, default_value = "allow-any")]
    outbound_traffic_policy: OutboundTrafficPolicy,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validates configuration and summarizes what it contains.
    Check {
        /// Configuration files or directories.
        #[clap(long, short, required = true)]
        config: Vec<PathBuf>,
    },

    /// Evaluates a single request and prints the decision as JSON.
    Decide {
        #[clap(long, short, required = true)]
        config: Vec<PathBuf>,

        /// The request as JSON, `@<path>` to read it from a file, or `-` to read it from stdin.
        #[clap(long, short)]
        request: String,
    },

    /// Evaluates a request repeatedly and summarizes how traffic is split.
    Simulate {
        #[clap(long, short, required = true)]
        config: Vec<PathBuf>,

        /// The request's authority, optionally with a port.
        #[clap(long)]
        host: String,

        #[clap(long, default_value = "/")]
        path: String,

        /// The client's namespace.
        #[clap(long)]
        namespace: Option<String>,

        #[clap(long, short = 'n', default_value = "10000")]
        requests: u64,

        #[clap(long, default_value = "0")]
        seed: u64,

        /// Prints the summary as JSON.
        #[clap(long)]
        json: bool,
    },

    /// Serves decisions over HTTP, reloading configuration as it changes.
    Serve {
        #[clap(long, short, required = true)]
        config: Vec<PathBuf>,

        #[clap(long, default_value = "0.0.0.0:9990")]
        admin_addr: SocketAddr,
    },
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            cluster_domain,
            root_namespace,
            default_namespace,
            outbound_traffic_policy,
            command,
        } = self;

        log_format.try_init(&log_level)?;

        let mesh = Arc::new(MeshInfo {
            cluster_domain,
            root_namespace,
            default_namespace,
            outbound_traffic_policy,
        });

        match command {
            Command::Check { config } => check(mesh, &config),
            Command::Decide { config, request } => decide(mesh, &config, &request),
            Command::Simulate {
                config,
                host,
                path,
                namespace,
                requests,
                seed,
                json,
            } => {
                let (_writer, engine) = load_engine(mesh, &config)?;
                let mut req = Request::new(Method::GET, host, path);
                req.source.namespace = namespace;
                let summary = simulate::run(&engine.with_seed(seed), &req, None, requests);
                if json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    println!("{summary}");
                }
                Ok(())
            }
            Command::Serve { config, admin_addr } => serve(mesh, config, admin_addr).await,
        }
    }
}

fn check(mesh: Arc<MeshInfo>, config: &[PathBuf]) -> Result<()> {
    let docs = loader::load(config)?;
    let (mut writer, _reader) = index::pair(mesh);
    let snapshot = writer.reset(docs)?;

    let counts = snapshot.counts();
    for (kind, n) in counts.by_kind() {
        if n > 0 {
            println!("{kind:<24} {n:>6}");
        }
    }
    println!("{:<24} {:>6}", "Total", counts.total());
    for key in snapshot.ignored() {
        println!("ignored: {key}");
    }
    Ok(())
}

fn decide(mesh: Arc<MeshInfo>, config: &[PathBuf], request: &str) -> Result<()> {
    let json = if request == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read request from stdin")?;
        buf
    } else if let Some(path) = request.strip_prefix('@') {
        fs::read_to_string(path).with_context(|| format!("failed to read request from {path}"))?
    } else {
        request.to_string()
    };
    let spec = serde_json::from_str::<RequestSpec>(&json).context("invalid request")?;
    let (req, workload) = spec.into_request()?;

    let (_writer, engine) = load_engine(mesh, config)?;
    let decision = engine.decide(&req, workload.as_ref());
    println!(
        "{}",
        serde_json::to_string_pretty(&DecisionView::from(&decision))?
    );
    Ok(())
}

async fn serve(mesh: Arc<MeshInfo>, config: Vec<PathBuf>, admin_addr: SocketAddr) -> Result<()> {
    let mut registry = Registry::with_prefix("mesh_policy");
    let metrics = Metrics::register(&mut registry);

    let (writer, reader) = index::pair(mesh);
    index::metrics::register(&mut registry, reader.clone());

    let reloader = Reloader::new(config, writer, metrics.clone());
    let snapshot = reloader
        .reload()
        .await
        .context("failed to load initial configuration")?;

    let engine = Arc::new(Engine::new(reader, metrics));
    engine.sync(&snapshot);
    tokio::spawn(engine.clone().sync_endpoints());

    let mut watch = tokio::spawn(reloader.watch());
    let state = Arc::new(admin::State { engine, registry });
    let mut admin = tokio::spawn(admin::serve(admin_addr, state));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for signals")?;
            info!("Received shutdown signal");
        }
        res = &mut watch => match res {
            Ok(Ok(())) => warn!("Configuration watch stopped"),
            Ok(Err(error)) => return Err(error),
            Err(error) => bail!("configuration watch failed: {error}"),
        },
        res = &mut admin => match res {
            Ok(Ok(())) => bail!("admin server stopped"),
            Ok(Err(error)) => bail!("admin server failed: {error}"),
            Err(error) => bail!("admin server failed: {error}"),
        },
    }

    watch.abort();
    admin.abort();
    Ok(())
}

/// Loads a configuration that must be valid. The writer must be held for the engine's
/// snapshot to remain current.
fn load_engine(mesh: Arc<MeshInfo>, config: &[PathBuf]) -> Result<(index::Writer, Engine)> {
    let docs = loader::load(config)?;
    let (mut writer, reader) = index::pair(mesh);
    let snapshot = writer.reset(docs)?;
    let engine = Engine::new(reader, Metrics::default());
    engine.sync(&snapshot);
    Ok((writer, engine))
}
