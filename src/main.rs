use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use evroc_capi_provider::crd::{EvrocCluster, EvrocMachine};
use evroc_capi_provider::{controller, leader, telemetry, Error};
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the provider controllers
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show the evroc resources in the cluster
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Only watch resources in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Address serving /healthz, /readyz and /metrics
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    /// Run the controllers only while holding the leader lease
    #[arg(long, env = "LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace holding the leader lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    leader_election_namespace: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to inspect (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("evroc CAPI provider v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_provider(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = Client::try_default().await.map_err(Error::KubeError)?;

    let (clusters, machines): (Api<EvrocCluster>, Api<EvrocMachine>) = match &args.namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client, ns),
        ),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    let clusters = clusters.list(&ListParams::default()).await?;
    let machines = machines.list(&ListParams::default()).await?;

    let ready_clusters = clusters
        .items
        .iter()
        .filter(|c| c.status.as_ref().is_some_and(|s| s.ready))
        .count();
    let ready_machines = machines.items.iter().filter(|m| m.is_ready()).count();

    println!(
        "EvrocClusters: {} ({} ready)",
        clusters.items.len(),
        ready_clusters
    );
    println!(
        "EvrocMachines: {} ({} ready)",
        machines.items.len(),
        ready_machines
    );
    Ok(())
}

async fn run_provider(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let (plain_layer, json_layer) = if args.log_json {
        (None, Some(fmt::layer().json().with_target(true)))
    } else {
        (Some(fmt::layer().with_target(true)), None)
    };

    let otel_endpoint = telemetry::otlp_endpoint();
    let otel_layer = match &otel_endpoint {
        Some(endpoint) => Some(
            tracing_opentelemetry::layer().with_tracer(telemetry::init_tracer(endpoint)?),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(plain_layer)
        .with(json_layer)
        .with(otel_layer)
        .init();

    match &otel_endpoint {
        Some(endpoint) => info!("OpenTelemetry tracing exporting to {}", endpoint),
        None => info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)"),
    }

    info!("Starting evroc CAPI provider v{}", env!("CARGO_PKG_VERSION"));

    let client = Client::try_default().await.map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    #[cfg(feature = "metrics")]
    let server_state = {
        let state = evroc_capi_provider::server::ServerState::default();
        let addr = args.metrics_bind_address;
        let serve_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = evroc_capi_provider::server::run_server(addr, serve_state).await {
                error!("Health and metrics server failed: {:?}", e);
            }
        });
        state
    };
    #[cfg(not(feature = "metrics"))]
    let _ = args.metrics_bind_address;

    let mark_ready = || {
        #[cfg(feature = "metrics")]
        server_state.ready.store(true, Ordering::Relaxed);
    };

    let result = if args.leader_elect {
        let is_leader = Arc::new(AtomicBool::new(false));
        let identity = leader::holder_identity();
        info!("Leader election using holder ID: {}", identity);

        tokio::spawn(leader::run_leader_election(
            client.clone(),
            args.leader_election_namespace.clone(),
            identity,
            is_leader.clone(),
        ));

        leader::wait_for_leadership(&is_leader).await;
        mark_ready();

        tokio::select! {
            result = controller::run_controllers(client, args.namespace) => result,
            _ = leader::leadership_lost(&is_leader) => {
                error!("Leadership lost, exiting so another replica can take over");
                Err(Error::ConfigError("leader lease lost".to_string()))
            }
        }
    } else {
        mark_ready();
        controller::run_controllers(client, args.namespace).await
    };

    telemetry::shutdown_telemetry();
    result
}
