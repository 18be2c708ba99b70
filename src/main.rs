//! ringcache
//!
//! One binary, two roles:
//!
//! - `ringcache manager` runs the cluster manager: hash ring, replication,
//!   node provisioning, health monitoring and rebalancing.
//! - `ringcache node` runs a single cache node serving its local store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Cluster Manager                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Replicated  │───▶│   HashRing   │◀───│    Health    │       │
//! │  │    Access    │    │  + Registry  │    │   Monitor    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//!          │ HTTP                                   │ Provisioner
//!          ▼                                        ▼
//!   ringcache node × N                    Kubernetes pods / static
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ringcache::adapters::{
    register_with_manager, HttpNodeClient, HttpNodeClientConfig, InMemoryFleet,
    InMemoryProvisioner, KubernetesProvisioner, KubernetesProvisionerConfig,
    LoggingEventPublisher, StaticProvisioner,
};
use ringcache::api::{self, ManagerContext, NodeContext};
use ringcache::cluster::{
    ClusterState, HealthMonitorConfig, NodeHealthMonitor, NodeRegistry, RebalanceCoordinator,
    ReplicatedAccess,
};
use ringcache::domain::{EventPublisher, NodeClient, Provisioner};
use ringcache::error::{Error, Result};
use ringcache::store::{CacheStore, StoreConfig, SystemClock};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ringcache - distributed in-memory key-value cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cluster manager
    Manager(ManagerArgs),
    /// Run a cache node
    Node(NodeArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ProvisionerKind {
    /// One pod per node
    Kubernetes,
    /// Externally started nodes that register themselves
    Static,
    /// In-process nodes (demo and testing)
    Memory,
}

#[derive(ClapArgs, Debug)]
struct ManagerArgs {
    /// Manager HTTP bind address
    #[arg(long, env = "MANAGER_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// How node processes are created and discovered
    #[arg(long, env = "PROVISIONER", value_enum, default_value = "static")]
    provisioner: ProvisionerKind,

    /// Namespace for node pods
    #[arg(long, env = "NODE_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Image for node pods
    #[arg(long, env = "NODE_IMAGE", default_value = "ringcache:latest")]
    node_image: String,

    /// Headless service giving node pods DNS names
    #[arg(long, env = "NODE_SERVICE", default_value = "ringcache-nodes")]
    node_service: String,

    /// Port node pods listen on
    #[arg(long, env = "NODE_PORT", default_value = "8080")]
    node_port: u16,

    /// Seconds between health passes
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value = "15")]
    poll_interval_seconds: u64,

    /// Health probe timeout in milliseconds
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value = "2000")]
    probe_timeout_ms: u64,

    /// Timeout for data-plane calls to nodes, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECONDS", default_value = "10")]
    request_timeout_seconds: u64,
}

#[derive(ClapArgs, Debug)]
struct NodeArgs {
    /// Node HTTP bind address
    #[arg(long, env = "NODE_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Node name used when registering with the manager
    #[arg(long, env = "RINGCACHE_NODE_NAME")]
    name: Option<String>,

    /// Address the manager should use to reach this node
    #[arg(long, env = "ADVERTISE_ADDR")]
    advertise_addr: Option<String>,

    /// Manager base URL; when set the node registers itself on startup
    #[arg(long, env = "MANAGER_URL")]
    manager_url: Option<String>,

    /// Store shard count
    #[arg(long, env = "SHARD_COUNT", default_value = "64")]
    shard_count: usize,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    match args.command {
        Command::Manager(manager) => run_manager(manager, cancel).await,
        Command::Node(node) => run_node(node, cancel).await,
    }
}

async fn run_manager(args: ManagerArgs, cancel: CancellationToken) -> Result<()> {
    info!("Starting ringcache manager");
    info!("  Provisioner: {:?}", args.provisioner);
    info!("  Poll interval: {}s", args.poll_interval_seconds);
    info!("  Probe timeout: {}ms", args.probe_timeout_ms);

    let http_config = HttpNodeClientConfig {
        request_timeout: Duration::from_secs(args.request_timeout_seconds),
        ..Default::default()
    };

    let (client, provisioner): (Arc<dyn NodeClient>, Arc<dyn Provisioner>) =
        match args.provisioner {
            ProvisionerKind::Kubernetes => {
                let kube_client = Client::try_default().await.map_err(|e| {
                    error!("Failed to create Kubernetes client: {}", e);
                    Error::Internal(format!("Kubernetes client creation failed: {}", e))
                })?;
                info!("Connected to Kubernetes cluster");

                let config = KubernetesProvisionerConfig {
                    namespace: args.namespace.clone(),
                    image: args.node_image.clone(),
                    service: args.node_service.clone(),
                    port: args.node_port,
                };
                (
                    Arc::new(HttpNodeClient::new(http_config)?),
                    Arc::new(KubernetesProvisioner::new(kube_client, config)),
                )
            }
            ProvisionerKind::Static => (
                Arc::new(HttpNodeClient::new(http_config)?),
                Arc::new(StaticProvisioner::new()),
            ),
            ProvisionerKind::Memory => {
                let fleet = Arc::new(InMemoryFleet::new());
                (fleet.clone(), Arc::new(InMemoryProvisioner::new(fleet)))
            }
        };

    let probe_timeout = Duration::from_millis(args.probe_timeout_ms);
    let state = Arc::new(ClusterState::new());
    let events: Arc<dyn EventPublisher> = Arc::new(LoggingEventPublisher::info_level());

    let access = Arc::new(
        ReplicatedAccess::new(state.clone(), client.clone()).with_probe_timeout(probe_timeout),
    );
    let rebalancer = Arc::new(RebalanceCoordinator::new(access.clone(), events.clone()));
    let registry = Arc::new(NodeRegistry::new(
        state.clone(),
        provisioner.clone(),
        rebalancer.clone(),
        events.clone(),
    ));

    match registry.restore().await {
        Ok(count) => info!("Restored {} masters", count),
        Err(e) => warn!("Could not restore nodes from provisioner: {}", e),
    }

    let monitor = NodeHealthMonitor::new(
        HealthMonitorConfig {
            poll_interval: Duration::from_secs(args.poll_interval_seconds),
            probe_timeout,
        },
        state,
        provisioner,
        client,
        rebalancer,
        events,
    );
    let monitor_cancel = cancel.clone();
    let monitor_task = tokio::spawn(async move { monitor.run(monitor_cancel).await });

    let listener = api::bind(&args.listen_addr).await?;
    let ctx = ManagerContext::new(access, registry);
    api::serve(
        listener,
        "Manager",
        move |req| api::cluster::handle(ctx.clone(), req),
        cancel,
    )
    .await?;

    if let Err(e) = monitor_task.await {
        error!("Health monitor task failed: {}", e);
    }
    info!("Manager shutdown complete");
    Ok(())
}

async fn run_node(args: NodeArgs, cancel: CancellationToken) -> Result<()> {
    let name = args.name.clone().unwrap_or_else(|| args.listen_addr.clone());
    info!("Starting ringcache node {}", name);

    let store = Arc::new(CacheStore::with_config(
        StoreConfig {
            shard_count: args.shard_count,
        },
        Arc::new(SystemClock),
    ));

    let listener = api::bind(&args.listen_addr).await?;

    if let Some(manager_url) = args.manager_url.clone() {
        let advertise = args
            .advertise_addr
            .clone()
            .unwrap_or_else(|| format!("http://{}", args.listen_addr));
        let node_name = name.clone();
        tokio::spawn(async move { announce(&manager_url, &node_name, &advertise).await });
    }

    let ctx = NodeContext::new(name, store);
    api::serve(
        listener,
        "Node",
        move |req| api::node::handle(ctx.clone(), req),
        cancel,
    )
    .await?;

    info!("Node shutdown complete");
    Ok(())
}

/// Register with the manager, retrying while it comes up
async fn announce(manager_url: &str, name: &str, address: &str) {
    const ATTEMPTS: u32 = 10;

    for attempt in 1..=ATTEMPTS {
        match register_with_manager(manager_url, name, address).await {
            Ok(node) => {
                info!("Registered with manager as {} ({})", node.name, node.status);
                return;
            }
            Err(e) => {
                warn!("Registration attempt {}/{} failed: {}", attempt, ATTEMPTS, e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
    error!("Giving up registering with {}", manager_url);
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("kube=info".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
