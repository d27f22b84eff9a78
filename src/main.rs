//! DirectPV
//!
//! Single binary for the node agent, the drive reconciler and the admin
//! commands.
//!
//! ```text
//! directpv node-agent --kube-node-name=<node>     device listing, init, node API
//! directpv controller --kube-node-name=<node>     drive and volume reconcilers
//! directpv discover | init | cordon | ...         admin operations
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures::future::LocalBoxFuture;
use directpv_control_plane::admin::discover::DiscoverArgs;
use directpv_control_plane::admin::{
    parse_label_changes, Admin, AdminConfig, Cluster, Credential, DriveResult, InitConfig,
    RepairArgs, VolumeResult,
};
use directpv_control_plane::api::{NodeApiServer, NodeApiServerConfig};
use directpv_control_plane::lifecycle::{DriveReconciler, VolumeReconciler};
use directpv_control_plane::node::{InitRequestController, NodeAgent, NodeAgentConfig, NodeController};
use directpv_control_plane::selector::{DriveSelection, VolumeSelection};
use directpv_control_plane::{
    Clients, DeviceProber, DriveSelectorArgs, Error, ProbeConfig, Progress, ProgressMessage,
    RetryConfig, VolumeSelectorArgs, XfsConfig, XfsFormatter,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// DirectPV - direct-attached persistent volumes
#[derive(Parser, Debug)]
#[command(name = "directpv", author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Kubernetes node name of this process
    #[arg(long, env = "KUBE_NODE_NAME", global = true)]
    kube_node_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node agent
    NodeAgent(NodeAgentCmd),
    /// Run the drive and volume reconcilers for this node
    Controller,
    /// Discover devices and write an init config
    Discover(DiscoverCmd),
    /// Initialize the drives selected in an init config
    Init(InitCmd),
    /// Prevent scheduling of new volumes on drives
    Cordon(DriveCmd),
    /// Allow scheduling of new volumes on drives
    Uncordon(DriveCmd),
    /// Make bound volumes read-only
    Suspend(DangerousCmd),
    /// Undo suspend
    Resume(DangerousCmd),
    /// Unmount drives with no volumes, keeping their filesystem
    Release(DriveCmd),
    /// Unmount and forget drives with no volumes
    Remove(DriveCmd),
    /// Move volumes from one drive to another on the same node
    Move(MoveCmd),
    /// Set or remove labels on drives or volumes
    Label(LabelCmd),
    /// Purge volumes whose persistent volume is gone, released or failed
    Clean(VolumeCmd),
    /// Create repair jobs for drives
    Repair(RepairCmd),
    /// Show per-node drive and volume totals
    Info,
}

#[derive(Args, Debug)]
struct NodeAgentCmd {
    /// Node API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:40443")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    #[arg(long, env = "RACK", default_value = "default")]
    rack: String,

    #[arg(long, env = "ZONE", default_value = "default")]
    zone: String,

    #[arg(long, env = "REGION", default_value = "default")]
    region: String,
}

#[derive(Args, Debug)]
struct DiscoverCmd {
    /// Node names or ellipsis patterns
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,

    /// Drive names or ellipsis patterns
    #[arg(long, value_delimiter = ',')]
    drives: Vec<String>,

    /// Init config to write
    #[arg(long, default_value = "drives.yaml")]
    output: PathBuf,

    /// Seconds to wait for nodes to respond
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct InitCmd {
    /// Init config written by discover
    file: PathBuf,

    /// Seconds to wait for nodes to finish
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Confirm that selected devices will be formatted
    #[arg(long)]
    dangerous: bool,
}

#[derive(Args, Debug, Clone)]
struct DriveSelectorFlags {
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    drives: Vec<String>,

    #[arg(long = "drive-id", value_delimiter = ',')]
    drive_ids: Vec<String>,

    #[arg(long = "status", value_delimiter = ',')]
    statuses: Vec<String>,

    #[arg(long = "access-tier", value_delimiter = ',')]
    access_tiers: Vec<String>,

    /// Match every drive
    #[arg(long)]
    all: bool,
}

impl DriveSelectorFlags {
    fn compile(&self) -> directpv_control_plane::Result<DriveSelection> {
        DriveSelectorArgs {
            nodes: self.nodes.clone(),
            drives: self.drives.clone(),
            drive_ids: self.drive_ids.clone(),
            statuses: self.statuses.clone(),
            access_tiers: self.access_tiers.clone(),
            all: self.all,
            ..Default::default()
        }
        .compile()
    }
}

#[derive(Args, Debug, Clone)]
struct VolumeSelectorFlags {
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    drives: Vec<String>,

    #[arg(long = "drive-id", value_delimiter = ',')]
    drive_ids: Vec<String>,

    #[arg(long = "pod-name", value_delimiter = ',')]
    pod_names: Vec<String>,

    #[arg(long = "pod-namespace", value_delimiter = ',')]
    pod_namespaces: Vec<String>,

    #[arg(long = "status", value_delimiter = ',')]
    statuses: Vec<String>,

    /// Volume names or ellipsis patterns
    volumes: Vec<String>,

    /// Match every volume
    #[arg(long)]
    all: bool,
}

impl VolumeSelectorFlags {
    fn compile(&self) -> directpv_control_plane::Result<VolumeSelection> {
        VolumeSelectorArgs {
            nodes: self.nodes.clone(),
            drives: self.drives.clone(),
            drive_ids: self.drive_ids.clone(),
            pod_names: self.pod_names.clone(),
            pod_namespaces: self.pod_namespaces.clone(),
            statuses: self.statuses.clone(),
            volumes: self.volumes.clone(),
            all: self.all,
            ..Default::default()
        }
        .compile()
    }
}

#[derive(Args, Debug, Clone, Copy)]
struct CommonFlags {
    /// Suppress output; "no matching resources" is not reported
    #[arg(long)]
    quiet: bool,

    /// Report what would change without writing
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct DriveCmd {
    #[command(flatten)]
    selector: DriveSelectorFlags,
    #[command(flatten)]
    common: CommonFlags,
}

#[derive(Args, Debug)]
struct VolumeCmd {
    #[command(flatten)]
    selector: VolumeSelectorFlags,
    #[command(flatten)]
    common: CommonFlags,
}

#[derive(Subcommand, Debug)]
enum Target {
    Drives(DriveCmd),
    Volumes(VolumeCmd),
}

impl Target {
    fn common(&self) -> CommonFlags {
        match self {
            Target::Drives(cmd) => cmd.common,
            Target::Volumes(cmd) => cmd.common,
        }
    }
}

#[derive(Args, Debug)]
struct DangerousCmd {
    /// Confirm the operation; bound volumes are affected
    #[arg(long, global = true)]
    dangerous: bool,

    #[command(subcommand)]
    target: Target,
}

#[derive(Args, Debug)]
struct MoveCmd {
    /// Source drive ID
    source: String,
    /// Destination drive ID
    destination: String,
    #[command(flatten)]
    common: CommonFlags,
}

#[derive(Args, Debug)]
struct LabelCmd {
    /// Changes as `key=value` or `key-`
    #[arg(long = "set", required = true, value_delimiter = ',')]
    changes: Vec<String>,

    #[command(subcommand)]
    target: Target,
}

#[derive(Args, Debug)]
struct RepairCmd {
    /// Drive IDs to repair
    #[arg(required = true)]
    drive_ids: Vec<String>,

    /// Pass --force to the repair tool
    #[arg(long)]
    force: bool,

    #[arg(long = "disable-prefetch")]
    disable_prefetch: bool,

    /// Run the repair tool without modifying the filesystem
    #[arg(long = "dry-run")]
    dry_run: bool,

    #[arg(long)]
    quiet: bool,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: unable to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let quiet = cli.command.is_quiet();
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let lib_err = err.downcast_ref::<Error>();
            let suppressed = quiet && matches!(lib_err, Some(Error::NoMatchingResourcesFound));
            if !suppressed {
                eprintln!("Error: {:#}", err);
            }
            let code = lib_err.map(Error::exit_code).unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

impl Command {
    fn is_quiet(&self) -> bool {
        match self {
            Command::Cordon(cmd)
            | Command::Uncordon(cmd)
            | Command::Release(cmd)
            | Command::Remove(cmd) => cmd.common.quiet,
            Command::Suspend(cmd) | Command::Resume(cmd) => cmd.target.common().quiet,
            Command::Label(cmd) => cmd.target.common().quiet,
            Command::Clean(cmd) => cmd.common.quiet,
            Command::Move(cmd) => cmd.common.quiet,
            Command::Repair(cmd) => cmd.quiet,
            _ => false,
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::NodeAgent(args) => {
            let node_id = node_name(&cli.kube_node_name)?;
            run_node_agent(node_id, args).await
        }
        Command::Controller => {
            let node_id = node_name(&cli.kube_node_name)?;
            run_controller(node_id).await
        }
        command => run_admin(command).await,
    }
}

fn node_name(name: &Option<String>) -> anyhow::Result<String> {
    match name.as_deref() {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(Error::Validation("--kube-node-name must be set".into()).into()),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Node Agent
// =============================================================================

async fn kube_client() -> anyhow::Result<kube::Client> {
    kube::Client::try_default()
        .await
        .context("unable to create kubernetes client")
}

async fn node_agent(node_id: String, topology: Option<&NodeAgentCmd>) -> anyhow::Result<(Arc<NodeAgent>, kube::Client)> {
    let client = kube_client().await?;
    let mut config = NodeAgentConfig {
        node_id,
        ..Default::default()
    };
    if let Some(args) = topology {
        config.rack = args.rack.clone();
        config.zone = args.zone.clone();
        config.region = args.region.clone();
    }
    let agent = NodeAgent::new(
        config,
        Arc::new(DeviceProber::new(ProbeConfig::default())),
        Arc::new(XfsFormatter::new(XfsConfig::default())),
        Clients::kube(client.clone(), RetryConfig::default()),
    );
    Ok((agent, client))
}

fn parse_addr(addr: &str, what: &str) -> anyhow::Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address {}: {}", what, addr, e)).into())
}

fn shutdown_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        cancel.cancel();
    });
}

async fn wait_all(tasks: Vec<(&'static str, JoinHandle<directpv_control_plane::Result<()>>)>) -> anyhow::Result<()> {
    for (name, task) in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(anyhow::Error::new(e).context(format!("{} failed", name))),
            Err(e) => return Err(anyhow::anyhow!("{} panicked: {}", name, e)),
        }
    }
    Ok(())
}

async fn run_node_agent(node_id: String, args: NodeAgentCmd) -> anyhow::Result<()> {
    info!("Starting DirectPV node agent");
    info!("  Version: {}", directpv_control_plane::VERSION);
    info!("  Node: {}", node_id);
    info!("  Node API: {}", args.api_addr);

    let api_addr = parse_addr(&args.api_addr, "node API")?;
    let health_addr = parse_addr(&args.health_addr, "health server")?;
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics server")?;

    let (agent, client) = node_agent(node_id, Some(&args)).await?;
    agent
        .metrics()
        .register(prometheus::default_registry())
        .context("unable to register metrics")?;
    let credential = Credential::resolve(None, Some(client))
        .await
        .context("unable to load node API credential")?;

    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let cancel = CancellationToken::new();
    shutdown_on_signal(cancel.clone());

    let node_controller = NodeController::new(agent.clone());
    let init_controller = InitRequestController::new(agent.clone());
    let api_server = NodeApiServer::new(
        NodeApiServerConfig {
            addr: api_addr,
            ..Default::default()
        },
        agent,
        credential,
    );

    let tasks = vec![
        ("node controller", {
            let cancel = cancel.clone();
            tokio::spawn(async move { node_controller.run(cancel).await })
        }),
        ("init request controller", {
            let cancel = cancel.clone();
            tokio::spawn(async move { init_controller.run(cancel).await })
        }),
        ("node API server", {
            let cancel = cancel.clone();
            tokio::spawn(async move { api_server.run(cancel).await })
        }),
    ];
    let result = wait_all(tasks).await;
    cancel.cancel();
    info!("Node agent shutdown complete");
    result
}

async fn run_controller(node_id: String) -> anyhow::Result<()> {
    info!("Starting DirectPV controller on node {}", node_id);
    let (agent, _) = node_agent(node_id, None).await?;

    let cancel = CancellationToken::new();
    shutdown_on_signal(cancel.clone());

    let drives = DriveReconciler::new(agent.clone());
    let volumes = VolumeReconciler::new(agent);
    let tasks = vec![
        ("drive reconciler", {
            let cancel = cancel.clone();
            tokio::spawn(async move { drives.run(cancel).await })
        }),
        ("volume reconciler", {
            let cancel = cancel.clone();
            tokio::spawn(async move { volumes.run(cancel).await })
        }),
    ];
    let result = wait_all(tasks).await;
    cancel.cancel();
    info!("Controller shutdown complete");
    result
}

// =============================================================================
// Admin Commands
// =============================================================================

async fn admin(config: AdminConfig) -> anyhow::Result<Arc<Admin>> {
    let client = kube_client().await?;
    Ok(Admin::new(
        config,
        Clients::kube(client.clone(), RetryConfig::default()),
        Cluster::kube(client),
    ))
}

/// Progress printed to stderr unless quiet
fn progress(quiet: bool) -> Progress {
    if quiet {
        return Progress::none();
    }
    let (progress, mut rx) = Progress::channel();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                ProgressMessage::Progress { message, .. } => eprintln!("{}", message),
                ProgressMessage::Log { text } => eprintln!("{}", text),
                _ => {}
            }
        }
    });
    progress
}

fn require_dangerous(dangerous: bool, what: &str) -> anyhow::Result<()> {
    if dangerous {
        return Ok(());
    }
    Err(Error::Validation(format!("{} is dangerous; pass --dangerous to continue", what)).into())
}

fn print_drives(results: &[DriveResult], verb: &str, quiet: bool) {
    if quiet {
        return;
    }
    for result in results {
        if result.changed {
            println!("{} drive {} on node {}", verb, result.drive_name, result.node_id);
        } else {
            println!(
                "Drive {} on node {} already {}",
                result.drive_name,
                result.node_id,
                verb.to_lowercase()
            );
        }
    }
}

fn print_volumes(results: &[VolumeResult], verb: &str, quiet: bool) {
    if quiet {
        return;
    }
    for result in results {
        if result.changed {
            println!("{} volume {}", verb, result.volume_name);
        } else {
            println!("Volume {} already {}", result.volume_name, verb.to_lowercase());
        }
    }
}

fn admin_config(dry_run: bool) -> AdminConfig {
    AdminConfig {
        dry_run,
        ..Default::default()
    }
}

async fn drive_command(
    cmd: DriveCmd,
    verb: &str,
    op: impl for<'a> FnOnce(
        &'a Admin,
        &'a DriveSelection,
        Progress,
    ) -> LocalBoxFuture<'a, directpv_control_plane::Result<Vec<DriveResult>>>,
) -> anyhow::Result<()> {
    let selection = cmd.selector.compile()?;
    let admin = admin(admin_config(cmd.common.dry_run)).await?;
    let results = op(admin.as_ref(), &selection, progress(cmd.common.quiet)).await?;
    print_drives(&results, verb, cmd.common.quiet);
    Ok(())
}

async fn run_admin(command: Command) -> anyhow::Result<()> {
    use futures::FutureExt;

    match command {
        Command::Discover(cmd) => {
            let args = DiscoverArgs {
                nodes: directpv_control_plane::selector::parse_node_args(&cmd.nodes)?,
                drives: directpv_control_plane::selector::parse_drive_name_args(&cmd.drives)?,
            };
            let admin = admin(AdminConfig {
                watch_timeout: Duration::from_secs(cmd.timeout),
                ..Default::default()
            })
            .await?;
            let devices = admin.discover(&args, progress(false)).await?;
            let config = InitConfig::from_devices(&devices);
            if config.nodes.iter().all(|n| n.drives.is_empty()) {
                return Err(Error::NoMatchingResourcesFound.into());
            }
            config.write(&cmd.output)?;
            println!("Generated '{}' with the available drives", cmd.output.display());
        }
        Command::Init(cmd) => {
            require_dangerous(cmd.dangerous, "initializing drives")?;
            let config = InitConfig::read(&cmd.file)?;
            let admin = admin(AdminConfig {
                watch_timeout: Duration::from_secs(cmd.timeout),
                ..Default::default()
            })
            .await?;
            let results = admin.init(&config, progress(false)).await?;
            for result in &results {
                for device in &result.devices {
                    println!("Initialized {} on node {}", device.name, result.node_id);
                }
            }
        }
        Command::Cordon(cmd) => {
            drive_command(cmd, "Cordoned", |a, s, p| a.cordon_drives(s, p).boxed_local()).await?
        }
        Command::Uncordon(cmd) => {
            drive_command(cmd, "Uncordoned", |a, s, p| a.uncordon_drives(s, p).boxed_local()).await?
        }
        Command::Release(cmd) => {
            drive_command(cmd, "Released", |a, s, p| a.release_drives(s, p).boxed_local()).await?
        }
        Command::Remove(cmd) => {
            drive_command(cmd, "Removed", |a, s, p| a.remove_drives(s, p).boxed_local()).await?
        }
        Command::Suspend(cmd) => {
            require_dangerous(cmd.dangerous, "suspending")?;
            match cmd.target {
                Target::Drives(cmd) => {
                    drive_command(cmd, "Suspended", |a, s, p| a.suspend_drives(s, p).boxed_local()).await?
                }
                Target::Volumes(cmd) => {
                    let selection = cmd.selector.compile()?;
                    let admin = admin(admin_config(cmd.common.dry_run)).await?;
                    let results = admin.suspend_volumes(&selection, progress(cmd.common.quiet)).await?;
                    print_volumes(&results, "Suspended", cmd.common.quiet);
                }
            }
        }
        Command::Resume(cmd) => {
            require_dangerous(cmd.dangerous, "resuming")?;
            match cmd.target {
                Target::Drives(cmd) => {
                    drive_command(cmd, "Resumed", |a, s, p| a.resume_drives(s, p).boxed_local()).await?
                }
                Target::Volumes(cmd) => {
                    let selection = cmd.selector.compile()?;
                    let admin = admin(admin_config(cmd.common.dry_run)).await?;
                    let results = admin.resume_volumes(&selection, progress(cmd.common.quiet)).await?;
                    print_volumes(&results, "Resumed", cmd.common.quiet);
                }
            }
        }
        Command::Move(cmd) => {
            let admin = admin(admin_config(cmd.common.dry_run)).await?;
            let moved = admin
                .move_drive(&cmd.source, &cmd.destination, progress(cmd.common.quiet))
                .await?;
            if !cmd.common.quiet {
                println!(
                    "Moved {} volume(s) from drive {} to {}",
                    moved.len(),
                    cmd.source,
                    cmd.destination
                );
            }
        }
        Command::Label(cmd) => {
            let changes = parse_label_changes(&cmd.changes)?;
            match cmd.target {
                Target::Drives(target) => {
                    let selection = target.selector.compile()?;
                    let admin = admin(admin_config(target.common.dry_run)).await?;
                    let results = admin
                        .label_drives(&selection, &changes, progress(target.common.quiet))
                        .await?;
                    print_drives(&results, "Labeled", target.common.quiet);
                }
                Target::Volumes(target) => {
                    let selection = target.selector.compile()?;
                    let admin = admin(admin_config(target.common.dry_run)).await?;
                    let results = admin
                        .label_volumes(&selection, &changes, progress(target.common.quiet))
                        .await?;
                    print_volumes(&results, "Labeled", target.common.quiet);
                }
            }
        }
        Command::Clean(cmd) => {
            let selection = cmd.selector.compile()?;
            let admin = admin(admin_config(cmd.common.dry_run)).await?;
            let removed = admin.clean(&selection, progress(cmd.common.quiet)).await?;
            if !cmd.common.quiet {
                for name in removed {
                    println!("Removing volume {}", name);
                }
            }
        }
        Command::Repair(cmd) => {
            let args = RepairArgs {
                drive_ids: directpv_control_plane::selector::parse_drive_id_args(&cmd.drive_ids)?,
                force: cmd.force,
                disable_prefetch: cmd.disable_prefetch,
                dry_run: cmd.dry_run,
            };
            let admin = admin(AdminConfig::default()).await?;
            let results = admin.repair(&args, progress(cmd.quiet)).await?;
            if !cmd.quiet {
                for result in results {
                    println!(
                        "Created repair job {} for drive {}",
                        result.job_name, result.drive_name
                    );
                }
            }
        }
        Command::Info => {
            let admin = admin(AdminConfig::default()).await?;
            let info = admin.info().await?;
            println!("{:<24} {:>8} {:>16} {:>8} {:>16}", "NODE", "DRIVES", "CAPACITY", "VOLUMES", "ALLOCATED");
            for (node, totals) in &info {
                println!(
                    "{:<24} {:>8} {:>16} {:>8} {:>16}",
                    node, totals.drive_count, totals.drive_size, totals.volume_count, totals.volume_size
                );
            }
        }
        Command::NodeAgent(_) | Command::Controller => {}
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr) -> directpv_control_plane::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr) -> directpv_control_plane::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = Response::new(Body::from(buffer));
                            response.headers_mut().insert(
                                CONTENT_TYPE,
                                HeaderValue::from_static(prometheus::TEXT_FORMAT),
                            );
                            response
                        }
                        Err(e) => {
                            error!("Unable to encode metrics: {}", e);
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
                        }
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
