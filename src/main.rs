use std::path::PathBuf;

use clap::{Parser, Subcommand};
use converge::controlplane::http::HttpControlPlane;
use converge::spec::LoadBalancerBinding;
use converge::{DesiredSpec, Error, Mode, ReconcileOptions, Result, ServiceReconciler};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the control-plane API
    #[arg(long, env = "CONVERGE_ENDPOINT")]
    endpoint: String,

    /// Bearer token for the control-plane API
    #[arg(long, env = "CONVERGE_AUTH_TOKEN")]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ensure the service exists, creating or converging it as needed
    Create(ServiceArgs),
    /// Converge an existing service in place
    Update(ServiceArgs),
    /// Drain and delete the service
    Delete(DeleteArgs),
}

#[derive(Parser, Debug)]
struct ServiceArgs {
    /// Service name, unique within its cluster
    #[arg(long)]
    name: Option<String>,

    /// Cluster the service runs in
    #[arg(long)]
    cluster: Option<String>,

    /// Task definition: family, family:revision, or a full identifier
    #[arg(long)]
    task_definition: Option<String>,

    /// Number of task instances to run (0 is valid)
    #[arg(long)]
    desired_count: Option<u32>,

    /// Load balancer to bind at creation (requires the other three
    /// binding flags)
    #[arg(long)]
    load_balancer: Option<String>,

    /// Container the load balancer routes to
    #[arg(long)]
    container_name: Option<String>,

    /// Container port the load balancer routes to
    #[arg(long)]
    container_port: Option<u16>,

    /// Identity the control plane assumes to register targets
    #[arg(long)]
    role: Option<String>,

    /// Percent of desired count kept running during rollouts
    #[arg(long)]
    min_healthy_percent: Option<u32>,

    /// Percent of desired count allowed during rollouts
    #[arg(long)]
    max_percent: Option<u32>,

    /// YAML file holding the desired state; flags override its values
    #[arg(long)]
    spec_file: Option<PathBuf>,

    /// Block until the service stabilizes before reporting
    #[arg(long)]
    wait: bool,

    /// Report what would change without mutating anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct DeleteArgs {
    /// Service name, unique within its cluster
    #[arg(long)]
    name: Option<String>,

    /// Cluster the service runs in
    #[arg(long)]
    cluster: Option<String>,

    /// YAML file holding the desired state; flags override its values
    #[arg(long)]
    spec_file: Option<PathBuf>,

    /// Return as soon as the delete is accepted instead of waiting for
    /// the drain to finish
    #[arg(long)]
    no_wait: bool,

    /// Report what would change without mutating anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    // Logs on stderr so stdout stays machine-readable
    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Reconciliation failed: {}", e);
        let body = serde_json::json!({
            "error": e.to_string(),
            "indeterminate": e.is_indeterminate(),
        });
        println!("{:#}", body);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Starting converge v{}", env!("CARGO_PKG_VERSION"));

    let mut plane = HttpControlPlane::new(&args.endpoint)?;
    if let Some(token) = &args.auth_token {
        plane = plane.with_auth_token(token);
    }
    let reconciler = ServiceReconciler::new(plane);

    let (spec, mode, options) = match &args.command {
        Commands::Create(service_args) => (
            build_spec(service_args)?,
            Mode::Create,
            ReconcileOptions {
                wait_until_stable: service_args.wait,
                dry_run: service_args.dry_run,
                ..Default::default()
            },
        ),
        Commands::Update(service_args) => (
            build_spec(service_args)?,
            Mode::Update,
            ReconcileOptions {
                wait_until_stable: service_args.wait,
                dry_run: service_args.dry_run,
                ..Default::default()
            },
        ),
        Commands::Delete(delete_args) => (
            build_delete_spec(delete_args)?,
            Mode::Delete,
            ReconcileOptions {
                wait_until_inactive: !delete_args.no_wait,
                dry_run: delete_args.dry_run,
                ..Default::default()
            },
        ),
    };

    let outcome = reconciler.reconcile(&spec, mode, &options).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Assemble the desired state from the spec file (if any) with flag
/// values layered on top
fn build_spec(args: &ServiceArgs) -> Result<DesiredSpec> {
    let mut spec = load_base_spec(args.spec_file.as_deref(), args.name.as_deref())?;

    if let Some(name) = &args.name {
        spec.name = name.clone();
    }
    if let Some(cluster) = &args.cluster {
        spec.cluster = cluster.clone();
    }
    if let Some(task_definition) = &args.task_definition {
        spec.task_definition = Some(task_definition.clone());
    }
    if let Some(count) = args.desired_count {
        spec.desired_count = Some(count);
    }
    if let Some(percent) = args.min_healthy_percent {
        spec.min_healthy_percent = Some(percent);
    }
    if let Some(percent) = args.max_percent {
        spec.max_percent = Some(percent);
    }
    if let Some(binding) = LoadBalancerBinding::from_parts(
        args.load_balancer.clone(),
        args.container_name.clone(),
        args.container_port,
        args.role.clone(),
    )? {
        spec.load_balancer = Some(binding);
    }

    Ok(spec)
}

fn build_delete_spec(args: &DeleteArgs) -> Result<DesiredSpec> {
    let mut spec = load_base_spec(args.spec_file.as_deref(), args.name.as_deref())?;

    if let Some(name) = &args.name {
        spec.name = name.clone();
    }
    if let Some(cluster) = &args.cluster {
        spec.cluster = cluster.clone();
    }

    Ok(spec)
}

fn load_base_spec(spec_file: Option<&std::path::Path>, name: Option<&str>) -> Result<DesiredSpec> {
    match spec_file {
        Some(path) => DesiredSpec::load_from_file(path),
        None => match name {
            Some(name) => Ok(DesiredSpec::new(name)),
            None => Err(Error::ConfigError(
                "--name is required unless --spec-file supplies one".to_string(),
            )),
        },
    }
}
