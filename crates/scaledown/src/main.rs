use clap::{Parser, Subcommand, ValueEnum};
use scaledown_controller::{
    AccessMode, ApiClient, ApiClientConfig, DrainController, DrainControllerConfig,
    DrainPodFactory, WorkloadRegistry,
};
use scaledown_core::{StatefulSet, WorkloadSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "scaledown",
    about = "Drains the data of scaled-down StatefulSet replicas into the surviving pod"
)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the drain controller
    Run {
        /// Kubernetes API server URL
        #[arg(long, env = "SCALEDOWN_API_URL", default_value = "https://kubernetes.default.svc")]
        api_url: String,
        /// File holding the bearer token for the API server
        #[arg(long, env = "SCALEDOWN_TOKEN_FILE")]
        token_file: Option<PathBuf>,
        /// Skip TLS certificate verification
        #[arg(long)]
        insecure_skip_tls_verify: bool,
        /// Only watch this namespace (all namespaces when omitted)
        #[arg(long, env = "SCALEDOWN_NAMESPACE")]
        namespace: Option<String>,
        /// Number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,
        /// Seconds between cache resyncs
        #[arg(long)]
        resync_secs: Option<u64>,
        /// YAML configuration file
        #[arg(long, env = "SCALEDOWN_CONFIG")]
        config: Option<PathBuf>,
        /// Run drain pods under an existing service account instead of
        /// provisioning access objects per namespace
        #[arg(long)]
        local_only: bool,
        /// Service account for drain pods in local-only mode
        #[arg(long, env = "SERVICE_ACCOUNT")]
        service_account: Option<String>,
    },
    /// Print the drain pod that would be created for an ordinal
    RenderDrainPod {
        /// YAML configuration file with the broker registrations
        #[arg(long)]
        config: Option<PathBuf>,
        /// StatefulSet manifest (YAML)
        #[arg(long)]
        statefulset: PathBuf,
        /// Ordinal to render the drain pod for
        #[arg(long)]
        ordinal: u32,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    match cli.command {
        Commands::Run {
            api_url,
            token_file,
            insecure_skip_tls_verify,
            namespace,
            workers,
            resync_secs,
            config,
            local_only,
            service_account,
        } => {
            let mut controller_config = load_config(config.as_deref())?;
            if namespace.is_some() {
                controller_config.namespace = namespace;
            }
            if let Some(workers) = workers {
                controller_config.workers = workers;
            }
            if let Some(resync_secs) = resync_secs {
                controller_config.resync_secs = resync_secs;
            }
            if local_only {
                controller_config.access = AccessMode::Local { service_account };
            }
            controller_config
                .validate()
                .map_err(|e| miette::miette!("Invalid configuration: {}", e))?;

            let mut client_config = ApiClientConfig::new(&api_url);
            client_config.insecure_skip_tls_verify = insecure_skip_tls_verify;
            if let Some(path) = token_file {
                client_config = client_config
                    .with_token_file(&path)
                    .map_err(|e| miette::miette!("Failed to load token: {}", e))?;
            }

            run_controller(&client_config, controller_config).await
        }
        Commands::RenderDrainPod {
            config,
            statefulset,
            ordinal,
        } => render_drain_pod(config.as_deref(), &statefulset, ordinal),
    }
}

/// Run the drain controller until ctrl-c
async fn run_controller(
    client_config: &ApiClientConfig,
    config: DrainControllerConfig,
) -> miette::Result<()> {
    info!("Starting scaledown against {}", client_config.base_url);

    let client = Arc::new(
        ApiClient::new(client_config)
            .map_err(|e| miette::miette!("Failed to create API client: {}", e))?,
    );

    let controller = Arc::new(DrainController::new(
        client,
        config,
        WorkloadRegistry::new(),
    ));
    info!(
        "Registered {} broker workloads",
        controller.registry().len()
    );

    let token = CancellationToken::new();
    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(controller_token).await {
            error!("Drain controller error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // In-flight passes get a bounded amount of time to finish
    let shutdown_timeout = std::time::Duration::from_secs(5);
    if tokio::time::timeout(shutdown_timeout, controller_handle)
        .await
        .is_err()
    {
        error!("Drain controller did not stop within {:?}", shutdown_timeout);
    }

    info!("Shutdown complete");

    Ok(())
}

/// Render one drain pod from local files and print it as YAML
fn render_drain_pod(config: Option<&Path>, statefulset: &Path, ordinal: u32) -> miette::Result<()> {
    let config = load_config(config)?;

    let sts: StatefulSet = scaledown_core::from_yaml_file(statefulset)
        .map_err(|e| miette::miette!("Failed to read StatefulSet: {}", e))?;
    let workload = WorkloadSpec::from_statefulset(&sts)
        .map_err(|e| miette::miette!("Invalid StatefulSet: {}", e))?;

    let registry = WorkloadRegistry::new();
    config
        .register_brokers(&registry)
        .map_err(|e| miette::miette!("Failed to register brokers: {}", e))?;

    let factory = DrainPodFactory::new(registry, config.drain_pod, config.access);
    let pod = factory
        .render(&workload, ordinal)
        .map_err(|e| miette::miette!("Failed to render drain pod: {}", e))?;
    let yaml = scaledown_core::to_yaml(&pod)
        .map_err(|e| miette::miette!("Failed to serialize drain pod: {}", e))?;

    print!("{}", yaml);
    Ok(())
}

fn load_config(path: Option<&Path>) -> miette::Result<DrainControllerConfig> {
    match path {
        Some(path) => DrainControllerConfig::load(path).map_err(|e| {
            miette::miette!("Failed to load configuration '{}': {}", path.display(), e)
        }),
        None => Ok(DrainControllerConfig::default()),
    }
}
