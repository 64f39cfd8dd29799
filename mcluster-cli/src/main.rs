//! mcluster: create, inspect and delete local clusters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mcluster_core::backend::MemoryEnvironment;
use mcluster_core::{
    AuditLogger, Backend, ClusterConfig, DEFAULT_CLUSTER_NAME, DEFAULT_NODE_IMAGE, DriverOptions,
    LifecycleDriver,
};
use mcluster_docker::DockerEnvironment;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod output;

use output::OutputFormat;

/// Log directives when `RUST_LOG` is unset. Audit events use the `audit` target.
const DEFAULT_LOG_FILTER: &str = "mcluster=info,mcluster_core=info,mcluster_docker=info,audit=info";

/// Environment the cluster nodes live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    /// Privileged node containers on the local docker daemon
    Docker,
    /// In-process map, forgotten when the command exits
    Memory,
}

#[derive(Parser)]
#[command(name = "mcluster", version)]
#[command(about = "Reconcile local clusters to a declared topology", long_about = None)]
struct Cli {
    /// Environment to reconcile against
    #[arg(short, long, value_enum, default_value = "docker", global = true)]
    provider: ProviderKind,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Give up on a reconcile after this many seconds (0 = no deadline)
    #[arg(short, long, default_value = "0", global = true)]
    timeout: u64,

    /// Path of the docker binary
    #[arg(long, default_value = "docker", global = true)]
    docker_binary: String,

    #[command(subcommand)]
    command: Commands,
}

/// Topology flags shared by `create` and `plan`.
#[derive(clap::Args)]
struct TopologyArgs {
    /// Cluster name
    #[arg(short, long, default_value = DEFAULT_CLUSTER_NAME)]
    name: String,

    /// Number of worker nodes
    #[arg(short, long, default_value = "1")]
    workers: u32,

    /// Node image
    #[arg(long, default_value = DEFAULT_NODE_IMAGE)]
    image: String,

    /// JSON cluster configuration (overrides the flags above)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl TopologyArgs {
    fn load(&self) -> Result<ClusterConfig> {
        match &self.config {
            Some(path) => ClusterConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display())),
            None => Ok(ClusterConfig::with_workers(
                self.name.clone(),
                self.workers,
                &self.image,
            )),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a cluster, or converge an existing one
    Create {
        #[command(flatten)]
        topology: TopologyArgs,

        /// Remove the nodes of a create that fails part way
        #[arg(long)]
        cleanup_on_failure: bool,
    },

    /// Delete a cluster
    Delete {
        /// Cluster name
        #[arg(default_value = DEFAULT_CLUSTER_NAME)]
        name: String,
    },

    /// Show the operations a create would apply
    Plan {
        #[command(flatten)]
        topology: TopologyArgs,
    },

    /// Show the nodes of a cluster
    Status {
        /// Cluster name
        #[arg(default_value = DEFAULT_CLUSTER_NAME)]
        name: String,
    },
}

fn backend(cli: &Cli) -> Backend {
    match cli.provider {
        ProviderKind::Docker => {
            Backend::from_environment(Arc::new(DockerEnvironment::with_cli(&cli.docker_binary)))
        }
        ProviderKind::Memory => Backend::from_environment(Arc::new(MemoryEnvironment::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut options = DriverOptions {
        deadline: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
        ..Default::default()
    };
    if let Commands::Create {
        cleanup_on_failure: true,
        ..
    } = &cli.command
    {
        options.retain_on_failure = false;
    }

    let audit = Arc::new(AuditLogger::tracing("mcluster"));
    let driver = LifecycleDriver::new(backend(&cli), audit, options);

    match &cli.command {
        Commands::Create { topology, .. } => {
            let config = topology.load()?;
            info!("Creating cluster {}", config.name);
            let state = driver
                .create_with_config(&config)
                .await
                .with_context(|| format!("Failed to create cluster {}", config.name))?;
            output::print_state(&state, cli.output)?;
            if cli.provider == ProviderKind::Docker {
                println!(
                    "kubectl context: {}",
                    mcluster_docker::node::context_name(&state.cluster_id)
                );
            }
        }

        Commands::Delete { name } => {
            driver
                .delete(name)
                .await
                .with_context(|| format!("Failed to delete cluster {name}"))?;
            println!("Deleted cluster: {name}");
        }

        Commands::Plan { topology } => {
            let config = topology.load()?;
            let plan = driver
                .plan(&config)
                .await
                .with_context(|| format!("Failed to plan cluster {}", config.name))?;
            output::print_plan(&plan, cli.output)?;
        }

        Commands::Status { name } => {
            let state = driver
                .status(name)
                .await
                .with_context(|| format!("Failed to inspect cluster {name}"))?;
            output::print_state(&state, cli.output)?;
        }
    }

    Ok(())
}
