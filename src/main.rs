//! cluster-forge command line
//!
//! Runs one provisioning step against the configured registry and prints the
//! result as JSON. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cluster_forge::config::{ConfigManager, ProvisionConfig};
use cluster_forge::infrastructure::{
    DecryptionKey, FileLocalState, FileSecretStore, HttpRegistryClient, SystemClock,
};
use cluster_forge::integrations::IntegrationKind;
use cluster_forge::{AppError, Collaborators, Provisioner};

/// Cluster formation and configuration compiler
#[derive(Parser)]
#[command(name = "cluster-forge")]
#[command(about = "Discover cluster peers, elect a bootstrap leader and compile service configuration")]
#[command(version)]
struct Cli {
    /// Configuration file (.yaml, .yml or .json)
    #[arg(short, long, global = true, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full provisioning run
    Provision {
        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run a single integration
        #[arg(long)]
        only: Option<IntegrationKind>,
    },

    /// Discover this host's cluster and print the election result
    Elect,

    /// Compile the configured load-balancer pools
    CompilePools {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print this host's cluster membership
    Membership,

    /// Load and validate the configuration
    Validate,
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn write_json<T: Serialize>(value: &T, output: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn decryption_key(config: &ProvisionConfig) -> Result<Option<DecryptionKey>> {
    let path = &config.secrets.encryption_key_file;
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "No decryption key file, secret items unavailable");
        return Ok(None);
    }
    Ok(Some(DecryptionKey::from_file(path).await?))
}

async fn execute(command: Commands, config: &ProvisionConfig) -> Result<()> {
    let registry = HttpRegistryClient::new(
        &config.registry.url,
        Duration::from_secs(config.registry.timeout_seconds),
    )?;
    let secrets = FileSecretStore::new(config.secrets.root.clone());
    let local = FileLocalState::new(config.state.path.clone());
    let clock = SystemClock;
    let deps = Collaborators {
        registry: &registry,
        shared: &registry,
        secrets: &secrets,
        local: &local,
        clock: &clock,
    };

    let mut provisioner = Provisioner::new(config, deps);
    if let Some(key) = decryption_key(config).await? {
        provisioner = provisioner.with_decryption_key(key);
    }

    match command {
        Commands::Provision { output, only } => {
            let report = provisioner.run(only).await?;
            write_json(&report, output).await
        }
        Commands::Elect => {
            let view = provisioner.elect().await?;
            write_json(&view.election, None).await
        }
        Commands::CompilePools { output } => {
            let batch = provisioner.compile_pools().await?;
            write_json(&batch, output).await
        }
        Commands::Membership => {
            let members = provisioner.membership().await?;
            write_json(&members, None).await
        }
        Commands::Validate => {
            info!(node = %config.node.name, registry = %config.registry.url, "Configuration is valid");
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    dotenv().ok();

    let config = ConfigManager::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_tracing(level);

    tokio::select! {
        result = execute(cli.command, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning run");
            Err(AppError::Cancelled("Interrupted by signal".to_string()).into())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(cli))
}
