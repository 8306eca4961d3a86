//! fsprov - Filesystem service gateway
//!
//! ## Usage
//!
//! ```bash
//! # Serve JSON-lines requests on stdin, one reply per line on stdout
//! fsprov serve --config config/filesystem_gateway.yml
//! echo '{"op":"provision","request":{"plan":"free"}}' | fsprov serve
//!
//! # One-shot orphan sweep against a JSON array of known handles
//! fsprov check-orphan --handles handles.json
//!
//! # Show the capacity pool and what is in storage
//! fsprov capacity
//! ```
//!
//! Logs go to stderr; stdout carries replies only.

use clap::{Parser, Subcommand};
use fsprov_core::{ConfigSource, InstanceBackend, ServiceHandle};
use fsprov_gateway::{
    default_config_path, FilesystemGateway, GatewayRequest, LocalDirBackend, ReplyEnvelope,
    ServiceFailure, YamlConfigFile,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// fsprov: capacity-bounded filesystem provisioning gateway
#[derive(Parser)]
#[command(name = "fsprov")]
#[command(about = "Filesystem service gateway: provisioning, bindings and orphan sweeps", long_about = None)]
struct Cli {
    /// Gateway configuration file (default: $CLOUD_FOUNDRY_CONFIG_PATH/filesystem_gateway.yml)
    #[arg(long, global = true, env = "FSPROV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle JSON-lines requests from stdin until EOF
    Serve,

    /// Sweep storage for instances not covered by the given handles
    CheckOrphan {
        /// JSON file holding an array of service handles
        #[arg(long)]
        handles: PathBuf,

        /// Also log every orphan found (nothing is deleted)
        #[arg(long)]
        purge: bool,
    },

    /// Show the capacity pool
    Capacity,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fsprov_gateway=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Serve => serve(config_path).await,
        Commands::CheckOrphan { handles, purge } => check_orphan(config_path, handles, purge).await,
        Commands::Capacity => show_capacity(config_path).await,
    }
}

/// Request loop: one request runs to completion before the next is read
async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    let gateway = FilesystemGateway::from_config_file(&config_path).await?;
    info!(config = %config_path.display(), "Gateway ready, reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut handled = 0u64;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let envelope = match serde_json::from_str::<GatewayRequest>(&line) {
            Ok(request) => gateway.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Malformed request");
                ReplyEnvelope::failure(&ServiceFailure::internal())
            }
        };

        let mut out = serde_json::to_vec(&envelope)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
        handled += 1;
    }

    info!(requests = handled, "Request stream closed, shutting down");
    Ok(())
}

async fn check_orphan(config_path: PathBuf, handles_path: PathBuf, purge: bool) -> anyhow::Result<()> {
    let raw = tokio::fs::read(&handles_path).await?;
    let handles: Vec<ServiceHandle> = serde_json::from_slice(&raw)?;
    info!(handles = handles.len(), "Loaded known handles");

    let gateway = FilesystemGateway::from_config_file(&config_path).await?;
    let summary = gateway
        .check_orphan(&handles)
        .await
        .map_err(|f| anyhow::anyhow!("orphan check failed: {}", f.description))?;

    let report = gateway.reconciler().report().await;
    if purge {
        gateway
            .purge_orphan(&report.instances, &Default::default())
            .await
            .map_err(|f| anyhow::anyhow!("orphan purge failed: {}", f.description))?;
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    for (node, ids) in &report.instances {
        for id in ids {
            println!("orphan\t{}\t{}", node, id);
        }
    }
    for id in &report.missing_instances {
        println!("missing\t{}", id);
    }
    Ok(())
}

async fn show_capacity(config_path: PathBuf) -> anyhow::Result<()> {
    let config = YamlConfigFile::new(&config_path).load().await?;
    let backend = LocalDirBackend::new(&config.storage_root);
    let in_storage = backend
        .enumerate_storage_roots()
        .await?
        .iter()
        .filter(|name| fsprov_core::instance_id_from_dir_name(name).is_some())
        .count() as u64;

    let snapshot = fsprov_gateway::CapacitySnapshot::new(&config, in_storage);

    println!("Storage root:       {}", config.storage_root);
    println!("Per instance:       {}MB", snapshot.per_instance);
    println!("Total:              {}MB", snapshot.total);
    println!("Instances on disk:  {}", snapshot.instances);
    println!("Available:          {}MB", snapshot.available);
    println!("Remaining slots:    {}", snapshot.remaining_slots());
    Ok(())
}
