//! Controller binary

use clap::{Parser, Subcommand};
use minidomain::common::audit::AUDIT_LOGGER;
use minidomain::common::{Config, PeerConfig};
use minidomain::controller::ControllerServer;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidomain-controller")]
#[command(about = "minidomain host controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a controller
    Serve {
        /// Config file (defaults to ./minidomain.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Controller name
        #[arg(long)]
        name: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Run as the primary controller
        #[arg(long, conflicts_with = "primary_name")]
        primary: bool,

        /// Name of the primary, for a subordinate controller
        #[arg(long)]
        primary_name: Option<String>,

        /// Peers as name=url (comma-separated)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// JSON file with the initial configuration model
        #[arg(long)]
        model: Option<PathBuf>,

        /// Append audit entries to this file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            name,
            bind,
            primary,
            primary_name,
            peers,
            model,
            audit_log,
        } => {
            // File and environment first, CLI arguments win
            let mut config = match config {
                Some(path) => Config::load_from(path)?,
                None => Config::load().unwrap_or_default(),
            };
            if let Some(name) = name {
                config.controller.name = name;
            }
            if let Some(bind) = bind {
                config.controller.bind_addr = bind.parse()?;
            }
            if primary {
                config.controller.primary = true;
                config.controller.primary_name = None;
            }
            if let Some(primary_name) = primary_name {
                config.controller.primary = false;
                config.controller.primary_name = Some(primary_name);
            }
            for peer in peers {
                let (peer_name, url) = peer
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("peer must be name=url: {}", peer))?;
                let model_version = config.controller.model_version.clone();
                config.controller.peers.insert(
                    peer_name.to_string(),
                    PeerConfig {
                        url: url.to_string(),
                        model_version,
                    },
                );
            }
            if model.is_some() {
                config.controller.model_path = model;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            if let Some(path) = audit_log {
                AUDIT_LOGGER.open_file(&path)?;
                tracing::info!("Audit log: {}", path.display());
            }
            ControllerServer::new(config).serve().await?;
        }
    }

    Ok(())
}
