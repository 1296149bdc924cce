use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xcash_chain::audit::BlockHashAudit;
use xcash_chain::chain::Core;
use xcash_chain::config::NodeConfig;
use xcash_chain::temp_consensus::{ConsensusOptions, TempConsensus};

#[derive(Parser)]
#[command(author, version, about = "X-Cash chain daemon (migration-window consensus)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon using the provided configuration file
    Start {
        #[arg(short, long, default_value = "config/node.toml")]
        config: PathBuf,
        /// Enable the temporary leader-based consensus
        #[arg(long)]
        temp_consensus_enabled: bool,
        /// Produce blocks on this node (requires the delegate flags)
        #[arg(long)]
        temp_consensus_leader: bool,
        /// Delegate public address; used as leader id and payout destination
        #[arg(long)]
        delegate_address: Option<String>,
        /// Delegate secret key: 128 hex characters, seed then public key
        #[arg(long)]
        delegate_secret_key: Option<String>,
    },
    /// Generate a default node configuration file
    GenerateConfig {
        #[arg(short, long, default_value = "config/node.toml")]
        path: PathBuf,
    },
    /// Audit a stored block's data hash against the seed daemons
    Audit {
        #[arg(short, long, default_value = "config/node.toml")]
        config: PathBuf,
        #[arg(long)]
        height: u64,
    },
    /// Derive and print the Ed25519 public key for a delegate secret key
    DeriveKey {
        /// 128 hex characters: seed then public key
        secret_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config,
            temp_consensus_enabled,
            temp_consensus_leader,
            delegate_address,
            delegate_secret_key,
        } => {
            let options = ConsensusOptions {
                enabled: temp_consensus_enabled,
                leader: temp_consensus_leader,
                delegate_address,
                delegate_secret_key,
            };
            start_daemon(config, options).await?;
        }
        Commands::GenerateConfig { path } => generate_config(path)?,
        Commands::Audit { config, height } => audit_block(config, height).await?,
        Commands::DeriveKey { secret_key } => derive_key(&secret_key)?,
    }

    Ok(())
}

async fn start_daemon(config_path: PathBuf, options: ConsensusOptions) -> Result<()> {
    let config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        let config = NodeConfig::default();
        config.save(&config_path)?;
        config
    };
    config.ensure_directories()?;

    let core = Arc::new(Core::new()?);
    let consensus = TempConsensus::new(&options, core.clone())?;
    if let Some(validator) = consensus.validator() {
        core.set_leader_validator(validator);
    }
    consensus.run()?;

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    consensus.stop();
    Ok(())
}

fn generate_config(path: PathBuf) -> Result<()> {
    let config = NodeConfig::default();
    config.ensure_directories()?;
    config.save(&path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

fn derive_key(secret_hex: &str) -> Result<()> {
    let keypair = xcash_chain::crypto::derive_leader_keypair(secret_hex)?;
    println!("{}", hex::encode(keypair.public.to_bytes()));
    Ok(())
}

async fn audit_block(config_path: PathBuf, height: u64) -> Result<()> {
    let config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        NodeConfig::default()
    };

    let audit = BlockHashAudit::new(config.trusted_sync_height);
    let hashes = audit.fetch_block_hashes(height).await;
    info!(height, answers = hashes.len(), "seed daemons answered");
    for hash in hashes {
        println!("{hash}");
    }
    Ok(())
}
