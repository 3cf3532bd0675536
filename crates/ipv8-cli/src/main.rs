//! IPv8 node CLI
//!
//! Runs a peer discovery node and manages its identity.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ipv8_core::{Ipv8, MemberId};
use ipv8_crypto::PrivateKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::Config;

/// IPv8 - authenticated peer discovery over UDP
#[derive(Parser)]
#[command(name = "ipv8")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity key
    Keygen {
        /// Output file for private key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the member id of a key
    Id {
        /// Private key file
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Run a node until interrupted
    Run {
        /// Listen address, overrides the configuration
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Keygen { output } => {
            generate_key(output.as_deref().unwrap_or(&config.node.private_key_file))?;
        }
        Commands::Id { key } => {
            show_id(key.as_deref().unwrap_or(&config.node.private_key_file))?;
        }
        Commands::Run { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.network.listen_addr = bind;
            }
            config.validate()?;
            run_node(&config).await?;
        }
    }

    Ok(())
}

/// Generate a key and write it to `path`
fn generate_key(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("Refusing to overwrite existing key at {}", path.display());
    }

    println!("Generating new identity key...");
    let key = PrivateKey::generate(&mut rand_core::OsRng);
    save_key(&key, path)?;

    println!("Member id: {}", MemberId::of(&key.pub_key()));
    println!("Public key: {}", hex::encode(key.pub_key().key_to_bin()));
    println!("Private key saved to: {}", path.display());
    Ok(())
}

/// Print the identity stored at `path`
fn show_id(path: &Path) -> anyhow::Result<()> {
    let key = load_key(path)?;
    println!("Member id: {}", MemberId::of(&key.pub_key()));
    println!("Public key: {}", hex::encode(key.pub_key().key_to_bin()));
    Ok(())
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKey> {
    let bytes = zeroize::Zeroizing::new(
        std::fs::read(path).with_context(|| format!("Failed to read key {}", path.display()))?,
    );
    PrivateKey::from_bin(&bytes)
        .with_context(|| format!("Invalid private key in {}", path.display()))
}

fn save_key(key: &PrivateKey, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, key.key_to_bin().as_slice())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Load the node key, creating one on first run
fn load_or_create_key(path: &Path) -> anyhow::Result<PrivateKey> {
    if path.exists() {
        return load_key(path);
    }
    tracing::info!("No key at {}, generating a new identity", path.display());
    let key = PrivateKey::generate(&mut rand_core::OsRng);
    save_key(&key, path)?;
    Ok(key)
}

/// Run the node until Ctrl-C
async fn run_node(config: &Config) -> anyhow::Result<()> {
    let key = Arc::new(load_or_create_key(&config.node.private_key_file)?);
    let ipv8 = Ipv8::bind(config.to_ipv8_config()?, key).await?;
    ipv8.start().await?;

    println!("Member id: {}", ipv8.my_peer().mid());
    println!("Listening on {}", ipv8.local_addr()?);
    println!("\nPress Ctrl+C to stop\n");

    let mut status = tokio::time::interval(Duration::from_secs(config.network.walker_interval_secs));
    status.tick().await;

    loop {
        tokio::select! {
            _ = status.tick() => print_peers(&ipv8),
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    println!("\nShutting down...");
    ipv8.stop().await?;
    Ok(())
}

fn print_peers(ipv8: &Ipv8) {
    let stats = ipv8.transport_stats();
    println!(
        "Traffic: sent {} packets ({} bytes), received {} packets ({} bytes), {} send / {} receive errors",
        stats.packets_sent,
        stats.bytes_sent,
        stats.packets_received,
        stats.bytes_received,
        stats.send_errors,
        stats.recv_errors
    );
    for overlay in ipv8.overlays() {
        let peers = overlay.get_peers();
        println!(
            "Overlay {} ({} peers, {} walkable, wan {})",
            overlay.service_id(),
            peers.len(),
            overlay.get_walkable_addresses().len(),
            overlay.my_estimated_wan()
        );
        for peer in peers {
            println!(
                "  {} {} lan={} wan={}",
                peer.mid(),
                peer.address(),
                peer.lan_address(),
                peer.wan_address()
            );
        }
    }
}
