//! CommHub CLI: runs the hub service.
//!
//! `commhub` (or `commhub serve`) loads the configuration, joins the node to
//! the peer mesh, serves the RPC surface and drains on SIGINT/SIGTERM.

mod cli;
mod config;

use crate::cli::*;
use anyhow::{bail, Context};
use clap::Parser;
use commhub_peer::{LocalPeer, MemoryMesh, NodeKey, PeerOptions};
use commhub_types::config::HubConfig;
use commhub_types::HubError;
use commhub_wire::{Hub, HubServer};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_stderr();

    match cli.command {
        None => cmd_serve(cli.config, None, false).await,
        Some(Commands::Serve { listen, no_lookup }) => {
            cmd_serve(cli.config, listen, no_lookup).await
        }
        Some(Commands::Relay) => {
            bail!("relay mode is not built into this binary; run the relay component instead")
        }
        Some(Commands::Keygen { out }) => cmd_keygen(out.as_deref()),
    }
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut HubConfig, listen: Option<SocketAddr>, no_lookup: bool) {
    if let Some(addr) = listen {
        config.listen_addr = addr;
    }
    if no_lookup {
        config.peer.ip_lookup = false;
    }
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    listen: Option<SocketAddr>,
    no_lookup: bool,
) -> anyhow::Result<()> {
    let mut config = config::load_config(config_path.as_deref());
    apply_overrides(&mut config, listen, no_lookup);
    config.validate().map_err(HubError::Config)?;

    let key = match &config.peer.key_file {
        Some(path) => NodeKey::load(path)?,
        None => {
            info!("No key file configured, using an ephemeral node key");
            NodeKey::generate()
        }
    };

    let mesh = MemoryMesh::new();
    let peer = LocalPeer::join(mesh, key, PeerOptions::from(&config.peer));
    let node_name = config.node_name.clone();
    let hub = Hub::new(peer, config);
    let server = HubServer::start(hub).await?;
    info!(node = %node_name, addr = %server.local_addr(), "Hub is running. Press Ctrl+C to stop.");

    shutdown_signal().await;
    info!("Received signal, shutting down...");
    server.stop().await;
    Ok(())
}

fn cmd_keygen(out: Option<&Path>) -> anyhow::Result<()> {
    let key = NodeKey::generate();
    match out {
        Some(path) => {
            std::fs::write(path, format!("{}\n", key.to_hex().as_str()))
                .with_context(|| format!("writing {}", path.display()))?;
            restrict_file_permissions(path);
            println!("key:      {}", path.display());
        }
        None => println!("key:      {}", key.to_hex().as_str()),
    }
    println!("identity: {}", key.identity());
    Ok(())
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = HubConfig::default();
        apply_overrides(&mut config, Some("127.0.0.1:6000".parse().unwrap()), true);
        assert_eq!(config.listen_addr.port(), 6000);
        assert!(!config.peer.ip_lookup);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let mut config = HubConfig::default();
        apply_overrides(&mut config, None, false);
        assert_eq!(config.listen_addr.port(), 50001);
        assert!(config.peer.ip_lookup);
    }

    #[test]
    fn test_keygen_writes_loadable_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");
        cmd_keygen(Some(&path)).unwrap();
        assert!(NodeKey::load(&path).is_ok());
    }
}
