//! Clap CLI definitions for CommHub.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  commhub                       Run the hub with ~/.commhub/config.toml
  commhub serve --no-lookup     Run without outward IP lookup
  commhub serve --listen 127.0.0.1:50002
  commhub keygen --out node.key Write a fresh node key";

/// CommHub: streaming bridge between RPC clients and the peer network.
#[derive(Parser)]
#[command(name = "commhub", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the hub service (the default).
    Serve {
        /// Override the configured listen address.
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Advertise loopback instead of looking up the outward-facing IP.
        #[arg(long)]
        no_lookup: bool,
    },
    /// Relay mode (provided by a separate component).
    Relay,
    /// Generate a node key and print its identity.
    Keygen {
        /// Write the hex key to this file instead of printing it.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::parse_from(["commhub"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_serve_flags() {
        let cli = Cli::parse_from([
            "commhub",
            "serve",
            "--no-lookup",
            "--listen",
            "127.0.0.1:50002",
            "--config",
            "/tmp/hub.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/hub.toml")));
        match cli.command {
            Some(Commands::Serve { listen, no_lookup }) => {
                assert!(no_lookup);
                assert_eq!(listen, Some("127.0.0.1:50002".parse().unwrap()));
            }
            _ => panic!("Expected serve"),
        }
    }
}
