//! Command-line argument parsing for the skiff client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;
use crate::config::TransportKind;

/// Skiff client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "skiff", about = "Skiff network client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Carrier to use (tcp, udp, loopback).
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Client tick rate (Hz).
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Stop after this many ticks instead of running until interrupted.
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(transport) = args.transport {
            self.network.transport = transport;
        }
        if let Some(rate) = args.tick_rate {
            self.network.tick_rate = rate;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
