//! `serve`/`validate`/`reload`/`version` CLI surface, built on `clap`'s
//! derive API.

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

pub const DEFAULT_CONTROL_SOCKET: &str = "/run/tungsten/control.sock";

#[derive(Debug, Parser)]
#[command(name = "tungsten", about = "Authoritative + forwarding DNS server with hot-reloadable zones")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start serving DNS and the reload control socket.
    Serve {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
        #[arg(long, default_value = DEFAULT_CONTROL_SOCKET)]
        control_socket: String,
    },
    /// Parse and validate a config file without starting the server.
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Ask a running server to reload its config via the control socket.
    Reload {
        #[arg(long, default_value = DEFAULT_CONTROL_SOCKET)]
        control_socket: String,
    },
    /// Print version information.
    Version,
}
