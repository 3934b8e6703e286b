//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DeploymentMode;

/// NetBox manager - keeps a netbox-docker checkout and its Slurp'it stack in shape.
#[derive(Parser, Debug)]
#[command(name = "netbox-manager")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// netbox-docker working directory.
    #[arg(short, long, global = true, env = "NETBOX_MANAGER_DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enable Slurp'it, or change its mode and ports.
    Enable {
        /// Deployment mode (prompted for when omitted on a terminal).
        #[arg(short, long)]
        mode: Option<ModeArg>,

        /// NetBox host port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Slurp'it portal host port.
        #[arg(long)]
        portal_port: Option<u16>,

        /// Skip prompts and keep stored values for anything not given.
        #[arg(short, long)]
        yes: bool,
    },

    /// Disable Slurp'it and keep plain NetBox running.
    Disable {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Converge documents and containers on the stored settings.
    Reconcile,

    /// Show settings, documents, containers and reachability.
    Status,

    /// List the project's containers.
    Ps,

    /// Show container logs.
    Logs {
        /// Service name (optional, shows all services if not specified).
        service: Option<String>,

        /// Follow log output.
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show.
        #[arg(short, long)]
        tail: Option<u32>,
    },

    /// Run a command in a service container.
    Exec {
        /// Service name.
        service: String,

        /// Command and arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Remove a stale advisory lock.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove whatever lock is present (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Deployment mode as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    /// Slurp'it services inlined with named volumes.
    Clean,
    /// Inlined services mirroring the upstream layout.
    UpstreamExact,
    /// Upstream document fetched verbatim plus a patch.
    UpstreamRaw,
}

impl From<ModeArg> for DeploymentMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Clean => Self::Clean,
            ModeArg::UpstreamExact => Self::UpstreamExact,
            ModeArg::UpstreamRaw => Self::UpstreamRaw,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
