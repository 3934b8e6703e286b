//! CLI module for the NetBox manager.
//!
//! This module provides the command-line interface the operator menu
//! dispatches to.

mod commands;
mod output;

pub use commands::{Cli, Commands, ModeArg, OutputFormat};
pub use output::OutputFormatter;
