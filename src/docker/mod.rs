//! Docker integration.
//!
//! - `runner`: the process-spawning seam shared by everything below
//! - `client`: plain `docker` queries and `docker exec`
//! - `network`: shared network creation and attachment

mod client;
mod network;
mod runner;

pub use client::DockerCli;
pub use network::{AttachReport, NetworkHandle, NetworkReconciler};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, OutputMode, ProcessRunner};
