// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # NetBox Manager
//!
//! An idempotent reconciler for a netbox-docker checkout and the Slurp'it
//! stack that syncs into it.
//!
//! ## Overview
//!
//! The manager keeps three things in line with a small settings file:
//!
//! - The layered Compose documents next to netbox-docker's own
//! - The running containers, through the Compose CLI
//! - The API token and shared network Slurp'it needs to reach NetBox
//!
//! ## Architecture
//!
//! Every operation runs the same forward-only sequence:
//!
//! 1. **Settings**: loaded from `.netbox-manager.env`, changed, completed
//! 2. **Documents**: rendered for the deployment mode and resolved by Compose
//! 3. **Stack**: pulled, built and started
//! 4. **Token**: found or created inside NetBox, then injected
//! 5. **Network**: NetBox and Slurp'it joined on one bridge network
//!
//! Running it again on a converged deployment changes nothing.
//!
//! ## Modules
//!
//! - [`config`]: Settings model, file grammar, validation, credentials
//! - [`state`]: Settings store and advisory lock
//! - [`compose`]: Document model, renderers, writer and Compose executor
//! - [`docker`]: Docker CLI access and network reconciliation
//! - [`provision`]: Token provisioning, polling and reachability
//! - [`reconciler`]: The state machine tying the steps together
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```text
//! $ netbox-manager --dir /opt/netbox-docker enable --mode clean --port 8000 -y
//! $ netbox-manager reconcile
//! $ netbox-manager status --output json
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod compose;
pub mod config;
pub mod docker;
pub mod error;
pub mod provision;
pub mod reconciler;
pub mod state;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use compose::{ComposeExecutor, ComposeLayerWriter, ComposeLayout, HttpFetcher};
pub use config::{DeploymentMode, DeploymentSettings, RandomSecretGenerator, SettingsValidator};
pub use docker::{DockerCli, NetworkReconciler, ProcessRunner};
pub use error::{ManagerError, Result};
pub use provision::{ReachabilityChecker, TokenProvisioner};
pub use reconciler::{ModeReconciler, Operation, OperationOutcome, ReconcileStage};
pub use state::{EnvFileStore, SettingsStore};
