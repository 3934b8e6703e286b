//! Provisioning against the running stack.
//!
//! This module talks to NetBox once its containers are up:
//! - Bounded polling with an explicit budget
//! - Superuser and API token provisioning via `docker exec`
//! - Reachability checks of the NetBox API

mod health;
mod retry;
mod token;

pub use health::{Reachability, ReachabilityChecker};
pub use retry::{poll, PollOutcome, RetryPolicy};
pub use token::{sanitize_token_output, AdminScript, TokenProvisioner, TOKEN_LABEL, TOKEN_LINE_PREFIX};
