//! Compose document generation and execution.
//!
//! This module turns [`DeploymentSettings`](crate::config::DeploymentSettings)
//! into the layered Compose documents next to netbox-docker's base file and
//! drives the Compose CLI over them:
//! - Typed document model and renderers
//! - The layer writer (plan, commit, validate, restore)
//! - The Compose executor
//! - Upstream document fetching for `upstream-raw`

mod executor;
mod fetch;
mod hash;
mod layout;
mod model;
mod templates;
mod writer;

pub use executor::{ComposeExecutor, ComposeFlavor, ServiceState};
pub use fetch::{HttpFetcher, UpstreamFetcher};
pub use hash::DocumentHasher;
pub use layout::{
    ComposeLayout, BASE_FILE, OVERRIDE_FILE, PLUGIN_CONFIG, PLUGIN_DOCKERFILE, PLUGIN_REQUIREMENTS, RAW_FILE,
    RAW_PATCH_FILE, SLURPIT_DATA_DIR,
};
pub use model::{
    escape_interpolation, Build, ComposeDocument, DependsCondition, DependsOn, HealthCheck, Network, Service,
    Volume,
};
pub use templates::{
    EXACT_HOST_DIRS, MANAGED_HEADER, PLUGIN_IMAGE, PLUGIN_MODULE, PORTAL_SERVICE, PRIMARY_INTERNAL_PORT,
    PRIMARY_SERVICE, PRIMARY_SERVICES, SHARED_NETWORK, SLURPIT_SERVICES,
};
pub use writer::{ComposeLayerWriter, DocumentFingerprint, WriteReport};
