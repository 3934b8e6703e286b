//! Configuration module for the NetBox manager.
//!
//! This module handles everything about deployment settings:
//! - The typed [`DeploymentSettings`] value and its defaults
//! - The strict `KEY=VALUE` settings file grammar
//! - Validation of settings values
//! - Credential generation

mod envfile;
mod secret;
mod settings;
mod validator;

pub use envfile::{is_valid_key, parse as parse_env, render as render_env};
#[cfg(test)]
pub use secret::MockSecretGenerator;
pub use secret::{RandomSecretGenerator, SecretGenerator, SECRET_BYTES};
pub use settings::{
    keys, DeploymentMode, DeploymentSettings, CREDENTIAL_KEYS, DEFAULT_UPSTREAM_COMPOSE_URL,
    SETTINGS_FILE,
};
pub use validator::{SettingsValidator, ValidationError, ValidationResult};
