//! Settings validation.
//!
//! Runs before any document is written so a bad value never reaches a
//! compose file or a command line.

use reqwest::Url;
use tracing::debug;

use crate::error::{Result, SettingsError};

use super::settings::DeploymentSettings;

/// Smallest sync interval Slurp'it accepts, in seconds.
const MIN_SYNC_INTERVAL_SECS: u32 = 60;

/// Validator for deployment settings.
#[derive(Debug, Default)]
pub struct SettingsValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The settings key that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }
}

impl SettingsValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates deployment settings.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, settings: &DeploymentSettings) -> Result<ValidationResult> {
        let result = self.check(settings);

        if let Some(first) = result.errors.first() {
            return Err(SettingsError::validation(first.message.clone(), first.field.clone()).into());
        }

        debug!("Settings validation passed");
        Ok(result)
    }

    /// Runs every check and collects the findings without failing.
    #[must_use]
    pub fn check(&self, settings: &DeploymentSettings) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_ports(settings, &mut result);
        Self::validate_urls(settings, &mut result);
        Self::validate_text(settings, &mut result);
        Self::validate_sync(settings, &mut result);

        result
    }

    fn validate_ports(settings: &DeploymentSettings, result: &mut ValidationResult) {
        if settings.ui_port == 0 {
            result.error("NETBOX_PORT", "NetBox port must be between 1 and 65535");
        }
        if settings.portal_port == 0 {
            result.error("SLURPIT_PORTAL_PORT", "Portal port must be between 1 and 65535");
        }
        if settings.slurpit_enabled && settings.ui_port == settings.portal_port {
            result.error(
                "SLURPIT_PORTAL_PORT",
                format!("Portal port {} collides with the NetBox port", settings.portal_port),
            );
        }
    }

    fn validate_urls(settings: &DeploymentSettings, result: &mut ValidationResult) {
        for (field, value) in [
            ("NETBOX_URL", &settings.primary_service_url),
            ("SLURPIT_COMPOSE_URL", &settings.upstream_compose_url),
        ] {
            match Url::parse(value) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => result.error(field, format!("Unsupported URL scheme '{}'", url.scheme())),
                Err(e) => result.error(field, format!("Invalid URL {value:?}: {e}")),
            }
        }
    }

    fn validate_text(settings: &DeploymentSettings, result: &mut ValidationResult) {
        if settings.timezone.is_empty() || settings.timezone.chars().any(char::is_whitespace) {
            result.error("TZ", format!("Invalid timezone {:?}", settings.timezone));
        }

        if settings.superuser_name.trim().is_empty() {
            result.error("NETBOX_SUPERUSER_NAME", "Superuser name cannot be empty");
        }

        for (key, value) in settings.to_pairs() {
            if value.contains(['\n', '\r', '\0']) {
                result.error(&key, "Value contains a line break or NUL byte");
            }
        }
    }

    fn validate_sync(settings: &DeploymentSettings, result: &mut ValidationResult) {
        if settings.sync_interval_seconds < MIN_SYNC_INTERVAL_SECS {
            result.error(
                "SLURPIT_SYNC_INTERVAL",
                format!("Sync interval must be at least {MIN_SYNC_INTERVAL_SECS} seconds"),
            );
        }

        if settings.slurpit_enabled && settings.sync_enabled && !settings.has_token() {
            result
                .warnings
                .push(String::from("Sync stays disabled until a NetBox API token is provisioned"));
        }
    }
}
