//! Deployment settings types.
//!
//! [`DeploymentSettings`] is the single value threaded through every
//! reconciliation step. It maps one-to-one onto the keys of the settings
//! file; conversion to and from raw key/value pairs lives here, the line
//! grammar lives in [`super::envfile`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::SettingsError;

/// Settings file name, relative to the netbox-docker directory.
pub const SETTINGS_FILE: &str = ".netbox-manager.env";

/// Default canonical location of the Slurp'it compose document.
pub const DEFAULT_UPSTREAM_COMPOSE_URL: &str =
    "https://gitlab.com/slurpit.io/images/-/raw/main/docker-compose.yml";

/// Settings keys.
pub mod keys {
    /// Whether the Slurp'it stack is deployed.
    pub const SLURPIT_ENABLED: &str = "SLURPIT_ENABLED";
    /// Deployment mode.
    pub const SLURPIT_MODE: &str = "SLURPIT_MODE";
    /// Host port for the NetBox UI.
    pub const NETBOX_PORT: &str = "NETBOX_PORT";
    /// Host port for the Slurp'it portal.
    pub const SLURPIT_PORTAL_PORT: &str = "SLURPIT_PORTAL_PORT";
    /// Container timezone.
    pub const TZ: &str = "TZ";
    /// Override of the upstream compose document URL.
    pub const SLURPIT_COMPOSE_URL: &str = "SLURPIT_COMPOSE_URL";
    /// NetBox base URL as seen from the Slurp'it containers.
    pub const NETBOX_URL: &str = "NETBOX_URL";
    /// API token used by Slurp'it.
    pub const NETBOX_API_TOKEN: &str = "NETBOX_API_TOKEN";
    /// Whether Slurp'it pushes into NetBox.
    pub const SLURPIT_SYNC_ENABLED: &str = "SLURPIT_SYNC_ENABLED";
    /// Sync interval in seconds.
    pub const SLURPIT_SYNC_INTERVAL: &str = "SLURPIT_SYNC_INTERVAL";
    /// NetBox superuser name.
    pub const NETBOX_SUPERUSER_NAME: &str = "NETBOX_SUPERUSER_NAME";
    /// NetBox superuser email.
    pub const NETBOX_SUPERUSER_EMAIL: &str = "NETBOX_SUPERUSER_EMAIL";
    /// NetBox superuser password.
    pub const NETBOX_SUPERUSER_PASSWORD: &str = "NETBOX_SUPERUSER_PASSWORD";
    /// Slurp'it `MariaDB` user password.
    pub const SLURPIT_MARIADB_PASSWORD: &str = "SLURPIT_MARIADB_PASSWORD";
    /// Slurp'it `MariaDB` root password.
    pub const SLURPIT_MARIADB_ROOT_PASSWORD: &str = "SLURPIT_MARIADB_ROOT_PASSWORD";
    /// Slurp'it `MongoDB` root password.
    pub const SLURPIT_MONGODB_PASSWORD: &str = "SLURPIT_MONGODB_PASSWORD";
}

/// Keys holding generated credentials, in file order.
pub const CREDENTIAL_KEYS: &[&str] = &[
    keys::NETBOX_SUPERUSER_PASSWORD,
    keys::SLURPIT_MARIADB_PASSWORD,
    keys::SLURPIT_MARIADB_ROOT_PASSWORD,
    keys::SLURPIT_MONGODB_PASSWORD,
];

/// Topology used for the Slurp'it stack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Services inlined into the override with generated defaults.
    #[default]
    Clean,
    /// Inlined copy of the upstream topology (container names, health checks, bind mounts).
    UpstreamExact,
    /// Upstream document fetched verbatim plus a thin patch.
    UpstreamRaw,
}

impl DeploymentMode {
    /// All modes, in menu order.
    pub const ALL: [Self; 3] = [Self::Clean, Self::UpstreamExact, Self::UpstreamRaw];

    /// Canonical settings value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::UpstreamExact => "upstream-exact",
            Self::UpstreamRaw => "upstream-raw",
        }
    }

    /// Parses a user-supplied value, falling back to `clean`.
    ///
    /// An unknown value is logged and treated as `clean` so a typo in the
    /// settings file never blocks a reconciliation.
    #[must_use]
    pub fn from_setting(value: &str) -> Self {
        value.parse().unwrap_or_else(|()| {
            warn!("Unknown deployment mode {value:?}, falling back to 'clean'");
            Self::Clean
        })
    }

    /// Whether the Slurp'it services are inlined in the primary override.
    #[must_use]
    pub const fn inlines_services(self) -> bool {
        matches!(self, Self::Clean | Self::UpstreamExact)
    }
}

impl FromStr for DeploymentMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clean" => Ok(Self::Clean),
            "upstream-exact" | "exact" => Ok(Self::UpstreamExact),
            "upstream-raw" | "raw" => Ok(Self::UpstreamRaw),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted deployment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSettings {
    /// Whether the Slurp'it stack is deployed at all.
    pub slurpit_enabled: bool,
    /// Selected topology.
    pub mode: DeploymentMode,
    /// Host port published for the NetBox UI.
    pub ui_port: u16,
    /// Host port published for the Slurp'it portal.
    pub portal_port: u16,
    /// Container timezone.
    pub timezone: String,
    /// Where `upstream-raw` fetches the Slurp'it document from.
    pub upstream_compose_url: String,
    /// NetBox URL as reached from the Slurp'it network.
    pub primary_service_url: String,
    /// NetBox API token for Slurp'it; empty means not yet provisioned.
    #[serde(skip_serializing)]
    pub api_token: String,
    /// Whether Slurp'it should push into NetBox.
    pub sync_enabled: bool,
    /// Sync interval in seconds.
    pub sync_interval_seconds: u32,
    /// NetBox superuser name.
    pub superuser_name: String,
    /// NetBox superuser email.
    pub superuser_email: String,
    /// Generated credentials keyed by settings key.
    #[serde(skip_serializing)]
    pub credentials: BTreeMap<String, String>,
    /// Unrecognized keys, kept verbatim.
    #[serde(skip_serializing)]
    pub extra: BTreeMap<String, String>,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            slurpit_enabled: false,
            mode: DeploymentMode::Clean,
            ui_port: 8000,
            portal_port: 8880,
            timezone: String::from("UTC"),
            upstream_compose_url: String::from(DEFAULT_UPSTREAM_COMPOSE_URL),
            primary_service_url: String::from("http://netbox:8080"),
            api_token: String::new(),
            sync_enabled: true,
            sync_interval_seconds: 3600,
            superuser_name: String::from("admin"),
            superuser_email: String::from("admin@example.com"),
            credentials: CREDENTIAL_KEYS
                .iter()
                .map(|k| ((*k).to_string(), String::new()))
                .collect(),
            extra: BTreeMap::new(),
        }
    }
}

impl DeploymentSettings {
    /// Builds settings from raw pairs, applying defaults for missing keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a known key carries a value of the wrong type.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Self::default();

        for (key, value) in pairs {
            match key.as_str() {
                keys::SLURPIT_ENABLED => settings.slurpit_enabled = parse_bool(&key, &value)?,
                keys::SLURPIT_MODE => settings.mode = DeploymentMode::from_setting(&value),
                keys::NETBOX_PORT => settings.ui_port = parse_port(&key, &value)?,
                keys::SLURPIT_PORTAL_PORT => settings.portal_port = parse_port(&key, &value)?,
                keys::TZ => settings.timezone = value,
                keys::SLURPIT_COMPOSE_URL => settings.upstream_compose_url = value,
                keys::NETBOX_URL => settings.primary_service_url = value,
                keys::NETBOX_API_TOKEN => settings.api_token = value,
                keys::SLURPIT_SYNC_ENABLED => settings.sync_enabled = parse_bool(&key, &value)?,
                keys::SLURPIT_SYNC_INTERVAL => {
                    settings.sync_interval_seconds = value.trim().parse().map_err(|_| {
                        SettingsError::invalid_value(&key, &value, "expected seconds")
                    })?;
                }
                keys::NETBOX_SUPERUSER_NAME => settings.superuser_name = value,
                keys::NETBOX_SUPERUSER_EMAIL => settings.superuser_email = value,
                k if CREDENTIAL_KEYS.contains(&k) => {
                    settings.credentials.insert(key, value);
                }
                _ => {
                    settings.extra.insert(key, value);
                }
            }
        }

        Ok(settings)
    }

    /// Converts the settings into ordered key/value pairs for saving.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            pair(keys::SLURPIT_ENABLED, self.slurpit_enabled.to_string()),
            pair(keys::SLURPIT_MODE, self.mode.as_str()),
            pair(keys::NETBOX_PORT, self.ui_port.to_string()),
            pair(keys::SLURPIT_PORTAL_PORT, self.portal_port.to_string()),
            pair(keys::TZ, &self.timezone),
            pair(keys::SLURPIT_COMPOSE_URL, &self.upstream_compose_url),
            pair(keys::NETBOX_URL, &self.primary_service_url),
            pair(keys::NETBOX_API_TOKEN, &self.api_token),
            pair(keys::SLURPIT_SYNC_ENABLED, self.sync_enabled.to_string()),
            pair(keys::SLURPIT_SYNC_INTERVAL, self.sync_interval_seconds.to_string()),
            pair(keys::NETBOX_SUPERUSER_NAME, &self.superuser_name),
            pair(keys::NETBOX_SUPERUSER_EMAIL, &self.superuser_email),
        ];

        for key in CREDENTIAL_KEYS {
            pairs.push(pair(key, self.credential(key)));
        }

        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }

    /// Returns a stored credential, or an empty string.
    #[must_use]
    pub fn credential(&self, key: &str) -> &str {
        self.credentials.get(key).map_or("", String::as_str)
    }

    /// Credential keys whose value is still empty.
    #[must_use]
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        CREDENTIAL_KEYS
            .iter()
            .copied()
            .filter(|k| self.credential(k).is_empty())
            .collect()
    }

    /// Whether an API token has been provisioned.
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.api_token.is_empty()
    }

    /// Whether sync should actually run: requested and a token exists.
    #[must_use]
    pub fn sync_effective(&self) -> bool {
        self.sync_enabled && self.has_token()
    }
}

fn pair(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" | "" => Ok(false),
        _ => Err(SettingsError::invalid_value(key, value, "expected true or false")),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, SettingsError> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(SettingsError::invalid_value(key, value, "expected a port between 1 and 65535")),
        Ok(port) => Ok(port),
    }
}
