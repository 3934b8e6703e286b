//! Typed Compose documents.
//!
//! Only the subset of the Compose format the manager writes is modelled.
//! Maps are `BTreeMap`s so rendering is deterministic and an unchanged
//! input always produces byte-identical output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A Compose document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeDocument {
    /// Services by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Service>,
    /// Networks by key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Network>,
    /// Named volumes by key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Volume>,
}

impl ComposeDocument {
    /// Adds every service, network and volume of `other`, replacing same-named entries.
    pub fn merge(&mut self, other: Self) {
        self.services.extend(other.services);
        self.networks.extend(other.networks);
        self.volumes.extend(other.volumes);
    }

    /// Renders the document as YAML behind a header comment.
    ///
    /// # Errors
    ///
    /// Returns the serializer error message.
    pub fn to_yaml(&self, header: &str) -> Result<String, String> {
        let body = serde_yaml::to_string(self).map_err(|e| e.to_string())?;
        let mut out = String::new();
        for line in header.lines() {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&body);
        Ok(out)
    }
}

/// A service definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Image reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,
    /// Fixed container name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Restart policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Environment variables. Values must already be escaped.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Published ports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Volume and bind mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Start-order dependencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,
    /// Health check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
    /// Networks joined.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
}

/// Build section of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    /// Build context, relative to the project directory.
    pub context: String,
    /// Dockerfile inside the context.
    pub dockerfile: String,
}

/// `depends_on` in either of its Compose forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    /// Plain list of service names.
    List(Vec<String>),
    /// Service name to start condition.
    Conditions(BTreeMap<String, DependsCondition>),
}

impl DependsOn {
    /// Every listed service must be healthy first.
    #[must_use]
    pub fn healthy(services: &[&str]) -> Self {
        Self::Conditions(
            services
                .iter()
                .map(|s| {
                    (
                        (*s).to_string(),
                        DependsCondition {
                            condition: String::from("service_healthy"),
                        },
                    )
                })
                .collect(),
        )
    }

    /// Plain ordering on the listed services.
    #[must_use]
    pub fn started(services: &[&str]) -> Self {
        Self::List(services.iter().map(|s| (*s).to_string()).collect())
    }
}

/// A `depends_on` condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsCondition {
    /// Compose condition keyword.
    pub condition: String,
}

/// Container health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Test command in exec form.
    pub test: Vec<String>,
    /// Interval between checks.
    pub interval: String,
    /// Per-check timeout.
    pub timeout: String,
    /// Failures before unhealthy.
    pub retries: u32,
    /// Grace period after start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
}

impl HealthCheck {
    /// A `CMD-SHELL` check with common timings.
    #[must_use]
    pub fn shell(command: &str, start_period: Option<&str>) -> Self {
        Self {
            test: vec![String::from("CMD-SHELL"), command.to_string()],
            interval: String::from("10s"),
            timeout: String::from("5s"),
            retries: 10,
            start_period: start_period.map(str::to_string),
        }
    }
}

/// Top-level network definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Real network name, independent of the project prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the network is managed outside this project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
}

/// Top-level named volume definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {}

/// Escapes `$` so Compose does not interpolate a literal value.
#[must_use]
pub fn escape_interpolation(value: &str) -> String {
    value.replace('$', "$$")
}
