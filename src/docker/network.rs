//! Shared network reconciliation.
//!
//! NetBox and the Slurp'it containers talk over one named bridge network.
//! Compose normally creates it from the override, but containers started
//! before the network was declared, or by an upstream document that knows
//! nothing about it, have to be attached by hand. Attaching is idempotent:
//! a container already on the network by exact name is left alone.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::client::DockerCli;
use crate::error::DockerError;

/// A network that exists on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkHandle {
    /// Network name.
    pub name: String,
    /// Docker network id.
    pub id: String,
    /// Whether this run created it.
    pub created: bool,
}

/// Outcome of attaching containers to the shared network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachReport {
    /// Containers connected during this run.
    pub attached: Vec<String>,
    /// Containers that were already members.
    pub already_attached: Vec<String>,
    /// Containers that could not be inspected, with the reason.
    pub missing: Vec<(String, String)>,
}

impl AttachReport {
    /// Whether this run changed any network membership.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.attached.is_empty()
    }
}

/// Ensures the shared network exists and containers are attached to it.
#[derive(Debug, Clone)]
pub struct NetworkReconciler {
    docker: DockerCli,
}

impl NetworkReconciler {
    /// Creates a reconciler on top of a Docker client.
    #[must_use]
    pub const fn new(docker: DockerCli) -> Self {
        Self { docker }
    }

    /// Makes sure the named network exists, creating it if needed.
    ///
    /// `primary` is only consulted for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be looked up or created.
    pub async fn ensure_shared_network(
        &self,
        primary: Option<&str>,
        name: &str,
    ) -> Result<NetworkHandle, DockerError> {
        if let Some(id) = self.docker.network_id(name).await? {
            debug!("Shared network {name} exists ({id})");
            return Ok(NetworkHandle {
                name: name.to_string(),
                id,
                created: false,
            });
        }

        if let Some(container) = primary {
            match self.docker.container_networks(container).await {
                Ok(networks) => debug!("Primary container is on: {}", networks.join(", ")),
                Err(e) => debug!("Could not inspect primary container: {e}"),
            }
        }

        info!("Creating shared network {name}");
        let id = self.docker.create_network(name).await?;

        Ok(NetworkHandle {
            name: name.to_string(),
            id,
            created: true,
        })
    }

    /// Attaches each container to the network unless it is already a member.
    ///
    /// Containers that cannot be inspected are reported as missing rather
    /// than failing the run; they are picked up on the next reconcile.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting an existing container fails.
    pub async fn attach(
        &self,
        containers: &[String],
        network: &NetworkHandle,
    ) -> Result<AttachReport, DockerError> {
        let mut report = AttachReport::default();

        for container in containers {
            let networks = match self.docker.container_networks(container).await {
                Ok(networks) => networks,
                Err(e) => {
                    warn!("Cannot attach {container} to {}: {e}", network.name);
                    report.missing.push((container.clone(), e.to_string()));
                    continue;
                }
            };

            if networks.iter().any(|n| n == &network.name) {
                debug!("{container} already on {}", network.name);
                report.already_attached.push(container.clone());
                continue;
            }

            info!("Connecting {container} to {}", network.name);
            self.docker.connect(&network.name, container).await?;
            report.attached.push(container.clone());
        }

        Ok(report)
    }
}
