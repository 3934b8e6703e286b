//! Docker CLI client.
//!
//! Thin wrapper around the `docker` binary for the few container and
//! network queries the manager needs. All invocations go through the
//! shared [`CommandRunner`], so they are logged and testable in one place.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::DockerError;

/// Timeout for quick inspection commands.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for administrative commands run inside containers.
const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for plain `docker` commands.
#[derive(Clone)]
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for DockerCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerCli").finish_non_exhaustive()
    }
}

impl DockerCli {
    /// Creates a client on top of a command runner.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// The underlying runner.
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DockerError> {
        self.runner.run(spec).await
    }

    async fn run_success(&self, spec: &CommandSpec) -> Result<CommandOutput, DockerError> {
        self.run(spec).await?.check(spec)
    }

    // ========================================================================
    // Containers
    // ========================================================================

    /// Names of the networks a container is attached to.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist or the output
    /// cannot be parsed.
    pub async fn container_networks(&self, container: &str) -> Result<Vec<String>, DockerError> {
        let spec = CommandSpec::new(
            "docker",
            ["inspect", "--format", "{{json .NetworkSettings.Networks}}", container],
        )
        .with_timeout(INSPECT_TIMEOUT);

        let output = self.run_success(&spec).await?;
        let trimmed = output.stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }

        let networks: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(trimmed).map_err(|e| DockerError::UnexpectedOutput {
                command: spec.display(),
                message: e.to_string(),
            })?;

        Ok(networks.into_keys().collect())
    }

    /// Runs a command inside a container without a TTY.
    ///
    /// `env` values are exported to the `docker` client process and
    /// forwarded by name only, so they never appear on a command line.
    /// The exit status is returned, not checked.
    ///
    /// # Errors
    ///
    /// Returns an error if `docker` cannot be started or times out.
    pub async fn exec(
        &self,
        container: &str,
        env: &[(&str, &str)],
        argv: &[&str],
    ) -> Result<CommandOutput, DockerError> {
        let mut args = vec![String::from("exec"), String::from("-i")];
        for (key, _) in env {
            args.push(String::from("-e"));
            args.push((*key).to_string());
        }
        args.push(container.to_string());
        args.extend(argv.iter().map(|a| (*a).to_string()));

        let mut spec = CommandSpec::new("docker", args).with_timeout(EXEC_TIMEOUT);
        for (key, value) in env {
            spec = spec.env(key, value);
        }

        self.run(&spec).await
    }

    // ========================================================================
    // Networks
    // ========================================================================

    /// Looks up a network by exact name.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than "no such network".
    pub async fn network_id(&self, name: &str) -> Result<Option<String>, DockerError> {
        let spec = CommandSpec::new("docker", ["network", "inspect", "--format", "{{.Id}}", name])
            .with_timeout(INSPECT_TIMEOUT);

        let output = self.run(&spec).await?;
        if output.success() {
            let id = output.stdout.trim().to_string();
            return Ok(if id.is_empty() { None } else { Some(id) });
        }

        let stderr = output.stderr.to_ascii_lowercase();
        if stderr.contains("no such network") || stderr.contains("not found") {
            debug!("Network {name} does not exist");
            return Ok(None);
        }

        Err(DockerError::failed(spec.display(), &output.stderr, output.status))
    }

    /// Creates a bridge network and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if `docker network create` fails.
    pub async fn create_network(&self, name: &str) -> Result<String, DockerError> {
        let spec = CommandSpec::new("docker", ["network", "create", name]).with_timeout(INSPECT_TIMEOUT);
        let output = self.run_success(&spec).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Connects a container to a network.
    ///
    /// # Errors
    ///
    /// Returns an error if `docker network connect` fails.
    pub async fn connect(&self, network: &str, container: &str) -> Result<(), DockerError> {
        let spec =
            CommandSpec::new("docker", ["network", "connect", network, container]).with_timeout(INSPECT_TIMEOUT);
        self.run_success(&spec).await?;
        Ok(())
    }
}
