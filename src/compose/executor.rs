//! Compose CLI executor.
//!
//! Wraps `docker compose` (or legacy `docker-compose`) for the project
//! directory. The `-f` list is recomputed from disk on every call, so the
//! executor never holds stale knowledge of which documents are active.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::layout::ComposeLayout;
use crate::docker::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::DockerError;

/// Timeout for read-only Compose queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

const V2_PREFIX: &[&str] = &["compose"];
const V1_PREFIX: &[&str] = &[];

/// Which Compose CLI is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComposeFlavor {
    /// The `docker compose` plugin.
    V2,
    /// The standalone `docker-compose` binary.
    V1,
}

impl ComposeFlavor {
    /// Detects the installed flavour, preferring the plugin.
    ///
    /// # Errors
    ///
    /// Returns [`DockerError::ComposeUnavailable`] if neither works.
    pub async fn detect(runner: &dyn CommandRunner) -> Result<Self, DockerError> {
        let v2 = CommandSpec::new("docker", ["compose", "version"]).with_timeout(QUERY_TIMEOUT);
        if matches!(runner.run(&v2).await, Ok(ref out) if out.success()) {
            debug!("Using docker compose (v2)");
            return Ok(Self::V2);
        }

        let v1 = CommandSpec::new("docker-compose", ["version"]).with_timeout(QUERY_TIMEOUT);
        if matches!(runner.run(&v1).await, Ok(ref out) if out.success()) {
            debug!("Using docker-compose (v1)");
            return Ok(Self::V1);
        }

        Err(DockerError::ComposeUnavailable)
    }

    /// Program and leading arguments.
    #[must_use]
    pub const fn invocation(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::V2 => ("docker", V2_PREFIX),
            Self::V1 => ("docker-compose", V1_PREFIX),
        }
    }
}

/// One row of `compose ps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceState {
    /// Container name.
    pub name: String,
    /// Compose service name.
    pub service: String,
    /// Container state, e.g. `running`.
    pub state: String,
    /// Health status, empty without a health check.
    pub health: String,
    /// Human-readable status.
    pub status: String,
}

/// Runs Compose commands against the layered document set.
#[derive(Clone)]
pub struct ComposeExecutor {
    runner: Arc<dyn CommandRunner>,
    layout: ComposeLayout,
    flavor: ComposeFlavor,
}

impl std::fmt::Debug for ComposeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeExecutor")
            .field("layout", &self.layout)
            .field("flavor", &self.flavor)
            .finish_non_exhaustive()
    }
}

impl ComposeExecutor {
    /// Creates an executor with a known flavour.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, layout: ComposeLayout, flavor: ComposeFlavor) -> Self {
        Self { runner, layout, flavor }
    }

    /// Creates an executor, detecting the flavour once.
    ///
    /// # Errors
    ///
    /// Returns an error if no Compose CLI is available.
    pub async fn detect(runner: Arc<dyn CommandRunner>, layout: ComposeLayout) -> Result<Self, DockerError> {
        let flavor = ComposeFlavor::detect(runner.as_ref()).await?;
        Ok(Self::new(runner, layout, flavor))
    }

    /// The project layout.
    #[must_use]
    pub const fn layout(&self) -> &ComposeLayout {
        &self.layout
    }

    /// The detected flavour.
    #[must_use]
    pub const fn flavor(&self) -> ComposeFlavor {
        self.flavor
    }

    /// Builds a command with the current `-f` list.
    fn command(&self, subcommand: &[&str]) -> CommandSpec {
        let (program, prefix) = self.flavor.invocation();
        let mut args: Vec<String> = prefix.iter().map(|s| (*s).to_string()).collect();

        args.push(String::from("--project-directory"));
        args.push(self.layout.dir().display().to_string());
        for file in self.layout.active_files() {
            args.push(String::from("-f"));
            args.push(file.display().to_string());
        }
        args.extend(subcommand.iter().map(|s| (*s).to_string()));

        CommandSpec::new(program, args)
    }

    async fn run_inherit(&self, subcommand: &[&str]) -> Result<(), DockerError> {
        let spec = self.command(subcommand).inherit();
        info!("{}", spec.display());
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }

    async fn run_capture(&self, subcommand: &[&str]) -> Result<CommandOutput, DockerError> {
        let spec = self.command(subcommand).with_timeout(QUERY_TIMEOUT);
        self.runner.run(&spec).await?.check(&spec)
    }

    /// Pulls images, skipping locally built ones.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose exits non-zero.
    pub async fn pull(&self) -> Result<(), DockerError> {
        match self.flavor {
            ComposeFlavor::V2 => self.run_inherit(&["pull", "--ignore-buildable"]).await,
            ComposeFlavor::V1 => self.run_inherit(&["pull", "--ignore-pull-failures"]).await,
        }
    }

    /// Builds images that have build instructions.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose exits non-zero.
    pub async fn build(&self) -> Result<(), DockerError> {
        self.run_inherit(&["build"]).await
    }

    /// Starts the stack detached and removes containers of dropped services.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose exits non-zero.
    pub async fn up(&self) -> Result<(), DockerError> {
        self.run_inherit(&["up", "-d", "--remove-orphans"]).await
    }

    /// Stops and removes the stack.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose exits non-zero.
    pub async fn down(&self) -> Result<(), DockerError> {
        self.run_inherit(&["down"]).await
    }

    /// Lists the project's containers.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose fails or its output cannot be parsed.
    pub async fn ps(&self) -> Result<Vec<ServiceState>, DockerError> {
        match self.flavor {
            ComposeFlavor::V2 => {
                let output = self.run_capture(&["ps", "--all", "--format", "json"]).await?;
                parse_ps_json(&output.stdout).map_err(|message| DockerError::UnexpectedOutput {
                    command: String::from("compose ps"),
                    message,
                })
            }
            ComposeFlavor::V1 => {
                let output = self.run_capture(&["ps", "--services", "--filter", "status=running"]).await?;
                Ok(output
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|service| ServiceState {
                        service: service.to_string(),
                        state: String::from("running"),
                        ..ServiceState::default()
                    })
                    .collect())
            }
        }
    }

    /// Streams logs to the terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose exits non-zero.
    pub async fn logs(&self, service: Option<&str>, follow: bool, tail: Option<u32>) -> Result<(), DockerError> {
        let tail = tail.map(|n| n.to_string());
        let mut args = vec!["logs"];
        if follow {
            args.push("--follow");
        }
        if let Some(tail) = tail.as_deref() {
            args.push("--tail");
            args.push(tail);
        }
        if let Some(service) = service {
            args.push(service);
        }
        self.run_inherit(&args).await
    }

    /// Runs a command in a running service container.
    ///
    /// The exit status and output are returned as-is for the caller to
    /// propagate.
    ///
    /// # Errors
    ///
    /// Returns an error only if Compose cannot be started.
    pub async fn exec(&self, service: &str, command: &[String]) -> Result<CommandOutput, DockerError> {
        let mut args = vec!["exec", "-T", service];
        args.extend(command.iter().map(String::as_str));
        let spec = self.command(&args);
        self.runner.run(&spec).await
    }

    /// Asks Compose to resolve the document set without starting anything.
    ///
    /// # Errors
    ///
    /// Returns [`DockerError::CommandFailed`] carrying Compose's diagnostic.
    pub async fn resolve(&self) -> Result<(), DockerError> {
        self.run_capture(&["config", "--quiet"]).await?;
        Ok(())
    }

    /// Container id of a service, `None` if it has no container.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose exits non-zero.
    pub async fn service_container_id(&self, service: &str) -> Result<Option<String>, DockerError> {
        let output = self.run_capture(&["ps", "-q", service]).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }
}

/// Parses `compose ps --format json`, which is a JSON array on older
/// releases and one object per line on newer ones.
fn parse_ps_json(stdout: &str) -> Result<Vec<ServiceState>, String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| e.to_string());
    }

    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| e.to_string()))
        .collect()
}
