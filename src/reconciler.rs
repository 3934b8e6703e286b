//! Reconciler for the NetBox + Slurp'it deployment.
//!
//! This module implements the forward-only state machine that takes the
//! persisted settings to running containers:
//!
//! load settings → write documents → pull/build/up → token → network
//!
//! Every step either succeeds or halts the run with the step identified.
//! Two situations are downgraded to warnings: NetBox not answering the
//! token lookup yet, and Slurp'it containers that are not up yet.

use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::compose::{
    ComposeExecutor, ComposeLayerWriter, DocumentFingerprint, ServiceState, WriteReport, PRIMARY_SERVICE,
    SHARED_NETWORK,
};
use crate::config::{keys, DeploymentMode, DeploymentSettings, SecretGenerator, SettingsValidator};
use crate::docker::{AttachReport, NetworkHandle, NetworkReconciler};
use crate::error::{ManagerError, ReconcileError, Result};
use crate::provision::{poll, Reachability, ReachabilityChecker, RetryPolicy, TokenProvisioner, TOKEN_LABEL};
use crate::state::{generate_holder_id, LockInfo, SettingsStore};

/// Stages of a reconciliation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileStage {
    /// Nothing done yet.
    Uninitialized,
    /// Settings loaded, updated and persisted.
    SettingsLoaded,
    /// Compose documents written and resolved.
    DocumentsWritten,
    /// Images pulled and built, stack started.
    StackApplied,
    /// Token provisioning attempted.
    TokenPending,
    /// Shared network present and containers attached.
    NetworkVerified,
    /// All steps done.
    Reconciled,
}

impl ReconcileStage {
    /// Kebab-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::SettingsLoaded => "settings-loaded",
            Self::DocumentsWritten => "documents-written",
            Self::StackApplied => "stack-applied",
            Self::TokenPending => "token-pending",
            Self::NetworkVerified => "network-verified",
            Self::Reconciled => "reconciled",
        }
    }
}

impl fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested changes to the stored settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    /// Turn Slurp'it on or off.
    pub enabled: Option<bool>,
    /// New deployment mode.
    pub mode: Option<DeploymentMode>,
    /// New NetBox host port.
    pub ui_port: Option<u16>,
    /// New Slurp'it portal host port.
    pub portal_port: Option<u16>,
}

impl SettingsChange {
    /// Applies the change in place.
    pub fn apply(&self, settings: &mut DeploymentSettings) {
        if let Some(enabled) = self.enabled {
            settings.slurpit_enabled = enabled;
        }
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(port) = self.ui_port {
            settings.ui_port = port;
        }
        if let Some(port) = self.portal_port {
            settings.portal_port = port;
        }
    }
}

/// An operation requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Enable Slurp'it, optionally changing mode and ports.
    Enable {
        /// Deployment mode; keeps the stored one when absent.
        mode: Option<DeploymentMode>,
        /// NetBox host port; keeps the stored one when absent.
        ui_port: Option<u16>,
        /// Portal host port; keeps the stored one when absent.
        portal_port: Option<u16>,
    },
    /// Disable Slurp'it and leave plain NetBox running.
    Disable,
    /// Converge on the stored settings.
    Reconcile,
    /// Read-only status.
    Status,
}

impl Operation {
    /// Short name for output.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Enable { .. } => "enable",
            Self::Disable => "disable",
            Self::Reconcile => "reconcile",
            Self::Status => "status",
        }
    }

    /// The settings change this operation implies.
    #[must_use]
    pub const fn change(&self) -> SettingsChange {
        match *self {
            Self::Enable {
                mode,
                ui_port,
                portal_port,
            } => SettingsChange {
                enabled: Some(true),
                mode,
                ui_port,
                portal_port,
            },
            Self::Disable => SettingsChange {
                enabled: Some(false),
                mode: None,
                ui_port: None,
                portal_port: None,
            },
            Self::Reconcile | Self::Status => SettingsChange {
                enabled: None,
                mode: None,
                ui_port: None,
                portal_port: None,
            },
        }
    }
}

/// What happened to the API token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenState {
    /// Slurp'it is disabled; no token needed.
    NotRequired,
    /// The stored token is the one NetBox has.
    Reused,
    /// A new token was stored and the documents re-applied.
    Provisioned,
    /// NetBox was not ready; retry on the next run.
    Deferred,
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotRequired => "not required",
            Self::Reused => "reused",
            Self::Provisioned => "provisioned",
            Self::Deferred => "deferred",
        })
    }
}

/// Result of a mutating run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// Last stage reached.
    pub stage: ReconcileStage,
    /// Whether Slurp'it is enabled.
    pub enabled: bool,
    /// Deployment mode in effect.
    pub mode: DeploymentMode,
    /// NetBox host port.
    pub ui_port: u16,
    /// Whether the settings file was written.
    pub settings_saved: bool,
    /// Credential keys generated in this run.
    pub generated_credentials: Vec<String>,
    /// Document changes.
    pub documents: WriteReport,
    /// Token outcome.
    pub token: TokenState,
    /// Whether the superuser was created in this run.
    pub superuser_created: bool,
    /// Shared network, if reconciled.
    pub network: Option<NetworkHandle>,
    /// Network attachments, if reconciled.
    pub attachments: Option<AttachReport>,
    /// Deferred work.
    pub warnings: Vec<String>,
}

impl ReconciliationReport {
    fn new(settings: &DeploymentSettings) -> Self {
        Self {
            stage: ReconcileStage::SettingsLoaded,
            enabled: settings.slurpit_enabled,
            mode: settings.mode,
            ui_port: settings.ui_port,
            settings_saved: false,
            generated_credentials: Vec::new(),
            documents: WriteReport::default(),
            token: TokenState::NotRequired,
            superuser_created: false,
            network: None,
            attachments: None,
            warnings: Vec::new(),
        }
    }

    /// Returns true if nothing was deferred.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.stage == ReconcileStage::Reconciled && self.warnings.is_empty()
    }

    fn defer(&mut self, warning: String) {
        warn!("{warning}");
        self.warnings.push(warning);
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reconciliation reached {}:", self.stage)?;
        if self.enabled {
            writeln!(f, "  Slurp'it: enabled ({})", self.mode)?;
        } else {
            writeln!(f, "  Slurp'it: disabled")?;
        }
        writeln!(f, "  NetBox port: {}", self.ui_port)?;
        writeln!(
            f,
            "  Documents: {} written, {} unchanged, {} removed",
            self.documents.written.len(),
            self.documents.unchanged.len(),
            self.documents.removed.len()
        )?;
        if !self.generated_credentials.is_empty() {
            writeln!(f, "  Generated: {}", self.generated_credentials.join(", "))?;
        }
        writeln!(f, "  Token: {}", self.token)?;
        if let Some(attach) = &self.attachments {
            writeln!(
                f,
                "  Network: {} attached, {} already attached",
                attach.attached.len(),
                attach.already_attached.len()
            )?;
        }

        if !self.warnings.is_empty() {
            writeln!(f, "  Deferred:")?;
            for warning in &self.warnings {
                writeln!(f, "    - {warning}")?;
            }
        }

        Ok(())
    }
}

/// Read-only view of the deployment.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Stored settings (credentials omitted).
    pub settings: DeploymentSettings,
    /// Where the settings live.
    pub settings_location: String,
    /// Whether the settings file exists.
    pub settings_saved: bool,
    /// Whether an API token is stored.
    pub token_stored: bool,
    /// Documents Compose currently layers.
    pub documents: Vec<DocumentFingerprint>,
    /// Containers of the project.
    pub services: Vec<ServiceState>,
    /// Why the container list is empty, if Compose failed.
    pub services_error: Option<String>,
    /// NetBox reachability from the host.
    pub reachability: Option<Reachability>,
    /// Current advisory lock.
    pub lock: Option<LockInfo>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.settings.slurpit_enabled {
            writeln!(f, "Slurp'it: enabled ({})", self.settings.mode)?;
        } else {
            writeln!(f, "Slurp'it: disabled")?;
        }
        writeln!(f, "NetBox port: {}", self.settings.ui_port)?;
        writeln!(f, "Token: {}", if self.token_stored { "stored" } else { "not stored" })?;
        writeln!(f, "Documents:")?;
        for doc in &self.documents {
            writeln!(
                f,
                "  {} ({})",
                doc.path.display(),
                doc.hash.as_deref().unwrap_or("unreadable")
            )?;
        }
        writeln!(f, "Containers: {}", self.services.len())?;
        if let Some(error) = &self.services_error {
            writeln!(f, "  {error}")?;
        }
        if let Some(reachability) = &self.reachability {
            writeln!(f, "{reachability}")?;
        }
        if let Some(lock) = &self.lock {
            writeln!(f, "Locked by {} since {}", lock.holder, lock.acquired_at.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Details attached to an [`OperationOutcome`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutcomeReport {
    /// From `enable`, `disable` and `reconcile`.
    Reconciliation(Box<ReconciliationReport>),
    /// From `status`.
    Status(Box<StatusReport>),
}

/// Structured result handed to the interactive layer.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    /// Operation name.
    pub operation: &'static str,
    /// Whether the operation completed.
    pub ok: bool,
    /// One-line summary or diagnostic.
    pub message: String,
    /// Stage that failed, if any.
    pub failed_step: Option<ReconcileStage>,
    /// Details, when the operation got far enough to produce them.
    pub report: Option<OutcomeReport>,
}

impl OperationOutcome {
    fn failure(operation: &'static str, err: &ManagerError) -> Self {
        Self {
            operation,
            ok: false,
            message: err.to_string(),
            failed_step: err.failed_step(),
            report: None,
        }
    }

    fn reconciled(operation: &'static str, report: ReconciliationReport) -> Self {
        let mut message = if report.enabled {
            format!(
                "Slurp'it enabled ({}), NetBox on port {}",
                report.mode, report.ui_port
            )
        } else {
            format!("Slurp'it disabled, NetBox on port {}", report.ui_port)
        };
        if !report.warnings.is_empty() {
            message.push_str(&format!(
                "; {} step(s) deferred, run reconcile again later",
                report.warnings.len()
            ));
        }

        Self {
            operation,
            ok: true,
            message,
            failed_step: None,
            report: Some(OutcomeReport::Reconciliation(Box::new(report))),
        }
    }

    fn status(report: StatusReport) -> Self {
        let running = report.services.iter().filter(|s| s.state == "running").count();
        Self {
            operation: Operation::Status.name(),
            ok: true,
            message: format!("{running} of {} containers running", report.services.len()),
            failed_step: None,
            report: Some(OutcomeReport::Status(Box::new(report))),
        }
    }
}

/// Wraps a step error with the stage it failed in.
fn at(stage: ReconcileStage) -> impl Fn(ManagerError) -> ManagerError {
    move |e| ReconcileError::step(stage, e).into()
}

/// Settings after the first step.
struct Prepared {
    settings: DeploymentSettings,
    saved: bool,
    generated: Vec<String>,
}

/// Drives a deployment to its settings.
pub struct ModeReconciler<'a, S: SettingsStore> {
    /// Settings store.
    store: &'a S,
    /// Compose document writer.
    writer: &'a ComposeLayerWriter,
    /// Compose executor.
    executor: &'a ComposeExecutor,
    /// Token provisioner.
    tokens: &'a TokenProvisioner,
    /// Network reconciler.
    networks: &'a NetworkReconciler,
    /// Credential source.
    secrets: &'a dyn SecretGenerator,
    /// Reachability checker for `status`.
    checker: Option<&'a ReachabilityChecker>,
    /// Settings validator.
    validator: SettingsValidator,
    /// Wait for the NetBox container after `up`.
    container_wait: RetryPolicy,
    /// Lock holder identity.
    holder: String,
}

impl<'a, S: SettingsStore> ModeReconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        store: &'a S,
        writer: &'a ComposeLayerWriter,
        executor: &'a ComposeExecutor,
        tokens: &'a TokenProvisioner,
        networks: &'a NetworkReconciler,
        secrets: &'a dyn SecretGenerator,
    ) -> Self {
        Self {
            store,
            writer,
            executor,
            tokens,
            networks,
            secrets,
            checker: None,
            validator: SettingsValidator::new(),
            container_wait: RetryPolicy::container_default(),
            holder: generate_holder_id(),
        }
    }

    /// Probes NetBox during `status`.
    #[must_use]
    pub const fn with_reachability(mut self, checker: &'a ReachabilityChecker) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Overrides the wait for the NetBox container.
    #[must_use]
    pub const fn with_container_wait(mut self, policy: RetryPolicy) -> Self {
        self.container_wait = policy;
        self
    }

    /// Overrides the lock holder identity.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Runs an operation and folds the result into an [`OperationOutcome`].
    pub async fn run(&self, operation: Operation) -> OperationOutcome {
        let name = operation.name();
        match operation {
            Operation::Status => match self.status_report().await {
                Ok(report) => OperationOutcome::status(report),
                Err(e) => OperationOutcome::failure(name, &e),
            },
            _ => match self.apply(operation.change()).await {
                Ok(report) => OperationOutcome::reconciled(name, report),
                Err(e) => OperationOutcome::failure(name, &e),
            },
        }
    }

    /// Enables Slurp'it, optionally switching mode and ports.
    pub async fn enable(
        &self,
        mode: Option<DeploymentMode>,
        ui_port: Option<u16>,
        portal_port: Option<u16>,
    ) -> OperationOutcome {
        self.run(Operation::Enable {
            mode,
            ui_port,
            portal_port,
        })
        .await
    }

    /// Disables Slurp'it.
    pub async fn disable(&self) -> OperationOutcome {
        self.run(Operation::Disable).await
    }

    /// Converges on the stored settings.
    pub async fn reconcile(&self) -> OperationOutcome {
        self.run(Operation::Reconcile).await
    }

    /// Reports the current state without changing anything.
    pub async fn status(&self) -> OperationOutcome {
        self.run(Operation::Status).await
    }

    /// Applies `change` and runs every step under the advisory lock.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::StepFailed`] naming the failed stage, or a
    /// settings error if the lock is held by another run.
    pub async fn apply(&self, change: SettingsChange) -> Result<ReconciliationReport> {
        let lock = self.store.acquire_lock(&self.holder).await?;
        debug!("Holding lock {} as {}", lock.lock_id, lock.holder);

        let result = self.run_steps(change).await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release lock {}: {e}", lock.lock_id);
        }

        match &result {
            Ok(report) if report.is_converged() => info!("Reconciliation complete - state is converged"),
            Ok(report) => info!("Reconciliation complete with {} deferred step(s)", report.warnings.len()),
            Err(e) => error!("Reconciliation failed: {e}"),
        }
        result
    }

    async fn run_steps(&self, change: SettingsChange) -> Result<ReconciliationReport> {
        let Prepared {
            mut settings,
            saved,
            generated,
        } = self
            .prepare_settings(change)
            .await
            .map_err(at(ReconcileStage::SettingsLoaded))?;

        let mut report = ReconciliationReport::new(&settings);
        report.settings_saved = saved;
        report.generated_credentials = generated;
        info!(
            "Settings loaded: Slurp'it {}, mode {}, NetBox port {}",
            if settings.slurpit_enabled { "enabled" } else { "disabled" },
            settings.mode,
            settings.ui_port
        );

        report.documents = self
            .writer
            .write(&settings, self.executor)
            .await
            .map_err(at(ReconcileStage::DocumentsWritten))?;
        report.stage = ReconcileStage::DocumentsWritten;

        self.apply_stack().await.map_err(at(ReconcileStage::StackApplied))?;
        report.stage = ReconcileStage::StackApplied;

        if !settings.slurpit_enabled {
            report.stage = ReconcileStage::Reconciled;
            return Ok(report);
        }

        let primary = self
            .provision_token(&mut settings, &mut report)
            .await
            .map_err(at(ReconcileStage::TokenPending))?;
        report.stage = ReconcileStage::TokenPending;

        self.reconcile_network(&settings, primary.as_deref(), &mut report)
            .await
            .map_err(at(ReconcileStage::NetworkVerified))?;
        report.stage = ReconcileStage::NetworkVerified;

        report.stage = ReconcileStage::Reconciled;
        Ok(report)
    }

    /// Loads, changes, validates and completes the settings, then saves
    /// them if anything differs from what is stored.
    async fn prepare_settings(&self, change: SettingsChange) -> Result<Prepared> {
        let stored = self.store.load().await?;
        let existed = self.store.exists().await?;

        let mut settings = stored.clone();
        change.apply(&mut settings);

        let validation = self.validator.validate(&settings)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }

        let generated = self.fill_credentials(&mut settings);

        let saved = if settings != stored || !existed {
            self.store.save(&settings).await?;
            true
        } else {
            debug!("Settings unchanged");
            false
        };

        Ok(Prepared {
            settings,
            saved,
            generated,
        })
    }

    /// Generates every empty credential. Existing values are never replaced.
    fn fill_credentials(&self, settings: &mut DeploymentSettings) -> Vec<String> {
        settings
            .missing_credentials()
            .into_iter()
            .map(|key| {
                info!("Generating {key}");
                settings.credentials.insert(key.to_string(), self.secrets.generate());
                key.to_string()
            })
            .collect()
    }

    async fn apply_stack(&self) -> Result<()> {
        info!("Applying stack");
        self.executor.pull().await?;
        self.executor.build().await?;
        self.executor.up().await?;
        Ok(())
    }

    /// Obtains the token and, when it changed, stores it and re-applies the
    /// documents. Returns the NetBox container id if it was found.
    async fn provision_token(
        &self,
        settings: &mut DeploymentSettings,
        report: &mut ReconciliationReport,
    ) -> Result<Option<String>> {
        let executor = self.executor;
        let found = poll(&self.container_wait, "NetBox container", |_| async move {
            executor.service_container_id(PRIMARY_SERVICE).await.ok().flatten()
        })
        .await;

        let Some(primary) = found.ready() else {
            report.token = TokenState::Deferred;
            report.defer(String::from(
                "NetBox container is not running yet; token provisioning deferred",
            ));
            return Ok(None);
        };

        match self
            .tokens
            .ensure_superuser(
                &primary,
                &settings.superuser_name,
                &settings.superuser_email,
                settings.credential(keys::NETBOX_SUPERUSER_PASSWORD),
            )
            .await
        {
            Ok(created) => report.superuser_created = created,
            Err(e) if e.is_deferrable() => debug!("Superuser check deferred: {e}"),
            Err(e) => return Err(e),
        }

        let token = self.tokens.ensure_token(&primary, TOKEN_LABEL).await;

        if token.is_empty() {
            report.token = TokenState::Deferred;
            report.defer(String::from(
                "NetBox did not answer the token lookup; Slurp'it sync stays off until the next reconcile",
            ));
            return Ok(Some(primary));
        }

        if token == settings.api_token {
            debug!("Stored token is current");
            report.token = TokenState::Reused;
            return Ok(Some(primary));
        }

        info!("Storing new API token and re-applying documents");
        settings.api_token = token;
        self.store.save(settings).await?;
        report.settings_saved = true;

        let rewrite = self.writer.write(settings, self.executor).await?;
        for path in rewrite.written {
            if !report.documents.written.contains(&path) {
                report.documents.written.push(path);
            }
        }
        report.documents.unchanged.retain(|p| !report.documents.written.contains(p));
        self.executor.up().await?;

        report.token = TokenState::Provisioned;
        Ok(Some(primary))
    }

    /// Ensures the shared network and attaches NetBox plus the Slurp'it
    /// containers to it.
    async fn reconcile_network(
        &self,
        settings: &DeploymentSettings,
        primary: Option<&str>,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let network = self.networks.ensure_shared_network(primary, SHARED_NETWORK).await?;

        let mut containers = Vec::new();
        match primary {
            Some(id) => containers.push(id.to_string()),
            None => report.defer(format!("NetBox is not attached to {SHARED_NETWORK} yet")),
        }

        for service in self.writer.dependent_services(settings).await {
            match self.executor.service_container_id(&service).await? {
                Some(id) => containers.push(id),
                None => report.defer(format!("{service} has no container yet; not attached")),
            }
        }

        let attachments = self.networks.attach(&containers, &network).await?;
        for (container, reason) in &attachments.missing {
            report.defer(format!("{container} could not be attached: {reason}"));
        }

        report.network = Some(network);
        report.attachments = Some(attachments);
        Ok(())
    }

    /// Collects the read-only status.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings or lock file cannot be read.
    pub async fn status_report(&self) -> Result<StatusReport> {
        let settings = self.store.load().await?;
        let settings_saved = self.store.exists().await?;
        let lock = self.store.get_lock_info().await?;
        let documents = self.writer.fingerprints().await;

        let (services, services_error) = match self.executor.ps().await {
            Ok(services) => (services, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };

        let reachability = match self.checker {
            Some(checker) => Some(checker.check(&format!("http://localhost:{}", settings.ui_port)).await),
            None => None,
        };

        Ok(StatusReport {
            token_stored: settings.has_token(),
            settings,
            settings_location: self.store.location(),
            settings_saved,
            documents,
            services,
            services_error,
            reachability,
            lock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{ComposeFlavor, ComposeLayout, PORTAL_SERVICE, SLURPIT_SERVICES};
    use crate::config::{MockSecretGenerator, RandomSecretGenerator, CREDENTIAL_KEYS};
    use crate::docker::DockerCli;
    use crate::error::SettingsError;
    use crate::state::EnvFileStore;
    use crate::testing::{FakeDocker, StaticFetcher, UPSTREAM_DOCUMENT};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        fake: FakeDocker,
        store: EnvFileStore,
        writer: ComposeLayerWriter,
        executor: ComposeExecutor,
        tokens: TokenProvisioner,
        networks: NetworkReconciler,
    }

    impl Fixture {
        fn new(fetcher: StaticFetcher) -> Self {
            let temp = TempDir::new().unwrap();
            let layout = ComposeLayout::new(temp.path());
            std::fs::write(layout.base(), "services:\n  netbox:\n    image: netboxcommunity/netbox\n").unwrap();

            let fake = FakeDocker::new();
            fake.add_container(PRIMARY_SERVICE, "c-netbox", &["netbox-docker_default"]);
            for service in SLURPIT_SERVICES {
                fake.add_container(service, &format!("c-{service}"), &[]);
            }
            fake.set_admin_ready(true);

            let docker = DockerCli::new(fake.runner());
            Self {
                store: EnvFileStore::with_base_dir(temp.path()),
                writer: ComposeLayerWriter::new(layout.clone(), Arc::new(fetcher)),
                executor: ComposeExecutor::new(fake.runner(), layout, ComposeFlavor::V2),
                tokens: TokenProvisioner::new(docker.clone()).with_policy(RetryPolicy::fixed(3, Duration::ZERO)),
                networks: NetworkReconciler::new(docker),
                temp,
                fake,
            }
        }

        fn reconciler<'a>(&'a self, secrets: &'a dyn SecretGenerator) -> ModeReconciler<'a, EnvFileStore> {
            ModeReconciler::new(
                &self.store,
                &self.writer,
                &self.executor,
                &self.tokens,
                &self.networks,
                secrets,
            )
            .with_container_wait(RetryPolicy::fixed(2, Duration::ZERO))
            .with_holder("test")
        }

        fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.temp.path().join(name)).unwrap()
        }

        fn exists(&self, name: &str) -> bool {
            self.temp.path().join(name).exists()
        }

        fn snapshot(&self) -> Vec<(String, String)> {
            let mut files: Vec<_> = std::fs::read_dir(self.temp.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    let body = std::fs::read_to_string(e.path()).unwrap_or_default();
                    (name, body)
                })
                .collect();
            files.sort();
            files
        }
    }

    fn reconciliation(outcome: &OperationOutcome) -> &ReconciliationReport {
        match &outcome.report {
            Some(OutcomeReport::Reconciliation(report)) => report,
            other => panic!("expected a reconciliation report, got {other:?}"),
        }
    }

    fn clean_on(port: u16) -> Operation {
        Operation::Enable {
            mode: Some(DeploymentMode::Clean),
            ui_port: Some(port),
            portal_port: None,
        }
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ReconcileStage::DocumentsWritten.to_string(), "documents-written");
        assert_eq!(
            serde_json::to_string(&ReconcileStage::NetworkVerified).unwrap(),
            "\"network-verified\""
        );
        assert!(ReconcileStage::SettingsLoaded < ReconcileStage::Reconciled);
    }

    #[test]
    fn test_operation_changes() {
        let mut settings = DeploymentSettings::default();
        Operation::Reconcile.change().apply(&mut settings);
        assert_eq!(settings, DeploymentSettings::default());

        clean_on(8081).change().apply(&mut settings);
        assert!(settings.slurpit_enabled);
        assert_eq!(settings.ui_port, 8081);

        Operation::Disable.change().apply(&mut settings);
        assert!(!settings.slurpit_enabled);
        assert_eq!(settings.ui_port, 8081);
    }

    #[tokio::test]
    async fn test_fresh_clean_install() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let secrets = RandomSecretGenerator::new();

        let outcome = f.reconciler(&secrets).run(clean_on(8081)).await;
        assert!(outcome.ok, "{}", outcome.message);

        let report = reconciliation(&outcome);
        assert_eq!(report.stage, ReconcileStage::Reconciled);
        assert_eq!(report.token, TokenState::Provisioned);
        assert!(report.is_converged(), "{:?}", report.warnings);
        assert_eq!(report.generated_credentials.len(), CREDENTIAL_KEYS.len());

        let override_doc = f.read(crate::compose::OVERRIDE_FILE);
        assert!(override_doc.contains("8081:8080"));
        assert!(override_doc.contains(PORTAL_SERVICE));

        let settings = f.store.load().await.unwrap();
        assert_eq!(settings.ui_port, 8081);
        assert!(settings.has_token());
        assert!(settings.missing_credentials().is_empty());
        assert!(override_doc.contains(&settings.api_token));

        assert_eq!(f.fake.network_creates(), 1);
        assert!(f.fake.container_networks("c-netbox").contains(&SHARED_NETWORK.to_string()));
        assert!(!f.store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let secrets = RandomSecretGenerator::new();
        let reconciler = f.reconciler(&secrets);

        assert!(reconciler.run(clean_on(8081)).await.ok);
        let before = f.snapshot();
        let creates = f.fake.network_creates();
        let connects = f.fake.network_connects();

        let outcome = reconciler.reconcile().await;
        assert!(outcome.ok, "{}", outcome.message);
        let report = reconciliation(&outcome);

        assert!(!report.documents.changed());
        assert!(!report.settings_saved);
        assert_eq!(report.token, TokenState::Reused);
        assert_eq!(f.snapshot(), before);
        assert_eq!(f.fake.network_creates(), creates);
        assert_eq!(f.fake.network_connects(), connects);
        assert_eq!(f.fake.script_runs("create-token"), 1);
    }

    #[tokio::test]
    async fn test_existing_credentials_are_not_regenerated() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let mut settings = DeploymentSettings::default();
        for key in CREDENTIAL_KEYS {
            settings.credentials.insert((*key).to_string(), format!("kept-{key}"));
        }
        f.store.save(&settings).await.unwrap();

        let mut secrets = MockSecretGenerator::new();
        secrets.expect_generate().times(0);

        let outcome = f.reconciler(&secrets).run(clean_on(8000)).await;
        assert!(outcome.ok, "{}", outcome.message);

        let stored = f.store.load().await.unwrap();
        for key in CREDENTIAL_KEYS {
            assert_eq!(stored.credential(key), format!("kept-{key}"));
        }
    }

    #[tokio::test]
    async fn test_only_empty_credentials_are_generated() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let mut settings = DeploymentSettings::default();
        settings
            .credentials
            .insert(keys::SLURPIT_MARIADB_PASSWORD.to_string(), String::from("kept"));
        f.store.save(&settings).await.unwrap();

        let mut secrets = MockSecretGenerator::new();
        secrets
            .expect_generate()
            .times(CREDENTIAL_KEYS.len() - 1)
            .returning(|| String::from("generated"));

        let outcome = f.reconciler(&secrets).run(clean_on(8000)).await;
        assert!(outcome.ok, "{}", outcome.message);

        let stored = f.store.load().await.unwrap();
        assert_eq!(stored.credential(keys::SLURPIT_MARIADB_PASSWORD), "kept");
        assert_eq!(stored.credential(keys::SLURPIT_MONGODB_PASSWORD), "generated");
    }

    #[tokio::test]
    async fn test_stored_token_is_reused() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        f.fake.set_token(TOKEN_LABEL, "existing0123");
        let mut settings = DeploymentSettings::default();
        settings.api_token = String::from("existing0123");
        f.store.save(&settings).await.unwrap();

        let secrets = RandomSecretGenerator::new();
        let outcome = f.reconciler(&secrets).run(clean_on(8000)).await;
        assert!(outcome.ok, "{}", outcome.message);

        assert_eq!(reconciliation(&outcome).token, TokenState::Reused);
        assert_eq!(f.fake.script_runs("create-token"), 0);
        assert_eq!(f.store.load().await.unwrap().api_token, "existing0123");
    }

    #[tokio::test]
    async fn test_raw_fetch_failure_leaves_documents_untouched() {
        let f = Fixture::new(StaticFetcher::failing("connection refused"));
        let secrets = RandomSecretGenerator::new();
        let reconciler = f.reconciler(&secrets);

        assert!(reconciler.run(clean_on(8000)).await.ok);
        let previous = f.read(crate::compose::OVERRIDE_FILE);

        let outcome = reconciler
            .enable(Some(DeploymentMode::UpstreamRaw), None, None)
            .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.failed_step, Some(ReconcileStage::DocumentsWritten));
        assert!(outcome.message.contains("documents-written"));
        assert_eq!(f.read(crate::compose::OVERRIDE_FILE), previous);
        assert!(!f.exists(crate::compose::RAW_PATCH_FILE));
        assert!(!f.exists(crate::compose::RAW_FILE));
        assert!(!f.store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_unready_netbox_defers_token_but_wires_network() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        f.fake.set_admin_ready(false);
        let secrets = RandomSecretGenerator::new();

        let outcome = f.reconciler(&secrets).run(clean_on(8000)).await;
        assert!(outcome.ok, "{}", outcome.message);

        let report = reconciliation(&outcome);
        assert_eq!(report.stage, ReconcileStage::Reconciled);
        assert_eq!(report.token, TokenState::Deferred);
        assert!(!report.is_converged());
        assert!(report.warnings.iter().any(|w| w.contains("token")));
        assert!(outcome.message.contains("deferred"));

        assert!(!f.store.load().await.unwrap().has_token());
        assert_eq!(f.fake.script_runs("find-token"), 3);
        assert_eq!(f.fake.network_creates(), 1);
        assert!(f.fake.container_networks("c-netbox").contains(&SHARED_NETWORK.to_string()));
    }

    #[tokio::test]
    async fn test_missing_netbox_container_is_deferred() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let fake = FakeDocker::new();
        fake.set_admin_ready(true);
        let docker = DockerCli::new(fake.runner());
        let executor = ComposeExecutor::new(fake.runner(), f.writer.layout().clone(), ComposeFlavor::V2);
        let networks = NetworkReconciler::new(docker.clone());
        let tokens = TokenProvisioner::new(docker).with_policy(RetryPolicy::fixed(1, Duration::ZERO));
        let secrets = RandomSecretGenerator::new();

        let outcome = ModeReconciler::new(&f.store, &f.writer, &executor, &tokens, &networks, &secrets)
            .with_container_wait(RetryPolicy::fixed(2, Duration::ZERO))
            .run(clean_on(8000))
            .await;

        assert!(outcome.ok, "{}", outcome.message);
        let report = reconciliation(&outcome);
        assert_eq!(report.token, TokenState::Deferred);
        assert_eq!(report.warnings.len(), 2 + SLURPIT_SERVICES.len());
        assert_eq!(fake.script_runs("find-token"), 0);
    }

    #[tokio::test]
    async fn test_switch_from_raw_to_clean_removes_raw_documents() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let secrets = RandomSecretGenerator::new();
        let reconciler = f.reconciler(&secrets);

        let outcome = reconciler.enable(Some(DeploymentMode::UpstreamRaw), None, None).await;
        assert!(outcome.ok, "{}", outcome.message);
        assert!(f.exists(crate::compose::RAW_FILE));
        assert!(f.exists(crate::compose::RAW_PATCH_FILE));
        assert!(!f.read(crate::compose::OVERRIDE_FILE).contains(PORTAL_SERVICE));

        let outcome = reconciler.enable(Some(DeploymentMode::Clean), None, None).await;
        assert!(outcome.ok, "{}", outcome.message);
        assert!(!f.exists(crate::compose::RAW_FILE));
        assert!(!f.exists(crate::compose::RAW_PATCH_FILE));

        let override_doc = f.read(crate::compose::OVERRIDE_FILE);
        assert!(override_doc.contains(PORTAL_SERVICE));
        assert!(!override_doc.contains(crate::compose::RAW_FILE));
    }

    #[tokio::test]
    async fn test_disable_drops_slurpit() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let secrets = RandomSecretGenerator::new();
        let reconciler = f.reconciler(&secrets);

        assert!(reconciler.run(clean_on(8000)).await.ok);
        let connects = f.fake.network_connects();

        let outcome = reconciler.disable().await;
        assert!(outcome.ok, "{}", outcome.message);

        let report = reconciliation(&outcome);
        assert!(!report.enabled);
        assert_eq!(report.token, TokenState::NotRequired);
        assert!(report.network.is_none());
        assert!(!f.read(crate::compose::OVERRIDE_FILE).contains(PORTAL_SERVICE));
        assert!(!f.store.load().await.unwrap().slurpit_enabled);
        assert_eq!(f.fake.network_connects(), connects);
        assert!(f.fake.compose_calls("up").last().unwrap().args.iter().any(|a| a == "--remove-orphans"));
    }

    #[tokio::test]
    async fn test_failed_up_names_the_step() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        f.fake.fail_compose("up", "port is already allocated");
        let secrets = RandomSecretGenerator::new();

        let outcome = f.reconciler(&secrets).run(clean_on(8000)).await;

        assert!(!outcome.ok);
        assert_eq!(outcome.failed_step, Some(ReconcileStage::StackApplied));
        assert!(outcome.message.contains("port is already allocated"));
        assert_eq!(f.fake.script_runs("find-token"), 0);
    }

    #[tokio::test]
    async fn test_held_lock_blocks_mutation() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let other = f.store.acquire_lock("other-run").await.unwrap();
        let secrets = RandomSecretGenerator::new();

        let err = f.reconciler(&secrets).apply(SettingsChange::default()).await.unwrap_err();
        assert!(matches!(err, ManagerError::Settings(SettingsError::LockedByOther { .. })));
        assert!(f.fake.compose_calls("up").is_empty());

        f.store.release_lock(&other.lock_id).await.unwrap();
        assert!(f.reconciler(&secrets).reconcile().await.ok);
    }

    #[tokio::test]
    async fn test_status_is_read_only() {
        let f = Fixture::new(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let mut secrets = MockSecretGenerator::new();
        secrets.expect_generate().times(0);

        let outcome = f.reconciler(&secrets).status().await;
        assert!(outcome.ok, "{}", outcome.message);

        let Some(OutcomeReport::Status(status)) = &outcome.report else {
            panic!("expected a status report");
        };
        assert!(!status.settings_saved);
        assert!(!status.token_stored);
        assert_eq!(status.services.len(), 1 + SLURPIT_SERVICES.len());
        assert!(status.reachability.is_none());
        assert!(!f.exists(crate::config::SETTINGS_FILE));
        assert!(!f.exists(crate::compose::OVERRIDE_FILE));
        assert!(f.fake.compose_calls("up").is_empty());
        assert!(f.fake.compose_calls("config").is_empty());
    }
}
