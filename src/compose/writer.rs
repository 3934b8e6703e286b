//! Compose layer writer.
//!
//! Derives every generated file from the settings, then commits them in a
//! fixed order and asks Compose to resolve the result. Everything that can
//! fail without touching the disk (rendering, fetching the upstream
//! document) happens first, so a failed fetch leaves the previous override
//! in place. If Compose rejects the new set, every file touched is restored.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::executor::ComposeExecutor;
use super::fetch::UpstreamFetcher;
use super::hash::DocumentHasher;
use super::layout::{ComposeLayout, PLUGIN_CONFIG, PLUGIN_DOCKERFILE, PLUGIN_REQUIREMENTS};
use super::model::ComposeDocument;
use super::templates::{self, MANAGED_HEADER, PORTAL_SERVICE, SLURPIT_SERVICES};
use crate::config::{DeploymentMode, DeploymentSettings};
use crate::error::{ComposeError, Result};

/// What a write changed on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Mode the documents were rendered for; `None` when Slurp'it is disabled.
    pub mode: Option<DeploymentMode>,
    /// Files whose content changed.
    pub written: Vec<PathBuf>,
    /// Files already up to date.
    pub unchanged: Vec<PathBuf>,
    /// Stale files removed.
    pub removed: Vec<PathBuf>,
    /// Host directories created for bind mounts.
    pub created_dirs: Vec<PathBuf>,
}

impl WriteReport {
    /// Whether anything on disk changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.written.is_empty() || !self.removed.is_empty() || !self.created_dirs.is_empty()
    }
}

/// Fingerprint of an active document, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFingerprint {
    /// Document path.
    pub path: PathBuf,
    /// Short content hash, `None` if unreadable.
    pub hash: Option<String>,
}

struct PlannedFile {
    path: PathBuf,
    content: String,
}

#[derive(Default)]
struct Plan {
    files: Vec<PlannedFile>,
    dirs: Vec<PathBuf>,
    remove: Vec<PathBuf>,
}

/// Previous content of a touched file; `None` if it did not exist.
type Snapshot = (PathBuf, Option<String>);

/// Writes the layered Compose documents for a settings value.
#[derive(Clone)]
pub struct ComposeLayerWriter {
    layout: ComposeLayout,
    fetcher: Arc<dyn UpstreamFetcher>,
    hasher: DocumentHasher,
}

impl std::fmt::Debug for ComposeLayerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeLayerWriter")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl ComposeLayerWriter {
    /// Creates a writer for a project layout.
    #[must_use]
    pub fn new(layout: ComposeLayout, fetcher: Arc<dyn UpstreamFetcher>) -> Self {
        Self {
            layout,
            fetcher,
            hasher: DocumentHasher::new(),
        }
    }

    /// The project layout.
    #[must_use]
    pub const fn layout(&self) -> &ComposeLayout {
        &self.layout
    }

    /// Renders, commits and validates the documents for `settings`.
    ///
    /// # Errors
    ///
    /// - [`ComposeError::MissingBaseDocument`] if netbox-docker is not there
    /// - [`ComposeError::FetchFailed`] / [`ComposeError::UpstreamInvalid`]
    ///   in `upstream-raw`, before anything is written
    /// - [`ComposeError::ResolutionFailed`] after restoring previous contents
    pub async fn write(&self, settings: &DeploymentSettings, executor: &ComposeExecutor) -> Result<WriteReport> {
        let plan = self.plan(settings).await?;

        let mut report = WriteReport {
            mode: settings.slurpit_enabled.then_some(settings.mode),
            ..WriteReport::default()
        };
        let mut snapshots = Vec::new();

        if let Err(e) = self.commit(plan, &mut snapshots, &mut report).await {
            self.rollback(&snapshots).await;
            return Err(e);
        }

        if let Err(e) = executor.resolve().await {
            let document = report
                .written
                .last()
                .or_else(|| report.removed.last())
                .cloned()
                .unwrap_or_else(|| self.layout.override_file());
            warn!("Compose rejected the documents, restoring previous contents");
            self.rollback(&snapshots).await;
            return Err(ComposeError::ResolutionFailed {
                document,
                message: e.to_string(),
            }
            .into());
        }

        info!(
            "Documents: {} written, {} unchanged, {} removed",
            report.written.len(),
            report.unchanged.len(),
            report.removed.len()
        );
        Ok(report)
    }

    /// Services that belong to the Slurp'it stack under the current documents.
    ///
    /// For `upstream-raw` these come from the fetched document on disk.
    pub async fn dependent_services(&self, settings: &DeploymentSettings) -> Vec<String> {
        if !settings.slurpit_enabled {
            return Vec::new();
        }

        if settings.mode.inlines_services() {
            return SLURPIT_SERVICES.iter().map(|s| (*s).to_string()).collect();
        }

        let path = self.layout.raw_file();
        match fs::read_to_string(&path).await {
            Ok(body) => upstream_services(&body, &path.display().to_string()).unwrap_or_else(|e| {
                warn!("{e}");
                Vec::new()
            }),
            Err(e) => {
                warn!("Cannot read {}: {e}", path.display());
                Vec::new()
            }
        }
    }

    /// Fingerprints of the documents Compose currently layers.
    pub async fn fingerprints(&self) -> Vec<DocumentFingerprint> {
        let mut out = Vec::new();
        for path in self.layout.active_files() {
            let hash = self
                .hasher
                .hash_file(&path)
                .await
                .map(|h| self.hasher.short_hash(&h));
            out.push(DocumentFingerprint { path, hash });
        }
        out
    }

    async fn plan(&self, settings: &DeploymentSettings) -> Result<Plan> {
        let base = self.layout.base();
        if !base.exists() {
            return Err(ComposeError::MissingBaseDocument { path: base }.into());
        }

        let mut plan = Plan::default();
        let mut primary = templates::primary_override(settings);
        let mut raw_pair = None;

        if settings.slurpit_enabled {
            match settings.mode {
                DeploymentMode::Clean => primary.merge(templates::clean_services(settings)),
                DeploymentMode::UpstreamExact => {
                    primary.merge(templates::exact_services(settings));
                    plan.dirs = templates::EXACT_HOST_DIRS
                        .iter()
                        .map(|d| self.layout.path(d))
                        .collect();
                }
                DeploymentMode::UpstreamRaw => {
                    let url = &settings.upstream_compose_url;
                    let body = self.fetcher.fetch(url).await?;
                    let services = upstream_services(&body, url)?;
                    debug!("Upstream document defines: {}", services.join(", "));
                    raw_pair = Some((body, templates::raw_patch(settings, &services)));
                }
            }
        }

        plan.files.push(PlannedFile {
            path: self.layout.override_file(),
            content: render(&primary, "docker-compose.override.yml")?,
        });
        plan.files.push(PlannedFile {
            path: self.layout.path(PLUGIN_DOCKERFILE),
            content: templates::plugin_dockerfile(),
        });
        plan.files.push(PlannedFile {
            path: self.layout.path(PLUGIN_REQUIREMENTS),
            content: templates::plugin_requirements(),
        });
        plan.files.push(PlannedFile {
            path: self.layout.path(PLUGIN_CONFIG),
            content: templates::plugin_config(settings.slurpit_enabled),
        });

        match raw_pair {
            Some((body, patch)) => {
                plan.files.push(PlannedFile {
                    path: self.layout.raw_file(),
                    content: body,
                });
                plan.files.push(PlannedFile {
                    path: self.layout.raw_patch_file(),
                    content: render(&patch, "docker-compose.slurpit.override.yml")?,
                });
            }
            None => plan.remove = vec![self.layout.raw_file(), self.layout.raw_patch_file()],
        }

        Ok(plan)
    }

    async fn commit(&self, plan: Plan, snapshots: &mut Vec<Snapshot>, report: &mut WriteReport) -> Result<()> {
        for file in plan.files {
            let previous = read_optional(&file.path).await?;
            let private = self.is_private(&file.path);
            let unchanged = previous
                .as_deref()
                .is_some_and(|p| self.hasher.hash_str(p) == self.hasher.hash_str(&file.content));

            if unchanged {
                if private {
                    restrict_permissions(&file.path).await?;
                }
                debug!("Unchanged: {}", file.path.display());
                report.unchanged.push(file.path);
                continue;
            }

            if let Some(parent) = file.path.parent() {
                fs::create_dir_all(parent).await?;
            }
            snapshots.push((file.path.clone(), previous));
            write_document(&file.path, &file.content, private).await?;
            info!("Wrote {}", file.path.display());
            report.written.push(file.path);
        }

        for dir in plan.dirs {
            if !dir.exists() {
                fs::create_dir_all(&dir).await?;
                debug!("Created {}", dir.display());
                report.created_dirs.push(dir);
            }
        }

        for path in plan.remove {
            if let Some(previous) = read_optional(&path).await? {
                snapshots.push((path.clone(), Some(previous)));
                fs::remove_file(&path).await?;
                info!("Removed {}", path.display());
                report.removed.push(path);
            }
        }

        Ok(())
    }

    /// Documents that carry credentials or the API token.
    fn is_private(&self, path: &Path) -> bool {
        path == self.layout.override_file() || path == self.layout.raw_patch_file()
    }

    async fn rollback(&self, snapshots: &[Snapshot]) {
        for (path, previous) in snapshots.iter().rev() {
            let result = match previous {
                Some(content) => write_document(path, content, self.is_private(path)).await,
                None => fs::remove_file(path).await,
            };
            match result {
                Ok(()) => debug!("Restored {}", path.display()),
                Err(e) => warn!("Failed to restore {}: {e}", path.display()),
            }
        }
    }
}

/// Service names of an upstream document, which must define the portal.
fn upstream_services(body: &str, source: &str) -> std::result::Result<Vec<String>, ComposeError> {
    let invalid = |message: String| ComposeError::UpstreamInvalid {
        url: source.to_string(),
        message,
    };

    let value: serde_yaml::Value = serde_yaml::from_str(body).map_err(|e| invalid(e.to_string()))?;
    let services = value
        .get("services")
        .and_then(serde_yaml::Value::as_mapping)
        .ok_or_else(|| invalid(String::from("no 'services' map")))?;

    let names: Vec<String> = services
        .keys()
        .filter_map(serde_yaml::Value::as_str)
        .map(str::to_string)
        .collect();

    if !names.iter().any(|n| n == PORTAL_SERVICE) {
        return Err(invalid(format!("service '{PORTAL_SERVICE}' is not defined")));
    }

    Ok(names)
}

fn render(doc: &ComposeDocument, document: &str) -> Result<String> {
    doc.to_yaml(MANAGED_HEADER).map_err(|message| {
        ComposeError::Render {
            document: document.to_string(),
            message,
        }
        .into()
    })
}

/// Writes a document in place. Private documents are readable by the owner only.
async fn write_document(path: &Path, content: &str, private: bool) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        options.mode(0o600);
    }

    let mut file = options.open(path).await?;
    if private {
        restrict_permissions(path).await?;
    }
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

/// Narrows an existing file to owner read/write.
#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let current = fs::metadata(path).await?.permissions();
    if current.mode() & 0o777 != 0o600 {
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{ComposeFlavor, PRIMARY_SERVICE};
    use crate::error::ManagerError;
    use crate::testing::{FakeDocker, StaticFetcher, UPSTREAM_DOCUMENT};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        fake: FakeDocker,
        fetcher: Arc<StaticFetcher>,
        writer: ComposeLayerWriter,
        executor: ComposeExecutor,
    }

    fn fixture(fetcher: StaticFetcher) -> Fixture {
        let temp = TempDir::new().unwrap();
        let layout = ComposeLayout::new(temp.path());
        std::fs::write(layout.base(), "services:\n  netbox:\n    image: netboxcommunity/netbox\n").unwrap();

        let fake = FakeDocker::new();
        let fetcher = Arc::new(fetcher);
        let writer = ComposeLayerWriter::new(layout.clone(), fetcher.clone());
        let executor = ComposeExecutor::new(fake.runner(), layout, ComposeFlavor::V2);

        Fixture {
            _temp: temp,
            fake,
            fetcher,
            writer,
            executor,
        }
    }

    fn enabled(mode: DeploymentMode) -> DeploymentSettings {
        let mut settings = DeploymentSettings::default();
        settings.slurpit_enabled = true;
        settings.mode = mode;
        settings
    }

    fn read_override(f: &Fixture) -> ComposeDocument {
        let text = std::fs::read_to_string(f.writer.layout().override_file()).unwrap();
        serde_yaml::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_clean_mode_inlines_services() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let report = f.writer.write(&enabled(DeploymentMode::Clean), &f.executor).await.unwrap();

        assert!(report.changed());
        assert_eq!(report.mode, Some(DeploymentMode::Clean));
        let doc = read_override(&f);
        assert!(doc.services.contains_key(PRIMARY_SERVICE));
        assert!(doc.services.contains_key(PORTAL_SERVICE));
        assert!(!f.writer.layout().raw_file().exists());
        assert_eq!(f.fetcher.calls(), 0);
        assert_eq!(f.fake.compose_calls("config").len(), 1);
    }

    #[tokio::test]
    async fn test_second_write_is_a_no_op() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let settings = enabled(DeploymentMode::UpstreamExact);

        f.writer.write(&settings, &f.executor).await.unwrap();
        let second = f.writer.write(&settings, &f.executor).await.unwrap();

        assert!(!second.changed());
        assert_eq!(second.unchanged.len(), 4);
    }

    #[tokio::test]
    async fn test_exact_mode_creates_bind_mount_dirs() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let report = f
            .writer
            .write(&enabled(DeploymentMode::UpstreamExact), &f.executor)
            .await
            .unwrap();

        assert_eq!(report.created_dirs.len(), templates::EXACT_HOST_DIRS.len());
        assert!(f.writer.layout().path("slurpit/db/mariadb").is_dir());
        let doc = read_override(&f);
        assert_eq!(doc.services[PORTAL_SERVICE].container_name.as_deref(), Some(PORTAL_SERVICE));
    }

    #[tokio::test]
    async fn test_raw_mode_writes_pair_and_switch_cleans_up() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let layout = f.writer.layout().clone();

        f.writer.write(&enabled(DeploymentMode::UpstreamRaw), &f.executor).await.unwrap();
        assert_eq!(std::fs::read_to_string(layout.raw_file()).unwrap(), UPSTREAM_DOCUMENT);
        let patch: ComposeDocument =
            serde_yaml::from_str(&std::fs::read_to_string(layout.raw_patch_file()).unwrap()).unwrap();
        assert_eq!(patch.services[PORTAL_SERVICE].ports, vec!["8880:80"]);
        assert!(!read_override(&f).services.contains_key(PORTAL_SERVICE));

        let report = f.writer.write(&enabled(DeploymentMode::Clean), &f.executor).await.unwrap();
        assert_eq!(report.removed, vec![layout.raw_file(), layout.raw_patch_file()]);
        assert!(!layout.raw_file().exists());
        assert!(!layout.raw_patch_file().exists());
    }

    #[tokio::test]
    async fn test_failed_fetch_touches_nothing() {
        let f = fixture(StaticFetcher::failing("connection refused"));
        let layout = f.writer.layout().clone();
        std::fs::write(layout.override_file(), "# previous\n").unwrap();

        let err = f
            .writer
            .write(&enabled(DeploymentMode::UpstreamRaw), &f.executor)
            .await
            .unwrap_err();

        assert!(matches!(err, ManagerError::Compose(ComposeError::FetchFailed { .. })));
        assert_eq!(std::fs::read_to_string(layout.override_file()).unwrap(), "# previous\n");
        assert!(!layout.raw_patch_file().exists());
        assert!(!layout.raw_file().exists());
        assert!(f.fake.compose_calls("config").is_empty());
    }

    #[tokio::test]
    async fn test_upstream_without_portal_is_invalid() {
        let f = fixture(StaticFetcher::ok("services:\n  other:\n    image: x\n"));
        let err = f
            .writer
            .write(&enabled(DeploymentMode::UpstreamRaw), &f.executor)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Compose(ComposeError::UpstreamInvalid { .. })));

        let f = fixture(StaticFetcher::ok("<html>not yaml: [</html>"));
        let err = f
            .writer
            .write(&enabled(DeploymentMode::UpstreamRaw), &f.executor)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Compose(ComposeError::UpstreamInvalid { .. })));
    }

    #[tokio::test]
    async fn test_resolution_failure_restores_previous_contents() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let layout = f.writer.layout().clone();
        std::fs::write(layout.override_file(), "# previous\n").unwrap();
        f.fake.fail_resolve("services.netbox.ports must be a list");

        let err = f
            .writer
            .write(&enabled(DeploymentMode::UpstreamRaw), &f.executor)
            .await
            .unwrap_err();

        match err {
            ManagerError::Compose(ComposeError::ResolutionFailed { document, message }) => {
                assert_eq!(document, layout.raw_patch_file());
                assert!(message.contains("must be a list"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_to_string(layout.override_file()).unwrap(), "# previous\n");
        assert!(!layout.raw_file().exists());
        assert!(!layout.path(PLUGIN_DOCKERFILE).exists());
    }

    #[cfg(unix)]
    fn file_mode(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_documents_with_credentials_are_private() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let layout = f.writer.layout().clone();
        let mut settings = enabled(DeploymentMode::Clean);
        settings
            .credentials
            .insert(crate::config::keys::SLURPIT_MARIADB_PASSWORD.to_string(), String::from("topsecret"));

        f.writer.write(&settings, &f.executor).await.unwrap();
        assert!(std::fs::read_to_string(layout.override_file()).unwrap().contains("topsecret"));
        assert_eq!(file_mode(&layout.override_file()), 0o600);

        settings.mode = DeploymentMode::UpstreamRaw;
        settings.api_token = String::from("abc123");
        f.writer.write(&settings, &f.executor).await.unwrap();
        assert!(std::fs::read_to_string(layout.raw_patch_file()).unwrap().contains("abc123"));
        assert_eq!(file_mode(&layout.raw_patch_file()), 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_override_is_narrowed_even_when_unchanged() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let layout = f.writer.layout().clone();
        let settings = enabled(DeploymentMode::Clean);

        f.writer.write(&settings, &f.executor).await.unwrap();
        std::fs::set_permissions(layout.override_file(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let report = f.writer.write(&settings, &f.executor).await.unwrap();
        assert!(report.unchanged.contains(&layout.override_file()));
        assert_eq!(file_mode(&layout.override_file()), 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restored_override_stays_private() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let layout = f.writer.layout().clone();
        f.writer.write(&enabled(DeploymentMode::Clean), &f.executor).await.unwrap();
        let previous = std::fs::read_to_string(layout.override_file()).unwrap();

        f.fake.fail_resolve("bad port");
        let mut settings = enabled(DeploymentMode::Clean);
        settings.ui_port = 9000;
        f.writer.write(&settings, &f.executor).await.unwrap_err();

        assert_eq!(std::fs::read_to_string(layout.override_file()).unwrap(), previous);
        assert_eq!(file_mode(&layout.override_file()), 0o600);
    }

    #[tokio::test]
    async fn test_disabled_writes_primary_only() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let mut settings = enabled(DeploymentMode::Clean);
        settings.slurpit_enabled = false;

        let report = f.writer.write(&settings, &f.executor).await.unwrap();
        assert_eq!(report.mode, None);

        let doc = read_override(&f);
        assert_eq!(doc.services.len(), templates::PRIMARY_SERVICES.len());
        let plugins = std::fs::read_to_string(f.writer.layout().path(PLUGIN_CONFIG)).unwrap();
        assert!(plugins.contains("PLUGINS = []"));
        assert!(f.writer.dependent_services(&settings).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_base_document() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        std::fs::remove_file(f.writer.layout().base()).unwrap();

        let err = f
            .writer
            .write(&enabled(DeploymentMode::Clean), &f.executor)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Compose(ComposeError::MissingBaseDocument { .. })));
        assert!(!f.writer.layout().override_file().exists());
    }

    #[tokio::test]
    async fn test_dependent_services_follow_mode() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        let raw = enabled(DeploymentMode::UpstreamRaw);
        f.writer.write(&raw, &f.executor).await.unwrap();

        let services = f.writer.dependent_services(&raw).await;
        assert!(services.contains(&String::from(PORTAL_SERVICE)));
        assert!(services.contains(&String::from("slurpit-warehouse")));

        let clean = f.writer.dependent_services(&enabled(DeploymentMode::Clean)).await;
        assert_eq!(clean.len(), SLURPIT_SERVICES.len());
    }

    #[tokio::test]
    async fn test_fingerprints_cover_active_files() {
        let f = fixture(StaticFetcher::ok(UPSTREAM_DOCUMENT));
        f.writer.write(&enabled(DeploymentMode::UpstreamRaw), &f.executor).await.unwrap();

        let prints = f.writer.fingerprints().await;
        assert_eq!(prints.len(), 4);
        assert!(prints.iter().all(|p| p.hash.as_ref().is_some_and(|h| h.len() == 8)));
    }
}
