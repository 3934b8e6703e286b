//! Env-file settings storage backend.
//!
//! Settings live in `.netbox-manager.env` inside the netbox-docker
//! directory. Saves go through a temp file and a rename so a crash never
//! leaves a half-written file behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::{self, DeploymentSettings, SETTINGS_FILE};
use crate::error::{Result, SettingsError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS, LOCK_FILE};
use super::store::SettingsStore;

/// netbox-docker's own env file, used to seed superuser defaults.
const NETBOX_ENV_FILE: &str = "env/netbox.env";

/// Settings store backed by an env-style file.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    /// netbox-docker working directory.
    base_dir: PathBuf,
    /// Path to the settings file.
    settings_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl EnvFileStore {
    /// Creates a store rooted at a netbox-docker directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let settings_path = base_dir.join(SETTINGS_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            settings_path,
            lock_path,
        }
    }

    /// Path to the settings file.
    #[must_use]
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Defaults for a first run, seeded from netbox-docker's env file.
    fn seeded_defaults(&self) -> DeploymentSettings {
        let mut settings = DeploymentSettings::default();
        let env_path = self.base_dir.join(NETBOX_ENV_FILE);

        if !env_path.exists() {
            return settings;
        }

        match dotenvy::from_path_iter(&env_path) {
            Ok(iter) => {
                for (key, value) in iter.filter_map(std::result::Result::ok) {
                    match key.as_str() {
                        "SUPERUSER_NAME" if !value.is_empty() => settings.superuser_name = value,
                        "SUPERUSER_EMAIL" if !value.is_empty() => settings.superuser_email = value,
                        _ => {}
                    }
                }
                debug!("Seeded superuser defaults from {}", env_path.display());
            }
            Err(e) => warn!("Ignoring unreadable {}: {e}", env_path.display()),
        }

        settings
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| SettingsError::Corrupted {
            message: format!("Failed to read lock file: {e}"),
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| SettingsError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        })?;

        Ok(Some(lock_info))
    }

    /// Writes a file through a temp sibling and an atomic rename.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| SettingsError::write(format!("Failed to create {}: {e}", self.base_dir.display())))?;
        }

        let temp_path = temp_path_for(path);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&temp_path)
            .await
            .map_err(|e| SettingsError::write(format!("Failed to create {}: {e}", temp_path.display())))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| SettingsError::write(format!("Failed to write {}: {e}", temp_path.display())))?;

        file.sync_all()
            .await
            .map_err(|e| SettingsError::write(format!("Failed to sync {}: {e}", temp_path.display())))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| SettingsError::write(format!("Failed to replace {}: {e}", path.display())))?;

        Ok(())
    }
}

/// Temp sibling used while writing `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl SettingsStore for EnvFileStore {
    async fn load(&self) -> Result<DeploymentSettings> {
        if !self.settings_path.exists() {
            debug!("Settings file does not exist: {}", self.settings_path.display());
            return Ok(self.seeded_defaults());
        }

        debug!("Loading settings from: {}", self.settings_path.display());

        let content = fs::read_to_string(&self.settings_path).await.map_err(|e| SettingsError::Corrupted {
            message: format!("Failed to read {}: {e}", self.settings_path.display()),
        })?;

        let pairs = config::parse_env(&content, &self.settings_path)?;
        Ok(DeploymentSettings::from_pairs(pairs)?)
    }

    async fn save(&self, settings: &DeploymentSettings) -> Result<()> {
        info!("Saving settings to: {}", self.settings_path.display());

        let content = config::render_env(&settings.to_pairs());
        self.write_atomic(&self.settings_path, &content).await?;

        debug!(
            "Settings saved (mode={}, token {})",
            settings.mode,
            if settings.api_token.is_empty() { "unset" } else { "set" }
        );
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.settings_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(SettingsError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock held by {} found, taking over", existing.holder);
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| SettingsError::Serialization {
            message: format!("Failed to serialize lock: {e}"),
        })?;

        self.write_atomic(&self.lock_path, &content)
            .await
            .map_err(|e| SettingsError::LockFailed { message: e.to_string() })?;

        debug!(
            "Acquired lock {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                fs::remove_file(&self.lock_path).await.map_err(|e| SettingsError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })?;
                debug!("Released lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn location(&self) -> String {
        self.settings_path.display().to_string()
    }
}
