//! Settings store trait definition.
//!
//! This module defines the interface the reconciler uses to load and save
//! deployment settings and to hold the advisory lock.

use async_trait::async_trait;

use crate::config::DeploymentSettings;
use crate::error::Result;

use super::lock::LockInfo;

/// Trait for settings storage backends.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Loads the settings, applying defaults when nothing is stored yet.
    async fn load(&self) -> Result<DeploymentSettings>;

    /// Saves the settings, replacing whatever was stored.
    async fn save(&self, settings: &DeploymentSettings) -> Result<()>;

    /// Checks if settings have been saved before.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the advisory lock.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the advisory lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks whether an unexpired lock is held.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self.get_lock_info().await?.is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend location for display.
    fn location(&self) -> String;
}
