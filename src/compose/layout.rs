//! File layout of a netbox-docker directory.

use std::path::{Path, PathBuf};

/// Base document owned by netbox-docker.
pub const BASE_FILE: &str = "docker-compose.yml";
/// Primary override written on every run.
pub const OVERRIDE_FILE: &str = "docker-compose.override.yml";
/// Fetched upstream Slurp'it document (`upstream-raw` only).
pub const RAW_FILE: &str = "docker-compose.slurpit.yml";
/// Patch layered over the fetched document (`upstream-raw` only).
pub const RAW_PATCH_FILE: &str = "docker-compose.slurpit.override.yml";
/// Dockerfile for the plugin-enabled NetBox image.
pub const PLUGIN_DOCKERFILE: &str = "Dockerfile-Plugins";
/// Python requirements installed into the plugin image.
pub const PLUGIN_REQUIREMENTS: &str = "plugin_requirements.txt";
/// NetBox plugin configuration.
pub const PLUGIN_CONFIG: &str = "configuration/plugins.py";
/// Root of the `upstream-exact` bind mounts.
pub const SLURPIT_DATA_DIR: &str = "slurpit";

/// Paths of every document the manager reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeLayout {
    dir: PathBuf,
}

impl ComposeLayout {
    /// Layout rooted at a netbox-docker directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The project directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Base document.
    #[must_use]
    pub fn base(&self) -> PathBuf {
        self.dir.join(BASE_FILE)
    }

    /// Primary override.
    #[must_use]
    pub fn override_file(&self) -> PathBuf {
        self.dir.join(OVERRIDE_FILE)
    }

    /// Fetched upstream document.
    #[must_use]
    pub fn raw_file(&self) -> PathBuf {
        self.dir.join(RAW_FILE)
    }

    /// Patch over the fetched document.
    #[must_use]
    pub fn raw_patch_file(&self) -> PathBuf {
        self.dir.join(RAW_PATCH_FILE)
    }

    /// Any path relative to the project directory.
    #[must_use]
    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.join(relative)
    }

    /// Documents passed to Compose with `-f`, in layering order.
    ///
    /// Decided from what is on disk right now: the override only if it
    /// exists, the raw pair only if both halves exist.
    #[must_use]
    pub fn active_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.base()];

        let override_file = self.override_file();
        if override_file.exists() {
            files.push(override_file);
        }

        let raw = self.raw_file();
        let patch = self.raw_patch_file();
        if raw.exists() && patch.exists() {
            files.push(raw);
            files.push(patch);
        }

        files
    }
}
