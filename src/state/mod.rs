//! Settings persistence for the NetBox manager.
//!
//! This module provides the settings store used at the edges of every
//! operation, plus the advisory lock that serializes mutating runs.

mod local;
mod lock;
mod store;

pub use local::EnvFileStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS, LOCK_FILE};
pub use store::SettingsStore;
