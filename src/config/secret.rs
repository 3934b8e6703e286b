//! Credential generation.

use rand::RngCore;
use rand::rngs::OsRng;

/// Random bytes drawn per credential, before hex encoding.
pub const SECRET_BYTES: usize = 32;

/// Source of new credentials.
///
/// Callers only ask for a value when none is stored yet; the trait exists so
/// that promise can be checked in tests.
#[cfg_attr(test, mockall::automock)]
pub trait SecretGenerator: Send + Sync {
    /// Returns a fresh credential made only of `[0-9a-f]`.
    fn generate(&self) -> String;
}

/// CSPRNG-backed generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSecretGenerator;

impl RandomSecretGenerator {
    /// Creates a new generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SecretGenerator for RandomSecretGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
