//! Runtime configuration: where the secret and index salt come from.

use crate::blind_index::LookupHasher;
use crate::error::Error;
use crate::kdf::KeyMaterial;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Environment variable holding the long-lived encryption secret.
pub const SECRET_ENV: &str = "VITALVAULT_SECRET";

/// Environment variable overriding the built-in lookup index salt.
pub const INDEX_SALT_ENV: &str = "VITALVAULT_INDEX_SALT";

/// Secrets needed to open a vault.
///
/// ```
/// use vitalvault::config::VaultConfig;
///
/// let config = VaultConfig::new("correct horse battery staple");
/// let key = config.key_material().unwrap();
/// ```
pub struct VaultConfig {
    secret: SecretString,
    index_salt: Option<SecretString>,
}

impl VaultConfig {
    /// Creates a configuration with the default index salt.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            index_salt: None,
        }
    }

    /// Overrides the lookup index salt.
    ///
    /// Every digest already stored was computed under the previous salt;
    /// changing it breaks search and duplicate detection for existing rows.
    #[must_use]
    pub fn with_index_salt(mut self, salt: impl Into<String>) -> Self {
        self.index_salt = Some(SecretString::new(salt.into()));
        self
    }

    /// Reads [`SECRET_ENV`] and, if set, [`INDEX_SALT_ENV`].
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the secret is unset or empty; no
    /// fallback secret exists.
    pub fn from_env() -> Result<Self, Error> {
        let secret = std::env::var(SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::KeyDerivation(format!("{SECRET_ENV} is not set")))?;

        let mut config = Self::new(secret);
        if let Some(salt) = std::env::var(INDEX_SALT_ENV).ok().filter(|s| !s.is_empty()) {
            config = config.with_index_salt(salt);
        }
        Ok(config)
    }

    /// Derives the process key. Call once and share the result.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the secret is unusable.
    pub fn key_material(&self) -> Result<Arc<KeyMaterial>, Error> {
        let key = KeyMaterial::derive(self.secret.expose_secret())?;
        tracing::info!("field encryption key derived");
        Ok(Arc::new(key))
    }

    /// Builds the lookup hasher for the configured salt.
    #[must_use]
    pub fn lookup_hasher(&self) -> LookupHasher {
        self.index_salt
            .as_ref()
            .map_or_else(LookupHasher::default, |salt| LookupHasher::new(salt.expose_secret()))
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("secret", &"[REDACTED]")
            .field("index_salt", &self.index_salt.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::IndexContext;

    #[test]
    fn test_key_material_from_config() {
        let config = VaultConfig::new("config-test-secret-001");
        assert!(config.key_material().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = VaultConfig::new("tiny");
        assert!(matches!(config.key_material(), Err(Error::KeyDerivation(_))));
    }

    #[test]
    fn test_index_salt_override() {
        let context = IndexContext::new("patients", "legal_id");
        let default = VaultConfig::new("config-test-secret-001").lookup_hasher();
        let salted =
            VaultConfig::new("config-test-secret-001").with_index_salt("site-salt").lookup_hasher();

        assert_ne!(default.digest("V-1", &context), salted.digest("V-1", &context));
    }

    #[test]
    fn test_debug_redacts() {
        let config = VaultConfig::new("config-test-secret-001").with_index_salt("site-salt");
        let debug = format!("{config:?}");

        assert!(!debug.contains("config-test-secret-001"));
        assert!(!debug.contains("site-salt"));
    }
}
