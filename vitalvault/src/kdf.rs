//! Key derivation using HKDF (HMAC-based Key Derivation Function).
//!
//! The whole store runs under one symmetric key derived from a long-lived
//! secret. Derivation is deterministic so that data written by an earlier
//! process stays readable after a restart.

use crate::error::Error;
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;
use std::fmt;

/// Field key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LEN: usize = 16;

/// Fixed HKDF salt. Changing it makes every stored ciphertext unreadable.
const KDF_SALT: &[u8] = b"vitalvault.field-key.salt.v1";

/// HKDF info string for the field encryption key.
const KDF_INFO: &[u8] = b"vitalvault|field-encryption|v1";

/// The symmetric key used for all field encryption in a process.
///
/// Built once at startup and shared behind an `Arc`; it is never mutated
/// after derivation and its bytes never appear in `Debug` output.
///
/// # Example
///
/// ```
/// use vitalvault::kdf::KeyMaterial;
///
/// let key = KeyMaterial::derive("correct horse battery staple").expect("derivation failed");
/// assert_eq!(format!("{key:?}"), "KeyMaterial { key: \"[REDACTED]\" }");
/// ```
pub struct KeyMaterial {
    key: SecretVec<u8>,
}

impl KeyMaterial {
    /// Derives the field key from `secret`.
    ///
    /// The derivation is `HKDF-SHA256(salt = KDF_SALT, ikm = secret, info = KDF_INFO)`
    /// expanded to [`KEY_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes or the expansion fails.
    pub fn derive(secret: &str) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::KeyDerivation(format!(
                "secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), secret.as_bytes());

        let mut key = vec![0u8; KEY_SIZE];
        hkdf.expand(KDF_INFO, &mut key)
            .map_err(|_| Error::KeyDerivation("HKDF expand failed".to_string()))?;

        Ok(Self {
            key: SecretVec::new(key),
        })
    }

    /// Derives the field key from an optional secret.
    ///
    /// A missing secret is a hard failure: there is no built-in fallback.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if `secret` is `None` or unusable.
    pub fn derive_required(secret: Option<&str>) -> Result<Self, Error> {
        match secret {
            Some(secret) => Self::derive(secret),
            None => Err(Error::KeyDerivation("no secret configured".to_string())),
        }
    }

    pub(crate) fn expose(&self) -> &[u8] {
        self.key.expose_secret()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial").field("key", &"[REDACTED]").finish()
    }
}
