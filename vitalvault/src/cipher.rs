//! Field-level authenticated encryption.
//!
//! Every call to [`FieldCipher::encrypt`] draws a fresh random nonce, so two
//! encryptions of the same value never produce the same ciphertext. Equality
//! search therefore goes through [`crate::blind_index`] instead.

use crate::context::FieldContext;
use crate::error::Error;
use crate::kdf::KeyMaterial;
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// A single encrypted attribute as persisted: ciphertext (with tag) and its nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    /// ChaCha20-Poly1305 output, including the 16-byte tag
    pub ciphertext: Vec<u8>,
    /// Nonce used for this encryption
    pub nonce: Vec<u8>,
}

/// Encrypts and decrypts single string values under the process key.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vitalvault::cipher::FieldCipher;
/// use vitalvault::context::FieldContext;
/// use vitalvault::kdf::KeyMaterial;
///
/// let key = Arc::new(KeyMaterial::derive("correct horse battery staple").unwrap());
/// let cipher = FieldCipher::new(key);
/// let context = FieldContext::new("patients", "email");
///
/// let field = cipher.encrypt("alice@example.com", &context).unwrap();
/// assert_eq!(cipher.decrypt(&field, &context).unwrap(), "alice@example.com");
/// ```
#[derive(Debug, Clone)]
pub struct FieldCipher {
    key: Arc<KeyMaterial>,
}

impl FieldCipher {
    /// Creates a cipher over shared key material.
    #[must_use]
    pub const fn new(key: Arc<KeyMaterial>) -> Self {
        Self { key }
    }

    /// Encrypts `plaintext`, binding `context` as associated data.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if the AEAD rejects the key or input.
    pub fn encrypt(
        &self,
        plaintext: &str,
        context: &FieldContext,
    ) -> Result<EncryptedField, Error> {
        let cipher = ChaCha20Poly1305::new_from_slice(self.key.expose())
            .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let aad = context.to_string();

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| {
                Error::EncryptionFailed(format!("ChaCha20-Poly1305 encryption failed: {e}"))
            })?;

        Ok(EncryptedField {
            ciphertext,
            nonce: nonce_bytes.to_vec(),
        })
    }

    /// Decrypts a field produced by [`encrypt`](Self::encrypt) under the same context.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `Error::DecryptionFailed` if the nonce has the wrong size or the
    ///   plaintext is not UTF-8
    /// - `Error::AuthenticationFailed` if the tag does not verify (tampered
    ///   data, wrong key, or wrong context)
    pub fn decrypt(&self, field: &EncryptedField, context: &FieldContext) -> Result<String, Error> {
        let cipher = ChaCha20Poly1305::new_from_slice(self.key.expose())
            .map_err(|e| Error::DecryptionFailed(format!("Invalid key: {e}")))?;

        let nonce_bytes: [u8; NONCE_SIZE] = field
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| Error::DecryptionFailed("Invalid nonce size".to_string()))?;
        let nonce = Nonce::from(nonce_bytes);

        let aad = context.to_string();

        let plaintext = cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: &field.ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| Error::AuthenticationFailed)?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::DecryptionFailed("plaintext is not valid UTF-8".to_string()))
    }
}
