//! Patient portal access codes.
//!
//! Codes are short enough to read over the phone and use an alphabet with no
//! visually confusable characters. They are stored twice: encrypted, so staff
//! can read a code back to a patient, and as a lookup digest, so a code typed
//! at the portal can be checked without decrypting anything.

use crate::blind_index::LookupDigest;
use crate::cipher::EncryptedField;
use crate::codec::RecordCodec;
use crate::error::Error;
use crate::patient::PatientField;
use rand::{rngs::OsRng, Rng};

/// Characters used in access codes: no `0/O`, `1/I/L`.
pub const ACCESS_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of generated access codes.
pub const ACCESS_CODE_LEN: usize = 8;

/// Generates access codes and prepares them for storage.
#[derive(Debug, Clone)]
pub struct AccessCodeIssuer {
    codec: RecordCodec,
}

impl AccessCodeIssuer {
    /// Creates an issuer that encrypts and digests through `codec`.
    #[must_use]
    pub const fn new(codec: RecordCodec) -> Self {
        Self { codec }
    }

    /// Draws a fresh random code from the OS RNG.
    #[must_use]
    pub fn issue(&self) -> String {
        let mut rng = OsRng;
        (0..ACCESS_CODE_LEN)
            .map(|_| char::from(ACCESS_CODE_ALPHABET[rng.gen_range(0..ACCESS_CODE_ALPHABET.len())]))
            .collect()
    }

    /// Encrypts `code` for staff recovery and digests it for verification.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a blank code, or `Error::EncryptionFailed`.
    pub fn prepare_for_storage(&self, code: &str) -> Result<(EncryptedField, LookupDigest), Error> {
        let encrypted = self
            .codec
            .seal(PatientField::AccessCode, code)?
            .ok_or_else(|| Error::validation("access_code", "required"))?;
        Ok((encrypted, self.codec.access_code_digest(code)))
    }

    /// Checks a candidate code against a stored digest.
    #[must_use]
    pub fn verify(&self, candidate: &str, stored: &LookupDigest) -> bool {
        self.codec.verify_access_code(candidate, stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind_index::LookupHasher;
    use crate::cipher::FieldCipher;
    use crate::kdf::KeyMaterial;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn issuer() -> AccessCodeIssuer {
        let key = Arc::new(KeyMaterial::derive("access-code-secret-001").unwrap());
        AccessCodeIssuer::new(RecordCodec::new(FieldCipher::new(key), LookupHasher::default()))
    }

    #[test]
    fn test_issue_uses_unambiguous_alphabet() {
        let issuer = issuer();
        for _ in 0..200 {
            let code = issuer.issue();
            assert_eq!(code.len(), ACCESS_CODE_LEN);
            assert!(code.bytes().all(|b| ACCESS_CODE_ALPHABET.contains(&b)));
            assert!(!code.contains(&['0', 'O', '1', 'I', 'L'][..]));
        }
    }

    #[test]
    fn test_issue_is_random() {
        let issuer = issuer();
        let codes: HashSet<String> = (0..100).map(|_| issuer.issue()).collect();
        assert_eq!(codes.len(), 100);
    }

    #[test]
    fn test_prepare_for_storage_round_trip() {
        let issuer = issuer();
        let code = issuer.issue();

        let (encrypted, digest) = issuer.prepare_for_storage(&code).unwrap();

        assert_eq!(issuer.codec.open(PatientField::AccessCode, &encrypted).unwrap(), code);
        assert!(issuer.verify(&code, &digest));
        assert!(issuer.verify(&code.to_ascii_lowercase(), &digest));
        assert!(!issuer.verify("AAAAAAAA", &digest));
    }

    #[test]
    fn test_prepare_for_storage_rejects_blank() {
        let result = issuer().prepare_for_storage("  ");
        assert!(matches!(result, Err(Error::Validation { field: "access_code", .. })));
    }
}
