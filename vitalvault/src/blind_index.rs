//! Lookup digests for equality search over encrypted columns.
//!
//! A lookup digest is `HMAC-SHA256(index_salt, context || 0x00 || normalize(value))`.
//! The salt is fixed for the whole dataset (never per record), otherwise two
//! rows holding the same value could not be matched. Normalization happens
//! inside [`LookupHasher`], so the write path and the query path cannot drift
//! apart.

use crate::context::IndexContext;
use crate::error::Error;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Lookup digest output size (32 bytes).
pub const DIGEST_SIZE: usize = 32;

/// Built-in index salt, used when no salt is configured.
pub const DEFAULT_INDEX_SALT: &[u8] = b"vitalvault.lookup-index.salt.v1";

/// Normalizes an identifier for indexing: surrounding whitespace is trimmed
/// and ASCII letters are uppercased.
///
/// ```
/// use vitalvault::blind_index::normalize_identifier;
///
/// assert_eq!(normalize_identifier("  ab-12c "), "AB-12C");
/// ```
#[must_use]
pub fn normalize_identifier(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}

/// A fixed-length deterministic digest stored beside a ciphertext.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupDigest([u8; DIGEST_SIZE]);

impl LookupDigest {
    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Lowercase hex form, as persisted in `<attr>_digest` columns.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the hex form produced by [`to_hex`](Self::to_hex).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidDigest` if the input is not 64 hex characters.
    pub fn from_hex(value: &str) -> Result<Self, Error> {
        let bytes = hex::decode(value).map_err(|e| Error::InvalidDigest(e.to_string()))?;
        let bytes: [u8; DIGEST_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::InvalidDigest(format!("expected {DIGEST_SIZE} bytes, got {}", b.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for LookupDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LookupDigest({})", self.to_hex())
    }
}

impl fmt::Display for LookupDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for LookupDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for LookupDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Computes and verifies lookup digests.
#[derive(Clone)]
pub struct LookupHasher {
    salt: Zeroizing<Vec<u8>>,
}

impl LookupHasher {
    /// Creates a hasher keyed with a fixed index salt.
    #[must_use]
    pub fn new(salt: impl AsRef<[u8]>) -> Self {
        Self {
            salt: Zeroizing::new(salt.as_ref().to_vec()),
        }
    }

    /// Digests `value` after identifier normalization.
    ///
    /// # Example
    ///
    /// ```
    /// use vitalvault::blind_index::LookupHasher;
    /// use vitalvault::context::IndexContext;
    ///
    /// let hasher = LookupHasher::default();
    /// let context = IndexContext::new("patients", "legal_id");
    /// assert_eq!(hasher.digest(" a1 ", &context), hasher.digest("A1", &context));
    /// ```
    #[must_use]
    pub fn digest(&self, value: &str, context: &IndexContext) -> LookupDigest {
        let bytes = self.mac(value, context).finalize().into_bytes();
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&bytes);
        LookupDigest(digest)
    }

    /// Checks `candidate` against a stored digest in constant time.
    #[must_use]
    pub fn verify(&self, candidate: &str, stored: &LookupDigest, context: &IndexContext) -> bool {
        self.mac(candidate, context).verify_slice(stored.as_bytes()).is_ok()
    }

    fn mac(&self, value: &str, context: &IndexContext) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.salt).expect("HMAC can take key of any size");

        // Context first, separated from the value so "a|b" + "c" != "a" + "|bc"
        mac.update(context.to_string().as_bytes());
        mac.update(&[0u8]);
        mac.update(normalize_identifier(value).as_bytes());
        mac
    }
}

impl Default for LookupHasher {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_SALT)
    }
}

impl fmt::Debug for LookupHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupHasher").field("salt", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn legal_id() -> IndexContext {
        IndexContext::new("patients", "legal_id")
    }

    #[test]
    fn test_digest_deterministic() {
        let hasher = LookupHasher::default();

        let digest1 = hasher.digest("V-12345678", &legal_id());
        let digest2 = hasher.digest("V-12345678", &legal_id());

        assert_eq!(digest1, digest2);
        assert_eq!(digest1.as_bytes().len(), DIGEST_SIZE);
    }

    #[test]
    fn test_digest_normalizes_identifiers() {
        let hasher = LookupHasher::default();

        assert_eq!(hasher.digest(" a1 ", &legal_id()), hasher.digest("A1", &legal_id()));
        assert_eq!(hasher.digest("\tv-99\n", &legal_id()), hasher.digest("V-99", &legal_id()));
    }

    #[test]
    fn test_digest_different_values() {
        let hasher = LookupHasher::default();

        assert_ne!(hasher.digest("V-1", &legal_id()), hasher.digest("V-2", &legal_id()));
    }

    #[test]
    fn test_digest_different_contexts() {
        let hasher = LookupHasher::default();
        let other = IndexContext::new("patients", "access_code");

        assert_ne!(hasher.digest("ABC234", &legal_id()), hasher.digest("ABC234", &other));
    }

    #[test]
    fn test_digest_different_salts() {
        let hasher1 = LookupHasher::default();
        let hasher2 = LookupHasher::new(b"some-other-salt");

        assert_ne!(hasher1.digest("V-1", &legal_id()), hasher2.digest("V-1", &legal_id()));
    }

    #[test]
    fn test_verify() {
        let hasher = LookupHasher::default();
        let stored = hasher.digest("K7MPQ2XR", &legal_id());

        assert!(hasher.verify("k7mpq2xr ", &stored, &legal_id()));
        assert!(!hasher.verify("K7MPQ2XS", &stored, &legal_id()));
    }

    #[test]
    fn test_hex_round_trip() {
        let digest = LookupHasher::default().digest("V-1", &legal_id());
        let hex = digest.to_hex();

        assert_eq!(hex.len(), DIGEST_SIZE * 2);
        assert_eq!(LookupDigest::from_hex(&hex).unwrap(), digest);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(LookupDigest::from_hex("zz"), Err(Error::InvalidDigest(_))));
        assert!(matches!(LookupDigest::from_hex("abcd"), Err(Error::InvalidDigest(_))));
    }

    proptest! {
        #[test]
        fn prop_digest_ignores_case_and_padding(s in "[a-z0-9-]{1,24}", pad in " {0,3}") {
            let hasher = LookupHasher::default();
            let padded = format!("{pad}{s}{pad}");
            prop_assert_eq!(
                hasher.digest(&padded, &legal_id()),
                hasher.digest(&s.to_ascii_uppercase(), &legal_id())
            );
        }
    }
}
