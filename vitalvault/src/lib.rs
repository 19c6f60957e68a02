//! # `VitalVault`
//!
//! Encrypted patient record store with a deterministic search index.
//!
//! ## Features
//!
//! - Field-level AEAD encryption (ChaCha20-Poly1305, fresh nonce per field)
//! - Lookup digests (HMAC-SHA256) for exact-match search on legal IDs and
//!   portal access codes
//! - Graceful decoding: one unreadable field never hides the whole record
//! - Bulk import with per-record error isolation and a job report
//! - Portal access codes that staff can recover and portals can verify
//!
//! ## Example
//!
//! ```rust,ignore
//! use vitalvault::prelude::*;
//!
//! let config = VaultConfig::from_env()?;
//! let vault = PatientVault::from_config(MemoryStore::new(), &config)?;
//!
//! let patient = vault.create_record(&PatientFields::new("V-1234", "Ada Lovelace"))?;
//! let code = vault.issue_access_code(patient.id)?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod access_code;
pub mod blind_index;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod import;
pub mod kdf;
pub mod memory;
pub mod patient;
pub mod store;
pub mod vault;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::blind_index::{LookupDigest, LookupHasher};
    pub use crate::config::VaultConfig;
    pub use crate::error::{Error, StoreError};
    pub use crate::import::{ImportJob, ImportStatus};
    pub use crate::kdf::KeyMaterial;
    pub use crate::memory::MemoryStore;
    pub use crate::patient::{
        DataSource, Decoded, Gender, Patient, PatientField, PatientFields, PatientStatus,
        PatientUpdate,
    };
    pub use crate::store::{PatientFilter, RecordStore};
    pub use crate::vault::PatientVault;
}
