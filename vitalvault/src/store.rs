//! Storage abstraction for encrypted patient rows and import jobs.

use crate::blind_index::LookupDigest;
use crate::error::StoreError;
use crate::import::ImportJob;
use crate::patient::{PatientRow, PatientStatus};
use uuid::Uuid;

/// Selects persisted patient rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientFilter {
    /// Every row
    All,
    /// Row with this id
    Id(Uuid),
    /// Row whose legal-ID digest matches
    LegalIdDigest(LookupDigest),
    /// Rows whose access-code digest matches
    AccessCodeDigest(LookupDigest),
    /// Rows in this status
    Status(PatientStatus),
}

impl PatientFilter {
    /// Whether `row` satisfies this filter.
    #[must_use]
    pub fn matches(&self, row: &PatientRow) -> bool {
        match self {
            Self::All => true,
            Self::Id(id) => row.id == *id,
            Self::LegalIdDigest(digest) => row.legal_id_digest == *digest,
            Self::AccessCodeDigest(digest) => row.access_code_digest.as_ref() == Some(digest),
            Self::Status(status) => row.status == *status,
        }
    }
}

/// Persists encrypted rows. Backends never see plaintext.
///
/// Implementations must be thread-safe (`Send + Sync`) and must provide
/// read-your-writes within a single caller, so that an import can detect a
/// duplicate of a record it inserted earlier in the same batch.
///
/// Backends should enforce uniqueness of `legal_id_digest` and report a
/// violation as [`StoreError::UniqueViolation`].
pub trait RecordStore: Send + Sync {
    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if the id or legal-ID digest is
    /// already stored, or `StoreError::Backend` on failure.
    fn insert(&self, row: &PatientRow) -> Result<(), StoreError>;

    /// Replaces the row with the same id. Returns `false` if no such row exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if the new legal-ID digest
    /// belongs to another row, or `StoreError::Backend` on failure.
    fn update(&self, row: &PatientRow) -> Result<bool, StoreError>;

    /// Returns the first row matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn find_one(&self, filter: &PatientFilter) -> Result<Option<PatientRow>, StoreError>;

    /// Returns every row matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn find_many(&self, filter: &PatientFilter) -> Result<Vec<PatientRow>, StoreError>;

    /// Hard-deletes a row. Returns `false` if no such row exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Persists a newly started import job.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn insert_job(&self, job: &ImportJob) -> Result<(), StoreError>;

    /// Replaces a stored import job. Returns `false` if no such job exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn update_job(&self, job: &ImportJob) -> Result<bool, StoreError>;

    /// Loads an import job.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn find_job(&self, id: Uuid) -> Result<Option<ImportJob>, StoreError>;
}
