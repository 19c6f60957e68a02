//! Patient vault: the application-facing API over an encrypted record store.
//!
//! The vault owns the codec and access-code issuer and talks to any
//! [`RecordStore`]. Single-record operations return the first blocking error;
//! reads never fail because of an unreadable field, they mark it instead.

use crate::access_code::AccessCodeIssuer;
use crate::blind_index::{LookupDigest, LookupHasher};
use crate::cipher::FieldCipher;
use crate::codec::RecordCodec;
use crate::config::VaultConfig;
use crate::error::{Error, StoreError};
use crate::import::{ImportJob, ImportPipeline};
use crate::kdf::KeyMaterial;
use crate::patient::{DataSource, Gender, Patient, PatientFields, PatientRow, PatientUpdate};
use crate::store::{PatientFilter, RecordStore};
use chrono::Utc;
use rand::{rngs::OsRng, seq::SliceRandom, Rng};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Encrypted patient store.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vitalvault::prelude::*;
///
/// # fn main() -> Result<(), vitalvault::error::Error> {
/// let key = Arc::new(KeyMaterial::derive("correct horse battery staple")?);
/// let vault = PatientVault::new(MemoryStore::new(), key, LookupHasher::default());
///
/// let patient = vault.create_record(&PatientFields::new("V-1234", "Ada Lovelace"))?;
/// let found = vault.search_by_legal_id(" v-1234 ")?;
/// assert_eq!(found.map(|p| p.id), Some(patient.id));
/// # Ok(())
/// # }
/// ```
pub struct PatientVault<S: RecordStore> {
    store: Arc<S>,
    codec: RecordCodec,
    issuer: AccessCodeIssuer,
}

impl<S: RecordStore> PatientVault<S> {
    /// Creates a vault over `store` with an already derived key.
    pub fn new(store: S, key: Arc<KeyMaterial>, hasher: LookupHasher) -> Self {
        let codec = RecordCodec::new(FieldCipher::new(key), hasher);
        let issuer = AccessCodeIssuer::new(codec.clone());
        Self {
            store: Arc::new(store),
            codec,
            issuer,
        }
    }

    /// Creates a vault from configuration, deriving the key once.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the configured secret is unusable.
    pub fn from_config(store: S, config: &VaultConfig) -> Result<Self, Error> {
        Ok(Self::new(store, config.key_material()?, config.lookup_hasher()))
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The record codec.
    #[must_use]
    pub const fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    /// Creates a patient entered by an operator.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation`, `Error::DuplicateRecord` if the legal ID is
    /// already stored, or `Error::Storage`.
    pub fn create_record(&self, fields: &PatientFields) -> Result<Patient, Error> {
        self.create_with_source(fields, DataSource::Manual)
    }

    fn create_with_source(
        &self,
        fields: &PatientFields,
        source: DataSource,
    ) -> Result<Patient, Error> {
        fields.validate()?;
        self.ensure_unique(&self.codec.legal_id_digest(&fields.legal_id), None)?;

        let row = self.codec.encode(fields, source)?;
        self.store.insert(&row).map_err(unique_as_duplicate)?;
        tracing::info!(patient_id = %row.id, source = source.as_str(), "patient created");

        Ok(self.codec.decode(&row))
    }

    /// Applies `update` to a stored patient.
    ///
    /// Touched attributes are re-encrypted with fresh nonces. Changing the
    /// legal ID to the patient's own current value is not a duplicate.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound`, `Error::Validation`, `Error::DuplicateRecord`,
    /// or `Error::Storage`.
    pub fn update_record(&self, id: Uuid, update: &PatientUpdate) -> Result<Patient, Error> {
        update.validate()?;
        let row = self.load(id)?;

        if let Some(legal_id) = &update.legal_id {
            self.ensure_unique(&self.codec.legal_id_digest(legal_id), Some(id))?;
        }

        let next = self.codec.encode_update(&row, update)?;
        if !self.store.update(&next).map_err(unique_as_duplicate)? {
            return Err(Error::NotFound(id));
        }
        tracing::info!(patient_id = %id, "patient updated");

        Ok(self.codec.decode(&next))
    }

    /// Loads and decodes one patient.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` or `Error::Storage`.
    pub fn get_record(&self, id: Uuid) -> Result<Patient, Error> {
        Ok(self.codec.decode(&self.load(id)?))
    }

    /// Finds a patient by legal ID, matching on the normalized digest.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage`.
    pub fn search_by_legal_id(&self, legal_id: &str) -> Result<Option<Patient>, Error> {
        let digest = self.codec.legal_id_digest(legal_id);
        Ok(self
            .store
            .find_one(&PatientFilter::LegalIdDigest(digest))?
            .map(|row| self.codec.decode(&row)))
    }

    /// Decodes every patient matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage`.
    pub fn list_records(&self, filter: &PatientFilter) -> Result<Vec<Patient>, Error> {
        Ok(self.store.find_many(filter)?.iter().map(|row| self.codec.decode(row)).collect())
    }

    /// Hard-deletes a patient.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` or `Error::Storage`.
    pub fn delete_record(&self, id: Uuid) -> Result<(), Error> {
        if !self.store.delete(id)? {
            return Err(Error::NotFound(id));
        }
        tracing::info!(patient_id = %id, "patient deleted");
        Ok(())
    }

    /// Imports a batch of loosely-typed records.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` only if the job record cannot be persisted.
    pub fn run_import(&self, records: Vec<Value>, source_label: &str) -> Result<ImportJob, Error> {
        ImportPipeline::new(self.store.as_ref(), &self.codec).run(records, source_label)
    }

    /// Loads a finished or running import job.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` or `Error::Storage`.
    pub fn get_import_job(&self, id: Uuid) -> Result<ImportJob, Error> {
        self.store.find_job(id)?.ok_or(Error::NotFound(id))
    }

    /// Generates a portal access code for a patient, replacing any previous one.
    ///
    /// The plaintext code is returned once; afterwards it can only be read back
    /// by decrypting the patient record.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound`, `Error::EncryptionFailed`, or `Error::Storage`.
    pub fn issue_access_code(&self, id: Uuid) -> Result<String, Error> {
        let mut row = self.load(id)?;

        let code = self.issuer.issue();
        let (encrypted, digest) = self.issuer.prepare_for_storage(&code)?;
        row.access_code = Some(encrypted);
        row.access_code_digest = Some(digest);
        row.updated_at = Utc::now();

        if !self.store.update(&row)? {
            return Err(Error::NotFound(id));
        }
        tracing::info!(patient_id = %id, "access code issued");

        Ok(code)
    }

    /// Checks a candidate code against a stored digest without decrypting.
    #[must_use]
    pub fn verify_access_code(&self, candidate: &str, stored: &LookupDigest) -> bool {
        self.issuer.verify(candidate, stored)
    }

    /// Finds the patient owning an access code, as a portal login would.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage`.
    pub fn find_by_access_code(&self, candidate: &str) -> Result<Option<Patient>, Error> {
        let digest = self.codec.access_code_digest(candidate);
        let rows = self.store.find_many(&PatientFilter::AccessCodeDigest(digest))?;
        if rows.len() > 1 {
            tracing::warn!(matches = rows.len(), "access code digest shared by several patients");
        }
        Ok(rows.first().map(|row| self.codec.decode(row)))
    }

    /// Creates `count` synthetic patients for demos and load testing.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`create_record`](Self::create_record)
    /// other than a duplicate legal ID, which is skipped.
    pub fn seed_demo_records(&self, count: usize) -> Result<Vec<Patient>, Error> {
        const FIRST: [&str; 8] = [
            "Ana", "Bruno", "Carmen", "Diego", "Elena", "Felipe", "Gloria", "Hugo",
        ];
        const LAST: [&str; 8] = [
            "Rivas", "Mora", "Salas", "Vega", "Ortiz", "Luna", "Campos", "Rojas",
        ];
        const ALLERGIES: [&str; 4] = ["penicillin", "latex", "peanuts", "none known"];
        const GENDERS: [Gender; 3] = [Gender::Female, Gender::Male, Gender::Unspecified];

        let mut rng = OsRng;
        let mut created = Vec::with_capacity(count);

        for _ in 0..count {
            let first = FIRST.choose(&mut rng).copied().unwrap_or("Ana");
            let last = LAST.choose(&mut rng).copied().unwrap_or("Rivas");
            let fields = PatientFields {
                email: Some(format!(
                    "{}.{}@example.org",
                    first.to_lowercase(),
                    last.to_lowercase()
                )),
                phone: Some(format!("555-{:04}", rng.gen_range(0..10_000))),
                allergies: ALLERGIES.choose(&mut rng).map(ToString::to_string),
                gender: GENDERS.choose(&mut rng).copied().unwrap_or_default(),
                ..PatientFields::new(
                    format!("V-{:08}", rng.gen_range(0..100_000_000)),
                    format!("{first} {last}"),
                )
            };

            match self.create_with_source(&fields, DataSource::Seed) {
                Ok(patient) => created.push(patient),
                Err(Error::DuplicateRecord) => continue,
                Err(e) => return Err(e),
            }
        }

        tracing::info!(requested = count, created = created.len(), "demo records seeded");
        Ok(created)
    }

    fn load(&self, id: Uuid) -> Result<PatientRow, Error> {
        self.store.find_one(&PatientFilter::Id(id))?.ok_or(Error::NotFound(id))
    }

    fn ensure_unique(&self, digest: &LookupDigest, exclude: Option<Uuid>) -> Result<(), Error> {
        match self.store.find_one(&PatientFilter::LegalIdDigest(*digest))? {
            Some(existing) if Some(existing.id) != exclude => Err(Error::DuplicateRecord),
            _ => Ok(()),
        }
    }
}

impl<S: RecordStore> Clone for PatientVault<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
            issuer: self.issuer.clone(),
        }
    }
}

fn unique_as_duplicate(err: StoreError) -> Error {
    match err {
        StoreError::UniqueViolation(_) => Error::DuplicateRecord,
        other => Error::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::patient::{PatientField, PatientStatus};

    fn vault() -> PatientVault<MemoryStore> {
        let key = Arc::new(KeyMaterial::derive("vault-unit-test-secret").unwrap());
        PatientVault::new(MemoryStore::new(), key, LookupHasher::default())
    }

    #[test]
    fn test_create_and_get() {
        let vault = vault();
        let created = vault.create_record(&PatientFields::new("V-1", "Ada")).unwrap();

        let loaded = vault.get_record(created.id).unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.source, DataSource::Manual);
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let vault = vault();
        vault.create_record(&PatientFields::new("V-1", "Ada")).unwrap();

        let result = vault.create_record(&PatientFields::new(" v-1", "Someone Else"));
        assert!(matches!(result, Err(Error::DuplicateRecord)));
        assert_eq!(vault.store().len().unwrap(), 1);
    }

    #[test]
    fn test_update_own_legal_id_is_not_duplicate() {
        let vault = vault();
        let created = vault.create_record(&PatientFields::new("V-1", "Ada")).unwrap();

        let update = PatientUpdate {
            legal_id: Some("v-1".to_string()),
            ..PatientUpdate::default()
        };
        let updated = vault.update_record(created.id, &update).unwrap();
        assert_eq!(updated.legal_id(), Some("v-1"));
    }

    #[test]
    fn test_update_to_other_legal_id_rejected() {
        let vault = vault();
        vault.create_record(&PatientFields::new("V-1", "Ada")).unwrap();
        let second = vault.create_record(&PatientFields::new("V-2", "Grace")).unwrap();

        let update = PatientUpdate {
            legal_id: Some("V-1".to_string()),
            ..PatientUpdate::default()
        };
        assert!(matches!(vault.update_record(second.id, &update), Err(Error::DuplicateRecord)));
    }

    #[test]
    fn test_update_missing() {
        let vault = vault();
        let update = PatientUpdate {
            status: Some(PatientStatus::Inactive),
            ..PatientUpdate::default()
        };
        assert!(matches!(vault.update_record(Uuid::new_v4(), &update), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete() {
        let vault = vault();
        let created = vault.create_record(&PatientFields::new("V-1", "Ada")).unwrap();

        vault.delete_record(created.id).unwrap();
        assert!(matches!(vault.get_record(created.id), Err(Error::NotFound(_))));
        assert!(matches!(vault.delete_record(created.id), Err(Error::NotFound(_))));

        // The legal ID is free again after a hard delete
        assert!(vault.create_record(&PatientFields::new("V-1", "Ada")).is_ok());
    }

    #[test]
    fn test_search_not_found() {
        assert_eq!(vault().search_by_legal_id("V-404").unwrap(), None);
    }

    #[test]
    fn test_issue_and_find_by_access_code() {
        let vault = vault();
        let created = vault.create_record(&PatientFields::new("V-1", "Ada")).unwrap();

        let code = vault.issue_access_code(created.id).unwrap();
        let patient = vault.get_record(created.id).unwrap();
        assert!(patient.has_access_code);
        assert_eq!(patient.text(PatientField::AccessCode), Some(code.as_str()));

        let found = vault.find_by_access_code(&code.to_lowercase()).unwrap();
        assert_eq!(found.map(|p| p.id), Some(created.id));
        assert_eq!(vault.find_by_access_code("ZZZZZZZZ").unwrap(), None);
    }

    #[test]
    fn test_reissue_replaces_code() {
        let vault = vault();
        let created = vault.create_record(&PatientFields::new("V-1", "Ada")).unwrap();

        let first = vault.issue_access_code(created.id).unwrap();
        let second = vault.issue_access_code(created.id).unwrap();

        let row = vault.store().find_one(&PatientFilter::Id(created.id)).unwrap().unwrap();
        let stored = row.access_code_digest.unwrap();
        assert!(vault.verify_access_code(&second, &stored));
        assert_eq!(vault.verify_access_code(&first, &stored), first == second);
    }

    #[test]
    fn test_seed_demo_records() {
        let vault = vault();
        let seeded = vault.seed_demo_records(5).unwrap();

        assert!(!seeded.is_empty());
        assert!(seeded.iter().all(|p| p.source == DataSource::Seed));
        assert_eq!(vault.list_records(&PatientFilter::All).unwrap().len(), seeded.len());
    }
}
