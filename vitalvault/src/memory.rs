//! In-process [`RecordStore`] backed by a locked `Vec`.
//!
//! Suitable for tests and embedding; data is lost when the store is dropped.

use crate::error::StoreError;
use crate::import::ImportJob;
use crate::patient::PatientRow;
use crate::store::{PatientFilter, RecordStore};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    // Insertion order doubles as creation order.
    patients: Vec<PatientRow>,
    jobs: HashMap<Uuid, ImportJob>,
}

/// Memory-backed store with the same uniqueness rules as a SQL backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored patients.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.patients.len())
    }

    /// Whether no patients are stored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.patients.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn insert(&self, row: &PatientRow) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.patients.iter().any(|r| r.id == row.id) {
            return Err(StoreError::UniqueViolation("patients.id".to_string()));
        }
        if tables.patients.iter().any(|r| r.legal_id_digest == row.legal_id_digest) {
            return Err(StoreError::UniqueViolation("patients.legal_id_digest".to_string()));
        }
        tables.patients.push(row.clone());
        drop(tables);
        Ok(())
    }

    fn update(&self, row: &PatientRow) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let taken = tables
            .patients
            .iter()
            .any(|r| r.id != row.id && r.legal_id_digest == row.legal_id_digest);
        if taken {
            return Err(StoreError::UniqueViolation("patients.legal_id_digest".to_string()));
        }
        let Some(slot) = tables.patients.iter_mut().find(|r| r.id == row.id) else {
            return Ok(false);
        };
        *slot = row.clone();
        drop(tables);
        Ok(true)
    }

    fn find_one(&self, filter: &PatientFilter) -> Result<Option<PatientRow>, StoreError> {
        Ok(self.lock()?.patients.iter().find(|r| filter.matches(r)).cloned())
    }

    fn find_many(&self, filter: &PatientFilter) -> Result<Vec<PatientRow>, StoreError> {
        Ok(self.lock()?.patients.iter().filter(|r| filter.matches(r)).cloned().collect())
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let before = tables.patients.len();
        tables.patients.retain(|r| r.id != id);
        let removed = tables.patients.len() != before;
        drop(tables);
        Ok(removed)
    }

    fn insert_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.jobs.contains_key(&job.id) {
            return Err(StoreError::UniqueViolation("import_jobs.id".to_string()));
        }
        tables.jobs.insert(job.id, job.clone());
        drop(tables);
        Ok(())
    }

    fn update_job(&self, job: &ImportJob) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let Some(slot) = tables.jobs.get_mut(&job.id) else {
            return Ok(false);
        };
        *slot = job.clone();
        drop(tables);
        Ok(true)
    }

    fn find_job(&self, id: Uuid) -> Result<Option<ImportJob>, StoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind_index::LookupHasher;
    use crate::cipher::FieldCipher;
    use crate::codec::RecordCodec;
    use crate::kdf::KeyMaterial;
    use crate::patient::{DataSource, PatientFields, PatientStatus};
    use std::sync::Arc;

    fn row(legal_id: &str) -> PatientRow {
        let key = Arc::new(KeyMaterial::derive("memory-store-secret-01").unwrap());
        let codec = RecordCodec::new(FieldCipher::new(key), LookupHasher::default());
        codec.encode(&PatientFields::new(legal_id, "Test Patient"), DataSource::Manual).unwrap()
    }

    #[test]
    fn test_insert_and_find() {
        let store = MemoryStore::new();
        let row = row("A-1");
        store.insert(&row).unwrap();

        assert_eq!(store.find_one(&PatientFilter::Id(row.id)).unwrap(), Some(row.clone()));
        assert_eq!(
            store.find_one(&PatientFilter::LegalIdDigest(row.legal_id_digest)).unwrap(),
            Some(row)
        );
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_insert_rejects_duplicate_digest() {
        let store = MemoryStore::new();
        store.insert(&row("A-1")).unwrap();

        let result = store.insert(&row("a-1"));
        assert!(matches!(result, Err(StoreError::UniqueViolation(_))));
    }

    #[test]
    fn test_update_missing_row() {
        let store = MemoryStore::new();
        assert!(!store.update(&row("A-1")).unwrap());
    }

    #[test]
    fn test_update_rejects_digest_of_other_row() {
        let store = MemoryStore::new();
        let first = row("A-1");
        let mut second = row("A-2");
        store.insert(&first).unwrap();
        store.insert(&second).unwrap();

        second.legal_id_digest = first.legal_id_digest;
        assert!(matches!(store.update(&second), Err(StoreError::UniqueViolation(_))));
    }

    #[test]
    fn test_find_many_by_status_and_delete() {
        let store = MemoryStore::new();
        let active = row("A-1");
        let mut archived = row("A-2");
        archived.status = PatientStatus::Archived;
        store.insert(&active).unwrap();
        store.insert(&archived).unwrap();

        let found = store.find_many(&PatientFilter::Status(PatientStatus::Archived)).unwrap();
        assert_eq!(found, vec![archived.clone()]);

        assert!(store.delete(archived.id).unwrap());
        assert!(!store.delete(archived.id).unwrap());
        assert_eq!(store.find_many(&PatientFilter::All).unwrap(), vec![active]);
    }
}
