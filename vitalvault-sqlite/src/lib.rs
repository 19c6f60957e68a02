//! SQLite record store for `VitalVault`.
//!
//! Each encrypted attribute occupies two `BLOB` columns
//! (`<attr>_ciphertext`, `<attr>_nonce`). Lookup digests are stored as hex
//! text; `legal_id_digest` carries a `UNIQUE` constraint so that the
//! database itself rejects a duplicate patient.
//!
//! # Example
//!
//! ```rust,no_run
//! use vitalvault::prelude::*;
//! use vitalvault_sqlite::SqliteStore;
//!
//! let store = SqliteStore::open("vitalvault.db")?;
//! let config = VaultConfig::from_env()?;
//! let vault = PatientVault::from_config(store, &config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;
use vitalvault::blind_index::LookupDigest;
use vitalvault::cipher::EncryptedField;
use vitalvault::error::StoreError;
use vitalvault::import::{ImportError, ImportJob, ImportStatus};
use vitalvault::patient::{PatientField, PatientRow};
use vitalvault::store::{PatientFilter, RecordStore};

/// Record store over a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    columns: Vec<String>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (or creates) a database file and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(store_error)?;
        tracing::debug!(path = %path.display(), "Opened SQLite store");
        Self::with_connection(conn)
    }

    /// Creates a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(store_error)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(&schema::create_tables()).map_err(store_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
            columns: schema::patient_columns(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Backend("connection lock poisoned".to_string()))
    }

    fn select(
        &self,
        filter: &PatientFilter,
        limit: Option<usize>,
    ) -> Result<Vec<PatientRow>, StoreError> {
        let (clause, param) = filter_clause(filter);
        let mut sql = format!(
            "SELECT {} FROM patients WHERE {clause} ORDER BY rowid",
            self.columns.join(", ")
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(store_error)?;
        let raw = stmt
            .query_map(params_from_iter(param.iter()), RawPatient::read)
            .map_err(store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_error)?;
        drop(stmt);
        drop(conn);

        raw.into_iter().map(RawPatient::into_row).collect()
    }
}

impl RecordStore for SqliteStore {
    fn insert(&self, row: &PatientRow) -> Result<(), StoreError> {
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO patients ({}) VALUES ({})",
            self.columns.join(", "),
            placeholders.join(", ")
        );
        let values = row_values(row);
        self.lock()?.execute(&sql, params_from_iter(values.iter())).map_err(store_error)?;
        Ok(())
    }

    fn update(&self, row: &PatientRow) -> Result<bool, StoreError> {
        // ?1 is the id; every other column is assigned in order.
        let assignments: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, column)| format!("{column} = ?{}", i + 1))
            .collect();
        let sql = format!("UPDATE patients SET {} WHERE id = ?1", assignments.join(", "));
        let values = row_values(row);
        let changed =
            self.lock()?.execute(&sql, params_from_iter(values.iter())).map_err(store_error)?;
        Ok(changed > 0)
    }

    fn find_one(&self, filter: &PatientFilter) -> Result<Option<PatientRow>, StoreError> {
        Ok(self.select(filter, Some(1))?.into_iter().next())
    }

    fn find_many(&self, filter: &PatientFilter) -> Result<Vec<PatientRow>, StoreError> {
        self.select(filter, None)
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let changed = self
            .lock()?
            .execute("DELETE FROM patients WHERE id = ?1", params![id.to_string()])
            .map_err(store_error)?;
        Ok(changed > 0)
    }

    fn insert_job(&self, job: &ImportJob) -> Result<(), StoreError> {
        let job = JobParams::from_job(job)?;
        self.lock()?
            .execute(
                "INSERT INTO import_jobs (id, file_name, total_records, processed_records, \
                 successful_records, failed_records, status, error_log, started_at, completed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.id,
                    job.file_name,
                    job.counts[0],
                    job.counts[1],
                    job.counts[2],
                    job.counts[3],
                    job.status,
                    job.error_log,
                    job.started_at,
                    job.completed_at,
                ],
            )
            .map_err(store_error)?;
        Ok(())
    }

    fn update_job(&self, job: &ImportJob) -> Result<bool, StoreError> {
        let job = JobParams::from_job(job)?;
        let changed = self
            .lock()?
            .execute(
                "UPDATE import_jobs SET file_name = ?2, total_records = ?3, \
                 processed_records = ?4, successful_records = ?5, failed_records = ?6, \
                 status = ?7, error_log = ?8, started_at = ?9, completed_at = ?10 \
                 WHERE id = ?1",
                params![
                    job.id,
                    job.file_name,
                    job.counts[0],
                    job.counts[1],
                    job.counts[2],
                    job.counts[3],
                    job.status,
                    job.error_log,
                    job.started_at,
                    job.completed_at,
                ],
            )
            .map_err(store_error)?;
        Ok(changed > 0)
    }

    fn find_job(&self, id: Uuid) -> Result<Option<ImportJob>, StoreError> {
        let raw = self
            .lock()?
            .query_row(
                "SELECT id, file_name, total_records, processed_records, successful_records, \
                 failed_records, status, error_log, started_at, completed_at \
                 FROM import_jobs WHERE id = ?1",
                params![id.to_string()],
                RawJob::read,
            )
            .optional()
            .map_err(store_error)?;
        raw.map(RawJob::into_job).transpose()
    }
}

/// Maps a SQLite error onto the store taxonomy.
///
/// Only `UNIQUE` and `PRIMARY KEY` failures become `UniqueViolation`; a
/// `NOT NULL` failure is a backend error.
fn store_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if matches!(
            failure.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ) {
            return StoreError::UniqueViolation(message.clone().unwrap_or_else(|| err.to_string()));
        }
    }
    StoreError::Backend(err.to_string())
}

fn filter_clause(filter: &PatientFilter) -> (&'static str, Option<String>) {
    match filter {
        PatientFilter::All => ("1 = 1", None),
        PatientFilter::Id(id) => ("id = ?1", Some(id.to_string())),
        PatientFilter::LegalIdDigest(digest) => ("legal_id_digest = ?1", Some(digest.to_hex())),
        PatientFilter::AccessCodeDigest(digest) => {
            ("access_code_digest = ?1", Some(digest.to_hex()))
        }
        PatientFilter::Status(status) => ("status = ?1", Some(status.as_str().to_string())),
    }
}

/// Bind values in [`schema::patient_columns`] order.
fn row_values(row: &PatientRow) -> Vec<Value> {
    let mut values = Vec::with_capacity(1 + PatientField::ALL.len() * 2 + 7);
    values.push(Value::Text(row.id.to_string()));
    for field in PatientField::ALL {
        match row.encrypted(field) {
            Some(encrypted) => {
                values.push(Value::Blob(encrypted.ciphertext.clone()));
                values.push(Value::Blob(encrypted.nonce.clone()));
            }
            None => {
                values.push(Value::Null);
                values.push(Value::Null);
            }
        }
    }
    values.push(Value::Text(row.legal_id_digest.to_hex()));
    values.push(row.access_code_digest.map_or(Value::Null, |digest| Value::Text(digest.to_hex())));
    values.push(Value::Text(row.status.as_str().to_string()));
    values.push(Value::Text(row.gender.as_str().to_string()));
    values.push(Value::Text(row.source.as_str().to_string()));
    values.push(Value::Text(row.created_at.to_rfc3339()));
    values.push(Value::Text(row.updated_at.to_rfc3339()));
    values
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {value:?}: {e}")))
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Serialization(format!("bad id {value:?}: {e}")))
}

/// Rebuilds one encrypted attribute from its column pair.
///
/// Only a pair that is null in both columns is an absent attribute. Any other
/// shape (a half-null pair, or a non-blob value) is kept with an empty nonce
/// so that decoding marks the attribute unreadable instead of failing the row.
fn encrypted_field(
    id: Uuid,
    field: PatientField,
    ciphertext: Value,
    nonce: Value,
) -> Option<EncryptedField> {
    match (ciphertext, nonce) {
        (Value::Null, Value::Null) => None,
        (Value::Blob(ciphertext), Value::Blob(nonce)) => Some(EncryptedField { ciphertext, nonce }),
        (ciphertext, _) => {
            tracing::warn!(
                patient_id = %id,
                field = field.name(),
                "malformed encrypted columns"
            );
            let ciphertext = match ciphertext {
                Value::Blob(bytes) => bytes,
                _ => Vec::new(),
            };
            Some(EncryptedField {
                ciphertext,
                nonce: Vec::new(),
            })
        }
    }
}

/// Column values as read from SQLite, before any parsing.
struct RawPatient {
    id: String,
    encrypted: Vec<(Value, Value)>,
    legal_id_digest: String,
    access_code_digest: Option<String>,
    status: String,
    gender: String,
    source: String,
    created_at: String,
    updated_at: String,
}

impl RawPatient {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut encrypted = Vec::with_capacity(PatientField::ALL.len());
        let mut idx = 1;
        for _ in PatientField::ALL {
            encrypted.push((row.get(idx)?, row.get(idx + 1)?));
            idx += 2;
        }
        Ok(Self {
            id: row.get(0)?,
            encrypted,
            legal_id_digest: row.get(idx)?,
            access_code_digest: row.get(idx + 1)?,
            status: row.get(idx + 2)?,
            gender: row.get(idx + 3)?,
            source: row.get(idx + 4)?,
            created_at: row.get(idx + 5)?,
            updated_at: row.get(idx + 6)?,
        })
    }

    fn into_row(self) -> Result<PatientRow, StoreError> {
        let digest = |hex: &str| {
            LookupDigest::from_hex(hex).map_err(|e| StoreError::Serialization(e.to_string()))
        };
        let enum_error = |e: vitalvault::error::Error| StoreError::Serialization(e.to_string());

        let mut row = PatientRow {
            id: parse_uuid(&self.id)?,
            legal_id: None,
            legal_id_digest: digest(self.legal_id_digest.as_str())?,
            full_name: None,
            email: None,
            phone: None,
            address: None,
            allergies: None,
            conditions: None,
            emergency_contact: None,
            notes: None,
            access_code: None,
            access_code_digest: self.access_code_digest.as_deref().map(digest).transpose()?,
            status: self.status.parse().map_err(enum_error)?,
            gender: self.gender.parse().map_err(enum_error)?,
            source: self.source.parse().map_err(enum_error)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        };

        let id = row.id;
        for (field, (ciphertext, nonce)) in PatientField::ALL.into_iter().zip(self.encrypted) {
            row.set_encrypted(field, encrypted_field(id, field, ciphertext, nonce));
        }
        Ok(row)
    }
}

/// Import job in bindable form.
struct JobParams {
    id: String,
    file_name: String,
    // total, processed, successful, failed
    counts: [i64; 4],
    status: &'static str,
    error_log: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl JobParams {
    fn from_job(job: &ImportJob) -> Result<Self, StoreError> {
        let count = |n: usize| {
            i64::try_from(n).map_err(|_| StoreError::Serialization(format!("count {n} too large")))
        };
        Ok(Self {
            id: job.id.to_string(),
            file_name: job.file_name.clone(),
            counts: [
                count(job.total_records)?,
                count(job.processed_records)?,
                count(job.successful_records)?,
                count(job.failed_records)?,
            ],
            status: job.status.as_str(),
            error_log: job.error_log.as_ref().map(serde_json::to_string).transpose()?,
            started_at: job.started_at.to_rfc3339(),
            completed_at: job.completed_at.map(|ts| ts.to_rfc3339()),
        })
    }
}

struct RawJob {
    id: String,
    file_name: String,
    counts: [i64; 4],
    status: String,
    error_log: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl RawJob {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            file_name: row.get(1)?,
            counts: [row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?],
            status: row.get(6)?,
            error_log: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }

    fn into_job(self) -> Result<ImportJob, StoreError> {
        let count = |n: i64| {
            usize::try_from(n).map_err(|_| StoreError::Serialization(format!("bad count {n}")))
        };
        let status = match self.status.as_str() {
            "processing" => ImportStatus::Processing,
            "completed" => ImportStatus::Completed,
            "failed" => ImportStatus::Failed,
            other => return Err(StoreError::Serialization(format!("bad import status {other:?}"))),
        };
        let error_log = self
            .error_log
            .as_deref()
            .map(serde_json::from_str::<Vec<ImportError>>)
            .transpose()?;

        Ok(ImportJob {
            id: parse_uuid(&self.id)?,
            file_name: self.file_name,
            total_records: count(self.counts[0])?,
            processed_records: count(self.counts[1])?,
            successful_records: count(self.counts[2])?,
            failed_records: count(self.counts[3])?,
            status,
            error_log,
            started_at: parse_timestamp(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vitalvault::patient::DECRYPTION_FAILED;
    use vitalvault::prelude::*;

    fn vault(store: SqliteStore) -> PatientVault<SqliteStore> {
        let key = Arc::new(KeyMaterial::derive("sqlite-test-secret-0001").unwrap());
        PatientVault::new(store, key, LookupHasher::default())
    }

    fn fields(legal_id: &str) -> PatientFields {
        PatientFields {
            phone: Some("+44 20 7946 0000".to_string()),
            allergies: Some("latex".to_string()),
            ..PatientFields::new(legal_id, "Mary Seacole")
        }
    }

    #[test]
    fn test_row_roundtrip() {
        let vault = vault(SqliteStore::in_memory().unwrap());
        let created = vault.create_record(&fields("UK-1")).unwrap();

        let row = vault.store().find_one(&PatientFilter::Id(created.id)).unwrap().unwrap();
        assert!(row.email.is_none());
        assert!(row.phone.is_some());

        let patient = vault.get_record(created.id).unwrap();
        assert_eq!(patient.text(PatientField::Allergies), Some("latex"));
        assert_eq!(patient.created_at, created.created_at);
    }

    #[test]
    fn test_unique_legal_id_digest_enforced() {
        let vault = vault(SqliteStore::in_memory().unwrap());
        let created = vault.create_record(&fields("UK-2")).unwrap();

        // Bypass the vault's read-before-write check
        let mut row = vault.store().find_one(&PatientFilter::Id(created.id)).unwrap().unwrap();
        row.id = Uuid::new_v4();
        let err = vault.store().insert(&row).unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[test]
    fn test_update_to_taken_legal_id_is_duplicate() {
        let vault = vault(SqliteStore::in_memory().unwrap());
        vault.create_record(&fields("UK-8")).unwrap();
        let second = vault.create_record(&fields("UK-9")).unwrap();

        let update = PatientUpdate {
            legal_id: Some("uk-8".to_string()),
            ..PatientUpdate::default()
        };
        let result = vault.update_record(second.id, &update);
        assert!(matches!(result, Err(Error::DuplicateRecord)));

        // A direct store update hits the UNIQUE constraint too
        let mut row = vault.store().find_one(&PatientFilter::Id(second.id)).unwrap().unwrap();
        row.legal_id_digest = vault.codec().legal_id_digest("UK-8");
        let err = vault.store().update(&row).unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        let unchanged = vault.get_record(second.id).unwrap();
        assert_eq!(unchanged.legal_id(), Some("UK-9"));
    }

    #[test]
    fn test_malformed_columns_mark_only_that_field() {
        let vault = vault(SqliteStore::in_memory().unwrap());
        let first = vault
            .create_record(&PatientFields {
                email: Some("mary@example.org".to_string()),
                ..fields("UK-10")
            })
            .unwrap();
        let second = vault
            .create_record(&PatientFields {
                email: Some("florence@example.org".to_string()),
                ..fields("UK-11")
            })
            .unwrap();

        {
            let conn = vault.store().lock().unwrap();
            conn.execute(
                "UPDATE patients SET email_nonce = NULL WHERE id = ?1",
                params![first.id.to_string()],
            )
            .unwrap();
            conn.execute(
                "UPDATE patients SET email_ciphertext = 'garbage' WHERE id = ?1",
                params![second.id.to_string()],
            )
            .unwrap();
        }

        for id in [first.id, second.id] {
            let patient = vault.get_record(id).unwrap();
            assert_eq!(patient.unreadable_fields(), vec![PatientField::Email]);
            assert_eq!(patient.text(PatientField::Email), Some(DECRYPTION_FAILED));
            assert_eq!(patient.full_name(), Some("Mary Seacole"));
            assert_eq!(patient.text(PatientField::Allergies), Some("latex"));
        }

        // One bad row never hides the others
        let listed = vault.list_records(&PatientFilter::All).unwrap();
        assert_eq!(listed.len(), 2);
        let found = vault.search_by_legal_id("UK-11").unwrap().unwrap();
        assert_eq!(found.id, second.id);
    }

    #[test]
    fn test_null_pair_stays_absent() {
        let vault = vault(SqliteStore::in_memory().unwrap());
        let created = vault.create_record(&fields("UK-12")).unwrap();

        let row = vault.store().find_one(&PatientFilter::Id(created.id)).unwrap().unwrap();
        assert!(row.email.is_none());
        assert_eq!(vault.get_record(created.id).unwrap().get(PatientField::Email), None);
    }

    #[test]
    fn test_filters() {
        let vault = vault(SqliteStore::in_memory().unwrap());
        let first = vault.create_record(&fields("UK-3")).unwrap();
        let second = vault
            .create_record(&PatientFields {
                status: PatientStatus::Archived,
                ..fields("UK-4")
            })
            .unwrap();

        let all = vault.store().find_many(&PatientFilter::All).unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first.id, second.id]);

        let archived = vault
            .store()
            .find_many(&PatientFilter::Status(PatientStatus::Archived))
            .unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, second.id);

        assert!(vault.store().delete(first.id).unwrap());
        assert!(!vault.store().delete(first.id).unwrap());
        assert_eq!(vault.store().find_many(&PatientFilter::All).unwrap().len(), 1);
    }

    #[test]
    fn test_access_code_lookup() {
        let vault = vault(SqliteStore::in_memory().unwrap());
        let created = vault.create_record(&fields("UK-5")).unwrap();
        let code = vault.issue_access_code(created.id).unwrap();

        let found = vault.find_by_access_code(&code.to_lowercase()).unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.text(PatientField::AccessCode), Some(code.as_str()));
    }

    #[test]
    fn test_import_job_persisted() {
        let vault = vault(SqliteStore::in_memory().unwrap());
        let job = vault
            .run_import(
                vec![
                    serde_json::json!({ "legal_id": "UK-6", "full_name": "A" }),
                    serde_json::json!({ "full_name": "No id" }),
                ],
                "upload.json",
            )
            .unwrap();

        let stored = vault.get_import_job(job.id).unwrap();
        assert_eq!(stored, job);
        assert_eq!(stored.error_log.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");

        let id = {
            let vault = vault(SqliteStore::open(&path).unwrap());
            vault.create_record(&fields("UK-7")).unwrap().id
        };

        let reopened = vault(SqliteStore::open(&path).unwrap());
        let patient = reopened.search_by_legal_id("uk-7").unwrap().unwrap();
        assert_eq!(patient.id, id);
        assert!(patient.unreadable_fields().is_empty());
    }
}
