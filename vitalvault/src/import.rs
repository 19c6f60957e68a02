//! Bulk import of loosely-typed patient records.
//!
//! Each incoming record is parsed into a [`RawPatientRecord`], validated into
//! [`PatientFields`], checked for a duplicate legal ID, then encoded and
//! persisted. A failing record is logged into the job's error log and the
//! batch moves on; records already inserted are never rolled back.

use crate::codec::RecordCodec;
use crate::error::{Error, StoreError};
use crate::patient::{DataSource, Gender, PatientFields, PatientStatus};
use crate::store::{PatientFilter, RecordStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of an import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    /// Stored text form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One failed record in an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportError {
    /// 1-based position of the record in the batch
    pub record: usize,
    /// What went wrong
    pub error: String,
    /// The record's legal ID was already stored
    #[serde(default)]
    pub is_duplicate: bool,
}

/// Aggregate outcome of one bulk import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub file_name: String,
    pub total_records: usize,
    pub processed_records: usize,
    pub successful_records: usize,
    pub failed_records: usize,
    pub status: ImportStatus,
    pub error_log: Option<Vec<ImportError>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    fn start(file_name: &str, total_records: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            total_records,
            processed_records: 0,
            successful_records: 0,
            failed_records: 0,
            status: ImportStatus::Processing,
            error_log: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn finish(&mut self, successful: usize, errors: Vec<ImportError>) {
        self.processed_records = self.total_records;
        self.successful_records = successful;
        self.failed_records = errors.len();
        self.status = final_status(successful, &errors);
        self.error_log = if errors.is_empty() { None } else { Some(errors) };
        self.completed_at = Some(Utc::now());
    }
}

/// A job fails only when nothing was imported and at least one record was
/// rejected for a reason other than being a duplicate.
fn final_status(successful: usize, errors: &[ImportError]) -> ImportStatus {
    if successful == 0 && errors.iter().any(|e| !e.is_duplicate) {
        ImportStatus::Failed
    } else {
        ImportStatus::Completed
    }
}

/// An incoming record before validation.
///
/// Accepts the column spellings seen in spreadsheet exports (`national_id`,
/// `legalId`, `name`, ...). Scalar values of any JSON type are read as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawPatientRecord {
    #[serde(
        alias = "legalId",
        alias = "national_id",
        alias = "nationalId",
        deserialize_with = "loose"
    )]
    pub legal_id: Option<String>,
    #[serde(alias = "fullName", alias = "name", deserialize_with = "loose")]
    pub full_name: Option<String>,
    #[serde(deserialize_with = "loose")]
    pub email: Option<String>,
    #[serde(alias = "phone_number", alias = "phoneNumber", deserialize_with = "loose")]
    pub phone: Option<String>,
    #[serde(deserialize_with = "loose")]
    pub address: Option<String>,
    #[serde(deserialize_with = "loose")]
    pub allergies: Option<String>,
    #[serde(alias = "medical_conditions", alias = "medicalConditions", deserialize_with = "loose")]
    pub conditions: Option<String>,
    #[serde(alias = "emergencyContact", deserialize_with = "loose")]
    pub emergency_contact: Option<String>,
    #[serde(deserialize_with = "loose")]
    pub notes: Option<String>,
    #[serde(deserialize_with = "loose")]
    pub status: Option<String>,
    #[serde(alias = "sex", deserialize_with = "loose")]
    pub gender: Option<String>,
}

fn loose<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!("expected a scalar, found {other}"))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl RawPatientRecord {
    /// Parses one loosely-typed record.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the value is not an object of scalars.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        if !value.is_object() {
            return Err(Error::validation("record", "expected an object"));
        }
        serde_json::from_value(value).map_err(|e| Error::validation("record", e.to_string()))
    }

    /// Validates into typed fields. No cryptography happens before this succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a missing legal ID or name, or an
    /// unrecognised status or gender.
    pub fn into_fields(self) -> Result<PatientFields, Error> {
        let legal_id =
            non_blank(self.legal_id).ok_or_else(|| Error::validation("legal_id", "required"))?;
        let full_name =
            non_blank(self.full_name).ok_or_else(|| Error::validation("full_name", "required"))?;

        let status = non_blank(self.status)
            .map(|s| s.parse::<PatientStatus>())
            .transpose()?
            .unwrap_or_default();
        let gender =
            non_blank(self.gender).map(|s| s.parse::<Gender>()).transpose()?.unwrap_or_default();

        Ok(PatientFields {
            legal_id,
            full_name,
            email: non_blank(self.email),
            phone: non_blank(self.phone),
            address: non_blank(self.address),
            allergies: non_blank(self.allergies),
            conditions: non_blank(self.conditions),
            emergency_contact: non_blank(self.emergency_contact),
            notes: non_blank(self.notes),
            status,
            gender,
        })
    }
}

/// Outcome of a single record within a batch.
enum RecordOutcome {
    Imported(Uuid),
    Duplicate,
}

/// Runs bulk imports against a store.
pub struct ImportPipeline<'a, S: RecordStore> {
    store: &'a S,
    codec: &'a RecordCodec,
}

impl<'a, S: RecordStore> ImportPipeline<'a, S> {
    /// Creates a pipeline over a store and codec.
    #[must_use]
    pub const fn new(store: &'a S, codec: &'a RecordCodec) -> Self {
        Self { store, codec }
    }

    /// Imports `records` in order and returns the finished job.
    ///
    /// Per-record failures never abort the batch; they land in `error_log`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` only if the job itself cannot be persisted.
    pub fn run(&self, records: Vec<Value>, source_label: &str) -> Result<ImportJob, Error> {
        let mut job = ImportJob::start(source_label, records.len());
        self.store.insert_job(&job)?;
        tracing::info!(
            job_id = %job.id,
            source = source_label,
            total = job.total_records,
            "import started"
        );

        let mut successful = 0;
        let mut errors = Vec::new();

        for (index, value) in records.into_iter().enumerate() {
            let position = index + 1;
            match self.import_one(value) {
                Ok(RecordOutcome::Imported(id)) => {
                    successful += 1;
                    tracing::debug!(
                        job_id = %job.id,
                        record = position,
                        patient_id = %id,
                        "record imported"
                    );
                }
                Ok(RecordOutcome::Duplicate) => {
                    tracing::info!(
                        job_id = %job.id,
                        record = position,
                        "duplicate legal ID skipped"
                    );
                    errors.push(ImportError {
                        record: position,
                        error: Error::DuplicateRecord.to_string(),
                        is_duplicate: true,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        record = position,
                        error = %e,
                        "record rejected"
                    );
                    errors.push(ImportError {
                        record: position,
                        error: e.to_string(),
                        is_duplicate: false,
                    });
                }
            }
        }

        job.finish(successful, errors);
        self.store.update_job(&job)?;
        tracing::info!(
            job_id = %job.id,
            status = job.status.as_str(),
            successful = job.successful_records,
            failed = job.failed_records,
            "import finished"
        );

        Ok(job)
    }

    fn import_one(&self, value: Value) -> Result<RecordOutcome, Error> {
        let fields = RawPatientRecord::from_value(value)?.into_fields()?;

        let digest = self.codec.legal_id_digest(&fields.legal_id);
        if self.store.find_one(&PatientFilter::LegalIdDigest(digest))?.is_some() {
            return Ok(RecordOutcome::Duplicate);
        }

        let row = self.codec.encode(&fields, DataSource::Import)?;
        match self.store.insert(&row) {
            Ok(()) => Ok(RecordOutcome::Imported(row.id)),
            // Lost a race with a concurrent writer after the lookup
            Err(StoreError::UniqueViolation(_)) => Ok(RecordOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }
}
