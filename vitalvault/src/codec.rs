//! Record codec: turns plaintext patients into encrypted rows and back.
//!
//! Encoding encrypts every non-empty attribute and digests the legal ID.
//! Decoding opens each attribute independently: a field that fails to
//! decrypt becomes [`Decoded::Unreadable`] and the rest of the record is
//! still returned.

use crate::blind_index::{LookupDigest, LookupHasher};
use crate::cipher::{EncryptedField, FieldCipher};
use crate::context::{FieldContext, IndexContext};
use crate::error::Error;
use crate::patient::{
    DataSource, Decoded, Patient, PatientField, PatientFields, PatientRow, PatientUpdate,
    PATIENTS_TABLE,
};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Composes [`FieldCipher`] and [`LookupHasher`] across all patient attributes.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    cipher: FieldCipher,
    hasher: LookupHasher,
}

impl RecordCodec {
    /// Creates a codec from its two schemes.
    #[must_use]
    pub const fn new(cipher: FieldCipher, hasher: LookupHasher) -> Self {
        Self { cipher, hasher }
    }

    /// Encryption context of a patient attribute.
    #[must_use]
    pub fn field_context(field: PatientField) -> FieldContext {
        FieldContext::new(PATIENTS_TABLE, field.name())
    }

    /// Index context of a searchable patient attribute.
    ///
    /// Shares the table and column of the attribute's encryption context.
    #[must_use]
    pub fn index_context(field: PatientField) -> IndexContext {
        IndexContext::from(&Self::field_context(field))
    }

    /// Lookup digest of a legal ID, as used for storage and search.
    #[must_use]
    pub fn legal_id_digest(&self, legal_id: &str) -> LookupDigest {
        self.hasher.digest(legal_id, &Self::index_context(PatientField::LegalId))
    }

    /// Lookup digest of a portal access code.
    #[must_use]
    pub fn access_code_digest(&self, code: &str) -> LookupDigest {
        self.hasher.digest(code, &Self::index_context(PatientField::AccessCode))
    }

    /// Constant-time check of a candidate access code against a stored digest.
    #[must_use]
    pub fn verify_access_code(&self, candidate: &str, stored: &LookupDigest) -> bool {
        self.hasher.verify(candidate, stored, &Self::index_context(PatientField::AccessCode))
    }

    /// Encrypts one attribute. Blank values are stored as null.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if the cipher fails.
    pub fn seal(&self, field: PatientField, value: &str) -> Result<Option<EncryptedField>, Error> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(None);
        }
        self.cipher.encrypt(value, &Self::field_context(field)).map(Some)
    }

    /// Opens one attribute.
    ///
    /// # Errors
    ///
    /// Returns a decryption error if the ciphertext does not authenticate.
    pub fn open(&self, field: PatientField, encrypted: &EncryptedField) -> Result<String, Error> {
        self.cipher.decrypt(encrypted, &Self::field_context(field))
    }

    /// Encodes validated fields into a new row with a fresh id.
    ///
    /// Uniqueness of the legal ID is the caller's concern and must be checked
    /// before the row is persisted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if a required attribute is blank, or
    /// `Error::EncryptionFailed`.
    pub fn encode(&self, fields: &PatientFields, source: DataSource) -> Result<PatientRow, Error> {
        fields.validate()?;

        let now = Utc::now();
        let mut row = PatientRow {
            id: Uuid::new_v4(),
            legal_id: None,
            legal_id_digest: self.legal_id_digest(&fields.legal_id),
            full_name: None,
            email: None,
            phone: None,
            address: None,
            allergies: None,
            conditions: None,
            emergency_contact: None,
            notes: None,
            access_code: None,
            access_code_digest: None,
            status: fields.status,
            gender: fields.gender,
            source,
            created_at: now,
            updated_at: now,
        };

        for field in PatientField::EDITABLE {
            let sealed = match fields.value(field) {
                Some(value) => self.seal(field, value)?,
                None => None,
            };
            row.set_encrypted(field, sealed);
        }

        Ok(row)
    }

    /// Applies an update to a stored row, re-encrypting only touched attributes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the update blanks a required attribute,
    /// or `Error::EncryptionFailed`.
    pub fn encode_update(
        &self,
        row: &PatientRow,
        update: &PatientUpdate,
    ) -> Result<PatientRow, Error> {
        update.validate()?;

        let mut next = row.clone();
        for field in PatientField::EDITABLE {
            if let Some(value) = update.value(field) {
                next.set_encrypted(field, self.seal(field, value)?);
            }
        }
        if let Some(legal_id) = &update.legal_id {
            next.legal_id_digest = self.legal_id_digest(legal_id);
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(gender) = update.gender {
            next.gender = gender;
        }
        next.updated_at = Utc::now();

        Ok(next)
    }

    /// Decodes a row into a best-effort plaintext view.
    ///
    /// Never fails: unreadable attributes are reported per field.
    #[must_use]
    pub fn decode(&self, row: &PatientRow) -> Patient {
        let fields: BTreeMap<PatientField, Decoded> = PatientField::ALL
            .into_iter()
            .filter_map(|field| {
                row.encrypted(field)
                    .map(|enc| (field, self.decode_field(row, field, enc)))
            })
            .collect();

        Patient {
            id: row.id,
            fields,
            status: row.status,
            gender: row.gender,
            source: row.source,
            has_access_code: row.access_code_digest.is_some(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    fn decode_field(
        &self,
        row: &PatientRow,
        field: PatientField,
        encrypted: &EncryptedField,
    ) -> Decoded {
        match self.open(field, encrypted) {
            Ok(value) => Decoded::Clear(value),
            Err(e) => {
                tracing::warn!(
                    patient_id = %row.id,
                    field = field.name(),
                    error = %e,
                    "field decryption failed"
                );
                Decoded::Unreadable
            }
        }
    }
}
