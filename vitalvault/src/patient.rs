//! Patient domain types: plaintext input, persisted row, and decoded view.

use crate::blind_index::LookupDigest;
use crate::cipher::EncryptedField;
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Table name used for encryption and index contexts.
pub const PATIENTS_TABLE: &str = "patients";

/// Value shown in place of a field whose ciphertext could not be opened.
pub const DECRYPTION_FAILED: &str = "[decryption failed]";

/// Every encrypted attribute of a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientField {
    LegalId,
    FullName,
    Email,
    Phone,
    Address,
    Allergies,
    Conditions,
    EmergencyContact,
    Notes,
    AccessCode,
}

impl PatientField {
    /// All encrypted attributes, in column order.
    pub const ALL: [Self; 10] = [
        Self::LegalId,
        Self::FullName,
        Self::Email,
        Self::Phone,
        Self::Address,
        Self::Allergies,
        Self::Conditions,
        Self::EmergencyContact,
        Self::Notes,
        Self::AccessCode,
    ];

    /// Attributes an operator or an import can supply directly.
    /// The access code is only ever set by the issuer.
    pub const EDITABLE: [Self; 9] = [
        Self::LegalId,
        Self::FullName,
        Self::Email,
        Self::Phone,
        Self::Address,
        Self::Allergies,
        Self::Conditions,
        Self::EmergencyContact,
        Self::Notes,
    ];

    /// Column prefix of this attribute.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LegalId => "legal_id",
            Self::FullName => "full_name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::Allergies => "allergies",
            Self::Conditions => "conditions",
            Self::EmergencyContact => "emergency_contact",
            Self::Notes => "notes",
            Self::AccessCode => "access_code",
        }
    }

    /// Whether every stored patient must carry this attribute.
    #[must_use]
    pub const fn is_required(self) -> bool {
        matches!(self, Self::LegalId | Self::FullName)
    }
}

impl fmt::Display for PatientField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! plain_enum {
    (
        $(#[$meta:meta])* $name:ident, $field:literal, default = $default:ident,
        { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Stored text form.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::validation(
                        $field,
                        format!("unrecognised value '{other}'"),
                    )),
                }
            }
        }
    };
}

plain_enum!(
    /// Administrative status of a patient.
    PatientStatus, "status", default = Active, {
        Active => "active",
        Inactive => "inactive",
        Archived => "archived",
    }
);

plain_enum!(
    /// Gender as recorded at registration.
    Gender, "gender", default = Unspecified, {
        Female => "female",
        Male => "male",
        Other => "other",
        Unspecified => "unspecified",
    }
);

plain_enum!(
    /// Where a record came from.
    DataSource, "source", default = Manual, {
        Manual => "manual",
        Import => "import",
        Seed => "seed",
    }
);

/// Validated plaintext attributes of a new patient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientFields {
    pub legal_id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub allergies: Option<String>,
    pub conditions: Option<String>,
    pub emergency_contact: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub status: PatientStatus,
    #[serde(default)]
    pub gender: Gender,
}

impl PatientFields {
    /// Creates fields with the two required attributes set.
    #[must_use]
    pub fn new(legal_id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            legal_id: legal_id.into(),
            full_name: full_name.into(),
            ..Self::default()
        }
    }

    /// Returns the plaintext of `field`, if any.
    #[must_use]
    pub fn value(&self, field: PatientField) -> Option<&str> {
        match field {
            PatientField::LegalId => Some(&self.legal_id),
            PatientField::FullName => Some(&self.full_name),
            PatientField::Email => self.email.as_deref(),
            PatientField::Phone => self.phone.as_deref(),
            PatientField::Address => self.address.as_deref(),
            PatientField::Allergies => self.allergies.as_deref(),
            PatientField::Conditions => self.conditions.as_deref(),
            PatientField::EmergencyContact => self.emergency_contact.as_deref(),
            PatientField::Notes => self.notes.as_deref(),
            PatientField::AccessCode => None,
        }
    }

    /// Checks that required attributes are present.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the first missing attribute.
    pub fn validate(&self) -> Result<(), Error> {
        for field in PatientField::EDITABLE.into_iter().filter(|f| f.is_required()) {
            if self.value(field).map_or(true, |v| v.trim().is_empty()) {
                return Err(Error::validation(field.name(), "required"));
            }
        }
        Ok(())
    }
}

/// A partial update. `None` leaves an attribute untouched; `Some` re-encrypts it.
/// For optional attributes, `Some("")` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientUpdate {
    pub legal_id: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub allergies: Option<String>,
    pub conditions: Option<String>,
    pub emergency_contact: Option<String>,
    pub notes: Option<String>,
    pub status: Option<PatientStatus>,
    pub gender: Option<Gender>,
}

impl PatientUpdate {
    /// Returns the new plaintext for `field`, if the update touches it.
    #[must_use]
    pub fn value(&self, field: PatientField) -> Option<&str> {
        match field {
            PatientField::LegalId => self.legal_id.as_deref(),
            PatientField::FullName => self.full_name.as_deref(),
            PatientField::Email => self.email.as_deref(),
            PatientField::Phone => self.phone.as_deref(),
            PatientField::Address => self.address.as_deref(),
            PatientField::Allergies => self.allergies.as_deref(),
            PatientField::Conditions => self.conditions.as_deref(),
            PatientField::EmergencyContact => self.emergency_contact.as_deref(),
            PatientField::Notes => self.notes.as_deref(),
            PatientField::AccessCode => None,
        }
    }

    /// Checks that the update does not blank a required attribute.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the first blanked attribute.
    pub fn validate(&self) -> Result<(), Error> {
        for field in PatientField::EDITABLE.into_iter().filter(|f| f.is_required()) {
            if self.value(field).is_some_and(|v| v.trim().is_empty()) {
                return Err(Error::validation(field.name(), "required"));
            }
        }
        Ok(())
    }
}

/// A patient as persisted: one nullable encrypted pair per attribute, plus
/// lookup digests and plaintext enums.
///
/// Rows written through [`RecordCodec`](crate::codec::RecordCodec) always
/// carry `legal_id` and `full_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRow {
    pub id: Uuid,
    pub legal_id: Option<EncryptedField>,
    pub legal_id_digest: LookupDigest,
    pub full_name: Option<EncryptedField>,
    pub email: Option<EncryptedField>,
    pub phone: Option<EncryptedField>,
    pub address: Option<EncryptedField>,
    pub allergies: Option<EncryptedField>,
    pub conditions: Option<EncryptedField>,
    pub emergency_contact: Option<EncryptedField>,
    pub notes: Option<EncryptedField>,
    pub access_code: Option<EncryptedField>,
    pub access_code_digest: Option<LookupDigest>,
    pub status: PatientStatus,
    pub gender: Gender,
    pub source: DataSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientRow {
    /// Stored ciphertext of `field`.
    #[must_use]
    pub fn encrypted(&self, field: PatientField) -> Option<&EncryptedField> {
        self.slot(field).as_ref()
    }

    /// Replaces the stored ciphertext of `field`.
    pub fn set_encrypted(&mut self, field: PatientField, value: Option<EncryptedField>) {
        *self.slot_mut(field) = value;
    }

    fn slot(&self, field: PatientField) -> &Option<EncryptedField> {
        match field {
            PatientField::LegalId => &self.legal_id,
            PatientField::FullName => &self.full_name,
            PatientField::Email => &self.email,
            PatientField::Phone => &self.phone,
            PatientField::Address => &self.address,
            PatientField::Allergies => &self.allergies,
            PatientField::Conditions => &self.conditions,
            PatientField::EmergencyContact => &self.emergency_contact,
            PatientField::Notes => &self.notes,
            PatientField::AccessCode => &self.access_code,
        }
    }

    fn slot_mut(&mut self, field: PatientField) -> &mut Option<EncryptedField> {
        match field {
            PatientField::LegalId => &mut self.legal_id,
            PatientField::FullName => &mut self.full_name,
            PatientField::Email => &mut self.email,
            PatientField::Phone => &mut self.phone,
            PatientField::Address => &mut self.address,
            PatientField::Allergies => &mut self.allergies,
            PatientField::Conditions => &mut self.conditions,
            PatientField::EmergencyContact => &mut self.emergency_contact,
            PatientField::Notes => &mut self.notes,
            PatientField::AccessCode => &mut self.access_code,
        }
    }
}

/// Result of opening one encrypted attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The attribute decrypted cleanly.
    Clear(String),
    /// The ciphertext was corrupt, tampered, or written under another key.
    Unreadable,
}

impl Decoded {
    /// Plaintext, or [`DECRYPTION_FAILED`] for unreadable attributes.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Clear(value) => value,
            Self::Unreadable => DECRYPTION_FAILED,
        }
    }

    #[must_use]
    pub const fn is_unreadable(&self) -> bool {
        matches!(self, Self::Unreadable)
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Decoded {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Best-effort plaintext view of a stored patient.
///
/// Attributes stored as null are absent from `fields`; attributes that
/// failed to decrypt are present as [`Decoded::Unreadable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patient {
    pub id: Uuid,
    pub fields: BTreeMap<PatientField, Decoded>,
    pub status: PatientStatus,
    pub gender: Gender,
    pub source: DataSource,
    pub has_access_code: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    /// Decoded value of `field`, if one is stored.
    #[must_use]
    pub fn get(&self, field: PatientField) -> Option<&Decoded> {
        self.fields.get(&field)
    }

    /// Plaintext (or sentinel) of `field`, if one is stored.
    #[must_use]
    pub fn text(&self, field: PatientField) -> Option<&str> {
        self.get(field).map(Decoded::as_str)
    }

    #[must_use]
    pub fn legal_id(&self) -> Option<&str> {
        self.text(PatientField::LegalId)
    }

    #[must_use]
    pub fn full_name(&self) -> Option<&str> {
        self.text(PatientField::FullName)
    }

    /// Attributes that could not be decrypted.
    #[must_use]
    pub fn unreadable_fields(&self) -> Vec<PatientField> {
        self.fields.iter().filter(|(_, v)| v.is_unreadable()).map(|(f, _)| *f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parsing_is_lenient_on_case_and_padding() {
        assert_eq!(" Female ".parse::<Gender>().unwrap(), Gender::Female);
        assert_eq!("ARCHIVED".parse::<PatientStatus>().unwrap(), PatientStatus::Archived);
        assert_eq!("import".parse::<DataSource>().unwrap(), DataSource::Import);
    }

    #[test]
    fn test_enum_parsing_rejects_unknown() {
        let err = "sometimes".parse::<PatientStatus>().unwrap_err();
        assert!(matches!(err, Error::Validation { field: "status", .. }));
    }

    #[test]
    fn test_fields_validate_required() {
        assert!(PatientFields::new("V-1", "Ada").validate().is_ok());

        let err = PatientFields::new("  ", "Ada").validate().unwrap_err();
        assert!(matches!(err, Error::Validation { field: "legal_id", .. }));

        let err = PatientFields::new("V-1", "").validate().unwrap_err();
        assert!(matches!(err, Error::Validation { field: "full_name", .. }));
    }

    #[test]
    fn test_update_cannot_blank_required() {
        let update = PatientUpdate {
            full_name: Some(String::new()),
            ..PatientUpdate::default()
        };
        assert!(update.validate().is_err());

        let update = PatientUpdate {
            email: Some(String::new()),
            ..PatientUpdate::default()
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_field_names_are_unique() {
        let mut names: Vec<_> = PatientField::ALL.iter().map(|f| f.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PatientField::ALL.len());
    }

    #[test]
    fn test_decoded_sentinel() {
        assert_eq!(Decoded::Unreadable.as_str(), DECRYPTION_FAILED);
        assert_eq!(Decoded::Clear("x".to_string()).to_string(), "x");
    }
}
