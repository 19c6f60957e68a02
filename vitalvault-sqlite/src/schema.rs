//! Table layout: two columns per encrypted attribute plus digest columns.

use vitalvault::patient::PatientField;

/// Column list shared by every `SELECT`, `INSERT` and `UPDATE` on `patients`.
///
/// Order: `id`, then `<attr>_ciphertext, <attr>_nonce` for each attribute in
/// [`PatientField::ALL`] order, then digests, enums and timestamps.
pub fn patient_columns() -> Vec<String> {
    let mut columns = vec!["id".to_string()];
    for field in PatientField::ALL {
        columns.push(format!("{}_ciphertext", field.name()));
        columns.push(format!("{}_nonce", field.name()));
    }
    columns.extend(
        [
            "legal_id_digest",
            "access_code_digest",
            "status",
            "gender",
            "source",
            "created_at",
            "updated_at",
        ]
        .map(String::from),
    );
    columns
}

/// DDL for both tables and the access-code index.
pub fn create_tables() -> String {
    let encrypted: String = PatientField::ALL
        .iter()
        .map(|field| {
            let null = if field.is_required() { " NOT NULL" } else { "" };
            format!(
                "    {name}_ciphertext BLOB{null},\n    {name}_nonce BLOB{null},\n",
                name = field.name()
            )
        })
        .collect();

    format!(
        r"
CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
{encrypted}    legal_id_digest TEXT NOT NULL UNIQUE,
    access_code_digest TEXT,
    status TEXT NOT NULL,
    gender TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_patients_access_code_digest
    ON patients (access_code_digest);

CREATE TABLE IF NOT EXISTS import_jobs (
    id TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    total_records INTEGER NOT NULL,
    processed_records INTEGER NOT NULL,
    successful_records INTEGER NOT NULL,
    failed_records INTEGER NOT NULL,
    status TEXT NOT NULL,
    error_log TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_columns_per_attribute() {
        let columns = patient_columns();
        assert_eq!(columns.len(), 1 + PatientField::ALL.len() * 2 + 7);
        assert!(columns.contains(&"emergency_contact_ciphertext".to_string()));
        assert!(columns.contains(&"emergency_contact_nonce".to_string()));
    }

    #[test]
    fn test_required_columns_not_null() {
        let ddl = create_tables();
        assert!(ddl.contains("legal_id_ciphertext BLOB NOT NULL"));
        assert!(ddl.contains("email_ciphertext BLOB,"));
    }
}
