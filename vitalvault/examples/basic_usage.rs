//! Basic usage example for `VitalVault`.

use serde_json::json;
use std::sync::Arc;
use vitalvault::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("VitalVault Basic Usage Example");
    println!("==============================\n");

    // Derive the process key once; in production the secret comes from VITALVAULT_SECRET
    let key = Arc::new(KeyMaterial::derive("example-secret-do-not-use")?);
    let vault = PatientVault::new(MemoryStore::new(), key, LookupHasher::default());
    println!("✓ Vault created over an in-memory store\n");

    // Create a patient
    let patient = vault.create_record(&PatientFields {
        email: Some("ada@example.com".to_string()),
        allergies: Some("penicillin".to_string()),
        ..PatientFields::new("V-1234", "Ada Lovelace")
    })?;
    println!("✓ Created patient {}", patient.id);

    // What the store actually holds
    let row = vault.store().find_one(&PatientFilter::Id(patient.id))?.ok_or("row missing")?;
    println!("  - legal_id_digest: {}", row.legal_id_digest);
    let email_len = row.email.as_ref().map_or(0, |f| f.ciphertext.len());
    println!("  - email ciphertext: {email_len} bytes\n");

    // Search by legal ID, typed differently
    let found = vault.search_by_legal_id("  v-1234 ")?.ok_or("search found nothing")?;
    println!("✓ Search by legal ID found {}\n", found.full_name().unwrap_or_default());

    // Duplicates are rejected
    match vault.create_record(&PatientFields::new("v-1234", "Someone Else")) {
        Err(Error::DuplicateRecord) => println!("✓ Duplicate legal ID rejected\n"),
        other => println!("✗ Unexpected result: {other:?}\n"),
    }

    // Portal access code
    let code = vault.issue_access_code(patient.id)?;
    let owner = vault.find_by_access_code(&code)?.map(|p| p.id);
    println!("✓ Issued access code {code}, owner matches: {}\n", owner == Some(patient.id));

    // Bulk import with one bad record and one duplicate
    let job = vault.run_import(
        vec![
            json!({ "national_id": "V-2001", "name": "Grace Hopper" }),
            json!({ "name": "No Legal Id" }),
            json!({ "legalId": "V-1234", "fullName": "Ada Again" }),
        ],
        "example.json",
    )?;
    println!(
        "✓ Import {}: {} ok, {} failed, status {}",
        job.id,
        job.successful_records,
        job.failed_records,
        job.status.as_str()
    );
    for error in job.error_log.iter().flatten() {
        println!("  - record {}: {}", error.record, error.error);
    }

    println!("\n==============================");
    println!("All operations successful! 🎉");

    Ok(())
}
