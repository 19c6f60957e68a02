//! `VitalVault` operator CLI.
//!
//! Every command prints JSON to stdout; logs go to stderr and are filtered
//! with `RUST_LOG`.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::RngCore;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;
use vitalvault::config::{INDEX_SALT_ENV, SECRET_ENV};
use vitalvault::prelude::*;
use vitalvault_sqlite::SqliteStore;

#[derive(Parser)]
#[command(name = "vitalvault")]
#[command(about = "Encrypted patient record store", long_about = None)]
struct Cli {
    /// Master secret the field key is derived from
    #[arg(long, global = true, env = SECRET_ENV, hide_env_values = true)]
    secret: Option<String>,

    /// Salt for lookup digests; must stay stable for the life of the data
    #[arg(long, global = true, env = INDEX_SALT_ENV, hide_env_values = true)]
    index_salt: Option<String>,

    /// SQLite database file
    #[arg(long, global = true, env = "VITALVAULT_DB", default_value = "vitalvault.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh random master secret
    Keygen,
    /// Create the database schema
    Init,
    /// Create one patient
    Create(CreateArgs),
    /// Change attributes of a patient
    Update(UpdateArgs),
    /// Import a JSON array of patient objects
    Import {
        /// JSON file holding an array of records
        #[arg(short, long)]
        file: PathBuf,
        /// Label stored on the import job (defaults to the file name)
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Show an import job report
    Job { id: Uuid },
    /// Show a patient by id
    Get { id: Uuid },
    /// Find a patient by legal ID
    Search { legal_id: String },
    /// List patients
    List {
        /// Only patients in this status
        #[arg(long)]
        status: Option<PatientStatus>,
    },
    /// Permanently delete a patient
    Delete { id: Uuid },
    /// Issue (or replace) a patient's portal access code
    IssueCode { id: Uuid },
    /// Check a portal access code
    VerifyCode {
        code: String,
        /// Check against this patient only
        #[arg(long)]
        id: Option<Uuid>,
    },
    /// Insert synthetic demo patients
    Seed {
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    legal_id: String,
    #[arg(long)]
    full_name: String,
    #[command(flatten)]
    optional: OptionalArgs,
    #[arg(long, default_value_t = PatientStatus::Active)]
    status: PatientStatus,
    #[arg(long, default_value_t = Gender::Unspecified)]
    gender: Gender,
}

#[derive(Args)]
struct UpdateArgs {
    id: Uuid,
    #[arg(long)]
    legal_id: Option<String>,
    #[arg(long)]
    full_name: Option<String>,
    // An empty string clears an optional attribute
    #[command(flatten)]
    optional: OptionalArgs,
    #[arg(long)]
    status: Option<PatientStatus>,
    #[arg(long)]
    gender: Option<Gender>,
}

#[derive(Args)]
struct OptionalArgs {
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    allergies: Option<String>,
    #[arg(long)]
    conditions: Option<String>,
    #[arg(long)]
    emergency_contact: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

fn main() -> Result<()> {
    // A missing .env is normal
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            let mut secret = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut secret);
            print_json(&json!({ "secret": hex::encode(secret) }))
        }
        Commands::Init => {
            SqliteStore::open(&cli.database)
                .with_context(|| format!("Failed to open {}", cli.database.display()))?;
            tracing::info!(database = %cli.database.display(), "Schema ready");
            print_json(&json!({ "database": cli.database }))
        }
        ref command => {
            let vault = open_vault(&cli)?;
            run(&vault, command)
        }
    }
}

fn open_vault(cli: &Cli) -> Result<PatientVault<SqliteStore>> {
    let secret = cli
        .secret
        .as_deref()
        .with_context(|| {
            format!("{SECRET_ENV} is not set; run `vitalvault keygen` to create one")
        })?;
    let mut config = VaultConfig::new(secret);
    if let Some(salt) = &cli.index_salt {
        config = config.with_index_salt(salt.as_str());
    }

    let store = SqliteStore::open(&cli.database)
        .with_context(|| format!("Failed to open {}", cli.database.display()))?;
    PatientVault::from_config(store, &config).context("Failed to derive the field key")
}

fn run(vault: &PatientVault<SqliteStore>, command: &Commands) -> Result<()> {
    match command {
        Commands::Keygen | Commands::Init => unreachable!("handled before the vault is opened"),
        Commands::Create(args) => {
            let fields = PatientFields {
                email: args.optional.email.clone(),
                phone: args.optional.phone.clone(),
                address: args.optional.address.clone(),
                allergies: args.optional.allergies.clone(),
                conditions: args.optional.conditions.clone(),
                emergency_contact: args.optional.emergency_contact.clone(),
                notes: args.optional.notes.clone(),
                status: args.status,
                gender: args.gender,
                ..PatientFields::new(&args.legal_id, &args.full_name)
            };
            print_json(&vault.create_record(&fields)?)
        }
        Commands::Update(args) => {
            let update = PatientUpdate {
                legal_id: args.legal_id.clone(),
                full_name: args.full_name.clone(),
                email: args.optional.email.clone(),
                phone: args.optional.phone.clone(),
                address: args.optional.address.clone(),
                allergies: args.optional.allergies.clone(),
                conditions: args.optional.conditions.clone(),
                emergency_contact: args.optional.emergency_contact.clone(),
                notes: args.optional.notes.clone(),
                status: args.status,
                gender: args.gender,
            };
            print_json(&vault.update_record(args.id, &update)?)
        }
        Commands::Import { file, label } => {
            let records = read_records(file)?;
            let label = label.clone().unwrap_or_else(|| file_label(file));
            print_json(&vault.run_import(records, &label)?)
        }
        Commands::Job { id } => print_json(&vault.get_import_job(*id)?),
        Commands::Get { id } => print_json(&vault.get_record(*id)?),
        Commands::Search { legal_id } => match vault.search_by_legal_id(legal_id)? {
            Some(patient) => print_json(&patient),
            None => bail!("No patient with that legal ID"),
        },
        Commands::List { status } => {
            let filter = status.map_or(PatientFilter::All, PatientFilter::Status);
            print_json(&vault.list_records(&filter)?)
        }
        Commands::Delete { id } => {
            vault.delete_record(*id)?;
            print_json(&json!({ "deleted": id }))
        }
        Commands::IssueCode { id } => {
            let code = vault.issue_access_code(*id)?;
            print_json(&json!({ "id": id, "access_code": code }))
        }
        Commands::VerifyCode { code, id: Some(id) } => {
            let row = vault
                .store()
                .find_one(&PatientFilter::Id(*id))?
                .ok_or(Error::NotFound(*id))?;
            let valid = row
                .access_code_digest
                .is_some_and(|digest| vault.verify_access_code(code, &digest));
            print_json(&json!({ "id": id, "valid": valid }))
        }
        Commands::VerifyCode { code, id: None } => {
            let patient = vault.find_by_access_code(code)?;
            print_json(&json!({
                "valid": patient.is_some(),
                "id": patient.map(|p| p.id),
            }))
        }
        Commands::Seed { count } => {
            let created = vault.seed_demo_records(*count)?;
            print_json(&json!({ "created": created.len() }))
        }
    }
}

fn read_records(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match value {
        Value::Array(records) => Ok(records),
        _ => bail!("{} must hold a JSON array of records", path.display()),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_status() {
        let cli = Cli::try_parse_from(["vitalvault", "list", "--status", "Archived"]).unwrap();
        assert!(matches!(cli.command, Commands::List { status: Some(PatientStatus::Archived) }));
    }

    #[test]
    fn test_file_label() {
        assert_eq!(file_label(Path::new("/tmp/uploads/batch.json")), "batch.json");
    }

    #[test]
    fn test_read_records_requires_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.json");
        std::fs::write(&path, r#"{"legal_id": "X"}"#).unwrap();

        assert!(read_records(&path).is_err());

        std::fs::write(&path, r#"[{"legal_id": "X"}, 42]"#).unwrap();
        assert_eq!(read_records(&path).unwrap().len(), 2);
    }
}
