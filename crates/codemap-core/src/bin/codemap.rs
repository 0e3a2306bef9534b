use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use tracing::info;

use codemap_core::clock::SystemClock;
use codemap_core::logging::init_logging;
use codemap_core::storage::{DiskStorage, UploadStorage};
use codemap_core::store::{MemorySymbolStore, SqliteSymbolStore, SymbolStore};
use codemap_core::{CodemapConfig, CodemapService, UploadId};

#[derive(Debug, Parser)]
#[command(
    name = "codemap",
    version,
    about = "Safe ingestion and structural analysis of zipped Python codebases"
)]
struct Cli {
    /// Directory holding extracted uploads. Overrides CODEMAP_UPLOAD_DIR.
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,
    /// Increase logging verbosity (use -vv for trace level).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check an archive against the ingestion policy without extracting it.
    Validate { archive: PathBuf },
    /// Extract and analyze one archive, printing its aggregate and files.
    Analyze {
        archive: PathBuf,
        /// Persist symbol records into this SQLite database.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Keep the extracted tree under the storage root.
        #[arg(long)]
        keep: bool,
    },
    /// Analyze two archives and print their structural diff.
    Compare { before: PathBuf, after: PathBuf },
    /// Inspect a symbol database written by `analyze --db`.
    Show {
        #[arg(long)]
        db: PathBuf,
        upload_id: Option<String>,
        /// Print the symbols of one file instead of the whole upload.
        #[arg(long, requires = "upload_id")]
        file: Option<String>,
    },
    /// Remove expired uploads from the storage root.
    Sweep {
        #[arg(long)]
        max_age_days: Option<i64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CodemapConfig::from_env().context("reading CODEMAP_* configuration")?;
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    init_logging(&config.logging)?;
    if let Some(root) = &cli.storage_root {
        config.storage_root = root.clone();
    }

    match cli.command {
        Command::Validate { archive } => validate(config, &archive),
        Command::Analyze { archive, db, keep } => analyze(config, &archive, db, keep),
        Command::Compare { before, after } => compare(config, &before, &after),
        Command::Show { db, upload_id, file } => show(&db, upload_id, file),
        Command::Sweep { max_age_days } => sweep(config, max_age_days),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_archive(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading archive {}", path.display()))
}

/// A service whose uploads live in `storage_root`, or in a throwaway
/// directory when `keep` is false. The returned guard must outlive the
/// service.
fn build_service(
    mut config: CodemapConfig,
    store: Arc<dyn SymbolStore>,
    keep: bool,
) -> Result<(CodemapService, Option<tempfile::TempDir>)> {
    let scratch = if keep {
        None
    } else {
        let dir = tempfile::tempdir().context("creating scratch storage")?;
        config.storage_root = dir.path().to_path_buf();
        Some(dir)
    };
    let storage = Arc::new(DiskStorage::new(&config.storage_root)?);
    let service = CodemapService::with_components(config, storage, store, Arc::new(SystemClock))?;
    Ok((service, scratch))
}

fn ingest(service: &CodemapService, archive: &Path) -> Result<UploadId> {
    let bytes = read_archive(archive)?;
    let id = service
        .submit_upload(&bytes)
        .with_context(|| format!("submitting {}", archive.display()))?;
    service
        .trigger_analysis(&id)
        .with_context(|| format!("analyzing {}", archive.display()))?;
    Ok(id)
}

fn validate(config: CodemapConfig, archive: &Path) -> Result<()> {
    let bytes = read_archive(archive)?;
    let (service, _scratch) = build_service(config, Arc::new(MemorySymbolStore::new()), false)?;
    match service.validate_archive(&bytes) {
        Ok(manifest) => print_json(&json!({
            "accepted": true,
            "compressed_bytes": manifest.compressed_bytes,
            "uncompressed_bytes": manifest.uncompressed_bytes,
            "entries": manifest.entries.len(),
            "parse_candidates": manifest.parse_candidates().count(),
        })),
        Err(rejection) => {
            print_json(&json!({
                "accepted": false,
                "reason": rejection.reason,
                "detail": rejection.detail,
            }))?;
            bail!("archive rejected: {rejection}")
        }
    }
}

fn analyze(config: CodemapConfig, archive: &Path, db: Option<PathBuf>, keep: bool) -> Result<()> {
    let store: Arc<dyn SymbolStore> = match &db {
        Some(path) => Arc::new(
            SqliteSymbolStore::open(path)
                .with_context(|| format!("opening symbol database {}", path.display()))?,
        ),
        None => Arc::new(MemorySymbolStore::new()),
    };
    let (service, _scratch) = build_service(config, store, keep)?;
    let id = ingest(&service, archive)?;

    print_json(&json!({
        "upload_id": id,
        "root": service.upload(&id)?.root,
        "aggregate": service.get_aggregate(&id)?,
        "files": service.list_files(&id)?,
    }))?;
    info!(upload_id = %id, kept = keep, "analysis complete");
    Ok(())
}

fn compare(config: CodemapConfig, before: &Path, after: &Path) -> Result<()> {
    let (service, _scratch) = build_service(config, Arc::new(MemorySymbolStore::new()), false)?;
    let id_a = ingest(&service, before)?;
    let id_b = ingest(&service, after)?;
    print_json(&service.compare(&id_a, &id_b)?)
}

fn show(db: &Path, upload_id: Option<String>, file: Option<String>) -> Result<()> {
    if !db.exists() {
        bail!("symbol database {} does not exist", db.display());
    }
    let store = SqliteSymbolStore::open(db)?;
    let Some(raw) = upload_id else {
        return print_json(&store.ingested_uploads()?);
    };
    let id = UploadId::parse(&raw)?;
    match file {
        Some(path) => print_json(&store.get_file(&id, &path)?),
        None => {
            let entry = store.get(&id)?;
            print_json(&json!({
                "upload_id": id,
                "aggregate": entry.aggregate(),
                "files": entry.listing(),
            }))
        }
    }
}

fn sweep(mut config: CodemapConfig, max_age_days: Option<i64>) -> Result<()> {
    if let Some(days) = max_age_days {
        if days < 0 {
            bail!("--max-age-days must not be negative");
        }
        config.retention.max_age = chrono::Duration::try_days(days)
            .with_context(|| format!("--max-age-days {days} is out of range"))?;
    }
    let storage = Arc::new(DiskStorage::new(&config.storage_root)?);
    let known = storage.uploads()?.len();
    let service = CodemapService::with_components(
        config,
        storage,
        Arc::new(MemorySymbolStore::new()),
        Arc::new(SystemClock),
    )?;
    let report = service.run_retention(service.now());
    info!(scanned = known, deleted = report.deleted.len(), "sweep complete");
    print_json(&report)
}
