//! Symbol stores: per-upload record sequences plus derived aggregates.

pub mod database;
pub mod memory;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{CodemapError, CodemapResult};
use crate::indexer::imports::DependencyGraph;
use crate::models::{FileListing, ParseStatus, SymbolRecord, UploadId};

pub use database::SqliteSymbolStore;
pub use memory::MemorySymbolStore;

/// Totals derived from the records of one upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub total_files: usize,
    pub total_classes: usize,
    pub total_functions: usize,
    pub parse_failures: usize,
    pub unsupported_files: usize,
    pub total_imports: usize,
    pub total_lines: usize,
    pub total_bytes: u64,
    /// Extension (with leading dot, `""` for none) to file count.
    pub file_types: BTreeMap<String, usize>,
    pub external_packages: Vec<String>,
}

impl Aggregate {
    pub fn from_records(records: &[SymbolRecord]) -> Self {
        let mut aggregate = Aggregate {
            total_files: records.len(),
            ..Aggregate::default()
        };
        for record in records {
            aggregate.total_classes += record.classes.len();
            aggregate.total_functions += record.functions.len();
            aggregate.total_imports += record.imports.len();
            aggregate.total_lines += record.line_count;
            aggregate.total_bytes += record.size_bytes;
            match record.status {
                ParseStatus::Ok => {}
                ParseStatus::SyntaxError => aggregate.parse_failures += 1,
                ParseStatus::Unsupported => aggregate.unsupported_files += 1,
            }
            *aggregate
                .file_types
                .entry(record.extension().unwrap_or_default())
                .or_default() += 1;
        }
        aggregate.external_packages = DependencyGraph::build(records)
            .external_packages
            .into_iter()
            .collect();
        aggregate
    }
}

/// The analyzed records of one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEntry {
    pub upload_id: UploadId,
    pub records: Arc<Vec<SymbolRecord>>,
}

impl StoreEntry {
    pub fn aggregate(&self) -> Aggregate {
        Aggregate::from_records(&self.records)
    }

    pub fn file(&self, path: &str) -> Option<&SymbolRecord> {
        self.records
            .binary_search_by(|r| r.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn listing(&self) -> Vec<FileListing> {
        self.records.iter().map(FileListing::from).collect()
    }
}

pub trait SymbolStore: Send + Sync {
    /// Store `records` for `upload_id`, replacing anything stored before.
    fn ingest(&self, upload_id: &UploadId, records: Vec<SymbolRecord>) -> CodemapResult<StoreEntry>;

    fn get(&self, upload_id: &UploadId) -> CodemapResult<StoreEntry>;

    /// `Ok(false)` when nothing was stored.
    fn remove(&self, upload_id: &UploadId) -> CodemapResult<bool>;

    fn upload_ids(&self) -> CodemapResult<Vec<UploadId>>;

    fn contains(&self, upload_id: &UploadId) -> bool {
        self.get(upload_id).is_ok()
    }

    fn aggregate(&self, upload_id: &UploadId) -> CodemapResult<Aggregate> {
        Ok(self.get(upload_id)?.aggregate())
    }

    fn get_file(&self, upload_id: &UploadId, path: &str) -> CodemapResult<SymbolRecord> {
        let entry = self.get(upload_id)?;
        entry
            .file(path)
            .cloned()
            .ok_or_else(|| CodemapError::NotFound(format!("{path} in upload {upload_id}")))
    }
}

/// Records sorted by path with one record per path, the shape every store
/// hands back.
pub(crate) fn normalize_records(mut records: Vec<SymbolRecord>) -> Vec<SymbolRecord> {
    records.sort_by(|a, b| a.path.cmp(&b.path));
    records.dedup_by(|later, earlier| later.path == earlier.path);
    records
}

pub(crate) fn not_analyzed(upload_id: &UploadId) -> CodemapError {
    CodemapError::NotFound(format!("no analysis stored for upload {upload_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassSymbol, ImportSymbol};

    fn record(path: &str, status: ParseStatus) -> SymbolRecord {
        let mut record = SymbolRecord::empty(path, status);
        record.line_count = 3;
        record.size_bytes = 10;
        record
    }

    #[test]
    fn aggregate_counts_statuses_and_types() {
        let mut ok = record("a.py", ParseStatus::Ok);
        ok.classes.push(ClassSymbol {
            name: "A".into(),
            qualified_name: "A".into(),
            start_line: 1,
            end_line: 2,
            enclosing_class: None,
        });
        ok.imports.push(ImportSymbol {
            module: "requests.adapters".into(),
            alias: None,
            line: 1,
        });
        let records = vec![
            ok,
            record("b.py", ParseStatus::SyntaxError),
            record("notes.txt", ParseStatus::Unsupported),
        ];
        let aggregate = Aggregate::from_records(&records);
        assert_eq!(aggregate.total_files, 3);
        assert_eq!(aggregate.total_classes, 1);
        assert_eq!(aggregate.parse_failures, 1);
        assert_eq!(aggregate.unsupported_files, 1);
        assert_eq!(aggregate.total_lines, 9);
        assert_eq!(aggregate.total_bytes, 30);
        assert_eq!(aggregate.file_types.get(".py"), Some(&2));
        assert_eq!(aggregate.file_types.get(".txt"), Some(&1));
        assert_eq!(aggregate.external_packages, vec!["requests".to_string()]);
    }

    #[test]
    fn entry_file_lookup_uses_path_order() {
        let entry = StoreEntry {
            upload_id: UploadId::generate(),
            records: Arc::new(normalize_records(vec![
                record("z.py", ParseStatus::Ok),
                record("a.py", ParseStatus::Ok),
            ])),
        };
        assert!(entry.file("a.py").is_some());
        assert!(entry.file("m.py").is_none());
        assert_eq!(entry.listing()[0].path, "a.py");
    }
}
