//! The single entry point a transport layer (HTTP, CLI, UI) drives.
//!
//! [`CodemapService`] wires the archive guard, extractor, structural parser,
//! symbol store and retention manager around one [`UploadRegistry`]. Every
//! read first checks that the upload is live, so deleted and unknown ids are
//! indistinguishable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::{ArchiveGuard, ArchiveManifest, EntryPath, SafeExtractor};
use crate::clock::{Clock, SystemClock};
use crate::config::CodemapConfig;
use crate::errors::{CodemapError, CodemapResult, ValidationError};
use crate::indexer::filesystem::{decode_text, TextEncoding};
use crate::indexer::imports::DependencyGraph;
use crate::indexer::pipeline::StructuralParser;
use crate::models::{FileListing, SymbolRecord, Upload, UploadId, UploadStatus};
use crate::query::diff::{DiffEngine, DiffResult};
use crate::query::summary::{Summarizer, UploadSummary};
use crate::registry::UploadRegistry;
use crate::retention::{DeleteOutcome, RetentionManager, RetentionReport};
use crate::storage::{DiskStorage, UploadStorage};
use crate::store::{Aggregate, MemorySymbolStore, StoreEntry, SymbolStore};

/// 1-based inclusive line range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub total_lines: usize,
    pub range: Option<LineRange>,
    pub content: String,
    pub encoding: TextEncoding,
}

pub struct CodemapService {
    config: CodemapConfig,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn UploadStorage>,
    store: Arc<dyn SymbolStore>,
    registry: Arc<UploadRegistry>,
    guard: ArchiveGuard,
    extractor: SafeExtractor,
    parser: StructuralParser,
    retention: RetentionManager,
}

impl CodemapService {
    /// Disk-backed uploads under `config.storage_root`, in-memory symbols and
    /// the system clock.
    pub fn new(config: CodemapConfig) -> CodemapResult<Self> {
        config.validate()?;
        let storage = Arc::new(DiskStorage::new(&config.storage_root)?);
        Self::with_components(
            config,
            storage,
            Arc::new(MemorySymbolStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn with_components(
        config: CodemapConfig,
        storage: Arc<dyn UploadStorage>,
        store: Arc<dyn SymbolStore>,
        clock: Arc<dyn Clock>,
    ) -> CodemapResult<Self> {
        config.validate()?;
        let registry = Arc::new(UploadRegistry::new());
        let guard = ArchiveGuard::new(
            config.archive.clone(),
            config.analysis.source_extensions.clone(),
        );
        let extractor = SafeExtractor::new(Arc::clone(&storage));
        let parser = StructuralParser::new(config.analysis.clone());
        let retention = RetentionManager::new(
            config.retention.clone(),
            Arc::clone(&storage),
            Arc::clone(&store),
            Arc::clone(&registry),
        );
        Ok(Self {
            config,
            clock,
            storage,
            store,
            registry,
            guard,
            extractor,
            parser,
            retention,
        })
    }

    pub fn config(&self) -> &CodemapConfig {
        &self.config
    }

    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    pub fn store(&self) -> &Arc<dyn SymbolStore> {
        &self.store
    }

    pub fn storage(&self) -> &Arc<dyn UploadStorage> {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ─── Ingestion ──────────────────────────────────────────────────────────

    /// Check an archive without touching storage.
    pub fn validate_archive(&self, bytes: &[u8]) -> Result<ArchiveManifest, ValidationError> {
        self.guard.validate(bytes)
    }

    /// Validate and extract an archive into a fresh upload. Nothing is
    /// registered or written when validation fails.
    pub fn submit_upload(&self, bytes: &[u8]) -> CodemapResult<UploadId> {
        let manifest = self.guard.validate(bytes)?;
        let id = UploadId::generate();
        self.registry.register(Upload {
            id: id.clone(),
            created_at: self.clock.now(),
            root: self.storage.root(&id),
            status: UploadStatus::Extracting,
            archive_bytes: manifest.compressed_bytes,
            entry_count: manifest.entries.len(),
        });

        if let Err(e) = self.extractor.extract(bytes, &manifest, &id) {
            self.registry.finish_deletion(&id);
            return Err(e);
        }
        self.registry
            .with_live(&id, |upload| upload.status = UploadStatus::Extracted)
            .ok_or_else(|| not_found(&id))?;
        info!(upload_id = %id, entries = manifest.entries.len(), "upload accepted");
        Ok(id)
    }

    /// Parse every file of the upload and replace its store entry. Results
    /// are discarded if the upload was deleted while parsing.
    pub fn trigger_analysis(&self, upload_id: &UploadId) -> CodemapResult<StoreEntry> {
        let cancel = self.registry.begin_analysis(upload_id)?;
        let analyzed = self.parser.analyze(self.storage.as_ref(), upload_id, &cancel);

        let outcome = match analyzed {
            Ok(records) => self
                .registry
                .with_live(upload_id, |upload| {
                    let entry = self.store.ingest(upload_id, records)?;
                    upload.status = UploadStatus::Parsed;
                    Ok(entry)
                })
                .unwrap_or_else(|| Err(not_found(upload_id))),
            Err(e) => {
                warn!(upload_id = %upload_id, error = %e, "analysis failed");
                self.registry
                    .with_live(upload_id, |upload| upload.status = UploadStatus::Failed);
                Err(e)
            }
        };
        self.registry.finish_analysis(upload_id);
        outcome
    }

    pub fn cancel_analysis(&self, upload_id: &UploadId) -> bool {
        self.registry.cancel_analysis(upload_id)
    }

    // ─── Browsing ───────────────────────────────────────────────────────────

    pub fn upload(&self, upload_id: &UploadId) -> CodemapResult<Upload> {
        self.registry
            .get(upload_id)
            .ok_or_else(|| not_found(upload_id))
    }

    pub fn list_uploads(&self) -> Vec<Upload> {
        self.registry.list()
    }

    fn entry(&self, upload_id: &UploadId) -> CodemapResult<StoreEntry> {
        self.upload(upload_id)?;
        self.store.get(upload_id)
    }

    pub fn list_files(&self, upload_id: &UploadId) -> CodemapResult<Vec<FileListing>> {
        Ok(self.entry(upload_id)?.listing())
    }

    pub fn get_file_symbols(&self, upload_id: &UploadId, path: &str) -> CodemapResult<SymbolRecord> {
        self.upload(upload_id)?;
        let path = request_path(path)?;
        self.store.get_file(upload_id, path.as_str())
    }

    pub fn get_aggregate(&self, upload_id: &UploadId) -> CodemapResult<Aggregate> {
        Ok(self.entry(upload_id)?.aggregate())
    }

    pub fn dependency_graph(&self, upload_id: &UploadId) -> CodemapResult<DependencyGraph> {
        Ok(DependencyGraph::build(&self.entry(upload_id)?.records))
    }

    /// Raw file text, optionally cut to a line range.
    pub fn read_file(
        &self,
        upload_id: &UploadId,
        path: &str,
        range: Option<LineRange>,
    ) -> CodemapResult<FileContent> {
        self.upload(upload_id)?;
        let path = request_path(path)?;
        let bytes = self.storage.read(upload_id, &path)?;
        let (text, encoding) = decode_text(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let total_lines = lines.len();

        let content = match range {
            None => text.clone(),
            Some(LineRange { start, end }) => {
                if start == 0 || start > end || end > total_lines {
                    return Err(CodemapError::InvalidRequest(format!(
                        "line range {start}-{end} is outside 1-{total_lines}"
                    )));
                }
                lines[start - 1..end].join("\n")
            }
        };

        Ok(FileContent {
            path: path.as_str().to_string(),
            total_lines,
            range,
            content,
            encoding,
        })
    }

    pub fn summarize(
        &self,
        upload_id: &UploadId,
        summarizer: &dyn Summarizer,
    ) -> CodemapResult<UploadSummary> {
        let entry = self.entry(upload_id)?;
        Ok(UploadSummary::build(
            upload_id,
            &entry.records,
            summarizer,
            self.clock.now(),
        ))
    }

    pub fn compare(&self, upload_a: &UploadId, upload_b: &UploadId) -> CodemapResult<DiffResult> {
        self.upload(upload_a)?;
        self.upload(upload_b)?;
        DiffEngine::compare(self.store.as_ref(), upload_a, self.store.as_ref(), upload_b)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    pub fn delete_upload(&self, upload_id: &UploadId) -> DeleteOutcome {
        self.retention.delete(upload_id)
    }

    pub fn run_retention(&self, now: DateTime<Utc>) -> RetentionReport {
        self.retention.run_once(now)
    }
}

fn not_found(upload_id: &UploadId) -> CodemapError {
    CodemapError::NotFound(format!("upload {upload_id}"))
}

fn request_path(raw: &str) -> CodemapResult<EntryPath> {
    let path = EntryPath::normalize(raw)
        .map_err(|e| CodemapError::InvalidRequest(format!("bad path {raw:?}: {}", e.detail)))?;
    if path.is_empty() {
        return Err(CodemapError::InvalidRequest("empty path".to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    use chrono::Duration;
    use parking_lot::Mutex;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{ParseStatus, SourceFile};
    use crate::query::summary::TemplateSummarizer;
    use crate::storage::{MemoryStorage, StoredUpload};

    /// Memory storage whose next `read` after [`arm`](Self::arm) signals
    /// `entered` and then blocks until `proceed` fires.
    struct GatedStorage {
        inner: MemoryStorage,
        armed: AtomicBool,
        entered: Mutex<mpsc::Sender<()>>,
        proceed: Mutex<mpsc::Receiver<()>>,
    }

    impl GatedStorage {
        fn new() -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (proceed_tx, proceed_rx) = mpsc::channel();
            let storage = Arc::new(Self {
                inner: MemoryStorage::new(),
                armed: AtomicBool::new(false),
                entered: Mutex::new(entered_tx),
                proceed: Mutex::new(proceed_rx),
            });
            (storage, entered_rx, proceed_tx)
        }

        fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    impl UploadStorage for GatedStorage {
        fn create(&self, id: &UploadId) -> CodemapResult<()> {
            self.inner.create(id)
        }

        fn create_dir(&self, id: &UploadId, path: &EntryPath) -> CodemapResult<()> {
            self.inner.create_dir(id, path)
        }

        fn write_file(
            &self,
            id: &UploadId,
            path: &EntryPath,
            reader: &mut dyn Read,
            limit: u64,
        ) -> CodemapResult<u64> {
            self.inner.write_file(id, path, reader, limit)
        }

        fn list(&self, id: &UploadId) -> CodemapResult<Vec<SourceFile>> {
            self.inner.list(id)
        }

        fn read(&self, id: &UploadId, path: &EntryPath) -> CodemapResult<Vec<u8>> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.lock().send(()).unwrap();
                self.proceed.lock().recv().unwrap();
            }
            self.inner.read(id, path)
        }

        fn remove(&self, id: &UploadId) -> CodemapResult<bool> {
            self.inner.remove(id)
        }

        fn exists(&self, id: &UploadId) -> bool {
            self.inner.exists(id)
        }

        fn root(&self, id: &UploadId) -> Option<PathBuf> {
            self.inner.root(id)
        }

        fn uploads(&self) -> CodemapResult<Vec<StoredUpload>> {
            self.inner.uploads()
        }
    }

    type Gate = (mpsc::Receiver<()>, mpsc::Sender<()>);

    fn gated_service() -> (CodemapService, Arc<GatedStorage>, Gate) {
        let (storage, entered, proceed) = GatedStorage::new();
        let service = CodemapService::with_components(
            CodemapConfig::default(),
            storage.clone(),
            Arc::new(MemorySymbolStore::new()),
            Arc::new(SystemClock),
        )
        .unwrap();
        (service, storage, (entered, proceed))
    }

    fn zip_with(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn service() -> (CodemapService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = CodemapService::with_components(
            CodemapConfig::default(),
            Arc::new(MemoryStorage::with_clock(clock.clone())),
            Arc::new(MemorySymbolStore::new()),
            clock.clone(),
        )
        .unwrap();
        (service, clock)
    }

    #[test]
    fn upload_then_analyze() {
        let (service, _) = service();
        let id = service
            .submit_upload(&zip_with(&[("a.py", "def f(x):\n    return x\n"), ("README.md", "hi")]))
            .unwrap();
        assert_eq!(service.upload(&id).unwrap().status, UploadStatus::Extracted);
        assert!(service.list_files(&id).unwrap_err().is_not_found());

        service.trigger_analysis(&id).unwrap();
        assert_eq!(service.upload(&id).unwrap().status, UploadStatus::Parsed);
        let files = service.list_files(&id).unwrap();
        assert_eq!(files.len(), 2);
        let record = service.get_file_symbols(&id, "./a.py").unwrap();
        assert_eq!(record.status, ParseStatus::Ok);
        assert_eq!(record.functions[0].parameters, vec!["x".to_string()]);
    }

    #[test]
    fn rejected_archive_registers_nothing() {
        let (service, _) = service();
        let err = service
            .submit_upload(&zip_with(&[("../../etc/passwd", "root")]))
            .unwrap_err();
        assert_eq!(err.code(), "path_traversal");
        assert!(service.list_uploads().is_empty());
        assert!(service.storage().uploads().unwrap().is_empty());
    }

    #[test]
    fn read_file_validates_ranges() {
        let (service, _) = service();
        let id = service
            .submit_upload(&zip_with(&[("m.py", "one\ntwo\nthree\n")]))
            .unwrap();
        let whole = service.read_file(&id, "m.py", None).unwrap();
        assert_eq!(whole.total_lines, 3);
        assert_eq!(whole.encoding, TextEncoding::Utf8);

        let cut = service.read_file(&id, "m.py", Some(LineRange::new(2, 3))).unwrap();
        assert_eq!(cut.content, "two\nthree");

        for range in [LineRange::new(0, 1), LineRange::new(3, 2), LineRange::new(1, 4)] {
            let err = service.read_file(&id, "m.py", Some(range)).unwrap_err();
            assert_eq!(err.code(), "invalid_request");
        }
        assert_eq!(
            service.read_file(&id, "../m.py", None).unwrap_err().code(),
            "invalid_request"
        );
        assert!(service.read_file(&id, "nope.py", None).unwrap_err().is_not_found());
    }

    #[test]
    fn deleted_upload_looks_unknown() {
        let (service, _) = service();
        let id = service.submit_upload(&zip_with(&[("a.py", "x = 1\n")])).unwrap();
        service.trigger_analysis(&id).unwrap();

        assert_eq!(service.delete_upload(&id), DeleteOutcome::Deleted);
        assert_eq!(service.delete_upload(&id), DeleteOutcome::NotFound);
        assert!(service.upload(&id).unwrap_err().is_not_found());
        assert!(service.get_aggregate(&id).unwrap_err().is_not_found());
        assert!(service.trigger_analysis(&id).unwrap_err().is_not_found());
        assert!(!service.store().contains(&id));
    }

    #[test]
    fn cancel_stops_running_analysis() {
        let (service, storage, (entered, proceed)) = gated_service();
        let id = service.submit_upload(&zip_with(&[("a.py", "x = 1\n")])).unwrap();
        storage.arm();

        std::thread::scope(|scope| {
            let analysis = scope.spawn(|| service.trigger_analysis(&id));
            entered.recv().unwrap();
            assert!(service.cancel_analysis(&id));
            proceed.send(()).unwrap();

            let err = analysis.join().unwrap().unwrap_err();
            assert_eq!(err.code(), "cancelled");
        });

        assert_eq!(service.upload(&id).unwrap().status, UploadStatus::Failed);
        assert!(!service.store().contains(&id));
        assert!(!service.cancel_analysis(&id));
        // the upload can be analyzed again afterwards
        service.trigger_analysis(&id).unwrap();
        assert_eq!(service.upload(&id).unwrap().status, UploadStatus::Parsed);
    }

    #[test]
    fn delete_during_analysis_leaves_no_entry() {
        let (service, storage, (entered, proceed)) = gated_service();
        let id = service.submit_upload(&zip_with(&[("a.py", "def f():\n    pass\n")])).unwrap();
        storage.arm();

        std::thread::scope(|scope| {
            let analysis = scope.spawn(|| service.trigger_analysis(&id));
            entered.recv().unwrap();
            assert_eq!(service.delete_upload(&id), DeleteOutcome::Deleted);
            proceed.send(()).unwrap();

            assert!(analysis.join().unwrap().is_err());
        });

        assert!(!service.store().contains(&id));
        assert!(service.upload(&id).unwrap_err().is_not_found());
        assert!(service.list_files(&id).unwrap_err().is_not_found());
        assert!(!service.storage().exists(&id));
        assert!(service.list_uploads().is_empty());
    }

    #[test]
    fn retention_uses_injected_clock() {
        let (service, clock) = service();
        let id = service.submit_upload(&zip_with(&[("a.py", "x = 1\n")])).unwrap();
        clock.advance(Duration::days(7) + Duration::seconds(1));

        let report = service.run_retention(service.now());
        assert_eq!(report.deleted, vec![id.clone()]);
        assert!(service.list_uploads().is_empty());
        assert!(!service.storage().exists(&id));
    }

    #[test]
    fn summarize_and_graph() {
        let (service, _) = service();
        let id = service
            .submit_upload(&zip_with(&[
                ("pkg/__init__.py", ""),
                ("pkg/a.py", "from pkg import b\nimport requests\n"),
                ("pkg/b.py", "def g():\n    pass\n"),
            ]))
            .unwrap();
        service.trigger_analysis(&id).unwrap();

        let graph = service.dependency_graph(&id).unwrap();
        assert_eq!(graph.imports_from("pkg/a.py"), vec!["pkg/b.py"]);
        assert!(graph.external_packages.contains("requests"));

        let summary = service.summarize(&id, &TemplateSummarizer).unwrap();
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.successfully_summarized, 3);
    }
}
