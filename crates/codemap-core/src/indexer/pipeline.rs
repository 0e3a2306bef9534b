//! Analysis pipeline: one [`SymbolRecord`] per file of an upload, parsed in
//! parallel on a rayon pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::archive::path::EntryPath;
use crate::config::AnalysisConfig;
use crate::errors::{CodemapError, CodemapResult};
use crate::indexer::filesystem::{classify, compute_content_hash, count_lines, FileDisposition};
use crate::indexer::parser::parse_source;
use crate::models::{ParseFailure, ParseStatus, SourceFile, SymbolRecord, UploadId};
use crate::storage::UploadStorage;

/// Cooperative cancellation shared between an analysis and its caller.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct StructuralParser {
    config: AnalysisConfig,
}

impl StructuralParser {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze every file of `upload_id`. Per-file failures become records;
    /// only a missing upload or cancellation fail the whole call.
    pub fn analyze(
        &self,
        storage: &dyn UploadStorage,
        upload_id: &UploadId,
        cancel: &CancelFlag,
    ) -> CodemapResult<Vec<SymbolRecord>> {
        let started = Instant::now();
        let files = storage.list(upload_id)?;
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build();

        let worker = |file: &SourceFile| -> Option<SymbolRecord> {
            if cancel.is_cancelled() {
                return None;
            }
            Some(self.analyze_file(storage, upload_id, file))
        };

        let outcomes: Vec<Option<SymbolRecord>> = match pool {
            Ok(pool) => pool.install(|| files.par_iter().map(worker).collect()),
            Err(e) => {
                debug!(error = %e, "thread pool unavailable, parsing sequentially");
                files.iter().map(worker).collect()
            }
        };

        if cancel.is_cancelled() {
            info!(upload_id = %upload_id, "analysis cancelled");
            return Err(CodemapError::Cancelled(format!("analysis of upload {upload_id}")));
        }
        if !storage.exists(upload_id) {
            return Err(CodemapError::NotFound(format!("upload {upload_id}")));
        }

        let mut records: Vec<SymbolRecord> = outcomes.into_iter().flatten().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let failures = records
            .iter()
            .filter(|r| r.status == ParseStatus::SyntaxError)
            .count();
        info!(
            upload_id = %upload_id,
            files = records.len(),
            parse_failures = failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis finished"
        );
        Ok(records)
    }

    fn analyze_file(
        &self,
        storage: &dyn UploadStorage,
        upload_id: &UploadId,
        file: &SourceFile,
    ) -> SymbolRecord {
        let mut record = SymbolRecord::empty(file.path.clone(), ParseStatus::Unsupported);
        record.size_bytes = file.size_bytes;

        if let FileDisposition::Skip(reason) = classify(file, &self.config) {
            trace!(path = %file.path, "not a parse candidate");
            record.error = reason.map(ParseFailure::new);
            return record;
        }

        let bytes = match EntryPath::normalize(&file.path)
            .map_err(|e| CodemapError::Extraction(e.to_string()))
            .and_then(|path| storage.read(upload_id, &path))
        {
            Ok(bytes) => bytes,
            Err(e) => {
                record.status = ParseStatus::SyntaxError;
                record.error = Some(ParseFailure::new(format!("unreadable: {e}")));
                return record;
            }
        };

        record.size_bytes = bytes.len() as u64;
        record.line_count = count_lines(&bytes);
        record.content_hash = compute_content_hash(&bytes);

        match parse_source(&bytes) {
            Ok(symbols) => {
                record.status = ParseStatus::Ok;
                record.classes = symbols.classes;
                record.functions = symbols.functions;
                record.imports = symbols.imports;
            }
            Err(failure) => {
                debug!(
                    path = %file.path,
                    line = ?failure.line,
                    message = %failure.message,
                    "syntax error"
                );
                record.status = ParseStatus::SyntaxError;
                record.error = Some(failure);
            }
        }
        record
    }
}
