//! All-or-nothing extraction of a validated archive into upload storage.

use std::io::Cursor;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archive::guard::{ArchiveManifest, EntryKind, ManifestEntry};
use crate::archive::path::EntryPath;
use crate::errors::{CodemapError, CodemapResult};
use crate::models::UploadId;
use crate::storage::UploadStorage;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub files_written: usize,
    pub bytes_written: u64,
    pub links_skipped: usize,
}

pub struct SafeExtractor {
    storage: Arc<dyn UploadStorage>,
}

impl SafeExtractor {
    pub fn new(storage: Arc<dyn UploadStorage>) -> Self {
        Self { storage }
    }

    /// Extract every manifest entry under the root of `upload_id`. On any
    /// failure the partially written root is removed before returning.
    pub fn extract(
        &self,
        bytes: &[u8],
        manifest: &ArchiveManifest,
        upload_id: &UploadId,
    ) -> CodemapResult<ExtractionStats> {
        self.storage
            .create(upload_id)
            .map_err(|e| CodemapError::Extraction(format!("cannot create upload root: {e}")))?;

        match self.extract_entries(bytes, manifest, upload_id) {
            Ok(stats) => {
                info!(
                    upload_id = %upload_id,
                    files = stats.files_written,
                    bytes = stats.bytes_written,
                    links_skipped = stats.links_skipped,
                    "archive extracted"
                );
                Ok(stats)
            }
            Err(err) => {
                warn!(upload_id = %upload_id, error = %err, "extraction failed, rolling back");
                if let Err(cleanup) = self.storage.remove(upload_id) {
                    warn!(upload_id = %upload_id, error = %cleanup, "rollback removal failed");
                }
                Err(match err {
                    CodemapError::Extraction(_) => err,
                    other => CodemapError::Extraction(other.to_string()),
                })
            }
        }
    }

    fn extract_entries(
        &self,
        bytes: &[u8],
        manifest: &ArchiveManifest,
        upload_id: &UploadId,
    ) -> CodemapResult<ExtractionStats> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| CodemapError::Extraction(format!("archive unreadable: {e}")))?;
        let mut stats = ExtractionStats::default();

        for entry in &manifest.entries {
            let mut file = archive.by_index(entry.index).map_err(|e| {
                CodemapError::Extraction(format!("entry #{} unreadable: {e}", entry.index))
            })?;
            check_entry_path(entry, file.name())?;

            match entry.kind {
                EntryKind::Directory => {
                    self.storage.create_dir(upload_id, &entry.path)?;
                }
                EntryKind::Symlink => {
                    debug!(
                        upload_id = %upload_id,
                        entry = %entry.path,
                        target = ?entry.link_target.as_ref().map(EntryPath::as_str),
                        "symbolic link not materialized"
                    );
                    stats.links_skipped += 1;
                }
                EntryKind::File => {
                    let written = self.storage.write_file(
                        upload_id,
                        &entry.path,
                        &mut file,
                        entry.uncompressed_size,
                    )?;
                    stats.files_written += 1;
                    stats.bytes_written += written;
                }
            }
        }
        Ok(stats)
    }
}

/// The name read at extraction time must normalize to the validated path.
fn check_entry_path(entry: &ManifestEntry, raw_name: &str) -> CodemapResult<()> {
    let path = EntryPath::normalize(raw_name)
        .map_err(|e| CodemapError::Extraction(format!("entry #{} rejected: {e}", entry.index)))?;
    if path != entry.path {
        return Err(CodemapError::Extraction(format!(
            "entry #{} changed from {} to {path}",
            entry.index, entry.path
        )));
    }
    if entry.kind == EntryKind::File && path.is_empty() {
        return Err(CodemapError::Extraction(format!(
            "entry #{} resolves to the upload root",
            entry.index
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::archive::guard::ArchiveGuard;
    use crate::storage::{DiskStorage, MemoryStorage};

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, body) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn extracts_every_file_inside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn UploadStorage> = Arc::new(DiskStorage::new(dir.path()).unwrap());
        let bytes = build_zip(&[("pkg/__init__.py", b""), ("pkg/mod.py", b"def f():\n    pass\n")]);
        let manifest = ArchiveGuard::default().validate(&bytes).unwrap();
        let id = UploadId::generate();

        let stats = SafeExtractor::new(storage.clone())
            .extract(&bytes, &manifest, &id)
            .unwrap();
        assert_eq!(stats.files_written, 2);

        let root = storage.root(&id).unwrap();
        assert!(root.join("pkg").join("mod.py").is_file());
        for file in storage.list(&id).unwrap() {
            assert!(manifest.entries.iter().any(|e| e.path.as_str() == file.path));
        }
    }

    #[test]
    fn lying_size_header_rolls_back() {
        let storage = Arc::new(MemoryStorage::new());
        let bytes = build_zip(&[("a.py", b"x = 1\n"), ("b.py", b"y = 2\n")]);
        let mut manifest = ArchiveGuard::default().validate(&bytes).unwrap();
        manifest.entries[1].uncompressed_size = 2;
        let id = UploadId::generate();

        let err = SafeExtractor::new(storage.clone())
            .extract(&bytes, &manifest, &id)
            .unwrap_err();
        assert_eq!(err.code(), "extraction_failed");
        assert!(!storage.exists(&id));
    }

    #[test]
    fn tampered_manifest_path_is_refused() {
        let storage = Arc::new(MemoryStorage::new());
        let bytes = build_zip(&[("a.py", b"x = 1\n")]);
        let mut manifest = ArchiveGuard::default().validate(&bytes).unwrap();
        manifest.entries[0].path = EntryPath::normalize("other.py").unwrap();
        let id = UploadId::generate();

        assert!(SafeExtractor::new(storage.clone())
            .extract(&bytes, &manifest, &id)
            .is_err());
        assert!(!storage.exists(&id));
    }

    #[test]
    fn in_root_symlinks_are_skipped() {
        let storage = Arc::new(MemoryStorage::new());
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("real.py", options).unwrap();
        writer.write_all(b"x = 1\n").unwrap();
        writer.add_symlink("alias.py", "real.py", options).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let manifest = ArchiveGuard::default().validate(&bytes).unwrap();
        let id = UploadId::generate();

        let stats = SafeExtractor::new(storage.clone())
            .extract(&bytes, &manifest, &id)
            .unwrap();
        assert_eq!(stats.links_skipped, 1);
        let files = storage.list(&id).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "real.py");
    }
}
