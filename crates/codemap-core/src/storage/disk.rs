//! Upload roots as directories under a single storage root:
//! `<storage_root>/<upload_id>/<entry paths>`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::archive::path::EntryPath;
use crate::errors::{CodemapError, CodemapResult};
use crate::models::{SourceFile, UploadId};
use crate::storage::{copy_bounded, not_found, StoredUpload, UploadStorage};

pub struct DiskStorage {
    base: PathBuf,
}

impl DiskStorage {
    /// Open (and create if needed) the storage root.
    pub fn new(base: impl Into<PathBuf>) -> CodemapResult<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn upload_root(&self, id: &UploadId) -> PathBuf {
        self.base.join(id.as_str())
    }

    /// Join `path` onto the upload root, refusing anything that would land
    /// outside it.
    fn resolve(&self, id: &UploadId, path: &EntryPath) -> CodemapResult<PathBuf> {
        let root = self.upload_root(id);
        let joined = root.join(path.to_relative_path());
        if !joined.starts_with(&root) || joined == root {
            return Err(CodemapError::Extraction(format!(
                "entry {path} resolves outside upload {id}"
            )));
        }
        Ok(joined)
    }
}

impl UploadStorage for DiskStorage {
    fn create(&self, id: &UploadId) -> CodemapResult<()> {
        fs::create_dir_all(&self.base)?;
        fs::create_dir(self.upload_root(id))?;
        debug!(upload_id = %id, "created upload root");
        Ok(())
    }

    fn create_dir(&self, id: &UploadId, path: &EntryPath) -> CodemapResult<()> {
        if path.is_empty() {
            return Ok(());
        }
        let dir = self.resolve(id, path)?;
        fs::create_dir_all(dir)?;
        Ok(())
    }

    fn write_file(
        &self,
        id: &UploadId,
        path: &EntryPath,
        reader: &mut dyn Read,
        limit: u64,
    ) -> CodemapResult<u64> {
        let dest = self.resolve(id, path)?;
        let parent = dest
            .parent()
            .ok_or_else(|| CodemapError::Extraction(format!("entry {path} has no parent")))?;
        fs::create_dir_all(parent)?;

        let mut staged = NamedTempFile::new_in(parent)?;
        let written = copy_bounded(reader, staged.as_file_mut(), limit)?;
        staged
            .persist(&dest)
            .map_err(|e| CodemapError::Extraction(format!("failed to place {path}: {}", e.error)))?;
        Ok(written)
    }

    fn list(&self, id: &UploadId) -> CodemapResult<Vec<SourceFile>> {
        let root = self.upload_root(id);
        if !root.is_dir() {
            return Err(not_found(id));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|e| CodemapError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(SourceFile { path, size_bytes });
        }
        files.sort();
        Ok(files)
    }

    fn read(&self, id: &UploadId, path: &EntryPath) -> CodemapResult<Vec<u8>> {
        let file = self.resolve(id, path)?;
        match fs::read(&file) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CodemapError::NotFound(
                format!("{path} in upload {id}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, id: &UploadId) -> CodemapResult<bool> {
        let root = self.upload_root(id);
        match fs::remove_dir_all(&root) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &UploadId) -> bool {
        self.upload_root(id).is_dir()
    }

    fn root(&self, id: &UploadId) -> Option<PathBuf> {
        Some(self.upload_root(id))
    }

    fn uploads(&self) -> CodemapResult<Vec<StoredUpload>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut uploads = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Ok(id) = UploadId::parse(&name.to_string_lossy()) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(m) if m.is_dir() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(upload_id = %id, error = %e, "cannot stat upload root");
                    continue;
                }
            };
            let modified_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            uploads.push(StoredUpload { id, modified_at });
        }
        uploads.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(uploads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(raw: &str) -> EntryPath {
        EntryPath::normalize(raw).unwrap()
    }

    #[test]
    fn write_list_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        let id = UploadId::generate();
        storage.create(&id).unwrap();

        storage
            .write_file(&id, &entry("pkg/b.py"), &mut &b"b = 2\n"[..], 6)
            .unwrap();
        storage
            .write_file(&id, &entry("a.py"), &mut &b"a = 1\n"[..], 6)
            .unwrap();
        storage.create_dir(&id, &entry("empty/dir")).unwrap();

        let files = storage.list(&id).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "pkg/b.py"]);
        assert_eq!(storage.read(&id, &entry("pkg/b.py")).unwrap(), b"b = 2\n");
        assert!(storage.read(&id, &entry("missing.py")).unwrap_err().is_not_found());

        assert!(storage.remove(&id).unwrap());
        assert!(!storage.exists(&id));
        assert!(!storage.remove(&id).unwrap());
        assert!(storage.list(&id).unwrap_err().is_not_found());
    }

    #[test]
    fn oversized_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        let id = UploadId::generate();
        storage.create(&id).unwrap();

        let err = storage
            .write_file(&id, &entry("a.py"), &mut &b"too many bytes"[..], 3)
            .unwrap_err();
        assert_eq!(err.code(), "extraction_failed");
        assert!(storage.list(&id).unwrap().is_empty());
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        let id = UploadId::generate();
        storage.create(&id).unwrap();
        assert!(storage.create(&id).is_err());
    }

    #[test]
    fn uploads_skips_foreign_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        let id = UploadId::generate();
        storage.create(&id).unwrap();
        fs::create_dir(dir.path().join("not-an-upload")).unwrap();

        let uploads = storage.uploads().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].id, id);
    }
}
