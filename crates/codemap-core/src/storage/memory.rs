//! In-memory upload storage for tests and embedding.

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::archive::path::EntryPath;
use crate::clock::{Clock, SystemClock};
use crate::errors::{CodemapError, CodemapResult};
use crate::models::{SourceFile, UploadId};
use crate::storage::{copy_bounded, not_found, StoredUpload, UploadStorage};

struct MemoryUpload {
    created_at: chrono::DateTime<chrono::Utc>,
    files: BTreeMap<String, Vec<u8>>,
}

pub struct MemoryStorage {
    clock: Arc<dyn Clock>,
    uploads: RwLock<BTreeMap<UploadId, MemoryUpload>>,
    held: RwLock<HashSet<UploadId>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            uploads: RwLock::new(BTreeMap::new()),
            held: RwLock::new(HashSet::new()),
        }
    }

    /// Mark an upload as in use: removal fails until [`release`](Self::release).
    pub fn hold(&self, id: &UploadId) {
        self.held.write().insert(id.clone());
    }

    pub fn release(&self, id: &UploadId) {
        self.held.write().remove(id);
    }
}

impl UploadStorage for MemoryStorage {
    fn create(&self, id: &UploadId) -> CodemapResult<()> {
        let mut uploads = self.uploads.write();
        if uploads.contains_key(id) {
            return Err(CodemapError::Extraction(format!("upload root {id} already exists")));
        }
        uploads.insert(
            id.clone(),
            MemoryUpload {
                created_at: self.clock.now(),
                files: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn create_dir(&self, id: &UploadId, _path: &EntryPath) -> CodemapResult<()> {
        if !self.uploads.read().contains_key(id) {
            return Err(not_found(id));
        }
        Ok(())
    }

    fn write_file(
        &self,
        id: &UploadId,
        path: &EntryPath,
        reader: &mut dyn Read,
        limit: u64,
    ) -> CodemapResult<u64> {
        if path.is_empty() {
            return Err(CodemapError::Extraction(format!(
                "entry resolves to the root of upload {id}"
            )));
        }
        let mut buffer = Vec::new();
        let written = copy_bounded(reader, &mut buffer, limit)?;
        let mut uploads = self.uploads.write();
        let upload = uploads.get_mut(id).ok_or_else(|| not_found(id))?;
        upload.files.insert(path.as_str().to_string(), buffer);
        Ok(written)
    }

    fn list(&self, id: &UploadId) -> CodemapResult<Vec<SourceFile>> {
        let uploads = self.uploads.read();
        let upload = uploads.get(id).ok_or_else(|| not_found(id))?;
        Ok(upload
            .files
            .iter()
            .map(|(path, bytes)| SourceFile {
                path: path.clone(),
                size_bytes: bytes.len() as u64,
            })
            .collect())
    }

    fn read(&self, id: &UploadId, path: &EntryPath) -> CodemapResult<Vec<u8>> {
        let uploads = self.uploads.read();
        let upload = uploads.get(id).ok_or_else(|| not_found(id))?;
        upload
            .files
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| CodemapError::NotFound(format!("{path} in upload {id}")))
    }

    fn remove(&self, id: &UploadId) -> CodemapResult<bool> {
        if self.held.read().contains(id) {
            return Err(CodemapError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("upload {id} is held"),
            )));
        }
        Ok(self.uploads.write().remove(id).is_some())
    }

    fn exists(&self, id: &UploadId) -> bool {
        self.uploads.read().contains_key(id)
    }

    fn root(&self, _id: &UploadId) -> Option<PathBuf> {
        None
    }

    fn uploads(&self) -> CodemapResult<Vec<StoredUpload>> {
        Ok(self
            .uploads
            .read()
            .iter()
            .map(|(id, upload)| StoredUpload {
                id: id.clone(),
                modified_at: upload.created_at,
            })
            .collect())
    }
}
