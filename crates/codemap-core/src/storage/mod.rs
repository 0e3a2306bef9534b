//! Per-upload file namespaces.
//!
//! Every upload owns one isolated root keyed by its [`UploadId`]. Extraction,
//! analysis, browsing and retention all go through [`UploadStorage`], so the
//! pipeline runs the same way against a real directory tree or memory.

pub mod disk;
pub mod memory;

use std::io::{Read, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::archive::path::EntryPath;
use crate::errors::{CodemapError, CodemapResult};
use crate::models::{SourceFile, UploadId};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// An upload root found in storage, with the time it was last modified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredUpload {
    pub id: UploadId,
    pub modified_at: DateTime<Utc>,
}

pub trait UploadStorage: Send + Sync {
    /// Create the isolated root for `id`. Fails if it already exists.
    fn create(&self, id: &UploadId) -> CodemapResult<()>;

    fn create_dir(&self, id: &UploadId, path: &EntryPath) -> CodemapResult<()>;

    /// Write one file, reading at most `limit` bytes from `reader`. Input
    /// longer than `limit` fails the write and leaves nothing behind.
    fn write_file(
        &self,
        id: &UploadId,
        path: &EntryPath,
        reader: &mut dyn Read,
        limit: u64,
    ) -> CodemapResult<u64>;

    /// All regular files of the upload, sorted by path.
    fn list(&self, id: &UploadId) -> CodemapResult<Vec<SourceFile>>;

    fn read(&self, id: &UploadId, path: &EntryPath) -> CodemapResult<Vec<u8>>;

    /// Remove the whole root. `Ok(false)` when it did not exist.
    fn remove(&self, id: &UploadId) -> CodemapResult<bool>;

    fn exists(&self, id: &UploadId) -> bool;

    /// Filesystem location of the root, for backends that have one.
    fn root(&self, id: &UploadId) -> Option<PathBuf>;

    /// Every upload root currently present, including ones this process
    /// never registered.
    fn uploads(&self) -> CodemapResult<Vec<StoredUpload>>;
}

/// Copy `reader` into `writer`, failing once more than `limit` bytes arrive.
pub(crate) fn copy_bounded<W: Write + ?Sized>(
    reader: &mut dyn Read,
    writer: &mut W,
    limit: u64,
) -> CodemapResult<u64> {
    let mut bounded = reader.take(limit.saturating_add(1));
    let copied = std::io::copy(&mut bounded, writer)?;
    if copied > limit {
        return Err(CodemapError::Extraction(format!(
            "entry produced more than its declared {limit} bytes"
        )));
    }
    Ok(copied)
}

pub(crate) fn not_found(id: &UploadId) -> CodemapError {
    CodemapError::NotFound(format!("upload {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_bounded_accepts_exact_size() {
        let mut out = Vec::new();
        let copied = copy_bounded(&mut &b"hello"[..], &mut out, 5).unwrap();
        assert_eq!(copied, 5);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn copy_bounded_rejects_overflow() {
        let mut out = Vec::new();
        let err = copy_bounded(&mut &b"hello world"[..], &mut out, 5).unwrap_err();
        assert_eq!(err.code(), "extraction_failed");
    }
}
