//! Pre-extraction validation of uploaded ZIP archives.
//!
//! The guard only reads archive metadata (and the small bodies of symbolic
//! link entries). It never touches the filesystem.

use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::archive::path::EntryPath;
use crate::config::{ArchiveLimits, DEFAULT_SOURCE_EXTENSIONS};
use crate::errors::{RejectReason, ValidationError};

/// Symbolic link targets longer than this are treated as hostile.
const MAX_LINK_TARGET_BYTES: u64 = 4096;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Entry metadata as read from the central directory, before any policy is
/// applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub name: String,
    pub kind: EntryKind,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub link_target: Option<String>,
}

impl RawEntry {
    pub fn file(name: impl Into<String>, uncompressed_size: u64, compressed_size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            uncompressed_size,
            compressed_size,
            link_target: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Position in the archive's central directory.
    pub index: usize,
    pub path: EntryPath,
    pub kind: EntryKind,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub parse_candidate: bool,
    /// Resolved in-root target for symbolic links.
    pub link_target: Option<EntryPath>,
}

/// An archive accepted by [`ArchiveGuard`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub compressed_bytes: u64,
    pub uncompressed_bytes: u64,
    pub entries: Vec<ManifestEntry>,
}

impl ArchiveManifest {
    pub fn file_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::File)
            .count()
    }

    pub fn parse_candidates(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.parse_candidate)
    }
}

pub struct ArchiveGuard {
    limits: ArchiveLimits,
    source_extensions: Vec<String>,
}

impl Default for ArchiveGuard {
    fn default() -> Self {
        Self::new(
            ArchiveLimits::default(),
            DEFAULT_SOURCE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        )
    }
}

impl ArchiveGuard {
    pub fn new(limits: ArchiveLimits, source_extensions: Vec<String>) -> Self {
        Self {
            limits,
            source_extensions: source_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn limits(&self) -> &ArchiveLimits {
        &self.limits
    }

    /// Validate raw archive bytes. Checks run in a fixed order and stop at the
    /// first failure.
    pub fn validate(&self, bytes: &[u8]) -> Result<ArchiveManifest, ValidationError> {
        let result = self.validate_inner(bytes);
        if let Err(err) = &result {
            warn!(reason = %err.reason, detail = %err.detail, "archive rejected");
        }
        result
    }

    fn validate_inner(&self, bytes: &[u8]) -> Result<ArchiveManifest, ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::new(
                RejectReason::EmptyArchive,
                "archive is empty",
            ));
        }
        let compressed_len = bytes.len() as u64;
        self.check_size(compressed_len)?;

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
            ValidationError::new(RejectReason::InvalidArchive, format!("not a readable ZIP: {e}"))
        })?;
        let declared = archive.len();
        if declared == 0 {
            return Err(ValidationError::new(
                RejectReason::EmptyArchive,
                "archive contains no entries",
            ));
        }

        let mut entries = Vec::with_capacity(declared.min(self.limits.max_entries));
        for index in 0..declared {
            entries.push(read_raw_entry(&mut archive, index)?);
        }
        self.validate_entries(compressed_len, declared, &entries)
    }

    /// Apply the size, ratio, count and path policies to already-read entry
    /// metadata.
    pub fn validate_entries(
        &self,
        compressed_len: u64,
        declared_entry_count: usize,
        entries: &[RawEntry],
    ) -> Result<ArchiveManifest, ValidationError> {
        if compressed_len == 0 {
            return Err(ValidationError::new(
                RejectReason::EmptyArchive,
                "archive is empty",
            ));
        }
        self.check_size(compressed_len)?;

        let uncompressed: u64 = entries
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.uncompressed_size));
        let allowed = compressed_len.saturating_mul(self.limits.max_compression_ratio);
        if uncompressed > allowed {
            return Err(ValidationError::new(
                RejectReason::BombSuspected,
                format!(
                    "declared {uncompressed} uncompressed bytes from {compressed_len} compressed (limit {}x)",
                    self.limits.max_compression_ratio
                ),
            ));
        }

        let count = declared_entry_count.max(entries.len());
        if count > self.limits.max_entries {
            return Err(ValidationError::new(
                RejectReason::TooManyEntries,
                format!("{count} entries (limit {})", self.limits.max_entries),
            ));
        }

        let mut manifest_entries = Vec::with_capacity(entries.len());
        for (index, raw) in entries.iter().enumerate() {
            let path = EntryPath::normalize(&raw.name)?;
            if path.is_empty() && raw.kind != EntryKind::Directory {
                return Err(ValidationError::new(
                    RejectReason::PathTraversal,
                    format!("{:?} resolves to the upload root", raw.name),
                ));
            }
            let link_target = match (raw.kind, &raw.link_target) {
                (EntryKind::Symlink, Some(target)) => Some(path.resolve_link(target)?),
                (EntryKind::Symlink, None) => {
                    return Err(ValidationError::new(
                        RejectReason::PathTraversal,
                        format!("link {path} has no target"),
                    ))
                }
                _ => None,
            };
            let parse_candidate = raw.kind == EntryKind::File && self.is_candidate(&path);
            debug!(entry = %path, kind = ?raw.kind, parse_candidate, "entry accepted");
            manifest_entries.push(ManifestEntry {
                index,
                path,
                kind: raw.kind,
                uncompressed_size: raw.uncompressed_size,
                compressed_size: raw.compressed_size,
                parse_candidate,
                link_target,
            });
        }

        Ok(ArchiveManifest {
            compressed_bytes: compressed_len,
            uncompressed_bytes: uncompressed,
            entries: manifest_entries,
        })
    }

    fn check_size(&self, compressed_len: u64) -> Result<(), ValidationError> {
        if compressed_len > self.limits.max_archive_bytes {
            return Err(ValidationError::new(
                RejectReason::TooLarge,
                format!(
                    "{compressed_len} bytes exceeds the {} byte limit",
                    self.limits.max_archive_bytes
                ),
            ));
        }
        Ok(())
    }

    fn is_candidate(&self, path: &EntryPath) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.source_extensions.iter().any(|allowed| *allowed == ext)
            }
            _ => false,
        }
    }
}

fn read_raw_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    index: usize,
) -> Result<RawEntry, ValidationError> {
    let invalid = |e: zip::result::ZipError| {
        ValidationError::new(
            RejectReason::InvalidArchive,
            format!("unreadable entry #{index}: {e}"),
        )
    };

    let (name, kind, uncompressed_size, compressed_size) = {
        let entry = archive.by_index_raw(index).map_err(invalid)?;
        let is_link = entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK);
        let kind = if is_link {
            EntryKind::Symlink
        } else if entry.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        (
            entry.name().to_string(),
            kind,
            entry.size(),
            entry.compressed_size(),
        )
    };

    let link_target = if kind == EntryKind::Symlink {
        let entry = archive.by_index(index).map_err(invalid)?;
        let mut target = Vec::new();
        entry
            .take(MAX_LINK_TARGET_BYTES + 1)
            .read_to_end(&mut target)
            .map_err(|e| {
                ValidationError::new(
                    RejectReason::InvalidArchive,
                    format!("unreadable link target in {name:?}: {e}"),
                )
            })?;
        if target.len() as u64 > MAX_LINK_TARGET_BYTES {
            return Err(ValidationError::new(
                RejectReason::PathTraversal,
                format!("link {name:?} has an oversized target"),
            ));
        }
        Some(String::from_utf8_lossy(&target).into_owned())
    } else {
        None
    };

    Ok(RawEntry {
        name,
        kind,
        uncompressed_size,
        compressed_size,
        link_target,
    })
}
