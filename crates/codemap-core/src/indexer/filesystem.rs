//! Per-file helpers shared by analysis and browsing: classification, content
//! hashing, line counting and text decoding.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AnalysisConfig;
use crate::models::SourceFile;

/// What analysis does with one file of an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileDisposition {
    Parse,
    /// Recorded as unsupported; the reason, when present, is reported on the
    /// record.
    Skip(Option<String>),
}

pub fn classify(file: &SourceFile, config: &AnalysisConfig) -> FileDisposition {
    if !config.is_source_path(&file.path) {
        return FileDisposition::Skip(None);
    }
    if config.is_excluded(&file.path) {
        return FileDisposition::Skip(Some("inside an excluded directory".to_string()));
    }
    if file.size_bytes > config.max_file_bytes {
        return FileDisposition::Skip(Some(format!(
            "{} bytes exceeds the {} byte analysis limit",
            file.size_bytes, config.max_file_bytes
        )));
    }
    FileDisposition::Parse
}

pub fn compute_content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Number of lines, counting a final line without a trailing newline.
pub fn count_lines(bytes: &[u8]) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|b| **b == b'\n').count();
    if bytes.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

/// Decode file bytes as UTF-8, falling back to Latin-1 which accepts any
/// byte sequence.
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    let without_bom = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(without_bom) {
        Ok(text) => (text.to_string(), TextEncoding::Utf8),
        Err(_) => (
            bytes.iter().map(|&b| char::from(b)).collect(),
            TextEncoding::Latin1,
        ),
    }
}
