//! Shared typed models used across extraction, analysis, storage and query layers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{CodemapError, CodemapResult};

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

/// Opaque identifier of one upload: a v4 UUID in its 32-digit lowercase hex
/// form. Only ever generated by the pipeline; parsing rejects anything else,
/// so an id is always safe to use as a directory name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn parse(raw: &str) -> CodemapResult<Self> {
        let trimmed = raw.trim();
        let well_formed = trimmed.len() == 32
            && trimmed
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(CodemapError::InvalidRequest(format!(
                "malformed upload id: {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UploadId {
    type Err = CodemapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for UploadId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        UploadId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Extracting,
    Extracted,
    Parsed,
    Failed,
    Deleted,
}

/// One submitted archive and its on-disk artifacts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub created_at: DateTime<Utc>,
    pub root: Option<PathBuf>,
    pub status: UploadStatus,
    pub archive_bytes: u64,
    pub entry_count: usize,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// A file inside an extracted upload.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceFile {
    /// `/`-separated path relative to the upload root.
    pub path: String,
    pub size_bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Ok,
    SyntaxError,
    Unsupported,
}

impl ParseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseStatus::Ok => "ok",
            ParseStatus::SyntaxError => "syntax_error",
            ParseStatus::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a file could not be analyzed. Lines and columns are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ParseFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSymbol {
    pub name: String,
    /// Dotted scope chain, e.g. `Outer.Inner`.
    pub qualified_name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub enclosing_class: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub name: String,
    /// Dotted scope chain, e.g. `Outer.method.helper`.
    pub qualified_name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub parameters: Vec<String>,
    /// Qualified name of the nearest enclosing class, at any depth.
    pub enclosing_class: Option<String>,
    /// Defined directly in a class body.
    pub is_method: bool,
    pub is_async: bool,
}

impl FunctionSymbol {
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSymbol {
    pub module: String,
    pub alias: Option<String>,
    pub line: usize,
}

impl ImportSymbol {
    /// `module` or `module as alias`.
    pub fn display_key(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} as {}", self.module, alias),
            None => self.module.clone(),
        }
    }
}

/// Structural analysis result for one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub path: String,
    pub status: ParseStatus,
    pub size_bytes: u64,
    pub line_count: usize,
    pub content_hash: String,
    pub classes: Vec<ClassSymbol>,
    pub functions: Vec<FunctionSymbol>,
    pub imports: Vec<ImportSymbol>,
    pub error: Option<ParseFailure>,
}

impl SymbolRecord {
    /// A record with no symbols, used for unsupported and failed files.
    pub fn empty(path: impl Into<String>, status: ParseStatus) -> Self {
        Self {
            path: path.into(),
            status,
            size_bytes: 0,
            line_count: 0,
            content_hash: String::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            imports: Vec::new(),
            error: None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.status == ParseStatus::Ok
    }

    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(format!(".{}", ext.to_ascii_lowercase()))
    }
}

/// Row of the file browser listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub path: String,
    pub status: ParseStatus,
}

impl From<&SymbolRecord> for FileListing {
    fn from(record: &SymbolRecord) -> Self {
        Self {
            path: record.path.clone(),
            status: record.status,
        }
    }
}
