//! Normalization of archive entry names into root-relative paths.
//!
//! Separators are unified (`\` becomes `/`), empty and `.` components are
//! dropped and `..` pops the previous component. A name that is absolute,
//! carries a drive prefix, contains a NUL byte or climbs above the root is
//! rejected with `path_traversal`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{RejectReason, ValidationError};

/// Upper bound on the number of components in one entry name.
pub const MAX_COMPONENTS: usize = 256;

/// A normalized, root-relative, `/`-separated entry path. May be empty when
/// the name resolves to the root itself (e.g. `./`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryPath(String);

impl EntryPath {
    pub fn normalize(raw: &str) -> Result<Self, ValidationError> {
        let components = normalize_components(raw, Vec::new())?;
        Ok(Self(components.join("/")))
    }

    /// Resolve a symbolic link target written in the entry at `self`. The
    /// target is interpreted relative to the entry's parent directory.
    pub fn resolve_link(&self, target: &str) -> Result<Self, ValidationError> {
        let mut base: Vec<String> = self.components().map(str::to_string).collect();
        base.pop();
        let components = normalize_components(target, base).map_err(|err| {
            ValidationError::new(
                RejectReason::PathTraversal,
                format!("link {self} -> {target}: {}", err.detail),
            )
        })?;
        Ok(Self(components.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    pub fn file_name(&self) -> Option<&str> {
        self.components().last()
    }

    /// Relative filesystem path built from the normalized components.
    pub fn to_relative_path(&self) -> PathBuf {
        self.components().collect()
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn traversal(raw: &str, why: &str) -> ValidationError {
    ValidationError::new(RejectReason::PathTraversal, format!("{raw:?} {why}"))
}

fn has_drive_prefix(component: &str) -> bool {
    let bytes = component.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn normalize_components(raw: &str, mut stack: Vec<String>) -> Result<Vec<String>, ValidationError> {
    if raw.contains('\0') {
        return Err(traversal(raw, "contains a NUL byte"));
    }
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(traversal(raw, "is absolute"));
    }

    let mut seen = 0usize;
    for component in unified.split('/') {
        seen += 1;
        if seen > MAX_COMPONENTS {
            return Err(traversal(raw, "has too many components"));
        }
        match component {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(traversal(raw, "escapes the upload root"));
                }
            }
            other => {
                if stack.is_empty() && has_drive_prefix(other) {
                    return Err(traversal(raw, "has a drive prefix"));
                }
                stack.push(other.to_string());
            }
        }
    }
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(raw: &str) -> RejectReason {
        EntryPath::normalize(raw).unwrap_err().reason
    }

    #[test]
    fn normalizes_separators_and_dots() {
        let path = EntryPath::normalize("pkg\\sub/./mod.py").unwrap();
        assert_eq!(path.as_str(), "pkg/sub/mod.py");
        let inner = EntryPath::normalize("pkg/sub/../mod.py").unwrap();
        assert_eq!(inner.as_str(), "pkg/mod.py");
        assert_eq!(inner.file_name(), Some("mod.py"));
    }

    #[test]
    fn root_directory_entry_is_empty() {
        assert!(EntryPath::normalize("./").unwrap().is_empty());
    }

    #[test]
    fn rejects_escapes() {
        assert_eq!(reason("../../etc/passwd"), RejectReason::PathTraversal);
        assert_eq!(reason("a/../../b"), RejectReason::PathTraversal);
        assert_eq!(reason("/etc/passwd"), RejectReason::PathTraversal);
        assert_eq!(reason("\\windows\\system32"), RejectReason::PathTraversal);
        assert_eq!(reason("C:/temp/x.py"), RejectReason::PathTraversal);
        assert_eq!(reason("ok\0.py"), RejectReason::PathTraversal);
    }

    #[test]
    fn resolves_link_targets_relative_to_parent() {
        let link = EntryPath::normalize("pkg/sub/link").unwrap();
        assert_eq!(link.resolve_link("../mod.py").unwrap().as_str(), "pkg/mod.py");
        assert!(link.resolve_link("../../../outside").is_err());
        assert!(link.resolve_link("/etc/shadow").is_err());
    }

    #[test]
    fn relative_path_has_no_parent_components() {
        let path = EntryPath::normalize("a/b/../c.py").unwrap();
        assert_eq!(path.to_relative_path(), PathBuf::from("a").join("c.py"));
    }
}
