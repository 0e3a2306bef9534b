pub mod extract;
pub mod guard;
pub mod path;

pub use extract::{ExtractionStats, SafeExtractor};
pub use guard::{ArchiveGuard, ArchiveManifest, EntryKind, ManifestEntry, RawEntry};
pub use path::EntryPath;
