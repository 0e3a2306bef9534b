//! Read-side views over analyzed uploads: structural diffs and summaries.

pub mod diff;
pub mod summary;

pub use diff::{DiffEngine, DiffResult, FileDiff};
pub use summary::{FileSummary, Summarizer, TemplateSummarizer, UploadSummary};
