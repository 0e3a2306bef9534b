//! codemap core library: safe archive ingestion and structural analysis of
//! Python codebases.
//!
//! An upload flows through [`archive::ArchiveGuard`] (accept or reject),
//! [`archive::SafeExtractor`] (bytes to an isolated file tree),
//! [`indexer::StructuralParser`] (file tree to per-file symbol records) and
//! a [`store::SymbolStore`]. [`query::DiffEngine`] compares two analyzed
//! uploads and [`retention::RetentionManager`] expires old ones.
//! [`service::CodemapService`] ties these together behind one facade.

pub mod archive;
pub mod clock;
pub mod config;
pub mod errors;
pub mod indexer;
pub mod logging;
pub mod models;
pub mod query;
pub mod registry;
pub mod retention;
pub mod service;
pub mod storage;
pub mod store;

pub use config::CodemapConfig;
pub use errors::{CodemapError, CodemapResult, RejectReason, ValidationError};
pub use models::{ParseStatus, SymbolRecord, Upload, UploadId, UploadStatus};
pub use service::{CodemapService, FileContent, LineRange};
