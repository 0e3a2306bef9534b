//! Structural analysis of extracted uploads.

pub mod filesystem;
pub mod imports;
pub mod parser;
pub mod pipeline;
pub mod symbols;
pub mod syntax;

pub use imports::DependencyGraph;
pub use pipeline::{CancelFlag, StructuralParser};
