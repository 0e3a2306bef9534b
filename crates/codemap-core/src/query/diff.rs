//! Structural comparison of two analyzed uploads.
//!
//! Files are matched by relative path. Within a file present on both sides,
//! classes and functions are matched by qualified name and imports by their
//! `module [as alias]` key. A name defined more than once in a file (a
//! property getter and its setter, `typing.overload` stubs) is matched by
//! occurrence: the first `A.x` before against the first `A.x` after, and so on. Every list in a [`DiffResult`] is sorted, so
//! swapping the operands swaps `added` and `removed` exactly.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CodemapResult;
use crate::indexer::imports::DependencyGraph;
use crate::models::{ClassSymbol, FunctionSymbol, ParseStatus, SymbolRecord, UploadId};
use crate::store::SymbolStore;

/// A symbol present on both sides with a different shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changed<T> {
    pub qualified_name: String,
    /// Position among same-named definitions in the file, starting at 0.
    pub occurrence: usize,
    pub before: T,
    pub after: T,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDelta<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub changed: Vec<Changed<T>>,
}

impl<T> Default for SymbolDelta<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
        }
    }
}

impl<T> SymbolDelta<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Imports are compared as key sets, so there is no `changed` bucket: an
/// alias change shows up as one removal and one addition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ImportDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub before: ParseStatus,
    pub after: ParseStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub status_change: Option<StatusChange>,
    pub classes: SymbolDelta<ClassSymbol>,
    pub functions: SymbolDelta<FunctionSymbol>,
    pub imports: ImportDelta,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<FileDiff>,
    pub unchanged: Vec<String>,
    /// Jaccard index over file paths, rounded to three decimals.
    pub similarity: f64,
    pub external_packages_added: Vec<String>,
    pub external_packages_removed: Vec<String>,
    pub new_cycles: Vec<Vec<String>>,
    pub resolved_cycles: Vec<Vec<String>>,
    pub classes_delta: i64,
    pub functions_delta: i64,
    pub lines_delta: i64,
    pub summary: String,
}

impl DiffResult {
    pub fn modified_paths(&self) -> Vec<&str> {
        self.modified.iter().map(|diff| diff.path.as_str()).collect()
    }

    pub fn file(&self, path: &str) -> Option<&FileDiff> {
        self.modified.iter().find(|diff| diff.path == path)
    }
}

pub struct DiffEngine;

impl DiffEngine {
    /// Compare upload `id_a` in `store_a` against `id_b` in `store_b`. Either
    /// side missing from its store is `NotFound`.
    pub fn compare(
        store_a: &dyn SymbolStore,
        id_a: &UploadId,
        store_b: &dyn SymbolStore,
        id_b: &UploadId,
    ) -> CodemapResult<DiffResult> {
        let before = store_a.get(id_a)?;
        let after = store_b.get(id_b)?;
        let result = Self::compare_records(&before.records, &after.records);
        debug!(
            upload_a = %id_a,
            upload_b = %id_b,
            added = result.added.len(),
            removed = result.removed.len(),
            modified = result.modified.len(),
            "uploads compared"
        );
        Ok(result)
    }

    pub fn compare_records(before: &[SymbolRecord], after: &[SymbolRecord]) -> DiffResult {
        let index_a = by_path(before);
        let index_b = by_path(after);

        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut modified = Vec::new();
        let mut unchanged = Vec::new();

        for (path, record_a) in &index_a {
            match index_b.get(path) {
                None => removed.push(path.to_string()),
                Some(record_b) => match diff_file(record_a, record_b) {
                    Some(file_diff) => modified.push(file_diff),
                    None => unchanged.push(path.to_string()),
                },
            }
        }
        for path in index_b.keys() {
            if !index_a.contains_key(path) {
                added.push(path.to_string());
            }
        }

        let common = unchanged.len() + modified.len();
        let union = index_a.len() + added.len();
        let similarity = if union == 0 {
            1.0
        } else {
            (common as f64 / union as f64 * 1000.0).round() / 1000.0
        };

        let graph_a = DependencyGraph::build(before);
        let graph_b = DependencyGraph::build(after);
        let cycles_a: BTreeSet<&Vec<String>> = graph_a.cycles.iter().collect();
        let cycles_b: BTreeSet<&Vec<String>> = graph_b.cycles.iter().collect();

        let mut result = DiffResult {
            added,
            removed,
            modified,
            unchanged,
            similarity,
            external_packages_added: graph_b
                .external_packages
                .difference(&graph_a.external_packages)
                .cloned()
                .collect(),
            external_packages_removed: graph_a
                .external_packages
                .difference(&graph_b.external_packages)
                .cloned()
                .collect(),
            new_cycles: cycles_b.difference(&cycles_a).map(|c| c.to_vec()).collect(),
            resolved_cycles: cycles_a.difference(&cycles_b).map(|c| c.to_vec()).collect(),
            classes_delta: count(after, |r| r.classes.len()) - count(before, |r| r.classes.len()),
            functions_delta: count(after, |r| r.functions.len())
                - count(before, |r| r.functions.len()),
            lines_delta: count(after, |r| r.line_count) - count(before, |r| r.line_count),
            summary: String::new(),
        };
        result.summary = summarize(&result);
        result
    }
}

/// Path index; a repeated path keeps its last record.
fn by_path(records: &[SymbolRecord]) -> BTreeMap<&str, &SymbolRecord> {
    records.iter().map(|r| (r.path.as_str(), r)).collect()
}

fn count(records: &[SymbolRecord], f: impl Fn(&SymbolRecord) -> usize) -> i64 {
    records.iter().map(f).sum::<usize>() as i64
}

fn diff_file(a: &SymbolRecord, b: &SymbolRecord) -> Option<FileDiff> {
    let diff = FileDiff {
        path: a.path.clone(),
        status_change: (a.status != b.status).then_some(StatusChange {
            before: a.status,
            after: b.status,
        }),
        classes: keyed_delta(&a.classes, &b.classes, |c| &c.qualified_name),
        functions: keyed_delta(&a.functions, &b.functions, |f| &f.qualified_name),
        imports: import_delta(a, b),
    };
    let modified = diff.status_change.is_some()
        || !diff.classes.is_empty()
        || !diff.functions.is_empty()
        || !diff.imports.is_empty();
    modified.then_some(diff)
}

/// `(qualified_name, occurrence)` for each symbol, in source order.
fn occurrences<'a, T>(
    symbols: &'a [T],
    key: impl Fn(&T) -> &String,
) -> BTreeMap<(&'a String, usize), &'a T> {
    let mut seen: BTreeMap<&String, usize> = BTreeMap::new();
    symbols
        .iter()
        .map(|symbol| {
            let name = key(symbol);
            let index = seen.entry(name).or_insert(0);
            let occurrence = *index;
            *index += 1;
            ((name, occurrence), symbol)
        })
        .collect()
}

/// Symbols matched on both sides are `changed` when any field differs:
/// span, parameters, async-ness or enclosing scope.
fn keyed_delta<T, F>(before: &[T], after: &[T], key: F) -> SymbolDelta<T>
where
    T: Clone + PartialEq,
    F: Fn(&T) -> &String,
{
    let map_a = occurrences(before, &key);
    let map_b = occurrences(after, &key);

    let mut delta = SymbolDelta::default();
    for (&(name, occurrence), old) in &map_a {
        match map_b.get(&(name, occurrence)) {
            None => delta.removed.push((*old).clone()),
            Some(new) if old != new => delta.changed.push(Changed {
                qualified_name: name.clone(),
                occurrence,
                before: (*old).clone(),
                after: (*new).clone(),
            }),
            Some(_) => {}
        }
    }
    for (slot, new) in &map_b {
        if !map_a.contains_key(slot) {
            delta.added.push((*new).clone());
        }
    }
    delta
}

fn import_delta(a: &SymbolRecord, b: &SymbolRecord) -> ImportDelta {
    let keys_a: BTreeSet<String> = a.imports.iter().map(|i| i.display_key()).collect();
    let keys_b: BTreeSet<String> = b.imports.iter().map(|i| i.display_key()).collect();
    ImportDelta {
        added: keys_b.difference(&keys_a).cloned().collect(),
        removed: keys_a.difference(&keys_b).cloned().collect(),
    }
}

fn name_list(names: &[String]) -> String {
    let shown = names.iter().take(5).cloned().collect::<Vec<_>>().join(", ");
    if names.len() > 5 {
        format!("{shown} and {} more", names.len() - 5)
    } else {
        shown
    }
}

fn summarize(result: &DiffResult) -> String {
    let mut parts = Vec::new();
    if !result.added.is_empty() {
        parts.push(format!("Added {} new files", result.added.len()));
    }
    if !result.removed.is_empty() {
        parts.push(format!("Removed {} files", result.removed.len()));
    }
    if !result.modified.is_empty() {
        parts.push(format!("Modified {} files", result.modified.len()));
    }
    if result.lines_delta != 0 {
        let direction = if result.lines_delta > 0 { "added" } else { "removed" };
        parts.push(format!("{} lines {direction}", result.lines_delta.unsigned_abs()));
    }
    if !result.external_packages_added.is_empty() {
        parts.push(format!(
            "Added dependencies: {}",
            name_list(&result.external_packages_added)
        ));
    }
    if !result.external_packages_removed.is_empty() {
        parts.push(format!(
            "Removed dependencies: {}",
            name_list(&result.external_packages_removed)
        ));
    }
    if !result.new_cycles.is_empty() {
        parts.push(format!(
            "Introduced {} new circular dependencies",
            result.new_cycles.len()
        ));
    }
    if !result.resolved_cycles.is_empty() {
        parts.push(format!(
            "Resolved {} circular dependencies",
            result.resolved_cycles.len()
        ));
    }

    if parts.is_empty() {
        "No significant changes detected".to_string()
    } else {
        parts.join("; ")
    }
}
