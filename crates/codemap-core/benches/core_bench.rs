//! Criterion benchmarks for codemap-core.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: DDL init + migration overhead.
//! 2. **archive**: Guard validation of in-memory ZIPs.
//! 3. **parsing**: tree-sitter parse and symbol collection per file.
//! 4. **diff**: Structural comparison of synthetic uploads.
//! 5. **pipeline**: Submit + analyze through the service facade.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/codemap-core/Cargo.toml
//! # Run only the diff group:
//! cargo bench --manifest-path crates/codemap-core/Cargo.toml -- diff
//! ```

use std::io::{Cursor, Write};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use codemap_core::archive::ArchiveGuard;
use codemap_core::clock::SystemClock;
use codemap_core::indexer::parser::parse_source;
use codemap_core::models::{FunctionSymbol, ParseStatus, SymbolRecord};
use codemap_core::query::DiffEngine;
use codemap_core::storage::MemoryStorage;
use codemap_core::store::schema::{migrate_schema, SCHEMA_STATEMENTS};
use codemap_core::store::MemorySymbolStore;
use codemap_core::{CodemapConfig, CodemapService};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A module with `n` classes, each holding a few methods and a nested helper.
fn python_module(n: usize) -> String {
    let mut source = String::from("import os\nfrom collections import defaultdict\n\n");
    for i in 0..n {
        source.push_str(&format!(
            "class Widget{i}(object):\n    \
             def __init__(self, name, *args, **kwargs):\n        self.name = name\n\n    \
             async def load(self, path: str = '.') -> None:\n        \
             def helper(x):\n            return x\n        return helper(path)\n\n"
        ));
    }
    source.push_str("def main(argv=None):\n    return 0\n");
    source
}

fn zip_of_modules(files: usize, classes_per_file: usize) -> Vec<u8> {
    let body = python_module(classes_per_file);
    // stored, so repetitive bodies never trip the compression ratio check
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for f in 0..files {
        writer.start_file(format!("pkg/mod_{f}.py"), options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// `n` records with ten functions each; `shift` moves every other function
/// and renames a few so the diff has work to do.
fn synthetic_records(n: usize, shift: usize) -> Vec<SymbolRecord> {
    (0..n)
        .map(|f| {
            let mut record = SymbolRecord::empty(format!("pkg/mod_{f}.py"), ParseStatus::Ok);
            record.line_count = 100 + shift;
            for i in 0..10 {
                let name = if shift > 0 && i % 7 == 0 {
                    format!("renamed_{i}")
                } else {
                    format!("func_{i}")
                };
                let start = i * 10 + if i % 2 == 0 { shift } else { 0 };
                record.functions.push(FunctionSymbol {
                    name: name.clone(),
                    qualified_name: name,
                    start_line: start,
                    end_line: start + 5,
                    parameters: vec!["a".into(), "b".into()],
                    enclosing_class: None,
                    is_method: false,
                    is_async: false,
                });
            }
            record
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_schema_init(c: &mut Criterion) {
    c.bench_function("schema_init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
            for stmt in SCHEMA_STATEMENTS {
                conn.execute_batch(stmt).unwrap();
            }
            migrate_schema(&conn).unwrap();
            black_box(&conn);
        });
    });
}

fn bench_archive_guard(c: &mut Criterion) {
    let guard = ArchiveGuard::default();
    let mut group = c.benchmark_group("archive");
    for files in [10usize, 200] {
        let bytes = zip_of_modules(files, 2);
        group.bench_with_input(BenchmarkId::new("validate", files), &bytes, |b, bytes| {
            b.iter(|| black_box(guard.validate(bytes).unwrap()));
        });
    }
    group.finish();
}

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");
    for classes in [5usize, 50, 500] {
        let source = python_module(classes);
        group.bench_with_input(
            BenchmarkId::new("parse_source", classes),
            &source,
            |b, source| {
                b.iter(|| black_box(parse_source(source.as_bytes()).unwrap()));
            },
        );
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    for files in [50usize, 1000] {
        let before = synthetic_records(files, 0);
        let after = synthetic_records(files, 3);
        group.bench_with_input(
            BenchmarkId::new("compare_records", files),
            &(before, after),
            |b, (before, after)| {
                b.iter(|| black_box(DiffEngine::compare_records(before, after)));
            },
        );
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let bytes = zip_of_modules(50, 10);
    c.bench_function("submit_and_analyze_50_files", |b| {
        b.iter(|| {
            let service = CodemapService::with_components(
                CodemapConfig::default(),
                Arc::new(MemoryStorage::new()),
                Arc::new(MemorySymbolStore::new()),
                Arc::new(SystemClock),
            )
            .unwrap();
            let id = service.submit_upload(&bytes).unwrap();
            black_box(service.trigger_analysis(&id).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_schema_init,
    bench_archive_guard,
    bench_parsing,
    bench_diff,
    bench_pipeline,
);
criterion_main!(benches);
