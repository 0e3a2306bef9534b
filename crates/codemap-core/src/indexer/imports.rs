//! Import resolution and the file-level dependency graph of one upload.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::models::SymbolRecord;

const MOST_RANKED: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingImport {
    pub file: String,
    pub module: String,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedFile {
    pub file: String,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_files: usize,
    pub total_dependencies: usize,
    pub circular_dependencies: usize,
    pub missing_imports: usize,
    pub isolated_files: usize,
    pub most_imported: Vec<RankedFile>,
    pub most_imports: Vec<RankedFile>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Python files of the upload.
    pub nodes: BTreeSet<String>,
    /// importer -> imported files
    pub edges: BTreeMap<String, BTreeSet<String>>,
    /// imported file -> importers
    pub reverse: BTreeMap<String, BTreeSet<String>>,
    pub external_packages: BTreeSet<String>,
    pub missing_imports: Vec<MissingImport>,
    /// Each cycle starts at its smallest path and does not repeat it at the end.
    pub cycles: Vec<Vec<String>>,
    pub statistics: GraphStatistics,
}

impl DependencyGraph {
    pub fn build(records: &[SymbolRecord]) -> Self {
        let mut graph = DependencyGraph::default();
        let python: Vec<&SymbolRecord> = records.iter().filter(|r| is_python(&r.path)).collect();
        graph.nodes = python.iter().map(|r| r.path.clone()).collect();
        let modules = module_index(&graph.nodes);

        for record in python.iter().filter(|r| r.is_parsed()) {
            for import in &record.imports {
                let module = import.module.strip_suffix(".*").unwrap_or(&import.module);
                if module.starts_with('.') {
                    match resolve_relative(&record.path, module, &graph.nodes) {
                        Some(target) => graph.add_edge(&record.path, target),
                        None => graph.missing_imports.push(MissingImport {
                            file: record.path.clone(),
                            module: import.module.clone(),
                            line: import.line,
                        }),
                    }
                } else {
                    match resolve_absolute(module, &modules) {
                        Some(target) => graph.add_edge(&record.path, target),
                        None => {
                            let top = module.split('.').next().unwrap_or(module);
                            if !top.is_empty() && top != "__future__" {
                                graph.external_packages.insert(top.to_string());
                            }
                        }
                    }
                }
            }
        }

        graph.cycles = find_cycles(&graph.edges);
        graph.statistics = graph.compute_statistics();
        graph
    }

    fn add_edge(&mut self, from: &str, to: String) {
        if from == to {
            return;
        }
        self.reverse
            .entry(to.clone())
            .or_default()
            .insert(from.to_string());
        self.edges.entry(from.to_string()).or_default().insert(to);
    }

    pub fn imports_from(&self, path: &str) -> Vec<&str> {
        self.edges
            .get(path)
            .map(|targets| targets.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn imported_by(&self, path: &str) -> Vec<&str> {
        self.reverse
            .get(path)
            .map(|sources| sources.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    fn compute_statistics(&self) -> GraphStatistics {
        let isolated_files = self
            .nodes
            .iter()
            .filter(|n| !self.edges.contains_key(*n) && !self.reverse.contains_key(*n))
            .count();
        GraphStatistics {
            total_files: self.nodes.len(),
            total_dependencies: self.edge_count(),
            circular_dependencies: self.cycles.len(),
            missing_imports: self.missing_imports.len(),
            isolated_files,
            most_imported: ranked(&self.reverse),
            most_imports: ranked(&self.edges),
        }
    }
}

fn ranked(map: &BTreeMap<String, BTreeSet<String>>) -> Vec<RankedFile> {
    let mut counts: Vec<RankedFile> = map
        .iter()
        .map(|(file, set)| RankedFile {
            file: file.clone(),
            count: set.len(),
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.file.cmp(&b.file)));
    counts.truncate(MOST_RANKED);
    counts
}

/// Suffixes of importable files, in the order Python prefers them when a
/// module is provided twice.
const MODULE_SUFFIXES: &[&str] = &["/__init__.py", ".py", ".pyw", ".pyi"];

fn is_python(path: &str) -> bool {
    path.ends_with(".py") || path.ends_with(".pyw") || path.ends_with(".pyi")
}

/// Lower is preferred: a package before a plain module before a stub.
fn source_rank(path: &str) -> usize {
    MODULE_SUFFIXES
        .iter()
        .position(|suffix| path.ends_with(suffix))
        .unwrap_or(MODULE_SUFFIXES.len())
}

/// Dotted module name for a file path: `a/b.py` and `a/b/__init__.py` are
/// both `a.b`.
fn module_name(path: &str) -> String {
    let stem = [".pyi", ".pyw", ".py"]
        .iter()
        .find_map(|ext| path.strip_suffix(ext))
        .unwrap_or(path);
    let stem = stem.strip_suffix("/__init__").unwrap_or(stem);
    stem.replace('/', ".")
}

/// Map `module` to `path` unless a preferred file already provides it.
/// Paths arrive in order, so equal ranks keep the first.
fn claim(index: &mut HashMap<String, String>, module: String, path: &str) {
    match index.get(&module) {
        Some(current) if source_rank(current) <= source_rank(path) => {}
        _ => {
            index.insert(module, path.to_string());
        }
    }
}

/// Module name, and every trailing part of it, to the file that provides
/// it: a package's `__init__.py` over `name.py` over a `.pyi` stub, then
/// the first in path order. Full names always beat suffixes. Suffixes let
/// `pkg.mod` resolve inside archives that wrap the project in an extra
/// top-level directory.
fn module_index(paths: &BTreeSet<String>) -> HashMap<String, String> {
    let mut index: HashMap<String, String> = HashMap::new();
    for path in paths {
        let module = module_name(path);
        if module.is_empty() || module == "__init__" {
            continue;
        }
        claim(&mut index, module, path);
    }
    let mut suffixes: HashMap<String, String> = HashMap::new();
    for path in paths {
        let module = module_name(path);
        let parts: Vec<&str> = module.split('.').collect();
        for start in 1..parts.len() {
            let suffix = parts[start..].join(".");
            if !index.contains_key(&suffix) {
                claim(&mut suffixes, suffix, path);
            }
        }
    }
    index.extend(suffixes);
    index
}

/// Longest dotted prefix of `module` provided by a file of the upload, so
/// `pkg.mod.name` resolves to `pkg/mod.py`.
fn resolve_absolute(module: &str, index: &HashMap<String, String>) -> Option<String> {
    let parts: Vec<&str> = module.split('.').filter(|p| !p.is_empty()).collect();
    (1..=parts.len())
        .rev()
        .find_map(|len| index.get(&parts[..len].join(".")).cloned())
}

fn resolve_relative(source_path: &str, module: &str, files: &BTreeSet<String>) -> Option<String> {
    let levels = module.chars().take_while(|&c| c == '.').count();
    let suffix = &module[levels..];

    let mut base: Vec<&str> = source_path.split('/').collect();
    base.pop();
    for _ in 1..levels {
        base.pop()?;
    }

    let parts: Vec<&str> = suffix.split('.').filter(|p| !p.is_empty()).collect();
    for len in (0..=parts.len()).rev() {
        let mut candidate: Vec<&str> = base.clone();
        candidate.extend_from_slice(&parts[..len]);
        let stem = candidate.join("/");
        let options: Vec<String> = if stem.is_empty() {
            vec!["__init__.py".to_string()]
        } else {
            MODULE_SUFFIXES.iter().map(|suffix| format!("{stem}{suffix}")).collect()
        };
        if let Some(found) = options.into_iter().find(|c| files.contains(c) && c != source_path) {
            return Some(found);
        }
    }
    None
}

/// Depth-first cycle detection in path order. Every back edge yields one
/// cycle; cycles are rotated to start at their smallest member and
/// de-duplicated.
fn find_cycles(edges: &BTreeMap<String, BTreeSet<String>>) -> Vec<Vec<String>> {
    fn visit<'a>(
        node: &'a str,
        edges: &'a BTreeMap<String, BTreeSet<String>>,
        visited: &mut BTreeSet<&'a str>,
        stack: &mut Vec<&'a str>,
        found: &mut BTreeSet<Vec<String>>,
    ) {
        visited.insert(node);
        stack.push(node);
        if let Some(targets) = edges.get(node) {
            for target in targets {
                if let Some(position) = stack.iter().position(|n| *n == target.as_str()) {
                    found.insert(canonical_cycle(&stack[position..]));
                } else if !visited.contains(target.as_str()) {
                    visit(target, edges, visited, stack, found);
                }
            }
        }
        stack.pop();
    }

    let mut visited = BTreeSet::new();
    let mut found = BTreeSet::new();
    for node in edges.keys() {
        if !visited.contains(node.as_str()) {
            let mut stack = Vec::new();
            visit(node, edges, &mut visited, &mut stack, &mut found);
        }
    }
    found.into_iter().collect()
}

fn canonical_cycle(members: &[&str]) -> Vec<String> {
    let start = members
        .iter()
        .enumerate()
        .min_by_key(|(_, name)| **name)
        .map(|(i, _)| i)
        .unwrap_or(0);
    members[start..]
        .iter()
        .chain(members[..start].iter())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImportSymbol, ParseStatus};

    fn record(path: &str, imports: &[&str]) -> SymbolRecord {
        let mut record = SymbolRecord::empty(path, ParseStatus::Ok);
        record.imports = imports
            .iter()
            .enumerate()
            .map(|(i, module)| ImportSymbol {
                module: module.to_string(),
                alias: None,
                line: i + 1,
            })
            .collect();
        record
    }

    #[test]
    fn resolves_absolute_and_relative_imports() {
        let records = vec![
            record("pkg/__init__.py", &[]),
            record("pkg/a.py", &["pkg.b.helper", ".c", "os.path", "requests"]),
            record("pkg/b.py", &[]),
            record("pkg/c.py", &["..missing"]),
        ];
        let graph = DependencyGraph::build(&records);
        assert_eq!(graph.imports_from("pkg/a.py"), vec!["pkg/b.py", "pkg/c.py"]);
        assert_eq!(graph.imported_by("pkg/b.py"), vec!["pkg/a.py"]);
        assert_eq!(
            graph.external_packages.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["os", "requests"]
        );
        assert_eq!(graph.missing_imports.len(), 1);
        assert_eq!(graph.missing_imports[0].file, "pkg/c.py");
        assert_eq!(graph.statistics.isolated_files, 1);
    }

    #[test]
    fn resolves_inside_wrapping_directory() {
        let records = vec![
            record("project/app/main.py", &["app.util"]),
            record("project/app/util.py", &[]),
        ];
        let graph = DependencyGraph::build(&records);
        assert_eq!(graph.imports_from("project/app/main.py"), vec!["project/app/util.py"]);
        assert!(graph.external_packages.is_empty());
    }

    #[test]
    fn package_beats_module_and_stub() {
        let records = vec![
            record("a/b.py", &[]),
            record("a/b.pyi", &[]),
            record("a/b/__init__.py", &[]),
            record("main.py", &["a.b"]),
            record("tool.pyw", &["a.b", "gui"]),
            record("gui.pyw", &[]),
            record("types.pyi", &[]),
            record("types.py", &[]),
            record("user.py", &["types", ".types"]),
        ];
        let graph = DependencyGraph::build(&records);
        assert!(graph.nodes.contains("tool.pyw"));
        assert_eq!(graph.imports_from("main.py"), vec!["a/b/__init__.py"]);
        assert_eq!(graph.imports_from("tool.pyw"), vec!["a/b/__init__.py", "gui.pyw"]);
        assert_eq!(graph.imports_from("user.py"), vec!["types.py"]);
    }

    #[test]
    fn detects_cycles_once_in_canonical_form() {
        let records = vec![
            record("b.py", &["c"]),
            record("a.py", &["b"]),
            record("c.py", &["a"]),
            record("d.py", &["d"]),
        ];
        let graph = DependencyGraph::build(&records);
        assert_eq!(
            graph.cycles,
            vec![vec!["a.py".to_string(), "b.py".to_string(), "c.py".to_string()]]
        );
        assert_eq!(graph.statistics.circular_dependencies, 1);
    }

    #[test]
    fn ranks_most_imported_files() {
        let records = vec![
            record("a.py", &["util"]),
            record("b.py", &["util", "a"]),
            record("util.py", &[]),
        ];
        let graph = DependencyGraph::build(&records);
        assert_eq!(
            graph.statistics.most_imported[0],
            RankedFile {
                file: "util.py".to_string(),
                count: 2
            }
        );
    }
}
