//! Per-file summaries built from analyzed symbols.
//!
//! [`Summarizer`] is the seam an AI-backed implementation plugs into; the
//! built-in [`TemplateSummarizer`] is deterministic and never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ParseStatus, SymbolRecord, UploadId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassOutline {
    pub name: String,
    pub methods: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionOutline {
    pub name: String,
    pub parameters: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: String,
    pub status: ParseStatus,
    pub line_count: usize,
    pub imports: Vec<String>,
    pub classes: Vec<ClassOutline>,
    /// Module-level functions only; methods are listed under their class.
    pub functions: Vec<FunctionOutline>,
    pub text: String,
    pub errors: Vec<String>,
}

pub trait Summarizer: Send + Sync {
    /// Short label recorded on the upload summary, e.g. `template`.
    fn mode(&self) -> &str;

    fn summarize_file(&self, record: &SymbolRecord) -> FileSummary;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateSummarizer;

impl Summarizer for TemplateSummarizer {
    fn mode(&self) -> &str {
        "template"
    }

    fn summarize_file(&self, record: &SymbolRecord) -> FileSummary {
        let classes: Vec<ClassOutline> = record
            .classes
            .iter()
            .map(|class| ClassOutline {
                name: class.qualified_name.clone(),
                methods: record
                    .functions
                    .iter()
                    .filter(|f| {
                        f.is_method && f.enclosing_class.as_ref() == Some(&class.qualified_name)
                    })
                    .map(|f| f.name.clone())
                    .collect(),
            })
            .collect();
        let functions: Vec<FunctionOutline> = record
            .functions
            .iter()
            .filter(|f| f.enclosing_class.is_none() && !f.qualified_name.contains('.'))
            .map(|f| FunctionOutline {
                name: f.name.clone(),
                parameters: f.parameters.clone(),
            })
            .collect();
        let imports: Vec<String> = record.imports.iter().map(|i| i.display_key()).collect();

        let mut errors = Vec::new();
        let text = match (&record.status, &record.error) {
            (ParseStatus::SyntaxError, error) => {
                let detail = error.as_ref().map(|e| match e.line {
                    Some(line) => format!("syntax error at line {line}: {}", e.message),
                    None => format!("syntax error: {}", e.message),
                });
                let detail = detail.unwrap_or_else(|| "syntax error".to_string());
                errors.push(detail.clone());
                format!("{}: {detail}; {} lines.", record.path, record.line_count)
            }
            (ParseStatus::Unsupported, _) => format!("{}: not analyzed.", record.path),
            (ParseStatus::Ok, _) => format!(
                "{}: {}, {}, {} {}, {} lines.",
                record.path,
                counted("class", "classes", classes.iter().map(|c| c.name.as_str())),
                counted("function", "functions", functions.iter().map(|f| f.name.as_str())),
                imports.len(),
                if imports.len() == 1 { "import" } else { "imports" },
                record.line_count,
            ),
        };

        FileSummary {
            path: record.path.clone(),
            status: record.status,
            line_count: record.line_count,
            imports,
            classes,
            functions,
            text,
            errors,
        }
    }
}

fn counted<'a>(singular: &str, plural: &str, names: impl Iterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.collect();
    let noun = if names.len() == 1 { singular } else { plural };
    if names.is_empty() {
        format!("0 {noun}")
    } else {
        format!("{} {noun} ({})", names.len(), names.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub upload_id: UploadId,
    pub mode: String,
    pub summarized_at: DateTime<Utc>,
    pub total_files: usize,
    pub successfully_summarized: usize,
    pub files: Vec<FileSummary>,
}

impl UploadSummary {
    /// Summarize every analyzed source file; unsupported files are left out.
    pub fn build(
        upload_id: &UploadId,
        records: &[SymbolRecord],
        summarizer: &dyn Summarizer,
        now: DateTime<Utc>,
    ) -> Self {
        let files: Vec<FileSummary> = records
            .iter()
            .filter(|r| r.status != ParseStatus::Unsupported)
            .map(|r| summarizer.summarize_file(r))
            .collect();
        Self {
            upload_id: upload_id.clone(),
            mode: summarizer.mode().to_string(),
            summarized_at: now,
            total_files: files.len(),
            successfully_summarized: files.iter().filter(|f| f.errors.is_empty()).count(),
            files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassSymbol, FunctionSymbol, ImportSymbol, ParseFailure};

    fn function(name: &str, qualified: &str, class: Option<&str>) -> FunctionSymbol {
        FunctionSymbol {
            name: name.into(),
            qualified_name: qualified.into(),
            start_line: 1,
            end_line: 1,
            parameters: vec!["self".into()],
            enclosing_class: class.map(String::from),
            is_method: class.is_some(),
            is_async: false,
        }
    }

    fn sample() -> SymbolRecord {
        let mut record = SymbolRecord::empty("m.py", ParseStatus::Ok);
        record.line_count = 12;
        record.classes.push(ClassSymbol {
            name: "Box".into(),
            qualified_name: "Box".into(),
            start_line: 1,
            end_line: 5,
            enclosing_class: None,
        });
        record.functions.push(function("open", "Box.open", Some("Box")));
        record.functions.push(function("main", "main", None));
        record.functions.push(function("inner", "main.inner", None));
        record.imports.push(ImportSymbol {
            module: "os".into(),
            alias: None,
            line: 1,
        });
        record
    }

    #[test]
    fn template_lists_classes_and_top_level_functions() {
        let summary = TemplateSummarizer.summarize_file(&sample());
        assert_eq!(summary.classes[0].methods, vec!["open".to_string()]);
        assert_eq!(summary.functions.len(), 1);
        assert_eq!(summary.functions[0].name, "main");
        assert_eq!(
            summary.text,
            "m.py: 1 class (Box), 1 function (main), 1 import, 12 lines."
        );
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn syntax_errors_are_reported_not_raised() {
        let mut record = SymbolRecord::empty("b.py", ParseStatus::SyntaxError);
        record.line_count = 3;
        record.error = Some(ParseFailure::at("missing `)`", 2, 8));
        let summary = TemplateSummarizer.summarize_file(&record);
        assert_eq!(summary.errors, vec!["syntax error at line 2: missing `)`".to_string()]);
        assert!(summary.text.starts_with("b.py: syntax error at line 2"));
    }

    #[test]
    fn upload_summary_skips_unsupported_files() {
        let id = UploadId::generate();
        let mut broken = SymbolRecord::empty("b.py", ParseStatus::SyntaxError);
        broken.error = Some(ParseFailure::new("unreadable"));
        let records = vec![
            sample(),
            broken,
            SymbolRecord::empty("README.md", ParseStatus::Unsupported),
        ];
        let summary = UploadSummary::build(&id, &records, &TemplateSummarizer, Utc::now());
        assert_eq!(summary.mode, "template");
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.successfully_summarized, 1);
    }
}
