use crate::cli::OutputFormat;
use crate::error::Result as ReftrackResult;
use crate::resource::{CodeReference, ResourceEntry};
use colored::*;
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct ReferenceRecord {
    file: String,
    line: usize,
    segments: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EntryRecord<'a> {
    container: &'a str,
    key: &'a str,
    scanned: bool,
    references: Vec<ReferenceRecord>,
}

impl EntryRecord<'_> {
    fn is_unused(&self) -> bool {
        self.scanned && self.references.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    root: String,
    total_entries: usize,
    unused_entries: usize,
    entries: Vec<EntryRecord<'a>>,
}

/// Renders the references published on a set of entries.
pub struct ReportFormatter {
    format: OutputFormat,
    unused_only: bool,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            unused_only: false,
        }
    }

    pub fn with_unused_only(mut self, unused_only: bool) -> Self {
        self.unused_only = unused_only;
        self
    }

    pub fn format_report<E: ResourceEntry>(
        &self,
        entries: &[Arc<E>],
        root: &Path,
    ) -> ReftrackResult<String> {
        let records: Vec<EntryRecord<'_>> = entries
            .iter()
            .map(|entry| to_record(entry.as_ref(), root))
            .collect();
        let total_entries = records.len();
        let unused_entries = records.iter().filter(|r| r.is_unused()).count();
        let records: Vec<EntryRecord<'_>> = records
            .into_iter()
            .filter(|r| !self.unused_only || r.is_unused())
            .collect();

        match self.format {
            OutputFormat::Json => {
                let report = Report {
                    root: root.display().to_string(),
                    total_entries,
                    unused_entries,
                    entries: records,
                };
                Ok(serde_json::to_string_pretty(&report)?)
            }
            OutputFormat::Text => Ok(format_text(&records, total_entries, unused_entries)),
        }
    }
}

fn format_text(records: &[EntryRecord<'_>], total: usize, unused: usize) -> String {
    let mut output = String::new();

    for record in records {
        let name = format!("{}.{}", record.container, record.key);
        if !record.scanned {
            let _ = writeln!(output, "{} {}", name.bold(), "(not scanned)".dimmed());
            continue;
        }
        if record.references.is_empty() {
            let _ = writeln!(output, "{} {}", name.bold(), "unused".yellow());
            continue;
        }
        let _ = writeln!(
            output,
            "{} {}",
            name.bold(),
            format!("({} references)", record.references.len()).dimmed()
        );
        for reference in &record.references {
            let _ = writeln!(
                output,
                "  {}:{}: {}",
                reference.file.cyan(),
                reference.line.to_string().green(),
                highlight(&reference.segments)
            );
        }
    }

    let unused_text = if unused > 0 {
        unused.to_string().yellow()
    } else {
        unused.to_string().green()
    };
    let _ = writeln!(output, "\n{total} entries, {unused_text} unused");
    output
}

fn to_record<'a, E: ResourceEntry + ?Sized>(entry: &'a E, root: &Path) -> EntryRecord<'a> {
    let published = entry.code_references().references();
    let references = published
        .as_deref()
        .map(|refs| refs.iter().map(|r| to_reference(r, root)).collect())
        .unwrap_or_default();
    EntryRecord {
        container: entry.container_base_name(),
        key: entry.key(),
        scanned: published.is_some(),
        references,
    }
}

fn to_reference(reference: &CodeReference, root: &Path) -> ReferenceRecord {
    let path = reference.file.path();
    ReferenceRecord {
        file: path.strip_prefix(root).unwrap_or(path).display().to_string(),
        line: reference.line_number,
        segments: reference.segments.clone(),
    }
}

/// The line with its matched segments highlighted, surrounding whitespace
/// trimmed.
pub fn highlight(segments: &[String]) -> String {
    let line: String = segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            if i % 2 == 1 {
                segment.red().bold().to_string()
            } else {
                segment.clone()
            }
        })
        .collect();
    line.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use crate::source::SourceFile;

    fn published(container: &str, key: &str, lines: &[usize]) -> Arc<Resource> {
        let resource = Arc::new(Resource::new(container, key));
        let references = lines
            .iter()
            .map(|&line_number| CodeReference {
                file: Arc::new(SourceFile::new("/repo/src/Program.cs")),
                line_number,
                segments: vec![
                    "x = ".to_string(),
                    format!("{container}.{key}"),
                    ";".to_string(),
                ],
            })
            .collect();
        resource.code_references().mark_pending(1);
        resource.code_references().publish(1, references);
        resource
    }

    #[test]
    fn test_json_report() {
        let entries = vec![
            published("Resources", "Greeting", &[3, 7]),
            published("Resources", "Unused", &[]),
        ];
        let json = ReportFormatter::new(OutputFormat::Json)
            .format_report(&entries, Path::new("/repo"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["total_entries"], 2);
        assert_eq!(value["unused_entries"], 1);
        assert_eq!(value["entries"][0]["key"], "Greeting");
        assert_eq!(value["entries"][0]["references"][1]["line"], 7);
        assert_eq!(
            value["entries"][0]["references"][0]["file"],
            Path::new("src").join("Program.cs").display().to_string()
        );
        assert_eq!(
            value["entries"][0]["references"][0]["segments"][1],
            "Resources.Greeting"
        );
    }

    #[test]
    fn test_unused_only_filters_referenced_entries() {
        colored::control::set_override(false);
        let entries = vec![
            published("Resources", "Greeting", &[3]),
            published("Resources", "Unused", &[]),
            Arc::new(Resource::new("Resources", "Never")),
        ];
        let text = ReportFormatter::new(OutputFormat::Text)
            .with_unused_only(true)
            .format_report(&entries, Path::new("/repo"))
            .unwrap();

        assert!(text.contains("Resources.Unused unused"));
        assert!(!text.contains("Resources.Greeting"));
        assert!(!text.contains("Resources.Never"));
        assert!(text.contains("3 entries, 1 unused"));
    }

    #[test]
    fn test_highlight_trims_context() {
        colored::control::set_override(false);
        let segments = vec!["   a(".to_string(), "R.K".to_string(), ");  ".to_string()];
        assert_eq!(highlight(&segments), "a(R.K);");
    }
}
