use serde::Serialize;

use super::OutputFormat;
use crate::db::Summary;
use crate::mapping::MapResult;
use crate::model::{ReferenceKind, SymbolKind};
use crate::remap::RenameOutcome;

/// A symbol with its declaring file resolved to a path.
#[derive(Debug, Serialize)]
pub struct SymbolRow {
    pub kind: SymbolKind,
    pub identity: String,
    pub name: String,
    /// `None` for placeholders.
    pub file: Option<String>,
    pub access: u16,
}

/// A reference with its file resolved to a path.
#[derive(Debug, Serialize)]
pub struct ReferenceRow {
    pub kind: ReferenceKind,
    pub file: String,
    pub owner: String,
    pub location: Option<u32>,
}

/// Format a list of symbols for output.
pub fn format_symbols(symbols: &[SymbolRow], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Compact => format_json(&symbols, format),
        OutputFormat::Text => {
            let mut output = String::new();
            for s in symbols {
                let origin = s.file.as_deref().unwrap_or("(external)");
                output.push_str(&format!("{:<8} {:<60} {}\n", s.kind, s.identity, origin));
            }
            output.push_str(&format!("{} symbols", symbols.len()));
            output
        }
    }
}

pub fn format_references(
    identity: &str,
    references: &[ReferenceRow],
    format: &OutputFormat,
) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Compact => {
            let result = serde_json::json!({
                "identity": identity,
                "references": references,
            });
            format_json(&result, format)
        }
        OutputFormat::Text => {
            let mut output = format!("{} references to {}\n", references.len(), identity);
            for r in references {
                let location = r
                    .location
                    .map(|offset| format!(" @{}", offset))
                    .unwrap_or_default();
                output.push_str(&format!(
                    "  {:<22} {} in {}{}\n",
                    r.kind.tag(),
                    r.file,
                    r.owner,
                    location
                ));
            }
            output
        }
    }
}

/// Format any serializable value as JSON.
pub fn format_json<T: Serialize>(value: &T, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).unwrap_or_default(),
        OutputFormat::Compact => serde_json::to_string(value).unwrap_or_default(),
        OutputFormat::Text => serde_json::to_string_pretty(value).unwrap_or_default(),
    }
}

/// Format a mapping run.
pub fn format_map_result(imported: usize, result: &MapResult, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Compact => {
            let summary = serde_json::json!({
                "files_imported": imported,
                "jobs": result.jobs,
                "files_mapped": result.files_mapped,
                "files_skipped": result.files_skipped,
                "symbols": result.symbols,
                "references": result.references,
                "parse_errors": result.parse_errors,
                "duration_ms": result.duration_ms,
            });
            format_json(&summary, format)
        }
        OutputFormat::Text => {
            let mut output = String::new();
            if imported > 0 {
                output.push_str(&format!("Imported {} files\n", imported));
            }
            output.push_str(&format!(
                "Mapped {} class files in {} jobs: {} symbols, {} references ({}ms)",
                result.files_mapped,
                result.jobs,
                result.symbols,
                result.references,
                result.duration_ms,
            ));
            if result.files_skipped > 0 {
                output.push_str(&format!("\nSkipped {} files", result.files_skipped));
            }
            output
        }
    }
}

pub fn format_rename(outcome: &RenameOutcome, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Compact => format_json(outcome, format),
        OutputFormat::Text => {
            let mut output = format!(
                "Renamed {} -> {}\n",
                outcome.old_identity, outcome.new_identity
            );
            output.push_str(&format!(
                "  {} files rewritten, {} identities migrated\n",
                outcome.rewritten_files.len(),
                outcome.migrated_identities.len()
            ));
            for file in &outcome.renamed_files {
                output.push_str(&format!("  moved {} -> {}\n", file.from, file.to));
            }
            if !outcome.dynamic_references.is_empty() {
                output.push_str(&format!(
                    "  warning: {} invokedynamic call sites still use the old name:\n",
                    outcome.dynamic_references.len()
                ));
                for r in &outcome.dynamic_references {
                    output.push_str(&format!("    in {}\n", r.reference.owner));
                }
            }
            output
        }
    }
}

pub fn format_summary(summary: &Summary, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Compact => format_json(summary, format),
        OutputFormat::Text => {
            format!(
                "Files:       {} ({} archives)\n\
                 Identities:  {}\n\
                 Symbols:     {} classes, {} fields, {} methods\n\
                 Declared:    {} ({} placeholders)\n\
                 References:  {}",
                summary.files,
                summary.archives,
                summary.identities,
                summary.classes,
                summary.fields,
                summary.methods,
                summary.declared,
                summary.placeholders,
                summary.references,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_symbols_mark_placeholders() {
        let rows = vec![
            SymbolRow {
                kind: SymbolKind::Class,
                identity: "com/x/Foo".to_string(),
                name: "com/x/Foo".to_string(),
                file: Some("Foo.class".to_string()),
                access: 1,
            },
            SymbolRow {
                kind: SymbolKind::Class,
                identity: "java/lang/Object".to_string(),
                name: "java/lang/Object".to_string(),
                file: None,
                access: 0,
            },
        ];
        let text = format_symbols(&rows, &OutputFormat::Text);
        assert!(text.contains("Foo.class"));
        assert!(text.contains("(external)"));
        assert!(text.ends_with("2 symbols"));

        let json: serde_json::Value =
            serde_json::from_str(&format_symbols(&rows, &OutputFormat::Json)).unwrap();
        assert_eq!(json[1]["file"], serde_json::Value::Null);
        assert_eq!(json[0]["kind"], "Class");
    }

    #[test]
    fn test_compact_is_single_line() {
        let summary = Summary::default();
        assert!(!format_summary(&summary, &OutputFormat::Compact).contains('\n'));
        assert!(format_summary(&summary, &OutputFormat::Text).contains("References:"));
    }
}
