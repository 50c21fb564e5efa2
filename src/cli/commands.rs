use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::JvmapConfig;
use crate::db::SymbolFilter;
use crate::model::{FileId, SymbolKind};
use crate::workspace::Workspace;

use super::output::{
    format_json, format_map_result, format_references, format_rename, format_summary,
    format_symbols, ReferenceRow, SymbolRow,
};
use super::OutputFormat;

/// Open the workspace at `root`, creating `.jvmap/` on first use.
pub fn open_workspace(root: &Path, config: JvmapConfig) -> Result<Workspace> {
    Workspace::open(root, config)
        .with_context(|| format!("Failed to open workspace at {}", root.display()))
}

/// Run the `import` command.
pub fn run_import(
    ws: &Workspace,
    paths: &[String],
    no_map: bool,
    format: &OutputFormat,
) -> Result<String> {
    let mut imported = Vec::new();
    for path in paths {
        let ids = ws
            .import_path(Path::new(path))
            .with_context(|| format!("Failed to import {}", path))?;
        imported.extend(ids);
    }
    if no_map {
        let result = serde_json::json!({ "files_imported": imported.len() });
        return Ok(match format {
            OutputFormat::Text => format!("Imported {} files", imported.len()),
            _ => format_json(&result, format),
        });
    }
    let result = ws.map_files(&imported).context("Failed to map imported files")?;
    Ok(format_map_result(imported.len(), &result, format))
}

/// Run the `map` command.
pub fn run_map(ws: &Workspace, format: &OutputFormat) -> Result<String> {
    let result = ws.map_all().context("Failed to map workspace")?;
    Ok(format_map_result(0, &result, format))
}

/// Run the `symbols` command.
pub fn run_symbols(
    ws: &Workspace,
    kind: Option<&str>,
    file: Option<&str>,
    declared_only: bool,
    format: &OutputFormat,
) -> Result<String> {
    let kind = kind
        .map(|k| k.parse::<SymbolKind>().map_err(anyhow::Error::msg))
        .transpose()?;
    let paths = file_paths(ws)?;
    let file = match file {
        Some(path) => Some(
            paths
                .iter()
                .find(|(_, p)| p.as_str() == path)
                .map(|(id, _)| *id)
                .context(format!("File not found in workspace: {}", path))?,
        ),
        None => None,
    };

    let symbols = ws.database().read(|store| {
        store.symbols(&SymbolFilter {
            kind,
            file,
            declared_only,
        })
    })?;
    let rows: Vec<SymbolRow> = symbols
        .into_iter()
        .map(|s| SymbolRow {
            kind: s.symbol.kind,
            identity: s.symbol.identity.into_string(),
            name: s.symbol.name,
            file: s.symbol.file.and_then(|id| paths.get(&id).cloned()),
            access: s.symbol.access,
        })
        .collect();
    Ok(format_symbols(&rows, format))
}

/// Run the `references` command.
pub fn run_references(ws: &Workspace, identity: &str, format: &OutputFormat) -> Result<String> {
    let target = ws
        .cache()
        .lookup(identity)
        .with_context(|| format!("Symbol not found in workspace: {}", identity))?;
    let references = ws.database().read(|store| store.query_references(target))?;
    let paths = file_paths(ws)?;

    let rows: Vec<ReferenceRow> = references
        .into_iter()
        .map(|r| ReferenceRow {
            kind: r.reference.kind,
            file: paths
                .get(&r.reference.file)
                .cloned()
                .unwrap_or_else(|| format!("#{}", r.reference.file.0)),
            owner: r.reference.owner.into_string(),
            location: r.reference.location,
        })
        .collect();
    Ok(format_references(identity, &rows, format))
}

/// Run the `rename` command.
pub fn run_rename(
    ws: &Workspace,
    identity: &str,
    new_name: &str,
    format: &OutputFormat,
) -> Result<String> {
    let outcome = ws
        .rename_engine()
        .rename(identity, new_name)
        .with_context(|| format!("Failed to rename {} to {}", identity, new_name))?;
    Ok(format_rename(&outcome, format))
}

/// Run the `export` command.
pub fn run_export(ws: &Workspace, dest: &str, format: &OutputFormat) -> Result<String> {
    let written = ws
        .export(Path::new(dest))
        .with_context(|| format!("Failed to export workspace to {}", dest))?;
    Ok(match format {
        OutputFormat::Text => format!("Exported {} files to {}", written, dest),
        _ => format_json(
            &serde_json::json!({ "files_written": written, "dest": dest }),
            format,
        ),
    })
}

/// Run the `summary` command.
pub fn run_summary(ws: &Workspace, format: &OutputFormat) -> Result<String> {
    let summary = ws.database().read(|store| store.summary())?;
    Ok(format_summary(&summary, format))
}

fn file_paths(ws: &Workspace) -> Result<HashMap<FileId, String>> {
    let files = ws.database().read(|store| store.all_files())?;
    Ok(files.into_iter().map(|f| (f.id, f.path)).collect())
}
