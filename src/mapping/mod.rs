//! Extraction: class files in, symbols and references out.
//!
//! A mapping job covers one top-level file: a lone `.class` file, or an
//! archive whose entries are mapped in parallel into the job's shared
//! [`MappingContext`]. Jobs run in parallel with each other; all of them
//! feed the same [`EventBroker`].

pub mod broker;
pub mod cache;
pub mod context;
pub mod visitor;

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classfile::{has_class_magic, ClassFile};
use crate::config::BrokerConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::model::FileRecord;

pub use broker::{DatabaseSync, EventBroker, Identifier, JobPublisher, MappingEvent, MappingObserver};
pub use cache::IdentityCache;
pub use context::{MappingContext, MappingStats, SymbolSink};
pub use visitor::visit_class;

const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "zip", "war"];

/// True for file names the workspace treats as archives.
pub fn is_archive_name(name: &str) -> bool {
    extension(name).map_or(false, |ext| {
        ARCHIVE_EXTENSIONS
            .iter()
            .any(|candidate| ext.eq_ignore_ascii_case(candidate))
    })
}

fn extension(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(_, ext)| ext)
}

/// What happened to one file handed to [`ClassMapper::map_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Mapped,
    /// Directory entries and empty files.
    Empty,
    /// Content without the class-file magic.
    NotAClass,
    /// Parsing or visiting failed; anything emitted before the failure is
    /// kept.
    Unparseable(String),
}

/// Maps class files into mapping contexts.
pub struct ClassMapper {
    broker: EventBroker,
}

impl ClassMapper {
    pub fn new(config: &BrokerConfig, cache: IdentityCache) -> Result<Self> {
        Ok(Self {
            broker: EventBroker::with_database(config, cache)?,
        })
    }

    /// Buffer pre-sizing for a job named after `file_name`.
    pub fn initial_capacity(file_name: &str) -> usize {
        match extension(file_name) {
            Some(ext) if ext.eq_ignore_ascii_case("class") => 128,
            _ if is_archive_name(file_name) => 4096,
            _ => 16,
        }
    }

    /// Open a mapping job for `file_name`.
    pub fn initialize(&self, file_name: &str) -> Result<MappingContext> {
        Ok(MappingContext::new(
            file_name,
            Self::initial_capacity(file_name),
            self.broker.publisher()?,
        ))
    }

    /// Run the extraction visitor over one file. Class-file errors are
    /// logged and reported in the outcome; any other error aborts.
    pub fn map_file(
        &self,
        file: &FileRecord,
        content: &[u8],
        ctx: &MappingContext,
    ) -> Result<FileOutcome> {
        if file.is_directory || content.is_empty() {
            return Ok(FileOutcome::Empty);
        }
        if !has_class_magic(content) {
            return Ok(FileOutcome::NotAClass);
        }
        let visited = ClassFile::parse(content)
            .map_err(Error::from)
            .and_then(|class| visit_class(&class, file.id, ctx));
        match visited {
            Ok(()) => {
                debug!(path = %file.path, "mapped class file");
                Ok(FileOutcome::Mapped)
            }
            Err(Error::ClassParse(err)) => {
                warn!(path = %file.path, error = %err, "skipping unparseable class file");
                Ok(FileOutcome::Unparseable(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Stop the broker once all jobs have finished.
    pub fn shutdown(self) {
        self.broker.shutdown();
    }
}

/// Totals for a [`run_map`] call.
#[derive(Debug, Default, Serialize)]
pub struct MapResult {
    pub jobs: usize,
    pub files_mapped: usize,
    pub files_skipped: usize,
    pub symbols: usize,
    pub references: usize,
    pub parse_errors: Vec<String>,
    pub duration_ms: u128,
}

struct JobResult {
    stats: MappingStats,
    mapped: usize,
    skipped: usize,
    parse_errors: Vec<String>,
}

/// Map every given top-level file, one job per file, jobs in parallel.
///
/// Each file (and each archive entry) first has its previous mapping
/// cleared, so re-mapping never leaves stale declarations or references.
pub fn run_map(
    db: &Arc<Database>,
    cache: &IdentityCache,
    config: &BrokerConfig,
    files: &[FileRecord],
) -> Result<MapResult> {
    let start = Instant::now();
    let mapper = ClassMapper::new(config, cache.clone())?;

    let jobs: Vec<Result<JobResult>> = files
        .par_iter()
        .filter(|file| file.archive.is_none())
        .map(|file| run_job(db, &mapper, file))
        .collect();
    mapper.shutdown();

    let mut result = MapResult::default();
    for job in jobs {
        let job = job?;
        result.jobs += 1;
        result.files_mapped += job.mapped;
        result.files_skipped += job.skipped;
        result.symbols += job.stats.symbols;
        result.references += job.stats.references;
        result.parse_errors.extend(job.parse_errors);
    }
    result.duration_ms = start.elapsed().as_millis();
    info!(
        jobs = result.jobs,
        files = result.files_mapped,
        symbols = result.symbols,
        references = result.references,
        "mapping complete"
    );
    Ok(result)
}

fn run_job(db: &Arc<Database>, mapper: &ClassMapper, file: &FileRecord) -> Result<JobResult> {
    let entries = db.transaction(|store| {
        let entries = store.archive_entries(file.id)?;
        store.clear_file_mappings(file.id)?;
        for entry in &entries {
            store.clear_file_mappings(entry.id)?;
        }
        Ok(entries)
    })?;

    let ctx = mapper.initialize(&file.name)?;
    let outcomes: Vec<(String, FileOutcome)> = if entries.is_empty() {
        let content = db.read(|store| store.file_content(file.id))?;
        vec![(file.path.clone(), mapper.map_file(file, &content, &ctx)?)]
    } else {
        entries
            .par_iter()
            .map(|entry| {
                let content = db.read(|store| store.file_content(entry.id))?;
                Ok((entry.path.clone(), mapper.map_file(entry, &content, &ctx)?))
            })
            .collect::<Result<_>>()?
    };
    let stats = ctx.finish()?;

    let mut job = JobResult {
        stats,
        mapped: 0,
        skipped: 0,
        parse_errors: Vec::new(),
    };
    for (path, outcome) in outcomes {
        match outcome {
            FileOutcome::Mapped => job.mapped += 1,
            FileOutcome::Empty => {}
            FileOutcome::NotAClass => job.skipped += 1,
            FileOutcome::Unparseable(err) => {
                job.skipped += 1;
                job.parse_errors.push(format!("{}: {}", path, err));
            }
        }
    }
    Ok(job)
}
