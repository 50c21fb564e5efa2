//! The workspace: a directory holding `.jvmap/index.db`, into which class
//! files and archives are imported, mapped, renamed, and exported again.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::JvmapConfig;
use crate::db::{Database, Store};
use crate::error::Result;
use crate::mapping::{is_archive_name, run_map, IdentityCache, MapResult};
use crate::model::{FileId, FileRecord};
use crate::remap::RenameEngine;

/// Directory under the workspace root holding the index.
pub const WORKSPACE_DIR: &str = ".jvmap";
pub const INDEX_FILE: &str = "index.db";

/// File extensions picked up when importing a directory.
const IMPORT_EXTENSIONS: &[&str] = &["class", "jar", "zip", "war"];

pub struct Workspace {
    root: PathBuf,
    config: JvmapConfig,
    db: Arc<Database>,
    cache: IdentityCache,
    renamer: RenameEngine,
}

impl Workspace {
    /// Open (or create) the workspace rooted at `root`.
    pub fn open(root: &Path, config: JvmapConfig) -> Result<Self> {
        let dir = root.join(WORKSPACE_DIR);
        std::fs::create_dir_all(&dir)?;
        let db = Arc::new(Database::open(&dir.join(INDEX_FILE))?);
        Ok(Self::with_database(root.to_path_buf(), config, db))
    }

    /// A workspace backed by an in-memory index (for testing).
    pub fn in_memory(config: JvmapConfig) -> Result<Self> {
        let db = Arc::new(Database::in_memory()?);
        Ok(Self::with_database(PathBuf::from("."), config, db))
    }

    fn with_database(root: PathBuf, config: JvmapConfig, db: Arc<Database>) -> Self {
        let cache = IdentityCache::new(Arc::clone(&db), &config.cache);
        let renamer = RenameEngine::new(cache.clone());
        Self {
            root,
            config,
            db,
            cache,
            renamer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &JvmapConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// The workspace's rename engine; its file locks are shared by every
    /// caller.
    pub fn rename_engine(&self) -> &RenameEngine {
        &self.renamer
    }

    // ---- Import ----

    /// Import a `.class` file, an archive, or every such file under a
    /// directory. Returns the ids of the imported top-level files.
    ///
    /// Paths inside the workspace are stored relative to its root, so
    /// importing `.` stores `com/x/Foo.class`. Other paths are stored
    /// relative to their parent: importing `/lib/app.jar` stores `app.jar`,
    /// and importing the directory `/out/classes` stores
    /// `classes/com/x/Foo.class`.
    pub fn import_path(&self, path: &Path) -> Result<Vec<FileId>> {
        let canonical = path.canonicalize()?;
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let base = if canonical.starts_with(&root) {
            root
        } else {
            canonical.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        let (path, base) = (canonical.as_path(), base.as_path());
        if !path.is_dir() {
            let stored = relative_path(base, path);
            return Ok(vec![self.import_file(&stored, &std::fs::read(path)?)?]);
        }

        let mut builder = WalkBuilder::new(path);
        builder.hidden(false).git_ignore(true).parents(false);
        let mut imported = Vec::new();
        for entry in builder.build() {
            let entry = entry?;
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let importable = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    IMPORT_EXTENSIONS
                        .iter()
                        .any(|candidate| ext.eq_ignore_ascii_case(candidate))
                });
            if !importable {
                continue;
            }
            let stored = relative_path(base, entry.path());
            imported.push(self.import_file(&stored, &std::fs::read(entry.path())?)?);
        }
        info!(path = %path.display(), files = imported.len(), "imported directory");
        Ok(imported)
    }

    /// Store one file under `stored`, unpacking it when it is an archive.
    pub fn import_file(&self, stored: &str, content: &[u8]) -> Result<FileId> {
        if !is_archive_name(stored) {
            debug!(path = stored, "importing class file");
            return self
                .db
                .transaction(|store| store.insert_file(stored, None, false, Some(content)));
        }

        let entries = read_archive(content)?;
        self.db.transaction(|store| {
            let archive = store.insert_file(stored, None, false, Some(content))?;
            let mut current = HashSet::with_capacity(entries.len());
            for entry in &entries {
                let path = format!("{}/{}", stored, entry.name);
                let content = entry.content.as_slice();
                store.insert_file(&path, Some(archive), entry.is_directory, Some(content))?;
                current.insert(path);
            }
            remove_stale_entries(store, archive, &current)?;
            debug!(path = stored, entries = entries.len(), "imported archive");
            Ok(archive)
        })
    }

    // ---- Mapping ----

    /// Map every top-level file in the workspace.
    pub fn map_all(&self) -> Result<MapResult> {
        let files = self.db.read(|store| store.top_level_files())?;
        run_map(&self.db, &self.cache, &self.config.broker, &files)
    }

    /// Map the given top-level files.
    pub fn map_files(&self, ids: &[FileId]) -> Result<MapResult> {
        let files = self.db.read(|store| {
            ids.iter()
                .map(|id| store.require_file(*id))
                .collect::<Result<Vec<_>>>()
        })?;
        run_map(&self.db, &self.cache, &self.config.broker, &files)
    }

    // ---- Export ----

    /// Write every top-level file under `dest`, re-packing archives from
    /// their (possibly rewritten or renamed) entries. Returns the number of
    /// files written.
    pub fn export(&self, dest: &Path) -> Result<usize> {
        let files = self.db.read(|store| store.top_level_files())?;
        for file in &files {
            let target = dest.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let entries = self.db.read(|store| store.archive_entries(file.id))?;
            if entries.is_empty() && !is_archive_name(&file.name) {
                let content = self.db.read(|store| store.file_content(file.id))?;
                std::fs::write(&target, content)?;
            } else {
                self.write_archive(file, &entries, &target)?;
            }
        }
        info!(dest = %dest.display(), files = files.len(), "exported workspace");
        Ok(files.len())
    }

    fn write_archive(&self, archive: &FileRecord, entries: &[FileRecord], target: &Path) -> Result<()> {
        let prefix = format!("{}/", archive.path);
        let mut writer = ZipWriter::new(File::create(target)?);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for entry in entries {
            let name = entry.path.strip_prefix(&prefix).unwrap_or(&entry.path);
            if entry.is_directory {
                writer.add_directory(name, options)?;
            } else {
                writer.start_file(name, options)?;
                let content = self.db.read(|store| store.file_content(entry.id))?;
                writer.write_all(&content)?;
            }
        }
        writer.finish()?;
        Ok(())
    }
}

struct ArchiveEntry {
    name: String,
    is_directory: bool,
    content: Vec<u8>,
}

fn read_archive(content: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(Cursor::new(content))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let is_directory = file.is_dir();
        let name = file.name().trim_end_matches('/').to_string();
        if name.is_empty() {
            continue;
        }
        let mut buffer = Vec::new();
        if !is_directory {
            file.read_to_end(&mut buffer)?;
        }
        entries.push(ArchiveEntry {
            name,
            is_directory,
            content: buffer,
        });
    }
    Ok(entries)
}

/// Drop entries a re-imported archive no longer has. Their declarations
/// are demoted first so references from other files keep a symbol.
fn remove_stale_entries(store: &Store<'_>, archive: FileId, current: &HashSet<String>) -> Result<()> {
    for entry in store.archive_entries(archive)? {
        if !current.contains(&entry.path) {
            store.clear_file_mappings(entry.id)?;
            store.delete_file(entry.id)?;
        }
    }
    Ok(())
}

/// `path` relative to `base`, `/`-separated.
fn relative_path(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
