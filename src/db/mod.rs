use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{
    FileId, FileRecord, Identity, Reference, ReferenceId, ReferenceKind, StoredReference,
    StoredSymbol, SurrogateId, Symbol, SymbolId, SymbolKind,
};

/// The workspace store: files with their content, identities, symbols,
/// and references.
///
/// One connection behind a mutex. [`Database::read`] and
/// [`Database::transaction`] hand out a [`Store`] for the duration of a
/// closure; everything that must commit together goes through one
/// `transaction` call.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                archive_id INTEGER REFERENCES files(id) ON DELETE CASCADE,
                is_directory INTEGER NOT NULL DEFAULT 0,
                content BLOB
            );

            CREATE TABLE IF NOT EXISTS identities (
                id INTEGER PRIMARY KEY,
                identifier TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS symbols (
                id INTEGER PRIMARY KEY,
                identity_id INTEGER NOT NULL UNIQUE REFERENCES identities(id),
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                file_id INTEGER REFERENCES files(id) ON DELETE CASCADE,
                owner_id INTEGER REFERENCES identities(id),
                access INTEGER NOT NULL DEFAULT 0,
                signature TEXT
            );

            CREATE TABLE IF NOT EXISTS refs (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                target_id INTEGER NOT NULL REFERENCES identities(id),
                owner_id INTEGER NOT NULL REFERENCES identities(id),
                location INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_files_archive ON files(archive_id);
            CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
            CREATE INDEX IF NOT EXISTS idx_symbols_owner ON symbols(owner_id);
            CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);
            CREATE INDEX IF NOT EXISTS idx_refs_target ON refs(target_id);
            CREATE INDEX IF NOT EXISTS idx_refs_owner ON refs(owner_id);
            CREATE INDEX IF NOT EXISTS idx_refs_file ON refs(file_id);
            ",
        )?;
        Ok(())
    }

    /// Run `f` against the store without a transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Store<'_>) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&Store { conn: &conn })
    }

    /// Run `f` in one transaction; an `Err` from `f` rolls everything back.
    pub fn transaction<T>(&self, f: impl FnOnce(&Store<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&Store { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }
}

/// Filter for [`Store::symbols`].
#[derive(Debug, Clone, Default)]
pub struct SymbolFilter {
    pub kind: Option<SymbolKind>,
    pub file: Option<FileId>,
    pub declared_only: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub files: i64,
    pub archives: i64,
    pub identities: i64,
    pub classes: i64,
    pub fields: i64,
    pub methods: i64,
    pub declared: i64,
    pub placeholders: i64,
    pub references: i64,
}

/// Store operations over a borrowed connection (or open transaction).
pub struct Store<'c> {
    conn: &'c Connection,
}

const SYMBOL_COLUMNS: &str = "s.id, s.identity_id, i.identifier, s.kind, s.name, s.file_id,
     o.identifier, s.access, s.signature
     FROM symbols s
     JOIN identities i ON i.id = s.identity_id
     LEFT JOIN identities o ON o.id = s.owner_id";

const REFERENCE_COLUMNS: &str = "r.id, r.kind, r.file_id, t.identifier, o.identifier, r.location
     FROM refs r
     JOIN identities t ON t.id = r.target_id
     JOIN identities o ON o.id = r.owner_id";

const FILE_COLUMNS: &str = "id, path, name, archive_id, is_directory FROM files";

impl Store<'_> {
    // ---- Identity operations ----

    /// Insert an identity unless present; either way return its row id.
    pub fn insert_or_ignore_identity(&self, identity: &str) -> Result<SurrogateId> {
        self.conn.execute(
            "INSERT INTO identities (identifier) VALUES (?1)
             ON CONFLICT(identifier) DO NOTHING",
            params![identity],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM identities WHERE identifier = ?1",
            params![identity],
            |row| row.get(0),
        )?;
        Ok(SurrogateId(id))
    }

    pub fn lookup_identity(&self, identity: &str) -> Result<Option<SurrogateId>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM identities WHERE identifier = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?
            .map(SurrogateId))
    }

    pub fn identity_value(&self, id: SurrogateId) -> Result<Option<Identity>> {
        Ok(self
            .conn
            .query_row(
                "SELECT identifier FROM identities WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?
            .map(Identity::from_stored))
    }

    fn require_identity(&self, identity: &Identity) -> Result<SurrogateId> {
        self.lookup_identity(identity.as_str())?
            .ok_or_else(|| Error::UnknownIdentity(identity.to_string()))
    }

    // ---- Symbol operations ----

    /// Insert a symbol or merge it into the existing row for its identity.
    ///
    /// The declaring file is set at most once: a placeholder never clears
    /// it, and a second declaration does not replace the first. Access bits
    /// and signature come from whichever write attached the file.
    pub fn insert_symbol(&self, symbol: &Symbol) -> Result<SymbolId> {
        let identity_id = self.require_identity(&symbol.identity)?;
        let owner_id = match &symbol.owner {
            Some(owner) => Some(self.require_identity(owner)?),
            None => None,
        };
        let id = self.conn.query_row(
            "INSERT INTO symbols (identity_id, kind, name, file_id, owner_id, access, signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(identity_id) DO UPDATE SET
                access = CASE WHEN symbols.file_id IS NULL AND excluded.file_id IS NOT NULL
                              THEN excluded.access ELSE symbols.access END,
                signature = CASE WHEN symbols.file_id IS NULL AND excluded.file_id IS NOT NULL
                                 THEN excluded.signature ELSE symbols.signature END,
                owner_id = COALESCE(symbols.owner_id, excluded.owner_id),
                file_id = COALESCE(symbols.file_id, excluded.file_id)
             RETURNING id",
            params![
                identity_id.0,
                symbol.kind.tag(),
                symbol.name,
                symbol.file.map(|f| f.0),
                owner_id.map(|o| o.0),
                symbol.access,
                symbol.signature,
            ],
            |row| row.get(0),
        )?;
        Ok(SymbolId(id))
    }

    pub fn symbol_by_identity(&self, identity: &str) -> Result<Option<StoredSymbol>> {
        let sql = format!("SELECT {SYMBOL_COLUMNS} WHERE i.identifier = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![identity], row_to_symbol)
            .optional()?)
    }

    pub fn symbols(&self, filter: &SymbolFilter) -> Result<Vec<StoredSymbol>> {
        let sql = format!(
            "SELECT {SYMBOL_COLUMNS}
             WHERE (?1 IS NULL OR s.kind = ?1)
               AND (?2 IS NULL OR s.file_id = ?2)
               AND (?3 = 0 OR s.file_id IS NOT NULL)
             ORDER BY i.identifier"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let symbols = stmt
            .query_map(
                params![
                    filter.kind.map(|k| k.tag()),
                    filter.file.map(|f| f.0),
                    filter.declared_only as i32,
                ],
                row_to_symbol,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    pub fn symbols_in_file(&self, file: FileId) -> Result<Vec<StoredSymbol>> {
        self.symbols(&SymbolFilter {
            file: Some(file),
            ..SymbolFilter::default()
        })
    }

    /// Symbols that mention class `class_name`: members it owns, identities
    /// whose descriptor names it, and symbols whose generic signature names
    /// it. May over-match on the text; callers recompute exactly.
    pub fn symbols_mentioning(
        &self,
        class_identity: SurrogateId,
        class_name: &str,
    ) -> Result<Vec<StoredSymbol>> {
        let sql = format!(
            "SELECT {SYMBOL_COLUMNS}
             WHERE s.identity_id != ?1
               AND (s.owner_id = ?1
                    OR instr(i.identifier, ?2) > 0
                    OR instr(s.signature, ?2) > 0
                    OR instr(s.signature, ?3) > 0)
             ORDER BY i.identifier"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let symbols = stmt
            .query_map(
                params![
                    class_identity.0,
                    format!("L{};", class_name),
                    format!("L{}<", class_name)
                ],
                row_to_symbol,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    pub fn update_symbol_name(&self, symbol: SymbolId, name: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE symbols SET name = ?2 WHERE id = ?1",
            params![symbol.0, name],
        )?;
        Ok(())
    }

    pub fn update_symbol_signature(&self, symbol: SymbolId, signature: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE symbols SET signature = ?2 WHERE id = ?1",
            params![symbol.0, signature],
        )?;
        Ok(())
    }

    /// Move a symbol to a new identity string.
    ///
    /// The identity row is renamed in place unless the new identity already
    /// exists (typically as a placeholder created by some reference); then
    /// the symbol, its references, and everything it owns are repointed to
    /// the existing row, the placeholder symbol is dropped, and the stale
    /// row is deleted. Fails if the new identity is declared by another file.
    pub fn update_symbol_identity(
        &self,
        symbol: SymbolId,
        new_identity: &Identity,
    ) -> Result<SurrogateId> {
        let old: i64 = self.conn.query_row(
            "SELECT identity_id FROM symbols WHERE id = ?1",
            params![symbol.0],
            |row| row.get(0),
        )?;

        let Some(existing) = self.lookup_identity(new_identity.as_str())? else {
            self.conn.execute(
                "UPDATE identities SET identifier = ?2 WHERE id = ?1",
                params![old, new_identity.as_str()],
            )?;
            return Ok(SurrogateId(old));
        };
        if existing.0 == old {
            return Ok(existing);
        }

        let occupant: Option<(i64, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT id, file_id FROM symbols WHERE identity_id = ?1",
                params![existing.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((occupant_id, file)) = occupant {
            if file.is_some() {
                return Err(Error::invalid_rename(
                    new_identity.as_str(),
                    "target identity is already declared",
                ));
            }
            self.conn
                .execute("DELETE FROM symbols WHERE id = ?1", params![occupant_id])?;
        }

        self.conn.execute(
            "UPDATE refs SET target_id = ?2 WHERE target_id = ?1",
            params![old, existing.0],
        )?;
        self.conn.execute(
            "UPDATE refs SET owner_id = ?2 WHERE owner_id = ?1",
            params![old, existing.0],
        )?;
        self.conn.execute(
            "UPDATE symbols SET owner_id = ?2 WHERE owner_id = ?1",
            params![old, existing.0],
        )?;
        self.conn.execute(
            "UPDATE symbols SET identity_id = ?2 WHERE id = ?1",
            params![symbol.0, existing.0],
        )?;
        self.conn
            .execute("DELETE FROM identities WHERE id = ?1", params![old])?;
        Ok(existing)
    }

    // ---- Reference operations ----

    pub fn insert_reference(&self, reference: &Reference) -> Result<ReferenceId> {
        let target = self.require_identity(&reference.target)?;
        let owner = self.require_identity(&reference.owner)?;
        self.conn.execute(
            "INSERT INTO refs (kind, file_id, target_id, owner_id, location)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reference.kind.tag(),
                reference.file.0,
                target.0,
                owner.0,
                reference.location,
            ],
        )?;
        Ok(ReferenceId(self.conn.last_insert_rowid()))
    }

    /// Every reference whose target is `target`.
    pub fn query_references(&self, target: SurrogateId) -> Result<Vec<StoredReference>> {
        let sql = format!("SELECT {REFERENCE_COLUMNS} WHERE r.target_id = ?1 ORDER BY r.id");
        self.collect_references(&sql, params![target.0])
    }

    pub fn references_in_file(&self, file: FileId) -> Result<Vec<StoredReference>> {
        let sql = format!("SELECT {REFERENCE_COLUMNS} WHERE r.file_id = ?1 ORDER BY r.id");
        self.collect_references(&sql, params![file.0])
    }

    fn collect_references(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StoredReference>> {
        let mut stmt = self.conn.prepare(sql)?;
        let refs = stmt
            .query_map(params, row_to_reference)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }

    // ---- File operations ----

    /// Insert a file, or replace the content of the file already at `path`.
    pub fn insert_file(
        &self,
        path: &str,
        archive: Option<FileId>,
        is_directory: bool,
        content: Option<&[u8]>,
    ) -> Result<FileId> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let id = self.conn.query_row(
            "INSERT INTO files (path, name, archive_id, is_directory, content)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                content = excluded.content,
                is_directory = excluded.is_directory
             RETURNING id",
            params![path, name, archive.map(|a| a.0), is_directory as i32, content],
            |row| row.get(0),
        )?;
        Ok(FileId(id))
    }

    pub fn get_file(&self, id: FileId) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id.0], row_to_file)
            .optional()?)
    }

    /// `queryPath`: the file record for an id, or `UnknownFile`.
    pub fn require_file(&self, id: FileId) -> Result<FileRecord> {
        self.get_file(id)?.ok_or(Error::UnknownFile(id.0))
    }

    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} WHERE path = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![path], row_to_file)
            .optional()?)
    }

    pub fn all_files(&self) -> Result<Vec<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} ORDER BY path");
        self.collect_files(&sql, [])
    }

    /// Files not contained in an archive.
    pub fn top_level_files(&self) -> Result<Vec<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} WHERE archive_id IS NULL ORDER BY path");
        self.collect_files(&sql, [])
    }

    pub fn archive_entries(&self, archive: FileId) -> Result<Vec<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} WHERE archive_id = ?1 ORDER BY id");
        self.collect_files(&sql, params![archive.0])
    }

    fn collect_files(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let files = stmt
            .query_map(params, row_to_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn file_content(&self, id: FileId) -> Result<Vec<u8>> {
        let content: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT content FROM files WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        match content {
            Some(content) => Ok(content.unwrap_or_default()),
            None => Err(Error::UnknownFile(id.0)),
        }
    }

    pub fn update_file_entry(&self, id: FileId, content: &[u8]) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE files SET content = ?2 WHERE id = ?1",
            params![id.0, content],
        )?;
        if updated == 0 {
            return Err(Error::UnknownFile(id.0));
        }
        Ok(())
    }

    /// Replace the last path segment of a file.
    pub fn rename_file_entry(&self, id: FileId, new_name: &str) -> Result<FileRecord> {
        let file = self.require_file(id)?;
        let path = match file.path.rsplit_once('/') {
            Some((parent, _)) => format!("{}/{}", parent, new_name),
            None => new_name.to_string(),
        };
        self.conn.execute(
            "UPDATE files SET name = ?2, path = ?3 WHERE id = ?1",
            params![id.0, new_name, path],
        )?;
        self.require_file(id)
    }

    pub fn delete_file(&self, id: FileId) -> Result<()> {
        // CASCADE removes archive entries, declared symbols, and refs
        self.conn
            .execute("DELETE FROM files WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    /// Forget what mapping recorded for a file: its declarations become
    /// placeholders again and its references are dropped.
    pub fn clear_file_mappings(&self, id: FileId) -> Result<()> {
        self.conn.execute(
            "UPDATE symbols SET file_id = NULL, access = 0, signature = NULL
             WHERE file_id = ?1",
            params![id.0],
        )?;
        self.conn
            .execute("DELETE FROM refs WHERE file_id = ?1", params![id.0])?;
        Ok(())
    }

    // ---- Statistics ----

    pub fn summary(&self) -> Result<Summary> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };
        let kind_count = |kind: SymbolKind| -> Result<i64> {
            Ok(self.conn.query_row(
                "SELECT COUNT(*) FROM symbols WHERE kind = ?1",
                params![kind.tag()],
                |row| row.get(0),
            )?)
        };
        Ok(Summary {
            files: count("SELECT COUNT(*) FROM files WHERE is_directory = 0")?,
            archives: count(
                "SELECT COUNT(DISTINCT archive_id) FROM files WHERE archive_id IS NOT NULL",
            )?,
            identities: count("SELECT COUNT(*) FROM identities")?,
            classes: kind_count(SymbolKind::Class)?,
            fields: kind_count(SymbolKind::Field)?,
            methods: kind_count(SymbolKind::Method)?,
            declared: count("SELECT COUNT(*) FROM symbols WHERE file_id IS NOT NULL")?,
            placeholders: count("SELECT COUNT(*) FROM symbols WHERE file_id IS NULL")?,
            references: count("SELECT COUNT(*) FROM refs")?,
        })
    }
}

fn unknown_tag(column: usize, tag: String) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(column, tag, rusqlite::types::Type::Text)
}

fn row_to_symbol(row: &rusqlite::Row) -> rusqlite::Result<StoredSymbol> {
    let tag: String = row.get(3)?;
    let kind = SymbolKind::from_tag(&tag).ok_or_else(|| unknown_tag(3, tag))?;
    Ok(StoredSymbol {
        id: SymbolId(row.get(0)?),
        identity_id: SurrogateId(row.get(1)?),
        symbol: Symbol {
            kind,
            identity: Identity::from_stored(row.get(2)?),
            name: row.get(4)?,
            file: row.get::<_, Option<i64>>(5)?.map(FileId),
            owner: row.get::<_, Option<String>>(6)?.map(Identity::from_stored),
            access: row.get(7)?,
            signature: row.get(8)?,
        },
    })
}

fn row_to_reference(row: &rusqlite::Row) -> rusqlite::Result<StoredReference> {
    let tag: String = row.get(1)?;
    let kind = ReferenceKind::from_tag(&tag).ok_or_else(|| unknown_tag(1, tag))?;
    Ok(StoredReference {
        id: ReferenceId(row.get(0)?),
        reference: Reference {
            kind,
            file: FileId(row.get(2)?),
            target: Identity::from_stored(row.get(3)?),
            owner: Identity::from_stored(row.get(4)?),
            location: row.get(5)?,
        },
    })
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: FileId(row.get(0)?),
        path: row.get(1)?,
        name: row.get(2)?,
        archive: row.get::<_, Option<i64>>(3)?.map(FileId),
        is_directory: row.get::<_, i32>(4)? != 0,
    })
}
