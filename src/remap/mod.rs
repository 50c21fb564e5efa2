//! Renaming: validate, rewrite every affected class file, then migrate the
//! symbol table in one transaction.
//!
//! A rename runs in three phases. Planning reads the store and fails fast
//! on illegal targets. Rewriting happens in memory under per-file locks and
//! validates every new class file. The commit writes contents, file names
//! and identities together, so a failure in any phase leaves the workspace
//! untouched.

pub mod remapper;

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classfile::descriptor::{remap_descriptor, remap_signature};
use crate::db::Store;
use crate::error::{Error, Result};
use crate::mapping::IdentityCache;
use crate::model::identity::{
    class_identity, class_name, field_identity, method_identity, split_field_identity,
    split_method_identity,
};
use crate::model::{
    FileId, FileRecord, Identity, RenameEffect, StoredReference, StoredSymbol, SurrogateId,
    SymbolKind,
};

pub use remapper::{rewrite_class, Remapper};

#[derive(Debug, Clone, Serialize)]
pub struct RenamedFile {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigratedIdentity {
    pub from: Identity,
    pub to: Identity,
}

/// Everything a successful rename changed.
#[derive(Debug, Clone, Serialize)]
pub struct RenameOutcome {
    pub old_identity: Identity,
    pub new_identity: Identity,
    /// Paths of files whose bytecode was rewritten.
    pub rewritten_files: Vec<String>,
    pub renamed_files: Vec<RenamedFile>,
    /// The renamed symbol first, then symbols whose identity embedded it.
    pub migrated_identities: Vec<MigratedIdentity>,
    /// Invokedynamic references to the renamed symbols. Their bootstrap
    /// arguments are rewritten, but the call-site name is not, so these may
    /// need manual review.
    pub dynamic_references: Vec<StoredReference>,
}

struct Migration {
    symbol: StoredSymbol,
    identity: Identity,
    name: Option<String>,
    signature: Option<String>,
}

struct RenamePlan {
    remapper: Remapper,
    /// The renamed symbol first.
    migrations: Vec<Migration>,
    /// Symbols keeping their identity whose generic signature names the class.
    resignatures: Vec<(StoredSymbol, String)>,
    files: BTreeSet<FileId>,
    /// Files to rename after the new simple class name.
    renamed_files: BTreeSet<FileId>,
    new_file_name: Option<String>,
    dynamic_references: Vec<StoredReference>,
}

/// Renames classes, fields, and methods across a workspace.
#[derive(Clone)]
pub struct RenameEngine {
    cache: IdentityCache,
    file_locks: Arc<DashMap<FileId, Arc<Mutex<()>>>>,
}

impl RenameEngine {
    pub fn new(cache: IdentityCache) -> Self {
        Self {
            cache,
            file_locks: Arc::new(DashMap::new()),
        }
    }

    /// Rename the symbol with `identity`.
    ///
    /// For a class, `new_name` is either a simple name (kept in the same
    /// package) or a full internal or binary name in the same package. For
    /// a field or method it is the new simple name.
    pub fn rename(&self, identity: &str, new_name: &str) -> Result<RenameOutcome> {
        let db = self.cache.database();
        let plan = db.read(|store| plan_rename(store, identity, new_name))?;

        let committed = self.rewrite_and_commit(&plan);
        self.release_locks(&plan.files);
        let (outcome, committed) = committed?;

        for (migrated, id) in outcome.migrated_identities.iter().zip(committed) {
            self.cache.invalidate(migrated.from.as_str());
            self.cache.remember(migrated.to.as_str(), id);
        }
        for reference in &outcome.dynamic_references {
            warn!(
                symbol = %reference.reference.target,
                owner = %reference.reference.owner,
                file = reference.reference.file.0,
                "invokedynamic call site still uses the old name"
            );
        }
        info!(
            from = %outcome.old_identity,
            to = %outcome.new_identity,
            rewritten = outcome.rewritten_files.len(),
            migrated = outcome.migrated_identities.len(),
            "rename complete"
        );
        Ok(outcome)
    }

    /// Rewrite every planned file under its lock, then commit.
    fn rewrite_and_commit(&self, plan: &RenamePlan) -> Result<(RenameOutcome, Vec<SurrogateId>)> {
        let db = self.cache.database();
        // sorted order, so overlapping renames cannot deadlock
        let locks: Vec<Arc<Mutex<()>>> = plan
            .files
            .iter()
            .map(|id| Arc::clone(self.file_locks.entry(*id).or_default().value()))
            .collect();
        let _guards: Vec<_> = locks.iter().map(|lock| lock.lock()).collect();

        let rewrites = plan
            .files
            .par_iter()
            .map(|id| {
                let (file, content) =
                    db.read(|store| Ok((store.require_file(*id)?, store.file_content(*id)?)))?;
                match rewrite_class(&content, std::slice::from_ref(&plan.remapper)) {
                    Ok(Some(bytes)) => {
                        debug!(path = %file.path, "rewrote class file");
                        Ok(Some((file, bytes)))
                    }
                    Ok(None) => Ok(None),
                    Err(source) => Err(Error::RewriteValidation {
                        file: file.path,
                        source,
                    }),
                }
            })
            .collect::<Result<Vec<Option<(FileRecord, Vec<u8>)>>>>()?;
        let rewrites: Vec<(FileRecord, Vec<u8>)> = rewrites.into_iter().flatten().collect();

        db.transaction(|store| commit(store, plan, &rewrites))
    }

    /// Drop the locks of `files` that no other rename holds or waits on.
    fn release_locks(&self, files: &BTreeSet<FileId>) {
        for id in files {
            self.file_locks
                .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

// ---- Planning ----

fn plan_rename(store: &Store<'_>, identity: &str, new_name: &str) -> Result<RenamePlan> {
    let stored = store
        .symbol_by_identity(identity)?
        .ok_or_else(|| Error::UnknownIdentity(identity.to_string()))?;
    if stored.symbol.is_placeholder() {
        return Err(Error::invalid_rename(identity, "not declared in the workspace"));
    }
    if !stored.symbol.can_be_renamed() {
        return Err(Error::invalid_rename(
            identity,
            "constructors and static initializers keep their names",
        ));
    }

    let current = stored.symbol.identity.clone();
    let mut migrations = Vec::new();
    let mut resignatures = Vec::new();
    let mut new_file_name = None;
    let remapper = match stored.symbol.kind {
        SymbolKind::Class => {
            let old = class_name(&current);
            let new = target_class_name(identity, &old, new_name)?;
            let new_identity = class_identity(&new);
            ensure_free(store, identity, &new_identity)?;

            let dependents = store.symbols_mentioning(stored.identity_id, &old)?;
            let signature = stored
                .symbol
                .signature
                .as_deref()
                .and_then(|s| remap_signature(s, &old, &new));
            migrations.push(Migration {
                symbol: stored,
                identity: new_identity,
                name: Some(new.clone()),
                signature,
            });
            for dependent in dependents {
                let signature = dependent
                    .symbol
                    .signature
                    .as_deref()
                    .and_then(|s| remap_signature(s, &old, &new));
                let Some(moved) = remap_member_identity(&dependent, &old, &new)? else {
                    if let Some(signature) = signature {
                        resignatures.push((dependent, signature));
                    }
                    continue;
                };
                ensure_free(store, identity, &moved)?;
                migrations.push(Migration {
                    symbol: dependent,
                    identity: moved,
                    name: None,
                    signature,
                });
            }

            let simple = new.rsplit('/').next().unwrap_or(new.as_str());
            new_file_name = Some(format!("{}.class", simple));
            Remapper::Class { old, new }
        }
        SymbolKind::Field => {
            check_member_name(identity, new_name, false)?;
            let (owner, name, descriptor) = split_field_identity(current.as_str())?;
            let new_identity = field_identity(&owner, new_name, &descriptor);
            ensure_free(store, identity, &new_identity)?;
            migrations.push(Migration {
                symbol: stored,
                identity: new_identity,
                name: Some(new_name.to_string()),
                signature: None,
            });
            Remapper::Field {
                owner: class_name(&owner),
                name,
                descriptor,
                new_name: new_name.to_string(),
            }
        }
        SymbolKind::Method => {
            check_member_name(identity, new_name, true)?;
            let (owner, name, descriptor) = split_method_identity(current.as_str())?;
            let new_identity = method_identity(&owner, new_name, &descriptor);
            ensure_free(store, identity, &new_identity)?;
            migrations.push(Migration {
                symbol: stored,
                identity: new_identity,
                name: Some(new_name.to_string()),
                signature: None,
            });
            Remapper::Method {
                owner: class_name(&owner),
                name,
                descriptor,
                new_name: new_name.to_string(),
            }
        }
    };

    let mut files = BTreeSet::new();
    let mut renamed_files = BTreeSet::new();
    let mut dynamic_references = Vec::new();
    for (position, migration) in migrations.iter().enumerate() {
        if let Some(file) = migration.symbol.symbol.file {
            files.insert(file);
        }
        for reference in store.query_references(migration.symbol.identity_id)? {
            let kind = reference.reference.kind;
            files.insert(reference.reference.file);
            if position == 0 && kind.rename_effect() == RenameEffect::RewriteAndRenameFile {
                renamed_files.insert(reference.reference.file);
            }
            if kind.is_dynamic() {
                dynamic_references.push(reference);
            }
        }
    }

    Ok(RenamePlan {
        remapper,
        migrations,
        resignatures,
        files,
        renamed_files,
        new_file_name,
        dynamic_references,
    })
}

/// Resolve the requested class name against the old one's package.
fn target_class_name(identity: &str, old: &str, requested: &str) -> Result<String> {
    let requested = requested.replace('.', "/");
    let package = |name: &str| name.rsplit_once('/').map(|(p, _)| p.to_string());
    let new = match (requested.contains('/'), package(old)) {
        (false, Some(pkg)) => format!("{}/{}", pkg, requested),
        _ => requested,
    };
    let legal = new
        .split('/')
        .all(|segment| !segment.is_empty() && !segment.contains(|c| matches!(c, ';' | '[')));
    if !legal {
        return Err(Error::invalid_rename(
            identity,
            format!("illegal class name {:?}", new),
        ));
    }
    if package(old) != package(&new) {
        return Err(Error::CrossPackageRename {
            from: old.to_string(),
            to: new,
        });
    }
    if new == old {
        return Err(Error::invalid_rename(identity, "new name equals the old one"));
    }
    Ok(new)
}

/// JVM unqualified names; methods additionally exclude angle brackets.
fn check_member_name(identity: &str, name: &str, method: bool) -> Result<()> {
    let illegal = |c: char| matches!(c, '.' | ';' | '[' | '/') || (method && matches!(c, '<' | '>'));
    if name.is_empty() || name.contains(illegal) {
        return Err(Error::invalid_rename(
            identity,
            format!("illegal member name {:?}", name),
        ));
    }
    Ok(())
}

/// Fail unless `target` is unused or only a placeholder.
fn ensure_free(store: &Store<'_>, identity: &str, target: &Identity) -> Result<()> {
    match store.symbol_by_identity(target.as_str())? {
        Some(occupant) if !occupant.symbol.is_placeholder() => Err(Error::invalid_rename(
            identity,
            format!("{} is already declared", target),
        )),
        _ => Ok(()),
    }
}

/// New identity of a member whose owner or descriptor names class `old`.
/// `None` when the identity only matched textually.
fn remap_member_identity(symbol: &StoredSymbol, old: &str, new: &str) -> Result<Option<Identity>> {
    let identity = symbol.symbol.identity.as_str();
    let moved = match symbol.symbol.kind {
        SymbolKind::Class => return Ok(None),
        SymbolKind::Field => {
            let (owner, name, descriptor) = split_field_identity(identity)?;
            let (owner, descriptor) = remap_member_parts(owner, descriptor, old, new);
            field_identity(&owner, &name, &descriptor)
        }
        SymbolKind::Method => {
            let (owner, name, descriptor) = split_method_identity(identity)?;
            let (owner, descriptor) = remap_member_parts(owner, descriptor, old, new);
            method_identity(&owner, &name, &descriptor)
        }
    };
    Ok((moved != symbol.symbol.identity).then_some(moved))
}

fn remap_member_parts(
    owner: Identity,
    descriptor: String,
    old: &str,
    new: &str,
) -> (Identity, String) {
    let owner = if class_name(&owner) == old {
        class_identity(new)
    } else {
        owner
    };
    let descriptor = remap_descriptor(&descriptor, old, new).unwrap_or(descriptor);
    (owner, descriptor)
}

// ---- Commit ----

fn commit(
    store: &Store<'_>,
    plan: &RenamePlan,
    rewrites: &[(FileRecord, Vec<u8>)],
) -> Result<(RenameOutcome, Vec<SurrogateId>)> {
    let primary = &plan.migrations[0].symbol;
    // a concurrent rename may have moved the symbol since planning
    match store.symbol_by_identity(primary.symbol.identity.as_str())? {
        Some(current) if current.id == primary.id => {}
        _ => {
            return Err(Error::UnknownIdentity(
                primary.symbol.identity.to_string(),
            ))
        }
    }

    let mut rewritten_files = Vec::with_capacity(rewrites.len());
    for (file, content) in rewrites {
        store.update_file_entry(file.id, content)?;
        rewritten_files.push(file.path.clone());
    }

    let mut renamed_files = Vec::new();
    if let Some(new_name) = &plan.new_file_name {
        for id in &plan.renamed_files {
            let before = store.require_file(*id)?;
            if !before.name.ends_with(".class") || before.name == *new_name {
                continue;
            }
            let after = store.rename_file_entry(*id, new_name)?;
            renamed_files.push(RenamedFile {
                from: before.path,
                to: after.path,
            });
        }
    }

    let mut migrated_identities = Vec::with_capacity(plan.migrations.len());
    let mut committed = Vec::with_capacity(plan.migrations.len());
    for migration in &plan.migrations {
        let symbol = migration.symbol.id;
        if let Some(name) = &migration.name {
            store.update_symbol_name(symbol, name)?;
        }
        committed.push(store.update_symbol_identity(symbol, &migration.identity)?);
        if let Some(signature) = &migration.signature {
            store.update_symbol_signature(symbol, signature)?;
        }
        migrated_identities.push(MigratedIdentity {
            from: migration.symbol.symbol.identity.clone(),
            to: migration.identity.clone(),
        });
    }
    for (symbol, signature) in &plan.resignatures {
        store.update_symbol_signature(symbol.id, signature)?;
    }

    let outcome = RenameOutcome {
        old_identity: primary.symbol.identity.clone(),
        new_identity: plan.migrations[0].identity.clone(),
        rewritten_files,
        renamed_files,
        migrated_identities,
        dynamic_references: plan.dynamic_references.clone(),
    };
    Ok((outcome, committed))
}
