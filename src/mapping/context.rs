use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::mapping::broker::{Identifier, JobPublisher, MappingEvent};
use crate::model::{Identity, Reference, Symbol};

/// Receiver of what the extraction visitor finds.
pub trait SymbolSink {
    fn add_symbol(&self, symbol: Symbol) -> Result<()>;
    fn add_reference(&self, reference: Reference) -> Result<()>;
}

/// Counts for one finished mapping job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MappingStats {
    pub job: String,
    pub identifiers: usize,
    pub symbols: usize,
    pub references: usize,
}

/// State of one mapping job: a file or a whole archive.
///
/// Identities are memoized per job, so each distinct identity produces a
/// single `AddedIdentifier` event however often it occurs. Events become
/// visible in the store only after [`MappingContext::finish`].
pub struct MappingContext {
    job: String,
    identifiers: DashMap<String, Arc<Identifier>>,
    publisher: JobPublisher,
    symbols: AtomicUsize,
    references: AtomicUsize,
}

impl MappingContext {
    pub fn new(job: impl Into<String>, capacity: usize, publisher: JobPublisher) -> Self {
        Self {
            job: job.into(),
            identifiers: DashMap::with_capacity(capacity),
            publisher,
            symbols: AtomicUsize::new(0),
            references: AtomicUsize::new(0),
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// The job's handle for `identity`, announcing it to the broker on first
    /// sight.
    pub fn retrieve_identifier(&self, identity: &Identity) -> Result<Arc<Identifier>> {
        match self.identifiers.entry(identity.as_str().to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let identifier = Arc::new(Identifier::new(identity.clone()));
                // dispatched under the entry lock: nobody can reference the
                // identity before its insert is queued
                self.publisher
                    .dispatch(MappingEvent::AddedIdentifier(Arc::clone(&identifier)))?;
                entry.insert(Arc::clone(&identifier));
                Ok(identifier)
            }
        }
    }

    /// Drain this job's events into the store and return its counts.
    pub fn finish(self) -> Result<MappingStats> {
        self.publisher.flush()?;
        let stats = MappingStats {
            job: self.job,
            identifiers: self.identifiers.len(),
            symbols: self.symbols.load(Ordering::Relaxed),
            references: self.references.load(Ordering::Relaxed),
        };
        debug!(
            job = %stats.job,
            symbols = stats.symbols,
            references = stats.references,
            "mapping job finished"
        );
        Ok(stats)
    }
}

impl SymbolSink for MappingContext {
    fn add_symbol(&self, symbol: Symbol) -> Result<()> {
        self.retrieve_identifier(&symbol.identity)?;
        if let Some(owner) = &symbol.owner {
            self.retrieve_identifier(owner)?;
        }
        self.publisher.dispatch(MappingEvent::AddedSymbol(symbol))?;
        self.symbols.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn add_reference(&self, reference: Reference) -> Result<()> {
        self.retrieve_identifier(&reference.target)?;
        self.retrieve_identifier(&reference.owner)?;
        self.publisher
            .dispatch(MappingEvent::AddedReference(reference))?;
        self.references.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, CacheConfig};
    use crate::db::Database;
    use crate::mapping::broker::EventBroker;
    use crate::mapping::cache::IdentityCache;
    use crate::model::identity::class_identity;
    use crate::model::ReferenceKind;

    fn setup() -> (Arc<Database>, EventBroker) {
        let db = Arc::new(Database::in_memory().unwrap());
        let cache = IdentityCache::new(db.clone(), &CacheConfig::default());
        let broker = EventBroker::with_database(&BrokerConfig::default(), cache).unwrap();
        (db, broker)
    }

    #[test]
    fn test_identifiers_memoized_per_job() {
        let (_db, broker) = setup();
        let ctx = MappingContext::new("Foo.class", 16, broker.publisher().unwrap());
        let a = ctx.retrieve_identifier(&class_identity("com/x/Foo")).unwrap();
        let b = ctx.retrieve_identifier(&class_identity("com/x/Foo")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let stats = ctx.finish().unwrap();
        assert_eq!(stats.identifiers, 1);
        assert!(a.surrogate().is_some());
    }

    #[test]
    fn test_reference_visible_after_finish() {
        let (db, broker) = setup();
        let file = db
            .transaction(|store| store.insert_file("Foo.class", None, false, None))
            .unwrap();
        let ctx = MappingContext::new("Foo.class", 16, broker.publisher().unwrap());
        let mut foo = Symbol::placeholder_class("com/x/Foo");
        foo.file = Some(file);
        ctx.add_symbol(foo).unwrap();
        ctx.add_symbol(Symbol::placeholder_class("java/lang/Object"))
            .unwrap();
        ctx.add_reference(Reference {
            kind: ReferenceKind::Superclass,
            file,
            target: class_identity("java/lang/Object"),
            owner: class_identity("com/x/Foo"),
            location: None,
        })
        .unwrap();

        let stats = ctx.finish().unwrap();
        assert_eq!((stats.symbols, stats.references), (2, 1));
        let refs = db.read(|store| store.references_in_file(file)).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].reference.target.as_str(), "java/lang/Object");
    }

    #[test]
    fn test_parallel_jobs_share_identities() {
        let (db, broker) = setup();
        std::thread::scope(|scope| {
            for job in 0..4 {
                let publisher = broker.publisher().unwrap();
                scope.spawn(move || {
                    let ctx = MappingContext::new(format!("job{job}"), 16, publisher);
                    ctx.add_symbol(Symbol::placeholder_class("java/lang/Object"))
                        .unwrap();
                    ctx.finish().unwrap();
                });
            }
        });
        let summary = db.read(|store| store.summary()).unwrap();
        assert_eq!(summary.identities, 1);
        assert_eq!(summary.classes, 1);
    }
}
