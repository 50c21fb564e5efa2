//! Write-through cache from identity strings to their surrogate ids.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::config::CacheConfig;
use crate::db::{Database, Store};
use crate::error::{Error, Result};
use crate::model::{Identity, SurrogateId};

/// Entries idle past `idle` are evicted; this bounds memory only. A miss
/// always goes back to the store, and inserts rely on the store's unique
/// constraint, so eviction timing never affects which row an identity maps
/// to.
#[derive(Clone)]
pub struct IdentityCache {
    db: Arc<Database>,
    entries: Cache<String, SurrogateId>,
}

impl IdentityCache {
    pub fn new(db: Arc<Database>, config: &CacheConfig) -> Self {
        Self {
            db,
            entries: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_idle(Duration::from_secs(config.idle_seconds))
                .build(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Insert `identity` if absent and return its surrogate id.
    pub fn insert(&self, identity: &str) -> Result<SurrogateId> {
        let id = self
            .db
            .transaction(|store| store.insert_or_ignore_identity(identity))?;
        self.remember(identity, id);
        Ok(id)
    }

    /// [`IdentityCache::insert`] for many identities in one transaction.
    /// The result keeps input order.
    pub fn bulk_insert(&self, identities: &[Identity]) -> Result<Vec<(Identity, SurrogateId)>> {
        let inserted = self
            .db
            .transaction(|store| self.bulk_insert_in(store, identities))?;
        self.remember_all(&inserted);
        Ok(inserted)
    }

    /// Insert through a store the caller already holds. The cache is left
    /// alone; pass the result to [`IdentityCache::remember_all`] once the
    /// caller's transaction has committed.
    pub fn bulk_insert_in(
        &self,
        store: &Store<'_>,
        identities: &[Identity],
    ) -> Result<Vec<(Identity, SurrogateId)>> {
        identities
            .iter()
            .map(|identity| {
                let id = store.insert_or_ignore_identity(identity.as_str())?;
                Ok((identity.clone(), id))
            })
            .collect()
    }

    /// Surrogate id of a known identity. A miss reads the store (never
    /// writes) and repopulates the cache.
    pub fn lookup(&self, identity: &str) -> Result<SurrogateId> {
        if let Some(id) = self.entries.get(identity) {
            return Ok(id);
        }
        let id = self
            .db
            .read(|store| store.lookup_identity(identity))?
            .ok_or_else(|| Error::UnknownIdentity(identity.to_string()))?;
        self.entries.insert(identity.to_string(), id);
        Ok(id)
    }

    pub fn get_cached(&self, identity: &str) -> Option<SurrogateId> {
        self.entries.get(identity)
    }

    /// Record a mapping the caller just committed.
    pub fn remember(&self, identity: &str, id: SurrogateId) {
        self.entries.insert(identity.to_string(), id);
    }

    pub fn remember_all(&self, committed: &[(Identity, SurrogateId)]) {
        for (identity, id) in committed {
            self.remember(identity.as_str(), *id);
        }
    }

    pub fn invalidate(&self, identity: &str) {
        self.entries.invalidate(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::identity::class_identity;

    fn cache() -> IdentityCache {
        let db = Arc::new(Database::in_memory().unwrap());
        IdentityCache::new(db, &CacheConfig::default())
    }

    #[test]
    fn test_insert_is_idempotent() {
        let cache = cache();
        let a = cache.insert("com/x/Foo").unwrap();
        let b = cache.insert("com/x/Foo").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.get_cached("com/x/Foo"), Some(a));
    }

    #[test]
    fn test_bulk_insert_preserves_order() {
        let cache = cache();
        let existing = cache.insert("b").unwrap();
        let input = vec![
            class_identity("c"),
            class_identity("b"),
            class_identity("a"),
            class_identity("c"),
        ];
        let out = cache.bulk_insert(&input).unwrap();
        let names: Vec<&str> = out.iter().map(|(i, _)| i.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a", "c"]);
        assert_eq!(out[1].1, existing);
        assert_eq!(out[0].1, out[3].1);
    }

    #[test]
    fn test_bulk_insert_in_leaves_cache_to_the_caller() {
        let cache = cache();
        let input = vec![class_identity("com/x/Foo")];
        let failed: Result<()> = cache.database().transaction(|store| {
            cache.bulk_insert_in(store, &input)?;
            Err(Error::Config("abort".to_string()))
        });
        assert!(failed.is_err());
        assert_eq!(cache.get_cached("com/x/Foo"), None);
        assert!(matches!(
            cache.lookup("com/x/Foo"),
            Err(Error::UnknownIdentity(_))
        ));

        let committed = cache
            .database()
            .transaction(|store| cache.bulk_insert_in(store, &input))
            .unwrap();
        assert_eq!(cache.get_cached("com/x/Foo"), None);
        cache.remember_all(&committed);
        assert_eq!(cache.get_cached("com/x/Foo"), Some(committed[0].1));
    }

    #[test]
    fn test_lookup_falls_back_to_store() {
        let cache = cache();
        let id = cache.insert("com/x/Foo").unwrap();
        cache.invalidate("com/x/Foo");
        assert_eq!(cache.get_cached("com/x/Foo"), None);
        assert_eq!(cache.lookup("com/x/Foo").unwrap(), id);
        assert_eq!(cache.get_cached("com/x/Foo"), Some(id));
    }

    #[test]
    fn test_lookup_unknown_does_not_insert() {
        let cache = cache();
        assert!(matches!(
            cache.lookup("com/x/Nope"),
            Err(Error::UnknownIdentity(_))
        ));
        let present = cache
            .database()
            .read(|store| store.lookup_identity("com/x/Nope"))
            .unwrap();
        assert_eq!(present, None);
    }

    #[test]
    fn test_concurrent_inserts_agree() {
        let cache = cache();
        let ids: Vec<SurrogateId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.insert("com/x/Shared").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
