//! Event queue between extraction and the store.
//!
//! Producers (mapping contexts) push typed events into one bounded FIFO
//! channel; a single consumer thread drains it in batches and hands each
//! job's slice of a batch to the registered observers. A full queue blocks
//! the producer. [`JobPublisher::flush`] is the drain-and-join point: it
//! returns once every event the job sent before it has been applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::mapping::cache::IdentityCache;
use crate::model::{Identity, Reference, SurrogateId, Symbol};

/// One identity as seen by a mapping job. The surrogate id is filled in
/// once the identity row has been written.
#[derive(Debug)]
pub struct Identifier {
    identity: Identity,
    surrogate: OnceLock<SurrogateId>,
}

impl Identifier {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            surrogate: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// `None` until the broker has applied this identifier's event.
    pub fn surrogate(&self) -> Option<SurrogateId> {
        self.surrogate.get().copied()
    }
}

#[derive(Debug, Clone)]
pub enum MappingEvent {
    AddedIdentifier(Arc<Identifier>),
    AddedSymbol(Symbol),
    AddedReference(Reference),
}

/// Receives drained events. `apply` gets the events of one job in emission
/// order; an error fails that job.
pub trait MappingObserver: Send {
    fn apply(&mut self, events: &[MappingEvent]) -> Result<()>;
}

/// Persists events: identifiers first become identity rows, then symbols
/// and references are inserted against them. One transaction per call.
pub struct DatabaseSync {
    cache: IdentityCache,
}

impl DatabaseSync {
    pub fn new(cache: IdentityCache) -> Self {
        Self { cache }
    }

    fn database(&self) -> &Arc<Database> {
        self.cache.database()
    }
}

impl MappingObserver for DatabaseSync {
    fn apply(&mut self, events: &[MappingEvent]) -> Result<()> {
        let identifiers: Vec<&Arc<Identifier>> = events
            .iter()
            .filter_map(|event| match event {
                MappingEvent::AddedIdentifier(identifier) => Some(identifier),
                _ => None,
            })
            .collect();
        let identities: Vec<Identity> = identifiers
            .iter()
            .map(|identifier| identifier.identity.clone())
            .collect();

        let inserted = self.database().transaction(|store| {
            let inserted = self.cache.bulk_insert_in(store, &identities)?;
            for event in events {
                match event {
                    MappingEvent::AddedIdentifier(_) => {}
                    MappingEvent::AddedSymbol(symbol) => {
                        store.insert_symbol(symbol)?;
                    }
                    MappingEvent::AddedReference(reference) => {
                        store.insert_reference(reference)?;
                    }
                }
            }
            Ok(inserted)
        })?;

        // only committed rows reach the cache
        self.cache.remember_all(&inserted);
        for (identifier, (_, id)) in identifiers.iter().zip(&inserted) {
            let _ = identifier.surrogate.set(*id);
        }
        Ok(())
    }
}

type JobId = u64;

enum Message {
    Event(JobId, MappingEvent),
    Flush(JobId, Sender<Result<()>>),
}

/// Single-consumer event queue shared by all mapping jobs.
pub struct EventBroker {
    sender: Option<Sender<Message>>,
    next_job: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl EventBroker {
    /// Start the consumer thread with the given observers.
    pub fn start(config: &BrokerConfig, observers: Vec<Box<dyn MappingObserver>>) -> Result<Self> {
        if config.queue_capacity == 0 || config.batch_size == 0 {
            return Err(Error::Config(
                "broker queue_capacity and batch_size must be >= 1".to_string(),
            ));
        }

        let (tx, rx) = channel::bounded(config.queue_capacity);
        let batch_size = config.batch_size;
        let worker = thread::Builder::new()
            .name("jvmap-event-broker".to_string())
            .spawn(move || Consumer::new(observers).run(rx, batch_size))?;

        Ok(Self {
            sender: Some(tx),
            next_job: AtomicU64::new(1),
            worker: Some(worker),
        })
    }

    /// A broker persisting through [`DatabaseSync`].
    pub fn with_database(config: &BrokerConfig, cache: IdentityCache) -> Result<Self> {
        Self::start(config, vec![Box::new(DatabaseSync::new(cache))])
    }

    /// Open a new job on this broker.
    pub fn publisher(&self) -> Result<JobPublisher> {
        let sender = self.sender.clone().ok_or(Error::BrokerClosed)?;
        Ok(JobPublisher {
            job: self.next_job.fetch_add(1, Ordering::Relaxed),
            sender,
        })
    }

    /// Stop accepting jobs and wait for the consumer to drain. Blocks until
    /// every outstanding [`JobPublisher`] has been dropped.
    pub fn shutdown(mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("event broker consumer panicked");
            }
        }
    }
}

impl Drop for EventBroker {
    fn drop(&mut self) {
        // the consumer exits on its own once the last publisher is gone
        self.sender.take();
    }
}

/// A job's handle on the broker.
pub struct JobPublisher {
    job: JobId,
    sender: Sender<Message>,
}

impl JobPublisher {
    /// Queue an event, blocking while the queue is full.
    pub fn dispatch(&self, event: MappingEvent) -> Result<()> {
        self.sender
            .send(Message::Event(self.job, event))
            .map_err(|_| Error::BrokerClosed)
    }

    /// Wait until every event this job dispatched has been applied, and
    /// report the first failure among them.
    pub fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.sender
            .send(Message::Flush(self.job, reply_tx))
            .map_err(|_| Error::BrokerClosed)?;
        reply_rx.recv().map_err(|_| Error::BrokerClosed)?
    }
}

/// First error of a job, held until the job flushes.
struct JobFailure {
    error: Error,
    /// Events dropped since the error.
    skipped: usize,
}

struct Consumer {
    observers: Vec<Box<dyn MappingObserver>>,
    failures: HashMap<JobId, JobFailure>,
}

impl Consumer {
    fn new(observers: Vec<Box<dyn MappingObserver>>) -> Self {
        Self {
            observers,
            failures: HashMap::new(),
        }
    }

    fn run(mut self, rx: Receiver<Message>, batch_size: usize) {
        while let Ok(first) = rx.recv() {
            let mut batch = Vec::with_capacity(batch_size);
            batch.push(first);
            while batch.len() < batch_size {
                match rx.try_recv() {
                    Ok(message) => batch.push(message),
                    Err(_) => break,
                }
            }
            self.process(batch);
        }
        debug!("event broker drained");
    }

    fn process(&mut self, batch: Vec<Message>) {
        let mut pending: Vec<(JobId, Vec<MappingEvent>)> = Vec::new();
        for message in batch {
            match message {
                Message::Event(job, event) => match pending.iter_mut().find(|(j, _)| *j == job) {
                    Some((_, events)) => events.push(event),
                    None => pending.push((job, vec![event])),
                },
                Message::Flush(job, reply) => {
                    self.apply_pending(&mut pending);
                    let result = match self.failures.remove(&job) {
                        Some(failure) => {
                            if failure.skipped > 0 {
                                warn!(
                                    job,
                                    skipped = failure.skipped,
                                    "dropped mapping events after a failure; earlier batches stay committed"
                                );
                            }
                            Err(failure.error)
                        }
                        None => Ok(()),
                    };
                    // the job may have given up waiting
                    let _ = reply.send(result);
                }
            }
        }
        self.apply_pending(&mut pending);
    }

    fn apply_pending(&mut self, pending: &mut Vec<(JobId, Vec<MappingEvent>)>) {
        for (job, events) in pending.drain(..) {
            if let Some(failure) = self.failures.get_mut(&job) {
                failure.skipped += events.len();
                debug!(job, skipped = events.len(), "skipping events of a failed job");
                continue;
            }
            for observer in &mut self.observers {
                if let Err(error) = observer.apply(&events) {
                    warn!(job, error = %error, "failed to apply mapping events");
                    self.failures.insert(job, JobFailure { error, skipped: 0 });
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::model::identity::class_identity;
    use crate::model::{FileId, ReferenceKind};
    use parking_lot::Mutex;

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl MappingObserver for Recorder {
        fn apply(&mut self, events: &[MappingEvent]) -> Result<()> {
            let mut seen = self.0.lock();
            for event in events {
                seen.push(match event {
                    MappingEvent::AddedIdentifier(id) => format!("id {}", id.identity()),
                    MappingEvent::AddedSymbol(s) => format!("symbol {}", s.identity),
                    MappingEvent::AddedReference(r) => format!("ref {}", r.target),
                });
            }
            Ok(())
        }
    }

    fn small_config() -> BrokerConfig {
        BrokerConfig {
            queue_capacity: 2,
            batch_size: 3,
        }
    }

    #[test]
    fn test_flush_waits_for_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let broker = EventBroker::start(&small_config(), vec![Box::new(Recorder(seen.clone()))])
            .unwrap();
        let publisher = broker.publisher().unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            publisher
                .dispatch(MappingEvent::AddedIdentifier(Arc::new(Identifier::new(
                    class_identity(name),
                ))))
                .unwrap();
        }
        publisher.flush().unwrap();
        assert_eq!(*seen.lock(), vec!["id a", "id b", "id c", "id d", "id e"]);
        drop(publisher);
        broker.shutdown();
    }

    #[test]
    fn test_database_sync_fills_surrogates() {
        let db = Arc::new(Database::in_memory().unwrap());
        let cache = IdentityCache::new(db.clone(), &CacheConfig::default());
        let broker = EventBroker::with_database(&small_config(), cache.clone()).unwrap();
        let publisher = broker.publisher().unwrap();

        let identifier = Arc::new(Identifier::new(class_identity("com/x/Foo")));
        publisher
            .dispatch(MappingEvent::AddedIdentifier(identifier.clone()))
            .unwrap();
        publisher
            .dispatch(MappingEvent::AddedSymbol(Symbol::placeholder_class("com/x/Foo")))
            .unwrap();
        publisher.flush().unwrap();

        let stored = db.read(|store| store.lookup_identity("com/x/Foo")).unwrap();
        assert_eq!(identifier.surrogate(), stored);
        assert_eq!(cache.get_cached("com/x/Foo"), stored);
        assert!(db
            .read(|store| store.symbol_by_identity("com/x/Foo"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_failure_reported_to_owning_job_only() {
        let db = Arc::new(Database::in_memory().unwrap());
        let cache = IdentityCache::new(db.clone(), &CacheConfig::default());
        let broker = EventBroker::with_database(&small_config(), cache).unwrap();

        let failing = broker.publisher().unwrap();
        let healthy = broker.publisher().unwrap();

        // reference to identities never inserted
        failing
            .dispatch(MappingEvent::AddedReference(Reference {
                kind: ReferenceKind::Superclass,
                file: FileId(1),
                target: class_identity("java/lang/Object"),
                owner: class_identity("com/x/Foo"),
                location: None,
            }))
            .unwrap();
        healthy
            .dispatch(MappingEvent::AddedIdentifier(Arc::new(Identifier::new(
                class_identity("com/x/Ok"),
            ))))
            .unwrap();

        assert!(matches!(failing.flush(), Err(Error::UnknownIdentity(_))));
        healthy.flush().unwrap();
        // the failure was consumed by the first flush
        failing.flush().unwrap();
    }

    /// Fails any slice containing the identifier `poison`.
    struct FailOn {
        poison: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl MappingObserver for FailOn {
        fn apply(&mut self, events: &[MappingEvent]) -> Result<()> {
            let names: Vec<String> = events
                .iter()
                .filter_map(|event| match event {
                    MappingEvent::AddedIdentifier(id) => Some(id.identity().to_string()),
                    _ => None,
                })
                .collect();
            if names.iter().any(|name| name == self.poison) {
                return Err(Error::UnknownIdentity(self.poison.to_string()));
            }
            self.seen.lock().extend(names);
            Ok(())
        }
    }

    fn identifier_event(job: JobId, name: &str) -> Message {
        Message::Event(
            job,
            MappingEvent::AddedIdentifier(Arc::new(Identifier::new(class_identity(name)))),
        )
    }

    #[test]
    fn test_failed_job_counts_skipped_events_until_flush() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut consumer = Consumer::new(vec![Box::new(FailOn {
            poison: "bad",
            seen: seen.clone(),
        })]);

        consumer.process(vec![identifier_event(1, "early"), identifier_event(2, "other")]);
        consumer.process(vec![identifier_event(1, "bad")]);
        consumer.process(vec![
            identifier_event(1, "late"),
            identifier_event(2, "fine"),
            identifier_event(1, "later"),
        ]);
        assert_eq!(consumer.failures[&1].skipped, 2);
        assert!(!consumer.failures.contains_key(&2));
        assert_eq!(*seen.lock(), vec!["early", "other", "fine"]);

        let (reply_tx, reply_rx) = channel::bounded(1);
        consumer.process(vec![Message::Flush(1, reply_tx)]);
        assert!(matches!(
            reply_rx.recv().unwrap(),
            Err(Error::UnknownIdentity(_))
        ));
        assert!(consumer.failures.is_empty());
    }

    #[test]
    fn test_publisher_outlives_broker_handle() {
        let broker = EventBroker::start(&small_config(), Vec::new()).unwrap();
        let publisher = broker.publisher().unwrap();
        drop(broker);
        publisher.flush().unwrap();
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = BrokerConfig {
            queue_capacity: 0,
            batch_size: 1,
        };
        assert!(matches!(
            EventBroker::start(&config, Vec::new()),
            Err(Error::Config(_))
        ));
    }
}
