pub(crate) mod handoff;

pub use handoff::HandOff;

use crate::collection::{Collection, CollectionCore};
use crate::config::StoreConfig;
use crate::error::{LiveDbError, Result};
use crate::feed::{CommitFeed, CommitRecord};
use crate::notify::{NotificationEngine, NotificationToken};
use crate::object::Object;
use crate::schema::Schema;
use crate::snapshot::Snapshot;
use crate::validation;
use crate::value::{ObjectKey, Value};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use uuid::Uuid;

/// Open databases by path, so every store on one path shares its versions.
fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<DatabaseShared>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Weak<DatabaseShared>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Debug, Clone, Copy)]
struct WriterSlot {
    context: u64,
    thread: ThreadId,
}

struct DatabaseShared {
    id: Uuid,
    config: StoreConfig,
    schema: Arc<Schema>,
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<Option<WriterSlot>>,
    writer_released: Condvar,
    feed: CommitFeed,
    closed: AtomicBool,
    next_context: AtomicU64,
}

/// The shared, versioned state behind every store opened on one path.
#[derive(Clone)]
pub struct Database {
    shared: Arc<DatabaseShared>,
}

impl Database {
    /// Open (or join) the database at `config.path`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut open = registry().lock();
        open.retain(|_, weak| weak.strong_count() > 0);

        if let Some(shared) = open.get(&config.path).and_then(Weak::upgrade) {
            if !shared.closed.load(Ordering::Acquire) {
                if shared.config.schema != config.schema {
                    return Err(LiveDbError::Schema(format!(
                        "{} is already open with a different schema",
                        config.path.display()
                    )));
                }
                return Ok(Database { shared });
            }
        }

        let schema = Arc::new(Schema::from_definition(&config.schema)?);
        let shared = Arc::new(DatabaseShared {
            id: Uuid::new_v4(),
            current: RwLock::new(Arc::new(Snapshot::empty(schema.clone()))),
            schema,
            config,
            writer: Mutex::new(None),
            writer_released: Condvar::new(),
            feed: CommitFeed::default(),
            closed: AtomicBool::new(false),
            next_context: AtomicU64::new(1),
        });
        open.insert(shared.config.path.clone(), Arc::downgrade(&shared));
        log::info!("Opened database at {}", shared.config.path.display());
        Ok(Database { shared })
    }

    /// Open a new context bound to the calling thread.
    pub fn open_store(&self) -> Result<Store> {
        if self.is_closed() {
            return Err(LiveDbError::Invalidated("database is closed".into()));
        }
        let id = self.shared.next_context.fetch_add(1, Ordering::Relaxed);
        let feed = self.shared.feed.subscribe(id);
        let pinned = self.latest();
        log::debug!(
            "Opened context {id} on {} at version {}",
            self.path().display(),
            pinned.version()
        );
        Ok(Store {
            inner: Arc::new(StoreInner {
                id,
                owner: thread::current().id(),
                database: self.clone(),
                state: Mutex::new(ContextState {
                    pinned,
                    write: None,
                    invalidated: false,
                    backlog: Vec::new(),
                }),
                feed: Mutex::new(Some(feed)),
                notifier: Mutex::new(NotificationEngine::default()),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn path(&self) -> &Path {
        &self.shared.config.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.shared.schema
    }

    /// The latest committed snapshot.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.shared.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.shared.current.read().version()
    }

    /// Whether `version` has been committed and the database is still open.
    pub fn is_valid(&self, version: u64) -> bool {
        !self.is_closed() && version <= self.version()
    }

    /// Number of contexts currently receiving commits.
    pub fn context_count(&self) -> usize {
        self.shared.feed.len()
    }

    /// Invalidate every context. Their tokens fail on the next delivery turn.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.feed.close();
        {
            let _slot = self.shared.writer.lock();
            self.shared.writer_released.notify_all();
        }
        let mut open = registry().lock();
        if let Some(weak) = open.get(&self.shared.config.path) {
            if weak.as_ptr() == Arc::as_ptr(&self.shared) {
                open.remove(&self.shared.config.path);
            }
        }
        log::info!("Closed database at {}", self.path().display());
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn acquire_writer(&self, context: u64) -> Result<()> {
        let me = thread::current().id();
        let mut slot = self.shared.writer.lock();
        loop {
            if self.is_closed() {
                return Err(LiveDbError::Invalidated("database is closed".into()));
            }
            match *slot {
                None => break,
                Some(holder) if holder.thread == me => {
                    return Err(LiveDbError::Capability(format!(
                        "context {} on this thread already holds the write lock",
                        holder.context
                    )));
                }
                Some(_) => self.shared.writer_released.wait(&mut slot),
            }
        }
        *slot = Some(WriterSlot {
            context,
            thread: me,
        });
        Ok(())
    }

    fn release_writer(&self, context: u64) {
        let mut slot = self.shared.writer.lock();
        if slot.map(|holder| holder.context) == Some(context) {
            *slot = None;
            self.shared.writer_released.notify_all();
        }
    }

    fn commit(&self, working: Snapshot, skip: HashSet<Uuid>) -> Result<Arc<Snapshot>> {
        if self.is_closed() {
            return Err(LiveDbError::Invalidated("database is closed".into()));
        }
        let snapshot = {
            let mut current = self.shared.current.write();
            let snapshot = Arc::new(working.into_committed(current.version() + 1));
            *current = snapshot.clone();
            snapshot
        };
        log::debug!(
            "Committed version {} of {}",
            snapshot.version(),
            self.path().display()
        );
        self.shared.feed.publish(CommitRecord {
            version: snapshot.version(),
            snapshot: snapshot.clone(),
            skip: Arc::new(skip),
        });
        Ok(snapshot)
    }
}

struct ContextState {
    pinned: Arc<Snapshot>,
    write: Option<Arc<Snapshot>>,
    invalidated: bool,
    backlog: Vec<CommitRecord>,
}

pub(crate) struct StoreInner {
    id: u64,
    owner: ThreadId,
    database: Database,
    state: Mutex<ContextState>,
    feed: Mutex<Option<mpsc::Receiver<CommitRecord>>>,
    notifier: Mutex<NotificationEngine>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if self.state.get_mut().write.take().is_some() {
            self.database.release_writer(self.id);
        }
        self.database.shared.feed.unsubscribe(self.id);
    }
}

/// A context: one thread's view of a database.
///
/// Everything obtained from a store (collections, objects, tokens) is
/// confined to the thread that opened it and reads from the snapshot the
/// store has pinned. Clones share the same context.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("context", &self.inner.id)
            .finish()
    }
}

impl Store {
    /// Open the database in a data directory containing `schema.yaml`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(StoreConfig::from_dir(dir.as_ref())?)
    }

    pub fn open_with(config: StoreConfig) -> Result<Self> {
        Database::open(config)?.open_store()
    }

    /// A private in-memory database with the given schema.
    pub fn in_memory(schema_yaml: &str) -> Result<Self> {
        Self::open_with(StoreConfig::in_memory_yaml(schema_yaml)?)
    }

    pub fn path(&self) -> &Path {
        self.inner.database.path()
    }

    pub fn database(&self) -> &Database {
        &self.inner.database
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.inner.database.schema()
    }

    pub(crate) fn max_nesting(&self) -> usize {
        self.inner.database.config().max_nesting
    }

    pub(crate) fn same_context(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn same_database(&self, other: &Store) -> bool {
        self.inner.database.id() == other.inner.database.id()
    }

    pub(crate) fn check_thread(&self) -> Result<()> {
        if thread::current().id() != self.inner.owner {
            return Err(LiveDbError::WrongContext(format!(
                "store context {} belongs to another thread",
                self.inner.id
            )));
        }
        Ok(())
    }

    /// Fail unless called on the owning thread of a live context.
    pub(crate) fn check(&self) -> Result<()> {
        self.check_thread()?;
        if self.is_invalidated() {
            return Err(LiveDbError::Invalidated("store has been invalidated".into()));
        }
        Ok(())
    }

    /// True once `invalidate` was called or the database was closed.
    pub fn is_invalidated(&self) -> bool {
        self.inner.state.lock().invalidated || self.inner.database.is_closed()
    }

    /// The snapshot reads resolve against: the write copy inside a write,
    /// the pinned version otherwise.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.check()?;
        Ok(self.current_view())
    }

    /// Same as `snapshot` without the context checks.
    pub(crate) fn current_view(&self) -> Arc<Snapshot> {
        let state = self.inner.state.lock();
        state.write.clone().unwrap_or_else(|| state.pinned.clone())
    }

    /// Version of the pinned snapshot.
    pub fn version(&self) -> Result<u64> {
        self.check()?;
        Ok(self.inner.state.lock().pinned.version())
    }

    pub fn is_in_write(&self) -> bool {
        self.inner.state.lock().write.is_some()
    }

    pub(crate) fn require_write(&self, operation: &str) -> Result<()> {
        self.check()?;
        if !self.is_in_write() {
            return Err(LiveDbError::WriteRequired(format!(
                "{operation} must be called inside a write transaction"
            )));
        }
        Ok(())
    }

    /// Apply a change to the write copy.
    pub(crate) fn mutate<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Snapshot) -> Result<R>,
    ) -> Result<R> {
        self.require_write(operation)?;
        let mut state = self.inner.state.lock();
        match state.write.as_mut() {
            Some(working) => f(Arc::make_mut(working)),
            None => Err(LiveDbError::WriteRequired(format!(
                "{operation} must be called inside a write transaction"
            ))),
        }
    }

    /// Start a write transaction, waiting for any other writer to finish.
    /// The store advances to the latest version first.
    pub fn begin_write(&self) -> Result<()> {
        self.check()?;
        if self.is_in_write() {
            return Err(LiveDbError::Capability(
                "a write transaction is already in progress".into(),
            ));
        }
        self.inner.database.acquire_writer(self.inner.id)?;
        self.compact_feed();

        let latest = self.inner.database.latest();
        let mut state = self.inner.state.lock();
        state.write = Some(Arc::new(latest.working_copy()));
        state.pinned = latest;
        log::debug!(
            "Context {} began a write at version {}",
            self.inner.id,
            state.pinned.version()
        );
        Ok(())
    }

    pub fn commit_write(&self) -> Result<()> {
        self.commit_skipping(HashSet::new())
    }

    /// Commit without sending an update to the given tokens for this commit.
    pub fn commit_write_without_notifying(&self, tokens: &[&NotificationToken]) -> Result<()> {
        let mut skip = HashSet::new();
        for token in tokens {
            if !token.store().same_context(self) {
                return Err(LiveDbError::WrongContext(
                    "token was registered on a different store context".into(),
                ));
            }
            skip.insert(token.id());
        }
        self.commit_skipping(skip)
    }

    fn commit_skipping(&self, skip: HashSet<Uuid>) -> Result<()> {
        self.check_thread()?;
        let working = self.inner.state.lock().write.take().ok_or_else(|| {
            LiveDbError::WriteRequired("no write transaction in progress".into())
        })?;
        let working = Arc::try_unwrap(working).unwrap_or_else(|shared| (*shared).clone());
        let committed = self.inner.database.commit(working, skip);
        self.inner.database.release_writer(self.inner.id);
        let committed = committed?;
        self.inner.state.lock().pinned = committed;
        Ok(())
    }

    /// Discard the write copy. Objects created in it become invalidated.
    pub fn cancel_write(&self) -> Result<()> {
        self.check_thread()?;
        if self.inner.state.lock().write.take().is_none() {
            return Err(LiveDbError::WriteRequired(
                "no write transaction in progress".into(),
            ));
        }
        self.inner.database.release_writer(self.inner.id);
        log::debug!("Context {} cancelled its write", self.inner.id);
        Ok(())
    }

    /// Run `f` in a write transaction: commit on `Ok`, cancel on `Err`.
    pub fn write<T>(&self, f: impl FnOnce(&Store) -> Result<T>) -> Result<T> {
        self.begin_write()?;
        match f(self) {
            Ok(value) => {
                self.commit_write()?;
                Ok(value)
            }
            Err(e) => {
                if self.is_in_write() {
                    self.cancel_write()?;
                }
                Err(e)
            }
        }
    }

    /// Create an object. Unset properties take their schema defaults.
    pub fn create(&self, class: &str, values: &[(&str, Value)]) -> Result<Object> {
        let object_schema = self.schema().class(class)?.clone();
        let key = self.mutate("create", |working| {
            let row = validation::build_row(working, &object_schema, values)?;
            working.insert(class, row)
        })?;
        Ok(Object::new(self.clone(), object_schema.name_arc(), key))
    }

    pub fn delete(&self, object: &Object) -> Result<()> {
        self.check_owned(object)?;
        self.mutate("delete", |working| {
            if !working.contains(object.class_name(), object.key()) {
                return Err(LiveDbError::Invalidated(
                    "object has been deleted or invalidated".into(),
                ));
            }
            working.delete(object.class_name(), object.key())
        })
    }

    /// Delete every object a collection currently contains.
    pub fn delete_all(&self, collection: &Collection) -> Result<()> {
        self.require_write("delete_all")?;
        let objects: Vec<Object> = collection.iter()?.collect();
        self.mutate("delete_all", |working| {
            for object in &objects {
                if working.contains(object.class_name(), object.key()) {
                    working.delete(object.class_name(), object.key())?;
                }
            }
            Ok(())
        })
    }

    /// Every object of a class, in insertion order.
    pub fn objects(&self, class: &str) -> Result<Collection> {
        self.check()?;
        let object_schema = self.schema().class(class)?;
        Ok(Collection::table(self.clone(), object_schema.name_arc()))
    }

    pub fn object(&self, class: &str, key: ObjectKey) -> Result<Object> {
        self.check()?;
        let object_schema = self.schema().class(class)?;
        if !self.current_view().contains(class, key) {
            return Err(LiveDbError::NotFound {
                class: class.to_string(),
                key: key.0,
            });
        }
        Ok(Object::new(self.clone(), object_schema.name_arc(), key))
    }

    fn check_owned(&self, object: &Object) -> Result<()> {
        if !object.store().same_database(self) {
            return Err(LiveDbError::WrongContext(
                "object belongs to a different database".into(),
            ));
        }
        Ok(())
    }

    /// Advance the pinned snapshot to the latest version.
    /// Returns whether it moved. Does nothing inside a write.
    pub fn refresh(&self) -> Result<bool> {
        self.check()?;
        self.compact_feed();
        let latest = self.inner.database.latest();
        let mut state = self.inner.state.lock();
        if state.write.is_some() || latest.version() <= state.pinned.version() {
            return Ok(false);
        }
        state.pinned = latest;
        Ok(true)
    }

    pub(crate) fn refresh_to(&self, version: u64) -> Result<()> {
        let pinned = self.inner.state.lock().pinned.version();
        if pinned < version && !self.refresh()? {
            return Err(LiveDbError::Invalidated(format!(
                "version {version} is not available to this context"
            )));
        }
        Ok(())
    }

    /// Permanently invalidate this context. Outstanding tokens receive a
    /// terminal error and every later read fails.
    pub fn invalidate(&self) -> Result<()> {
        self.check_thread()?;
        {
            let mut state = self.inner.state.lock();
            if state.invalidated {
                return Ok(());
            }
            state.invalidated = true;
            if state.write.take().is_some() {
                self.inner.database.release_writer(self.inner.id);
            }
            state.backlog.clear();
        }
        self.inner.feed.lock().take();
        self.inner.database.shared.feed.unsubscribe(self.inner.id);
        self.fail_subscriptions("store was invalidated");
        log::info!("Invalidated context {} on {}", self.inner.id, self.path().display());
        Ok(())
    }

    fn fail_subscriptions(&self, reason: &str) -> usize {
        let failed = {
            let mut engine = self.inner.notifier.lock();
            engine.fail_all(|| LiveDbError::Invalidated(reason.to_string()))
        };
        drop(failed.1);
        failed.0
    }

    fn drain_feed(&self) -> Vec<CommitRecord> {
        let mut records = std::mem::take(&mut self.inner.state.lock().backlog);
        if let Some(rx) = self.inner.feed.lock().as_ref() {
            records.extend(rx.try_iter());
        }
        records
    }

    /// Move queued commits into the backlog, keeping only those an active
    /// subscription has not seen yet.
    fn compact_feed(&self) {
        let needed_after = self.inner.notifier.lock().oldest_baseline();
        let mut records = self.drain_feed();
        match needed_after {
            Some(version) => records.retain(|r| r.version > version),
            None => records.clear(),
        }
        self.inner.state.lock().backlog = records;
    }

    /// Commits queued for this context, received or not.
    #[cfg(test)]
    pub(crate) fn retained_commits(&self) -> usize {
        let records = self.drain_feed();
        let count = records.len();
        self.inner.state.lock().backlog = records;
        count
    }

    /// The context's scheduling turn: deliver pending initial notifications
    /// and updates for every commit since the last turn.
    /// Returns the number of notifications sent.
    pub fn process_notifications(&self) -> Result<usize> {
        self.check_thread()?;
        if self.is_invalidated() {
            return Ok(self.fail_subscriptions("store was invalidated"));
        }
        if self.is_in_write() {
            return Ok(0);
        }

        let records = self.drain_feed();
        let current = {
            let mut state = self.inner.state.lock();
            if let Some(last) = records.last() {
                if last.version > state.pinned.version() {
                    state.pinned = last.snapshot.clone();
                }
            }
            state.pinned.clone()
        };

        let (delivered, removed) = {
            let mut engine = self.inner.notifier.lock();
            engine.deliver(self, &current, &records)
        };
        drop(removed);
        if delivered > 0 {
            log::debug!(
                "Context {} delivered {delivered} notification(s) at version {}",
                self.inner.id,
                current.version()
            );
        }
        Ok(delivered)
    }

    /// Block until the next commit arrives (or `timeout` passes), then run
    /// a scheduling turn.
    pub fn wait_for_commit(&self, timeout: Duration) -> Result<usize> {
        self.check_thread()?;
        if !self.is_invalidated() && !self.is_in_write() {
            let received = match self.inner.feed.lock().as_ref() {
                Some(rx) => rx.recv_timeout(timeout).ok(),
                None => None,
            };
            if let Some(record) = received {
                self.inner.state.lock().backlog.push(record);
            }
        }
        self.process_notifications()
    }

    pub(crate) fn subscribe(&self, core: Arc<CollectionCore>) -> Result<NotificationToken> {
        self.check()?;
        if self.is_in_write() {
            return Err(LiveDbError::Capability(
                "cannot register a notification inside a write transaction".into(),
            ));
        }
        let (id, state, receiver) = self.inner.notifier.lock().register(core);
        log::debug!("Context {} registered token {id}", self.inner.id);
        Ok(NotificationToken::new(id, self.clone(), state, receiver))
    }

    pub(crate) fn unsubscribe(&self, id: Uuid) {
        let removed = self.inner.notifier.lock().remove(id);
        drop(removed);
    }
}
