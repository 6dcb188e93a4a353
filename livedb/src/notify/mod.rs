mod diff;

pub use diff::ChangeSet;

use crate::collection::{Collection, CollectionCore};
use crate::error::{LiveDbError, Result};
use crate::feed::CommitRecord;
use crate::snapshot::Snapshot;
use crate::store::Store;
use crate::value::ObjectKey;
use parking_lot::Mutex;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered, initial notification not delivered yet.
    Pending,
    Active,
    /// Stopped by the caller. Terminal.
    Stopped,
    /// The store became unusable. Terminal.
    Errored,
}

impl SubscriptionState {
    fn is_live(self) -> bool {
        matches!(self, SubscriptionState::Pending | SubscriptionState::Active)
    }
}

/// A message delivered to a token.
#[derive(Debug)]
pub enum CollectionChange {
    /// The collection as of registration.
    Initial(Collection),
    /// The collection after one or more commits changed it.
    Update {
        collection: Collection,
        changes: ChangeSet,
    },
    /// Terminal failure; nothing follows.
    Error(Arc<LiveDbError>),
}

pub(crate) struct Subscription {
    id: Uuid,
    core: Arc<CollectionCore>,
    sender: mpsc::Sender<CollectionChange>,
    state: Arc<Mutex<SubscriptionState>>,
    baseline: Option<Arc<Snapshot>>,
}

impl Subscription {
    fn send(&self, change: CollectionChange) -> bool {
        if self.sender.send(change).is_err() {
            log::warn!("Token {} is gone, stopping its subscription", self.id);
            *self.state.lock() = SubscriptionState::Stopped;
            return false;
        }
        true
    }

    fn fail(&mut self, error: LiveDbError) {
        log::debug!("Token {} failed: {error}", self.id);
        *self.state.lock() = SubscriptionState::Errored;
        let _ = self.sender.send(CollectionChange::Error(Arc::new(error)));
    }

    /// Key sequence at `snapshot` for an active subscription. A list whose
    /// owner was deleted after registration is empty.
    fn keys_at(&self, snapshot: &Snapshot) -> Result<Vec<ObjectKey>> {
        match self.core.keys_in(snapshot) {
            Err(LiveDbError::Invalidated(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    fn changes_between(&self, old: &Snapshot, new: &Snapshot) -> Result<ChangeSet> {
        let before = self.keys_at(old)?;
        let after = self.keys_at(new)?;
        let class = self.core.class();
        let unchanged_table = match (old.table_arc(class), new.table_arc(class)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        Ok(diff::diff(&before, &after, |key| {
            if unchanged_table {
                return false;
            }
            match (old.row(class, key), new.row(class, key)) {
                (Ok(a), Ok(b)) => a
                    .iter()
                    .zip(b)
                    .any(|(x, y)| x.compare(y) != std::cmp::Ordering::Equal),
                _ => false,
            }
        }))
    }

    /// Walk the commits after the baseline. Consecutive commits are folded
    /// into one update; an excluded commit closes the run and moves the
    /// baseline past itself silently.
    fn advance(&mut self, store: &Store, records: &[CommitRecord]) -> usize {
        let mut baseline = match self.baseline.clone() {
            Some(b) => b,
            None => return 0,
        };
        let start = baseline.version();
        let mut delivered = 0;
        let mut run_end: Option<Arc<Snapshot>> = None;

        for record in records.iter().filter(|r| r.version > start) {
            if record.skip.contains(&self.id) {
                if let Some(end) = run_end.take() {
                    match self.emit(store, &baseline, &end) {
                        Ok(sent) => delivered += sent,
                        Err(()) => return delivered,
                    }
                }
                baseline = record.snapshot.clone();
            } else {
                run_end = Some(record.snapshot.clone());
            }
        }
        if let Some(end) = run_end {
            match self.emit(store, &baseline, &end) {
                Ok(sent) => delivered += sent,
                Err(()) => return delivered,
            }
            baseline = end;
        }
        self.baseline = Some(baseline);
        delivered
    }

    fn emit(&mut self, store: &Store, old: &Snapshot, new: &Snapshot) -> std::result::Result<usize, ()> {
        match self.changes_between(old, new) {
            Ok(changes) if changes.is_empty() => Ok(0),
            Ok(changes) => {
                let collection = Collection::from_core(store.clone(), self.core.clone());
                if self.send(CollectionChange::Update {
                    collection,
                    changes,
                }) {
                    Ok(1)
                } else {
                    Err(())
                }
            }
            Err(e) => {
                self.fail(e);
                Err(())
            }
        }
    }
}

/// Per-context registry of subscriptions, in registration order.
#[derive(Default)]
pub(crate) struct NotificationEngine {
    subscriptions: Vec<Subscription>,
}

impl NotificationEngine {
    pub(crate) fn register(
        &mut self,
        core: Arc<CollectionCore>,
    ) -> (
        Uuid,
        Arc<Mutex<SubscriptionState>>,
        mpsc::Receiver<CollectionChange>,
    ) {
        let (sender, receiver) = mpsc::channel();
        let state = Arc::new(Mutex::new(SubscriptionState::Pending));
        let id = Uuid::new_v4();
        self.subscriptions.push(Subscription {
            id,
            core,
            sender,
            state: state.clone(),
            baseline: None,
        });
        (id, state, receiver)
    }

    /// Lowest baseline among active subscriptions. Commits at or below it
    /// are no longer needed by any subscription of this context.
    pub(crate) fn oldest_baseline(&self) -> Option<u64> {
        self.subscriptions
            .iter()
            .filter(|s| s.state.lock().is_live())
            .filter_map(|s| s.baseline.as_ref().map(|b| b.version()))
            .min()
    }

    pub(crate) fn remove(&mut self, id: Uuid) -> Option<Subscription> {
        let index = self.subscriptions.iter().position(|s| s.id == id)?;
        Some(self.subscriptions.remove(index))
    }

    /// Deliver initial notifications at `current` and updates for `records`.
    /// Returns the number of messages sent and the subscriptions that ended,
    /// which the caller drops outside the engine lock.
    pub(crate) fn deliver(
        &mut self,
        store: &Store,
        current: &Arc<Snapshot>,
        records: &[CommitRecord],
    ) -> (usize, Vec<Subscription>) {
        let mut delivered = 0;
        for sub in &mut self.subscriptions {
            let state = *sub.state.lock();
            match state {
                SubscriptionState::Pending => match sub.core.keys_in(current) {
                    Ok(_) => {
                        *sub.state.lock() = SubscriptionState::Active;
                        sub.baseline = Some(current.clone());
                        let collection = Collection::from_core(store.clone(), sub.core.clone());
                        if sub.send(CollectionChange::Initial(collection)) {
                            delivered += 1;
                        }
                    }
                    Err(e) => sub.fail(e),
                },
                SubscriptionState::Active => delivered += sub.advance(store, records),
                SubscriptionState::Stopped | SubscriptionState::Errored => {}
            }
        }
        (delivered, self.prune())
    }

    /// Move every live subscription to `Errored` with a terminal message.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> LiveDbError) -> (usize, Vec<Subscription>) {
        let mut failed = 0;
        for sub in &mut self.subscriptions {
            if sub.state.lock().is_live() {
                sub.fail(error());
                failed += 1;
            }
        }
        (failed, self.prune())
    }

    fn prune(&mut self) -> Vec<Subscription> {
        let (live, ended): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subscriptions)
            .into_iter()
            .partition(|s| s.state.lock().is_live());
        self.subscriptions = live;
        ended
    }
}

/// Handle for one subscription. Dropping it stops the subscription.
///
/// Messages arrive on the token's channel during the owning store's
/// `process_notifications` turns.
pub struct NotificationToken {
    id: Uuid,
    store: Store,
    state: Arc<Mutex<SubscriptionState>>,
    receiver: mpsc::Receiver<CollectionChange>,
}

impl std::fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationToken")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl NotificationToken {
    pub(crate) fn new(
        id: Uuid,
        store: Store,
        state: Arc<Mutex<SubscriptionState>>,
        receiver: mpsc::Receiver<CollectionChange>,
    ) -> Self {
        NotificationToken {
            id,
            store,
            state,
            receiver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> Result<SubscriptionState> {
        self.store.check_thread()?;
        Ok(*self.state.lock())
    }

    /// Stop the subscription. Idempotent; an errored token stays errored.
    pub fn stop(&self) -> Result<()> {
        self.store.check_thread()?;
        {
            let mut state = self.state.lock();
            if *state != SubscriptionState::Errored {
                *state = SubscriptionState::Stopped;
            }
        }
        self.store.unsubscribe(self.id);
        Ok(())
    }

    /// Next message already delivered to this token, if any.
    pub fn try_recv(&self) -> Result<Option<CollectionChange>> {
        self.store.check_thread()?;
        Ok(self.receiver.try_recv().ok())
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<CollectionChange>> {
        self.store.check_thread()?;
        Ok(self.receiver.recv_timeout(timeout).ok())
    }

    /// Every message delivered so far.
    pub fn drain(&self) -> Result<Vec<CollectionChange>> {
        self.store.check_thread()?;
        Ok(self.receiver.try_iter().collect())
    }
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            if state.is_live() {
                *state = SubscriptionState::Stopped;
            }
        }
        self.store.unsubscribe(self.id);
    }
}
