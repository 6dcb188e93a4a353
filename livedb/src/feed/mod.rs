use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{mpsc, Arc};
use uuid::Uuid;

/// A committed version, as delivered to every open context.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub version: u64,
    pub snapshot: Arc<Snapshot>,
    /// Tokens that must not be notified about this commit.
    pub skip: Arc<HashSet<Uuid>>,
}

/// Fan-out of commits to the contexts of one database.
/// Each context owns the receiving end of its own channel.
#[derive(Default)]
pub(crate) struct CommitFeed {
    subscribers: Mutex<Vec<(u64, mpsc::Sender<CommitRecord>)>>,
}

impl CommitFeed {
    pub(crate) fn subscribe(&self, context: u64) -> mpsc::Receiver<CommitRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push((context, tx));
        rx
    }

    pub(crate) fn unsubscribe(&self, context: u64) {
        self.subscribers.lock().retain(|(id, _)| *id != context);
    }

    pub(crate) fn publish(&self, record: CommitRecord) {
        self.subscribers
            .lock()
            .retain(|(id, tx)| match tx.send(record.clone()) {
                Ok(()) => true,
                Err(_) => {
                    log::warn!("Context {id} stopped listening for commits, dropping its feed");
                    false
                }
            });
    }

    /// Disconnect every context.
    pub(crate) fn close(&self) {
        self.subscribers.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema_str, Schema};

    fn record(version: u64) -> CommitRecord {
        let schema = Schema::from_definition(&parse_schema_str("classes: {}").unwrap()).unwrap();
        CommitRecord {
            version,
            snapshot: Arc::new(Snapshot::empty(Arc::new(schema))),
            skip: Arc::new(HashSet::new()),
        }
    }

    #[test]
    fn test_publish_reaches_every_context_in_order() {
        let feed = CommitFeed::default();
        let a = feed.subscribe(1);
        let b = feed.subscribe(2);
        feed.publish(record(1));
        feed.publish(record(2));
        let seen: Vec<u64> = a.try_iter().map(|r| r.version).collect();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(b.try_iter().count(), 2);
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let feed = CommitFeed::default();
        let a = feed.subscribe(1);
        drop(feed.subscribe(2));
        feed.publish(record(1));
        assert_eq!(feed.len(), 1);
        feed.close();
        assert!(matches!(a.try_recv(), Ok(_)));
        assert!(matches!(a.try_recv(), Err(mpsc::TryRecvError::Disconnected)));
    }
}
