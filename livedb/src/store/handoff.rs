use super::Store;
use crate::collection::{Collection, CollectionCore};
use crate::error::{LiveDbError, Result};
use crate::object::Object;
use crate::value::ObjectKey;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub(crate) enum HandOffTarget {
    Collection(Arc<CollectionCore>),
    Object { class: Arc<str>, key: ObjectKey },
}

/// A thread-safe reference to a collection or object, produced on one
/// context and resolved on another.
#[derive(Clone)]
pub struct HandOff {
    database: Uuid,
    version: u64,
    target: HandOffTarget,
}

impl std::fmt::Debug for HandOff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match &self.target {
            HandOffTarget::Collection(core) => format!("collection of {}", core.class()),
            HandOffTarget::Object { class, key } => format!("{class} #{key}"),
        };
        f.debug_struct("HandOff")
            .field("database", &self.database)
            .field("version", &self.version)
            .field("target", &target)
            .finish()
    }
}

impl HandOff {
    pub(crate) fn new(store: &Store, target: HandOffTarget) -> Result<Self> {
        store.check()?;
        if store.is_in_write() {
            return Err(LiveDbError::Capability(
                "cannot hand off from inside a write transaction".into(),
            ));
        }
        Ok(HandOff {
            database: store.database().id(),
            version: store.version()?,
            target,
        })
    }

    /// The version the source context was reading when the hand-off was made.
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl Store {
    fn accept(&self, handoff: &HandOff) -> Result<()> {
        self.check()?;
        if handoff.database != self.database().id() {
            return Err(LiveDbError::WrongContext(
                "hand-off belongs to a different database".into(),
            ));
        }
        self.refresh_to(handoff.version)
    }

    /// Resolve a handed-off collection on this context, advancing to the
    /// source's version if this context is behind it.
    pub fn resolve_collection(&self, handoff: &HandOff) -> Result<Collection> {
        self.accept(handoff)?;
        match &handoff.target {
            HandOffTarget::Collection(core) => {
                Ok(Collection::from_core(self.clone(), Arc::new(core.rebind())))
            }
            HandOffTarget::Object { .. } => Err(LiveDbError::Capability(
                "hand-off refers to an object, not a collection".into(),
            )),
        }
    }

    pub fn resolve_object(&self, handoff: &HandOff) -> Result<Object> {
        self.accept(handoff)?;
        match &handoff.target {
            HandOffTarget::Object { class, key } => self.object(class, *key),
            HandOffTarget::Collection(_) => Err(LiveDbError::Capability(
                "hand-off refers to a collection, not an object".into(),
            )),
        }
    }
}
