pub mod schema;
pub mod value;
pub mod snapshot;
pub mod query;
pub mod validation;
pub mod config;
pub mod feed;
pub mod store;
pub mod collection;
pub mod object;
pub mod notify;
pub mod seed;
pub mod error;

pub use collection::{
    Capabilities, Collection, CollectionIter, CollectionKind, KeyPathValue, LinkingObjects, List,
    Results,
};
pub use config::StoreConfig;
pub use error::{LiveDbError, Result};
pub use notify::{ChangeSet, CollectionChange, NotificationToken, SubscriptionState};
pub use object::Object;
pub use query::{CompareOp, Predicate, SortDescriptor};
pub use schema::{Schema, SchemaDefinition};
pub use snapshot::Snapshot;
pub use store::{Database, HandOff, Store};
pub use value::{ObjectKey, Value};
