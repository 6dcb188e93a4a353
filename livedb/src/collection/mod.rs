//! Live collections: query results, lists and linking objects behind one
//! read contract.

mod aggregate;
mod description;
#[cfg(test)]
mod tests;

pub(crate) use description::describe_object;

use crate::error::{LiveDbError, Result};
use crate::notify::NotificationToken;
use crate::object::Object;
use crate::query::{self, Predicate, SortDescriptor};
use crate::schema::{ObjectSchema, PropertyType, Schema};
use crate::snapshot::Snapshot;
use crate::store::handoff::HandOffTarget;
use crate::store::{HandOff, Store};
use crate::validation;
use crate::value::{ObjectKey, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Query results: a filtered and/or sorted view of a table or collection.
pub type Results = Collection;
/// An ordered to-many relationship, or a detached in-memory list.
pub type List = Collection;
/// The computed reverse side of a link or list property.
pub type LinkingObjects = Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Results,
    List,
    LinkingObjects,
}

impl CollectionKind {
    pub fn type_name(self) -> &'static str {
        match self {
            CollectionKind::Results => "Results",
            CollectionKind::List => "List",
            CollectionKind::LinkingObjects => "LinkingObjects",
        }
    }
}

/// What a collection supports. Unsupported operations fail with
/// `LiveDbError::Capability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub filterable: bool,
    pub sortable: bool,
    pub aggregatable: bool,
    pub mutable: bool,
    pub observable: bool,
    pub persisted_order: bool,
}

#[derive(Clone)]
pub(crate) enum Source {
    Table,
    List {
        parent_class: Arc<str>,
        parent: ObjectKey,
        property: usize,
    },
    LinkingObjects {
        target_class: Arc<str>,
        target: ObjectKey,
        origin_property: Arc<str>,
    },
    Query {
        base: Arc<CollectionCore>,
        predicate: Option<Predicate>,
        sort: Vec<SortDescriptor>,
    },
    Unmanaged {
        items: Arc<Mutex<Vec<Object>>>,
        /// Schema known without an element, if any.
        schema: Option<Arc<Schema>>,
    },
}

/// The store-independent part of a collection: what it is and how to
/// resolve its key sequence against any snapshot.
pub(crate) struct CollectionCore {
    kind: CollectionKind,
    class: Arc<str>,
    source: Source,
    cache: Mutex<Option<(u64, Arc<Vec<ObjectKey>>)>>,
}

impl CollectionCore {
    fn new(kind: CollectionKind, class: Arc<str>, source: Source) -> Self {
        CollectionCore {
            kind,
            class,
            source,
            cache: Mutex::new(None),
        }
    }

    pub(crate) fn class(&self) -> &Arc<str> {
        &self.class
    }

    /// Same collection with an empty cache, for use on another context.
    pub(crate) fn rebind(&self) -> CollectionCore {
        CollectionCore::new(self.kind, self.class.clone(), self.source.clone())
    }

    /// Resolve the key sequence against `snapshot`.
    pub(crate) fn keys_in(&self, snapshot: &Snapshot) -> Result<Vec<ObjectKey>> {
        match &self.source {
            Source::Table => snapshot.keys(&self.class),
            Source::List {
                parent_class,
                parent,
                property,
            } => {
                let row = snapshot.table(parent_class)?.row(*parent).ok_or_else(|| {
                    LiveDbError::Invalidated("the object owning this list has been deleted".into())
                })?;
                Ok(row[*property].as_list().map(<[_]>::to_vec).unwrap_or_default())
            }
            Source::LinkingObjects {
                target_class,
                target,
                origin_property,
            } => {
                if !snapshot.contains(target_class, *target) {
                    return Err(LiveDbError::Invalidated(
                        "the object these links point to has been deleted".into(),
                    ));
                }
                snapshot.reverse_links(&self.class, origin_property, *target)
            }
            Source::Query {
                base,
                predicate,
                sort,
            } => {
                let keys = base.cached_keys(snapshot)?;
                query::apply(snapshot, &self.class, keys.to_vec(), predicate.as_ref(), sort)
            }
            Source::Unmanaged { .. } => Err(LiveDbError::Capability(
                "an unmanaged list has no key sequence".into(),
            )),
        }
    }

    /// Key sequence cached per snapshot stamp.
    pub(crate) fn cached_keys(&self, snapshot: &Snapshot) -> Result<Arc<Vec<ObjectKey>>> {
        let mut cache = self.cache.lock();
        if let Some((stamp, keys)) = cache.as_ref() {
            if *stamp == snapshot.stamp() {
                return Ok(keys.clone());
            }
        }
        let keys = Arc::new(self.keys_in(snapshot)?);
        log::debug!(
            "Resolved {}<{}> at version {}: {} keys",
            self.kind.type_name(),
            self.class,
            snapshot.version(),
            keys.len()
        );
        *cache = Some((snapshot.stamp(), keys.clone()));
        Ok(keys)
    }
}

/// The result of `value_for_key` and `value_for_key_path`.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPathValue {
    Count(usize),
    Aggregate(Option<Value>),
    Values(Vec<Value>),
    Objects(Vec<Object>),
}

impl KeyPathValue {
    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            KeyPathValue::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn into_objects(self) -> Option<Vec<Object>> {
        match self {
            KeyPathValue::Objects(objects) => Some(objects),
            _ => None,
        }
    }
}

/// Elements resolved for one operation.
enum Elements<'a> {
    Managed {
        store: &'a Store,
        snapshot: Arc<Snapshot>,
        keys: Arc<Vec<ObjectKey>>,
    },
    Unmanaged(Vec<Object>),
}

impl Elements<'_> {
    fn len(&self) -> usize {
        match self {
            Elements::Managed { keys, .. } => keys.len(),
            Elements::Unmanaged(items) => items.len(),
        }
    }

    fn object(&self, class: &Arc<str>, index: usize) -> Object {
        match self {
            Elements::Managed { store, keys, .. } => {
                Object::new((*store).clone(), class.clone(), keys[index])
            }
            Elements::Unmanaged(items) => items[index].clone(),
        }
    }

    fn into_objects(self, class: &Arc<str>) -> Vec<Object> {
        match self {
            Elements::Managed { store, keys, .. } => keys
                .iter()
                .map(|k| Object::new(store.clone(), class.clone(), *k))
                .collect(),
            Elements::Unmanaged(items) => items,
        }
    }
}

/// A live, thread-confined collection of objects of one class.
///
/// Managed collections read from their store's current snapshot and
/// re-resolve whenever that snapshot changes. An unmanaged list is a plain
/// in-memory container with a reduced set of capabilities.
#[derive(Clone)]
pub struct Collection {
    store: Option<Store>,
    core: Arc<CollectionCore>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("kind", &self.core.kind)
            .field("class", &self.core.class)
            .field("managed", &self.store.is_some())
            .finish()
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.description() {
            Ok(text) => f.write_str(&text),
            Err(e) => write!(f, "{}<{}> <{e}>", self.core.kind.type_name(), self.core.class),
        }
    }
}

impl Collection {
    pub(crate) fn from_core(store: Store, core: Arc<CollectionCore>) -> Self {
        Collection {
            store: Some(store),
            core,
        }
    }

    pub(crate) fn table(store: Store, class: Arc<str>) -> Self {
        Self::from_core(
            store,
            Arc::new(CollectionCore::new(CollectionKind::Results, class, Source::Table)),
        )
    }

    pub(crate) fn list(
        store: Store,
        parent_class: Arc<str>,
        parent: ObjectKey,
        property: usize,
        target: Arc<str>,
    ) -> Self {
        Self::from_core(
            store,
            Arc::new(CollectionCore::new(
                CollectionKind::List,
                target,
                Source::List {
                    parent_class,
                    parent,
                    property,
                },
            )),
        )
    }

    pub(crate) fn linking_objects(
        store: Store,
        target_class: Arc<str>,
        target: ObjectKey,
        origin_class: Arc<str>,
        origin_property: Arc<str>,
    ) -> Self {
        Self::from_core(
            store,
            Arc::new(CollectionCore::new(
                CollectionKind::LinkingObjects,
                origin_class,
                Source::LinkingObjects {
                    target_class,
                    target,
                    origin_property,
                },
            )),
        )
    }

    /// A detached list of `class` objects, not attached to any store.
    ///
    /// Until it holds an element it has no schema, so property names passed
    /// to `index_matching` or `value_for_key` are not checked while empty.
    pub fn unmanaged(class: &str) -> Self {
        Self::detached(class, None)
    }

    /// A detached list whose property names are checked against `schema`
    /// even while it is empty.
    pub fn unmanaged_in(schema: &Arc<Schema>, class: &str) -> Result<Self> {
        schema.class(class)?;
        Ok(Self::detached(class, Some(schema.clone())))
    }

    fn detached(class: &str, schema: Option<Arc<Schema>>) -> Self {
        Collection {
            store: None,
            core: Arc::new(CollectionCore::new(
                CollectionKind::List,
                Arc::from(class),
                Source::Unmanaged {
                    items: Arc::new(Mutex::new(Vec::new())),
                    schema,
                },
            )),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.core.kind
    }

    /// Class of the elements.
    pub fn class_name(&self) -> &str {
        &self.core.class
    }

    pub fn is_managed(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    pub fn capabilities(&self) -> Capabilities {
        let managed = self.is_managed();
        match self.core.kind {
            CollectionKind::Results | CollectionKind::LinkingObjects => Capabilities {
                filterable: true,
                sortable: true,
                aggregatable: true,
                mutable: false,
                observable: true,
                persisted_order: false,
            },
            CollectionKind::List => Capabilities {
                filterable: managed,
                sortable: managed,
                aggregatable: managed,
                mutable: true,
                observable: managed,
                persisted_order: true,
            },
        }
    }

    fn variant_name(&self) -> String {
        if self.is_managed() {
            self.core.kind.type_name().to_string()
        } else {
            format!("an unmanaged {}", self.core.kind.type_name())
        }
    }

    fn require(&self, allowed: bool, operation: &str) -> Result<()> {
        if !allowed {
            return Err(LiveDbError::Capability(format!(
                "{operation} is not supported on {}",
                self.variant_name()
            )));
        }
        Ok(())
    }

    fn unmanaged_items(&self) -> Option<&Arc<Mutex<Vec<Object>>>> {
        match &self.core.source {
            Source::Unmanaged { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Schema of an unmanaged list: the one it was created with, else the
    /// schema of its first element's store.
    fn detached_schema(&self) -> Option<Arc<Schema>> {
        match &self.core.source {
            Source::Unmanaged { items, schema } => schema.clone().or_else(|| {
                items
                    .lock()
                    .first()
                    .map(|first| first.store().schema().clone())
            }),
            _ => None,
        }
    }

    fn managed_store(&self, operation: &str) -> Result<&Store> {
        let store = self.store.as_ref().ok_or_else(|| {
            LiveDbError::Capability(format!(
                "{operation} is not supported on {}",
                self.variant_name()
            ))
        })?;
        store.check()?;
        Ok(store)
    }

    fn element_schema(&self) -> Result<Option<Arc<ObjectSchema>>> {
        match &self.store {
            Some(store) => Ok(Some(store.schema().class(&self.core.class)?.clone())),
            None => match self.detached_schema() {
                Some(schema) => Ok(Some(schema.class(&self.core.class)?.clone())),
                None => Ok(None),
            },
        }
    }

    fn schema_for(&self, class: &str) -> Result<Arc<ObjectSchema>> {
        let schema = match &self.store {
            Some(store) => store.schema().clone(),
            None => self.detached_schema().ok_or_else(|| {
                LiveDbError::Capability("an empty unmanaged list has no schema".into())
            })?,
        };
        Ok(schema.class(class)?.clone())
    }

    fn elements(&self) -> Result<Elements<'_>> {
        match &self.store {
            Some(store) => {
                store.check()?;
                let snapshot = store.current_view();
                let keys = self.core.cached_keys(&snapshot)?;
                Ok(Elements::Managed {
                    store,
                    snapshot,
                    keys,
                })
            }
            None => Ok(Elements::Unmanaged(
                self.unmanaged_items()
                    .map(|items| items.lock().clone())
                    .unwrap_or_default(),
            )),
        }
    }

    /// Current key sequence.
    pub fn keys(&self) -> Result<Vec<ObjectKey>> {
        Ok(match self.elements()? {
            Elements::Managed { keys, .. } => keys.to_vec(),
            Elements::Unmanaged(items) => items.iter().map(Object::key).collect(),
        })
    }

    /// True once the store is invalidated or the object owning this
    /// list or linking objects has been deleted.
    pub fn is_invalidated(&self) -> bool {
        let store = match &self.store {
            Some(store) => store,
            None => return false,
        };
        if store.is_invalidated() {
            return true;
        }
        let view = store.current_view();
        match &self.core.source {
            Source::List {
                parent_class,
                parent,
                ..
            } => !view.contains(parent_class, *parent),
            Source::LinkingObjects {
                target_class,
                target,
                ..
            } => !view.contains(target_class, *target),
            _ => false,
        }
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.elements()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<Object> {
        let elements = self.elements()?;
        if index >= elements.len() {
            return Err(LiveDbError::OutOfRange {
                index: index as i64,
                count: elements.len(),
            });
        }
        Ok(elements.object(&self.core.class, index))
    }

    /// Like `get`, with a signed index. Negative indices are out of range.
    pub fn at(&self, index: isize) -> Result<Object> {
        if index < 0 {
            return Err(LiveDbError::OutOfRange {
                index: index as i64,
                count: self.count()?,
            });
        }
        self.get(index as usize)
    }

    pub fn first(&self) -> Result<Option<Object>> {
        let elements = self.elements()?;
        Ok((elements.len() > 0).then(|| elements.object(&self.core.class, 0)))
    }

    pub fn last(&self) -> Result<Option<Object>> {
        let elements = self.elements()?;
        let len = elements.len();
        Ok((len > 0).then(|| elements.object(&self.core.class, len - 1)))
    }

    fn check_element(&self, object: &Object) -> Result<()> {
        if object.class_name() != self.class_name() {
            return Err(LiveDbError::Validation(format!(
                "Object of type '{}' does not match {}<{}>",
                object.class_name(),
                self.core.kind.type_name(),
                self.core.class
            )));
        }
        Ok(())
    }

    /// Position of `object`, by identity.
    pub fn index_of(&self, object: &Object) -> Result<Option<usize>> {
        self.check_element(object)?;
        Ok(match self.elements()? {
            Elements::Managed { store, keys, .. } => {
                if !object.store().same_database(store) {
                    return Ok(None);
                }
                keys.iter().position(|k| *k == object.key())
            }
            Elements::Unmanaged(items) => items.iter().position(|o| o == object),
        })
    }

    /// Position of the first element matching `predicate`.
    pub fn index_matching(&self, predicate: &Predicate) -> Result<Option<usize>> {
        let object_schema = match self.element_schema()? {
            Some(schema) => schema,
            None => return Ok(None),
        };
        let matcher = predicate.compile(&object_schema)?;
        match self.elements()? {
            Elements::Managed { snapshot, keys, .. } => {
                let table = snapshot.table(&self.core.class)?;
                Ok(keys.iter().position(|k| {
                    table.row(*k).map(|row| matcher.matches(row)).unwrap_or(false)
                }))
            }
            Elements::Unmanaged(items) => {
                for (i, object) in items.iter().enumerate() {
                    object.store().check()?;
                    let view = object.store().current_view();
                    if let Ok(row) = view.row(object.class_name(), object.key()) {
                        if matcher.matches(row) {
                            return Ok(Some(i));
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    fn derive(&self, store: &Store, predicate: Option<Predicate>, sort: Vec<SortDescriptor>) -> Collection {
        Collection::from_core(
            store.clone(),
            Arc::new(CollectionCore::new(
                CollectionKind::Results,
                self.core.class.clone(),
                Source::Query {
                    base: self.core.clone(),
                    predicate,
                    sort,
                },
            )),
        )
    }

    /// Elements matching `predicate`, in this collection's order.
    pub fn filter(&self, predicate: Predicate) -> Result<Collection> {
        self.require(self.capabilities().filterable, "filter")?;
        let store = self.managed_store("filter")?;
        predicate.compile(store.schema().class(&self.core.class)?)?;
        Ok(self.derive(store, Some(predicate), Vec::new()))
    }

    /// Sorted by each descriptor in turn. An empty list keeps the current order.
    pub fn sorted(&self, descriptors: &[SortDescriptor]) -> Result<Collection> {
        self.require(self.capabilities().sortable, "sort")?;
        let store = self.managed_store("sort")?;
        query::sort_columns(store.schema().class(&self.core.class)?, descriptors)?;
        Ok(self.derive(store, None, descriptors.to_vec()))
    }

    pub fn sorted_by(&self, property: &str, ascending: bool) -> Result<Collection> {
        let descriptor = SortDescriptor {
            property: property.to_string(),
            ascending,
        };
        self.sorted(&[descriptor])
    }

    /// Follow a property path from every element. Path segments before the
    /// last must be links; a null link yields null.
    fn project(&self, path: &str) -> Result<Vec<Value>> {
        let segments: Vec<&str> = path.split('.').collect();
        if let Some(mut class) = self.element_schema()? {
            for (i, segment) in segments.iter().enumerate() {
                let (_, prop) = class.property(segment)?;
                if i + 1 == segments.len() {
                    break;
                }
                if prop.kind != PropertyType::Link {
                    return Err(LiveDbError::invalid_property(
                        class.name(),
                        segment,
                        format!("cannot follow a {} property in a key path", prop.kind.name()),
                    ));
                }
                let target = prop.target.clone().unwrap_or_else(|| Arc::from(""));
                class = self.schema_for(&target)?;
            }
        }

        let objects = self.elements()?.into_objects(&self.core.class);
        let mut values = Vec::with_capacity(objects.len());
        for object in objects {
            let mut current = Some(object);
            let mut value = Value::Null;
            for (i, segment) in segments.iter().enumerate() {
                let object = match current.take() {
                    Some(object) => object,
                    None => {
                        value = Value::Null;
                        break;
                    }
                };
                value = object.get(segment)?;
                if i + 1 < segments.len() {
                    current = object.link(segment)?;
                }
            }
            values.push(value);
        }
        Ok(values)
    }

    /// Project `key` from every element, or the elements themselves for `self`.
    pub fn value_for_key(&self, key: &str) -> Result<KeyPathValue> {
        if key == "self" {
            return Ok(KeyPathValue::Objects(
                self.elements()?.into_objects(&self.core.class),
            ));
        }
        Ok(KeyPathValue::Values(self.project(key)?))
    }

    /// `value_for_key` plus the collection operators `@count`, `@min.p`,
    /// `@max.p`, `@sum.p`, `@avg.p`, `@unionOfObjects.p` and
    /// `@distinctUnionOfObjects.p`.
    pub fn value_for_key_path(&self, path: &str) -> Result<KeyPathValue> {
        if !path.starts_with('@') {
            return self.value_for_key(path);
        }
        if path == "@count" {
            return Ok(KeyPathValue::Count(self.count()?));
        }
        let (operator, property) = path.split_once('.').ok_or_else(|| {
            LiveDbError::invalid_property(&self.core.class, path, "collection operator needs a property")
        })?;
        match operator {
            "@min" => Ok(KeyPathValue::Aggregate(self.min(property)?)),
            "@max" => Ok(KeyPathValue::Aggregate(self.max(property)?)),
            "@sum" => Ok(KeyPathValue::Aggregate(Some(self.sum(property)?))),
            "@avg" => Ok(KeyPathValue::Aggregate(self.average(property)?)),
            "@unionOfObjects" => Ok(KeyPathValue::Values(self.project(property)?)),
            "@distinctUnionOfObjects" => {
                let mut distinct: Vec<Value> = Vec::new();
                for value in self.project(property)? {
                    if !distinct
                        .iter()
                        .any(|v| v.compare(&value) == std::cmp::Ordering::Equal)
                    {
                        distinct.push(value);
                    }
                }
                Ok(KeyPathValue::Values(distinct))
            }
            _ => Err(LiveDbError::invalid_property(
                &self.core.class,
                path,
                "unsupported collection operator",
            )),
        }
    }

    /// Set `key` to `value` on every element.
    pub fn set_value_for_key(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if key == "self" {
            return Err(LiveDbError::invalid_property(
                &self.core.class,
                key,
                "cannot assign to self",
            ));
        }
        match &self.store {
            Some(store) => {
                store.require_write("set_value_for_key")?;
                let object_schema = store.schema().class(&self.core.class)?.clone();
                let (index, prop) = object_schema.property(key)?;
                let keys = self.keys()?;
                let class = self.core.class.clone();
                store.mutate("set_value_for_key", |working| {
                    let value = validation::coerce_value(working, &object_schema, prop, value)?;
                    for k in keys {
                        if working.contains(&class, k) {
                            working.set(&class, k, index, value.clone())?;
                        }
                    }
                    Ok(())
                })
            }
            None => {
                for object in self.elements()?.into_objects(&self.core.class) {
                    object.set(key, value.clone())?;
                }
                Ok(())
            }
        }
    }

    /// Iterate over the elements resolved when iteration begins. Elements
    /// deleted while iterating are skipped.
    pub fn iter(&self) -> Result<CollectionIter> {
        Ok(CollectionIter {
            inner: match self.elements()? {
                Elements::Managed { store, keys, .. } => IterSource::Managed {
                    store: store.clone(),
                    class: self.core.class.clone(),
                    keys,
                    position: 0,
                },
                Elements::Unmanaged(items) => IterSource::Unmanaged(items.into_iter()),
            },
        })
    }

    /// Register for change notifications. The initial notification arrives
    /// on the next `Store::process_notifications` turn.
    pub fn observe(&self) -> Result<NotificationToken> {
        self.require(self.capabilities().observable, "observe")?;
        let store = self.managed_store("observe")?;
        self.elements()?;
        store.subscribe(self.core.clone())
    }

    /// A reference that can be resolved on another context.
    pub fn hand_off(&self) -> Result<HandOff> {
        let store = self.managed_store("hand_off")?;
        HandOff::new(store, HandOffTarget::Collection(self.core.clone()))
    }

    fn require_mutable(&self, operation: &str) -> Result<()> {
        if self.core.kind != CollectionKind::List {
            return Err(LiveDbError::Capability(format!(
                "{operation} is not supported on {}: it is read-only",
                self.core.kind.type_name()
            )));
        }
        Ok(())
    }

    /// Run `f` on the stored key list of a managed list.
    fn edit_list<R>(
        &self,
        store: &Store,
        operation: &str,
        f: impl FnOnce(&mut Vec<ObjectKey>) -> Result<R>,
    ) -> Result<R> {
        let (parent_class, parent, property) = match &self.core.source {
            Source::List {
                parent_class,
                parent,
                property,
            } => (parent_class.clone(), *parent, *property),
            _ => {
                return Err(LiveDbError::Capability(format!(
                    "{operation} is not supported on {}",
                    self.variant_name()
                )))
            }
        };
        store.mutate(operation, |working| {
            if !working.contains(&parent_class, parent) {
                return Err(LiveDbError::Invalidated(
                    "the object owning this list has been deleted".into(),
                ));
            }
            f(working.list_mut(&parent_class, parent, property)?)
        })
    }

    fn managed_key(&self, store: &Store, object: &Object) -> Result<ObjectKey> {
        self.check_element(object)?;
        if !object.store().same_database(store) {
            return Err(LiveDbError::WrongContext(
                "object belongs to a different database".into(),
            ));
        }
        if !store.current_view().contains(object.class_name(), object.key()) {
            return Err(LiveDbError::Invalidated(
                "object has been deleted or invalidated".into(),
            ));
        }
        Ok(object.key())
    }

    pub fn append(&self, object: &Object) -> Result<()> {
        self.require_mutable("append")?;
        match &self.store {
            Some(store) => {
                store.require_write("append")?;
                let key = self.managed_key(store, object)?;
                self.edit_list(store, "append", |list| {
                    list.push(key);
                    Ok(())
                })
            }
            None => {
                self.check_element(object)?;
                if let Some(items) = self.unmanaged_items() {
                    items.lock().push(object.clone());
                }
                Ok(())
            }
        }
    }

    pub fn insert(&self, index: usize, object: &Object) -> Result<()> {
        self.require_mutable("insert")?;
        let out_of_range = |count: usize| LiveDbError::OutOfRange {
            index: index as i64,
            count,
        };
        match &self.store {
            Some(store) => {
                store.require_write("insert")?;
                let key = self.managed_key(store, object)?;
                self.edit_list(store, "insert", |list| {
                    if index > list.len() {
                        return Err(out_of_range(list.len()));
                    }
                    list.insert(index, key);
                    Ok(())
                })
            }
            None => {
                self.check_element(object)?;
                if let Some(items) = self.unmanaged_items() {
                    let mut items = items.lock();
                    if index > items.len() {
                        return Err(out_of_range(items.len()));
                    }
                    items.insert(index, object.clone());
                }
                Ok(())
            }
        }
    }

    pub fn remove(&self, index: usize) -> Result<()> {
        self.require_mutable("remove")?;
        let out_of_range = |count: usize| LiveDbError::OutOfRange {
            index: index as i64,
            count,
        };
        match &self.store {
            Some(store) => {
                store.require_write("remove")?;
                self.edit_list(store, "remove", |list| {
                    if index >= list.len() {
                        return Err(out_of_range(list.len()));
                    }
                    list.remove(index);
                    Ok(())
                })
            }
            None => {
                if let Some(items) = self.unmanaged_items() {
                    let mut items = items.lock();
                    if index >= items.len() {
                        return Err(out_of_range(items.len()));
                    }
                    items.remove(index);
                }
                Ok(())
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.require_mutable("clear")?;
        match &self.store {
            Some(store) => {
                store.require_write("clear")?;
                self.edit_list(store, "clear", |list| {
                    list.clear();
                    Ok(())
                })
            }
            None => {
                if let Some(items) = self.unmanaged_items() {
                    items.lock().clear();
                }
                Ok(())
            }
        }
    }

    /// Replace the contents of this list with the elements of `other`.
    pub fn replace_all(&self, other: &Collection) -> Result<()> {
        self.require_mutable("replace_all")?;
        let objects: Vec<Object> = other.iter()?.collect();
        for object in &objects {
            self.check_element(object)?;
        }
        match &self.store {
            Some(store) => {
                store.require_write("replace_all")?;
                let keys = objects
                    .iter()
                    .map(|o| self.managed_key(store, o))
                    .collect::<Result<Vec<_>>>()?;
                self.edit_list(store, "replace_all", |list| {
                    *list = keys;
                    Ok(())
                })
            }
            None => {
                if let Some(items) = self.unmanaged_items() {
                    *items.lock() = objects;
                }
                Ok(())
            }
        }
    }
}

enum IterSource {
    Managed {
        store: Store,
        class: Arc<str>,
        keys: Arc<Vec<ObjectKey>>,
        position: usize,
    },
    Unmanaged(std::vec::IntoIter<Object>),
}

/// Iterator returned by `Collection::iter`.
pub struct CollectionIter {
    inner: IterSource,
}

impl Iterator for CollectionIter {
    type Item = Object;

    fn next(&mut self) -> Option<Object> {
        match &mut self.inner {
            IterSource::Managed {
                store,
                class,
                keys,
                position,
            } => {
                while *position < keys.len() {
                    let key = keys[*position];
                    *position += 1;
                    if store.is_invalidated() {
                        return None;
                    }
                    if store.current_view().contains(class, key) {
                        return Some(Object::new(store.clone(), class.clone(), key));
                    }
                }
                None
            }
            IterSource::Unmanaged(items) => items.next(),
        }
    }
}
