use crate::collection::{describe_object, Collection};
use crate::error::{LiveDbError, Result};
use crate::schema::{ObjectSchema, PropertyType};
use crate::snapshot::Snapshot;
use crate::store::handoff::HandOffTarget;
use crate::store::{HandOff, Store};
use crate::validation;
use crate::value::{ObjectKey, Value};
use std::sync::Arc;

/// A live handle to one stored object, confined to the store context it
/// came from. Reads see that context's current snapshot.
#[derive(Clone)]
pub struct Object {
    store: Store,
    class: Arc<str>,
    key: ObjectKey,
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.store.same_database(&other.store) && self.class == other.class && self.key == other.key
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class)
            .field("key", &self.key)
            .finish()
    }
}

impl Object {
    pub(crate) fn new(store: Store, class: Arc<str>, key: ObjectKey) -> Self {
        Object { store, class, key }
    }

    pub fn key(&self) -> ObjectKey {
        self.key
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// True once the object was deleted or its store invalidated.
    pub fn is_invalidated(&self) -> bool {
        self.store.is_invalidated() || !self.store.current_view().contains(&self.class, self.key)
    }

    fn object_schema(&self) -> Result<Arc<ObjectSchema>> {
        Ok(self.store.schema().class(&self.class)?.clone())
    }

    fn live_view(&self) -> Result<Arc<Snapshot>> {
        self.store.check()?;
        let view = self.store.current_view();
        if !view.contains(&self.class, self.key) {
            return Err(LiveDbError::Invalidated(format!(
                "{} #{} has been deleted",
                self.class, self.key
            )));
        }
        Ok(view)
    }

    /// Read a property. Linking-objects properties read as a list of keys.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.live_view()?.read_property(&self.class, self.key, name)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.store.require_write("set")?;
        let object_schema = self.object_schema()?;
        let (index, prop) = object_schema.property(name)?;
        self.store.mutate("set", |working| {
            if !working.contains(&self.class, self.key) {
                return Err(LiveDbError::Invalidated(format!(
                    "{} #{} has been deleted",
                    self.class, self.key
                )));
            }
            let value = validation::coerce_value(working, &object_schema, prop, value)?;
            working.set(&self.class, self.key, index, value)
        })
    }

    /// Follow a link property. `None` when the link is null.
    pub fn link(&self, name: &str) -> Result<Option<Object>> {
        let object_schema = self.object_schema()?;
        let (_, prop) = object_schema.property(name)?;
        if prop.kind != PropertyType::Link {
            return Err(LiveDbError::invalid_property(&self.class, name, "is not a link"));
        }
        let target = prop.target.clone().unwrap_or_else(|| Arc::from(""));
        Ok(self
            .get(name)?
            .as_link()
            .map(|k| Object::new(self.store.clone(), target, k)))
    }

    /// The live list behind a list property.
    pub fn list(&self, name: &str) -> Result<Collection> {
        self.live_view()?;
        let object_schema = self.object_schema()?;
        let (index, prop) = object_schema.property(name)?;
        if prop.kind != PropertyType::List {
            return Err(LiveDbError::invalid_property(&self.class, name, "is not a list"));
        }
        Ok(Collection::list(
            self.store.clone(),
            self.class.clone(),
            self.key,
            index,
            prop.target.clone().unwrap_or_else(|| Arc::from("")),
        ))
    }

    /// The objects linking here through a linking_objects property.
    pub fn linking_objects(&self, name: &str) -> Result<Collection> {
        self.live_view()?;
        let object_schema = self.object_schema()?;
        let (_, prop) = object_schema.property(name)?;
        match (prop.kind, &prop.target, &prop.origin_property) {
            (PropertyType::LinkingObjects, Some(origin), Some(origin_property)) => {
                Ok(Collection::linking_objects(
                    self.store.clone(),
                    self.class.clone(),
                    self.key,
                    origin.clone(),
                    origin_property.clone(),
                ))
            }
            _ => Err(LiveDbError::invalid_property(
                &self.class,
                name,
                "is not a linking_objects property",
            )),
        }
    }

    pub fn hand_off(&self) -> Result<HandOff> {
        self.live_view()?;
        HandOff::new(
            &self.store,
            HandOffTarget::Object {
                class: self.class.clone(),
                key: self.key,
            },
        )
    }

    pub fn description(&self) -> Result<String> {
        let view = self.live_view()?;
        describe_object(&view, &self.class, self.key, self.store.max_nesting())
    }

    /// Stored properties as a JSON object, in declaration order of the schema.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let view = self.live_view()?;
        let object_schema = self.object_schema()?;
        let row = view.row(&self.class, self.key)?;
        let mut map = serde_json::Map::new();
        map.insert("_key".to_string(), serde_json::Value::from(self.key.0));
        for (index, prop) in object_schema.stored_properties() {
            map.insert(prop.name.to_string(), row[index].to_json());
        }
        Ok(serde_json::Value::Object(map))
    }
}
