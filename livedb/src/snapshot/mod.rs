use crate::error::{LiveDbError, Result};
use crate::query::{self, Predicate, SortDescriptor};
use crate::schema::{ObjectSchema, PropertyType, Schema};
use crate::value::{ObjectKey, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

fn next_stamp() -> u64 {
    NEXT_STAMP.fetch_add(1, Ordering::Relaxed)
}

/// Rows of one class, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: BTreeMap<ObjectKey, Vec<Value>>,
    next_key: u64,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.rows.keys().copied()
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.rows.contains_key(&key)
    }

    pub fn row(&self, key: ObjectKey) -> Option<&[Value]> {
        self.rows.get(&key).map(Vec::as_slice)
    }
}

/// An immutable, versioned view of every table.
///
/// Tables are shared between snapshots and copied on first write, so a
/// working copy costs one map clone until something is mutated.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    stamp: u64,
    schema: Arc<Schema>,
    tables: HashMap<Arc<str>, Arc<Table>>,
}

impl Snapshot {
    /// The empty version 0 of a database.
    pub fn empty(schema: Arc<Schema>) -> Self {
        let tables = schema
            .classes()
            .map(|class| (class.name_arc(), Arc::new(Table::default())))
            .collect();
        Snapshot {
            version: 0,
            stamp: next_stamp(),
            schema,
            tables,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Identity of this snapshot's content. Changes on every mutation.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn table(&self, class: &str) -> Result<&Table> {
        self.tables
            .get(class)
            .map(Arc::as_ref)
            .ok_or_else(|| LiveDbError::Schema(format!("Class '{class}' not found in schema")))
    }

    pub(crate) fn table_arc(&self, class: &str) -> Option<&Arc<Table>> {
        self.tables.get(class)
    }

    pub fn keys(&self, class: &str) -> Result<Vec<ObjectKey>> {
        Ok(self.table(class)?.keys().collect())
    }

    pub fn contains(&self, class: &str, key: ObjectKey) -> bool {
        self.tables
            .get(class)
            .map(|t| t.contains(key))
            .unwrap_or(false)
    }

    pub fn row(&self, class: &str, key: ObjectKey) -> Result<&[Value]> {
        self.table(class)?
            .row(key)
            .ok_or_else(|| LiveDbError::NotFound {
                class: class.to_string(),
                key: key.0,
            })
    }

    /// Read a property by name. Linking-objects properties are computed and
    /// come back as a list of origin keys.
    pub fn read_property(&self, class: &str, key: ObjectKey, name: &str) -> Result<Value> {
        let object_schema = self.schema.class(class)?;
        let (index, prop) = object_schema.property(name)?;
        let row = self.row(class, key)?;
        if prop.kind == PropertyType::LinkingObjects {
            let origin = prop.target.as_deref().unwrap_or_default();
            let origin_prop = prop.origin_property.as_deref().unwrap_or_default();
            return Ok(Value::List(self.reverse_links(origin, origin_prop, key)?));
        }
        Ok(row[index].clone())
    }

    /// Keys referenced by a link or list property of one object.
    pub fn forward_links(&self, class: &str, key: ObjectKey, property: &str) -> Result<Vec<ObjectKey>> {
        let object_schema = self.schema.class(class)?;
        let (index, prop) = object_schema.property(property)?;
        if !prop.kind.is_relationship() {
            return Err(LiveDbError::invalid_property(
                class,
                property,
                "is not a link or list",
            ));
        }
        Ok(match &self.row(class, key)?[index] {
            Value::Link(k) => vec![*k],
            Value::List(keys) => keys.clone(),
            _ => Vec::new(),
        })
    }

    /// Origin objects whose `property` references `target`, in origin key
    /// order, each listed once.
    pub fn reverse_links(
        &self,
        origin_class: &str,
        property: &str,
        target: ObjectKey,
    ) -> Result<Vec<ObjectKey>> {
        let (index, _) = self.schema.class(origin_class)?.property(property)?;
        let table = self.table(origin_class)?;
        Ok(table
            .rows
            .iter()
            .filter(|(_, row)| match &row[index] {
                Value::Link(k) => *k == target,
                Value::List(keys) => keys.contains(&target),
                _ => false,
            })
            .map(|(key, _)| *key)
            .collect())
    }

    /// Evaluate a filter and sort over a whole table.
    pub fn resolve(
        &self,
        class: &str,
        predicate: Option<&Predicate>,
        sort: &[SortDescriptor],
    ) -> Result<Vec<ObjectKey>> {
        let keys = self.keys(class)?;
        query::apply(self, class, keys, predicate, sort)
    }

    pub(crate) fn class_schema(&self, class: &str) -> Result<&Arc<ObjectSchema>> {
        self.schema.class(class)
    }

    /// A mutable working copy with its own stamp.
    pub(crate) fn working_copy(&self) -> Snapshot {
        let mut copy = self.clone();
        copy.stamp = next_stamp();
        copy
    }

    /// Freeze a working copy as the given committed version.
    pub(crate) fn into_committed(mut self, version: u64) -> Snapshot {
        self.version = version;
        self.stamp = next_stamp();
        self
    }

    fn table_mut(&mut self, class: &str) -> Result<&mut Table> {
        self.stamp = next_stamp();
        self.tables
            .get_mut(class)
            .map(Arc::make_mut)
            .ok_or_else(|| LiveDbError::Schema(format!("Class '{class}' not found in schema")))
    }

    pub(crate) fn insert(&mut self, class: &str, row: Vec<Value>) -> Result<ObjectKey> {
        let table = self.table_mut(class)?;
        let key = ObjectKey(table.next_key);
        table.next_key += 1;
        table.rows.insert(key, row);
        Ok(key)
    }

    pub(crate) fn set(&mut self, class: &str, key: ObjectKey, index: usize, value: Value) -> Result<()> {
        let row = self
            .table_mut(class)?
            .rows
            .get_mut(&key)
            .ok_or_else(|| LiveDbError::NotFound {
                class: class.to_string(),
                key: key.0,
            })?;
        row[index] = value;
        Ok(())
    }

    pub(crate) fn list_mut(&mut self, class: &str, key: ObjectKey, index: usize) -> Result<&mut Vec<ObjectKey>> {
        let row = self
            .table_mut(class)?
            .rows
            .get_mut(&key)
            .ok_or_else(|| LiveDbError::NotFound {
                class: class.to_string(),
                key: key.0,
            })?;
        match &mut row[index] {
            Value::List(keys) => Ok(keys),
            other => Err(LiveDbError::Validation(format!(
                "Expected a list in '{class}', found {}",
                other.kind_name()
            ))),
        }
    }

    /// Remove an object, nullifying links to it and dropping it from lists.
    pub(crate) fn delete(&mut self, class: &str, key: ObjectKey) -> Result<()> {
        if self.table_mut(class)?.rows.remove(&key).is_none() {
            return Err(LiveDbError::NotFound {
                class: class.to_string(),
                key: key.0,
            });
        }

        let mut referencing: Vec<(Arc<str>, usize)> = Vec::new();
        for origin in self.schema.classes() {
            for (index, prop) in origin.stored_properties() {
                if prop.kind.is_relationship() && prop.target.as_deref() == Some(class) {
                    referencing.push((origin.name_arc(), index));
                }
            }
        }

        for (origin, index) in referencing {
            let touched = self
                .tables
                .get(&origin)
                .map(|t| {
                    t.rows.values().any(|row| match &row[index] {
                        Value::Link(k) => *k == key,
                        Value::List(keys) => keys.contains(&key),
                        _ => false,
                    })
                })
                .unwrap_or(false);
            if !touched {
                continue;
            }
            for row in self.table_mut(&origin)?.rows.values_mut() {
                let slot = &mut row[index];
                if matches!(slot, Value::Link(k) if *k == key) {
                    *slot = Value::Null;
                } else if let Value::List(keys) = slot {
                    keys.retain(|k| *k != key);
                }
            }
        }
        Ok(())
    }
}
