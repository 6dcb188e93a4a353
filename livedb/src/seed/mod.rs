use crate::error::{LiveDbError, Result};
use crate::object::Object;
use crate::schema::PropertyType;
use crate::store::Store;
use crate::validation::value_from_yaml;
use crate::value::{ObjectKey, Value};
use serde_yaml::Value as Yaml;
use std::collections::HashMap;
use std::path::Path;

/// Load `class -> [ {prop: value} ]` seed data in one write transaction.
///
/// Link properties take the zero-based index of a seeded object of the
/// target class; list properties take a sequence of such indices. Rows that
/// are not mappings are skipped and do not take an index.
/// Returns the number of objects created.
pub fn load_seed(store: &Store, yaml: &str) -> Result<usize> {
    let classes = match serde_yaml::from_str::<Yaml>(yaml)? {
        Yaml::Null => return Ok(0),
        Yaml::Mapping(classes) => classes,
        _ => {
            return Err(LiveDbError::Validation(
                "Seed data must map class names to lists of objects".into(),
            ))
        }
    };

    let created = store.write(|s| {
        let mut seeded: HashMap<String, Vec<Object>> = HashMap::new();
        let mut relationships: Vec<(Object, &str, &Yaml)> = Vec::new();

        for (class, rows) in &classes {
            let class = class.as_str().ok_or_else(|| {
                LiveDbError::Validation("Seed class names must be strings".into())
            })?;
            let object_schema = s.schema().class(class)?.clone();
            let rows = match rows {
                Yaml::Sequence(rows) => rows.as_slice(),
                Yaml::Null => &[][..],
                _ => {
                    return Err(LiveDbError::Validation(format!(
                        "Seed data for '{class}' must be a list"
                    )))
                }
            };

            for (i, row) in rows.iter().enumerate() {
                let fields = match row.as_mapping() {
                    Some(fields) => fields,
                    None => {
                        log::warn!("Skipping seed row {i} of '{class}': not a mapping");
                        continue;
                    }
                };
                let mut values = Vec::new();
                let mut links = Vec::new();
                for (name, value) in fields {
                    let name = name.as_str().ok_or_else(|| {
                        LiveDbError::Validation(format!("Seed property names of '{class}' must be strings"))
                    })?;
                    let (_, prop) = object_schema.property(name)?;
                    if prop.kind.is_relationship() {
                        links.push((name, value));
                    } else {
                        values.push((name, value_from_yaml(prop, value)?));
                    }
                }
                let object = s.create(class, &values)?;
                for (name, value) in links {
                    relationships.push((object.clone(), name, value));
                }
                seeded.entry(class.to_string()).or_default().push(object);
            }
        }

        for (object, name, value) in relationships {
            let object_schema = s.schema().class(object.class_name())?.clone();
            let (_, prop) = object_schema.property(name)?;
            let target = prop.target.as_deref().unwrap_or_default();
            let lookup = |index: &Yaml| -> Result<ObjectKey> {
                index
                    .as_u64()
                    .and_then(|i| seeded.get(target).and_then(|objects| objects.get(i as usize)))
                    .map(Object::key)
                    .ok_or_else(|| {
                        LiveDbError::Validation(format!(
                            "Seed value {value:?} of '{}.{name}' does not name a seeded {target}",
                            object.class_name()
                        ))
                    })
            };
            let resolved = match (prop.kind, value) {
                (_, Yaml::Null) => Value::Null,
                (PropertyType::List, Yaml::Sequence(indices)) => Value::List(
                    indices
                        .iter()
                        .map(lookup)
                        .collect::<Result<Vec<_>>>()?,
                ),
                (PropertyType::Link, index) => Value::Link(lookup(index)?),
                _ => {
                    return Err(LiveDbError::Validation(format!(
                        "Seed value of list '{}.{name}' must be a list of indices",
                        object.class_name()
                    )))
                }
            };
            if !resolved.is_null() {
                object.set(name, resolved)?;
            }
        }

        Ok(seeded.values().map(Vec::len).sum::<usize>())
    })?;

    log::info!("Seeded {created} objects into {}", store.path().display());
    Ok(created)
}

pub fn load_seed_file(store: &Store, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)?;
    load_seed(store, &content)
}
