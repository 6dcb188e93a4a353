mod types;

pub use types::{ClassDefinition, PropertyDefinition, PropertyType, SchemaDefinition};

use crate::error::{LiveDbError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Parse a schema.yaml file into a SchemaDefinition
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a SchemaDefinition
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let schema: SchemaDefinition = serde_yaml::from_str(content)?;
    Ok(schema)
}

/// A resolved property of an object class.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: Arc<str>,
    pub kind: PropertyType,
    /// Element class for links and lists; origin class for linking objects.
    pub target: Option<Arc<str>>,
    /// Forward property followed by a linking_objects property.
    pub origin_property: Option<Arc<str>>,
    pub optional: bool,
    pub default: Option<serde_yaml::Value>,
}

impl Property {
    /// Whether the stored value may be null. Links are always nullable.
    pub fn is_nullable(&self) -> bool {
        self.optional || self.kind == PropertyType::Link
    }
}

/// The resolved schema of one class, with properties in declaration order.
#[derive(Debug)]
pub struct ObjectSchema {
    name: Arc<str>,
    properties: Vec<Property>,
    by_name: HashMap<String, usize>,
}

impl ObjectSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Look up a property by name without failing.
    pub fn find(&self, name: &str) -> Option<(usize, &Property)> {
        self.by_name
            .get(name)
            .map(|&index| (index, &self.properties[index]))
    }

    /// Look up a property by name, failing with `InvalidProperty` when it does not exist.
    pub fn property(&self, name: &str) -> Result<(usize, &Property)> {
        self.find(name).ok_or_else(|| {
            LiveDbError::invalid_property(&self.name, name, "no such property")
        })
    }

    /// Properties that hold a stored value (everything except linking objects).
    pub fn stored_properties(&self) -> impl Iterator<Item = (usize, &Property)> {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.kind.is_computed())
    }
}

/// The resolved schema of a database.
#[derive(Debug)]
pub struct Schema {
    classes: HashMap<Arc<str>, Arc<ObjectSchema>>,
    definition: SchemaDefinition,
}

impl Schema {
    /// Resolve and check a parsed schema definition.
    pub fn from_definition(definition: &SchemaDefinition) -> Result<Self> {
        let mut classes = HashMap::new();

        for (class_name, class_def) in &definition.classes {
            let mut properties = Vec::with_capacity(class_def.properties.len());
            let mut by_name = HashMap::new();

            for prop in &class_def.properties {
                if by_name.insert(prop.name.clone(), properties.len()).is_some() {
                    return Err(LiveDbError::Schema(format!(
                        "Class '{class_name}' declares '{}' twice",
                        prop.name
                    )));
                }
                let target = match prop.property_type {
                    PropertyType::LinkingObjects => prop.origin.as_deref(),
                    _ => prop.target.as_deref(),
                };
                properties.push(Property {
                    name: Arc::from(prop.name.as_str()),
                    kind: prop.property_type,
                    target: target.map(Arc::from),
                    origin_property: prop.property.as_deref().map(Arc::from),
                    optional: prop.optional,
                    default: prop.default.clone(),
                });
            }

            let name: Arc<str> = Arc::from(class_name.as_str());
            classes.insert(
                name.clone(),
                Arc::new(ObjectSchema {
                    name,
                    properties,
                    by_name,
                }),
            );
        }

        let schema = Schema {
            classes,
            definition: definition.clone(),
        };
        schema.check_relationships()?;
        Ok(schema)
    }

    /// Look up a class by name.
    pub fn class(&self, name: &str) -> Result<&Arc<ObjectSchema>> {
        self.classes
            .get(name)
            .ok_or_else(|| LiveDbError::Schema(format!("Class '{name}' not found in schema")))
    }

    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(|n| n.as_ref()).collect();
        names.sort_unstable();
        names
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<ObjectSchema>> {
        self.classes.values()
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    fn check_relationships(&self) -> Result<()> {
        for class in self.classes.values() {
            for prop in &class.properties {
                match prop.kind {
                    PropertyType::Link | PropertyType::List => {
                        let target = prop.target.as_deref().ok_or_else(|| {
                            LiveDbError::Schema(format!(
                                "{}.{}: '{}' requires a target class",
                                class.name,
                                prop.name,
                                prop.kind.name()
                            ))
                        })?;
                        self.class(target)?;
                        if prop.default.is_some() {
                            return Err(LiveDbError::Schema(format!(
                                "{}.{}: relationships cannot declare a default",
                                class.name, prop.name
                            )));
                        }
                    }
                    PropertyType::LinkingObjects => {
                        let (origin, origin_prop) =
                            match (prop.target.as_deref(), prop.origin_property.as_deref()) {
                                (Some(o), Some(p)) => (o, p),
                                _ => {
                                    return Err(LiveDbError::Schema(format!(
                                        "{}.{}: linking_objects requires 'origin' and 'property'",
                                        class.name, prop.name
                                    )))
                                }
                            };
                        let origin_class = self.class(origin)?;
                        let (_, forward) = origin_class.find(origin_prop).ok_or_else(|| {
                            LiveDbError::Schema(format!(
                                "{}.{}: origin property '{origin}.{origin_prop}' does not exist",
                                class.name, prop.name
                            ))
                        })?;
                        if !forward.kind.is_relationship()
                            || forward.target.as_deref() != Some(class.name())
                        {
                            return Err(LiveDbError::Schema(format!(
                                "{}.{}: '{origin}.{origin_prop}' is not a link or list to '{}'",
                                class.name, prop.name, class.name
                            )));
                        }
                    }
                    _ => {
                        if prop.target.is_some() {
                            return Err(LiveDbError::Schema(format!(
                                "{}.{}: only links and lists take a target",
                                class.name, prop.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
