use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// Top-level schema definition parsed from schema.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub classes: HashMap<String, ClassDefinition>,
}

/// Definition of a single object class.
/// Property order follows the YAML mapping order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDefinition {
    #[serde(
        default,
        deserialize_with = "ordered_properties",
        serialize_with = "properties_as_mapping"
    )]
    pub properties: Vec<PropertyDefinition>,
}

/// Definition of a single property of a class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    /// Target class of a link or list
    #[serde(default)]
    pub target: Option<String>,
    /// Origin class of a linking_objects property
    #[serde(default)]
    pub origin: Option<String>,
    /// Forward property on the origin class a linking_objects property follows
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
}

/// Property kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    Date,
    Link,
    List,
    LinkingObjects,
}

impl PropertyType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PropertyType::Int
                | PropertyType::Int8
                | PropertyType::Int16
                | PropertyType::Int32
                | PropertyType::Int64
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, PropertyType::Float | PropertyType::Double)
    }

    /// Kinds accepted by min/max/average.
    pub fn is_aggregatable(self) -> bool {
        self.is_numeric() || self == PropertyType::Date
    }

    /// Kinds accepted by sum.
    pub fn is_summable(self) -> bool {
        self.is_numeric()
    }

    pub fn is_sortable(self) -> bool {
        self.is_numeric()
            || matches!(
                self,
                PropertyType::Bool | PropertyType::String | PropertyType::Date
            )
    }

    /// Links and lists reference another class.
    pub fn is_relationship(self) -> bool {
        matches!(self, PropertyType::Link | PropertyType::List)
    }

    /// Computed properties have no stored value.
    pub fn is_computed(self) -> bool {
        self == PropertyType::LinkingObjects
    }

    /// Inclusive value range for fixed-width integers.
    pub fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            PropertyType::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            PropertyType::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            PropertyType::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            PropertyType::Int | PropertyType::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PropertyType::Bool => "bool",
            PropertyType::Int => "int",
            PropertyType::Int8 => "int8",
            PropertyType::Int16 => "int16",
            PropertyType::Int32 => "int32",
            PropertyType::Int64 => "int64",
            PropertyType::Float => "float",
            PropertyType::Double => "double",
            PropertyType::String => "string",
            PropertyType::Date => "date",
            PropertyType::Link => "link",
            PropertyType::List => "list",
            PropertyType::LinkingObjects => "linking_objects",
        }
    }
}

fn ordered_properties<'de, D>(deserializer: D) -> std::result::Result<Vec<PropertyDefinition>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    let mut properties = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| D::Error::custom("property names must be strings"))?
            .to_string();
        let mut definition: PropertyDefinition =
            serde_yaml::from_value(value).map_err(D::Error::custom)?;
        definition.name = name;
        properties.push(definition);
    }
    Ok(properties)
}

fn properties_as_mapping<S>(
    properties: &[PropertyDefinition],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    use serde::ser::SerializeMap;

    let mut map = serializer.serialize_map(Some(properties.len()))?;
    for property in properties {
        map.serialize_entry(&property.name, property)?;
    }
    map.end()
}
