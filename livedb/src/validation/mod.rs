use crate::error::{LiveDbError, Result};
use crate::schema::{ObjectSchema, Property, PropertyType};
use crate::snapshot::Snapshot;
use crate::value::Value;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Build a full row for a new object: schema defaults first, then the
/// given values checked against their property kinds.
pub fn build_row(
    snapshot: &Snapshot,
    class: &ObjectSchema,
    values: &[(&str, Value)],
) -> Result<Vec<Value>> {
    let mut row = class
        .properties()
        .iter()
        .map(default_value)
        .collect::<Result<Vec<_>>>()?;

    for (name, value) in values {
        let (index, prop) = class.property(name)?;
        row[index] = coerce_value(snapshot, class, prop, value.clone())?;
    }
    Ok(row)
}

/// The value a property holds when none is given.
pub fn default_value(prop: &Property) -> Result<Value> {
    if let Some(default) = &prop.default {
        return value_from_yaml(prop, default);
    }
    if prop.kind.is_computed() || prop.is_nullable() {
        return Ok(Value::Null);
    }
    Ok(match prop.kind {
        PropertyType::Bool => Value::Bool(false),
        PropertyType::Float => Value::Float(0.0),
        PropertyType::Double => Value::Double(0.0),
        PropertyType::String => Value::String(String::new()),
        PropertyType::Date => Value::Date(DateTime::<Utc>::default()),
        PropertyType::List => Value::List(Vec::new()),
        kind if kind.is_integer() => Value::Int(0),
        _ => Value::Null,
    })
}

/// Check a value against a stored property, widening or narrowing numbers
/// where the kind allows it.
pub fn coerce_value(
    snapshot: &Snapshot,
    class: &ObjectSchema,
    prop: &Property,
    value: Value,
) -> Result<Value> {
    let mismatch = |value: &Value| {
        LiveDbError::Validation(format!(
            "Property '{}.{}' expected {}, got {}",
            class.name(),
            prop.name,
            prop.kind.name(),
            value.kind_name()
        ))
    };

    if prop.kind.is_computed() {
        return Err(LiveDbError::invalid_property(
            class.name(),
            &prop.name,
            "linking objects are read-only",
        ));
    }

    if value.is_null() {
        return if prop.is_nullable() {
            Ok(Value::Null)
        } else {
            Err(LiveDbError::Validation(format!(
                "Property '{}.{}' is not optional",
                class.name(),
                prop.name
            )))
        };
    }

    match (prop.kind, value) {
        (PropertyType::Bool, v @ Value::Bool(_)) => Ok(v),
        (kind, Value::Int(i)) if kind.is_integer() => {
            let (min, max) = kind.integer_range().unwrap_or((i64::MIN, i64::MAX));
            if i < min || i > max {
                return Err(LiveDbError::Validation(format!(
                    "Property '{}.{}' value {i} does not fit in {}",
                    class.name(),
                    prop.name,
                    kind.name()
                )));
            }
            Ok(Value::Int(i))
        }
        (PropertyType::Float, v @ Value::Float(_)) => Ok(v),
        (PropertyType::Float, Value::Double(d)) => {
            let narrowed = d as f32;
            if d.is_finite() && !narrowed.is_finite() {
                return Err(LiveDbError::Validation(format!(
                    "Property '{}.{}' value {d} overflows float",
                    class.name(),
                    prop.name
                )));
            }
            Ok(Value::Float(narrowed))
        }
        (PropertyType::Float, Value::Int(i)) => Ok(Value::Float(i as f32)),
        (PropertyType::Double, v @ Value::Double(_)) => Ok(v),
        (PropertyType::Double, Value::Float(f)) => Ok(Value::Double(f as f64)),
        (PropertyType::Double, Value::Int(i)) => Ok(Value::Double(i as f64)),
        (PropertyType::String, v @ Value::String(_)) => Ok(v),
        (PropertyType::Date, v @ Value::Date(_)) => Ok(v),
        (PropertyType::Link, Value::Link(key)) => {
            let target = prop.target.as_deref().unwrap_or_default();
            if !snapshot.contains(target, key) {
                return Err(LiveDbError::Validation(format!(
                    "Property '{}.{}' links to missing {target} #{key}",
                    class.name(),
                    prop.name
                )));
            }
            Ok(Value::Link(key))
        }
        (PropertyType::List, Value::List(keys)) => {
            let target = prop.target.as_deref().unwrap_or_default();
            if let Some(missing) = keys.iter().find(|k| !snapshot.contains(target, **k)) {
                return Err(LiveDbError::Validation(format!(
                    "Property '{}.{}' lists missing {target} #{missing}",
                    class.name(),
                    prop.name
                )));
            }
            Ok(Value::List(keys))
        }
        (_, other) => Err(mismatch(&other)),
    }
}

/// Convert a YAML scalar (schema default, seed data) into a value of the
/// property's kind. Relationships are not expressible this way.
pub fn value_from_yaml(prop: &Property, yaml: &serde_yaml::Value) -> Result<Value> {
    let mismatch = || {
        LiveDbError::Validation(format!(
            "Property '{}' expected {}, got {}",
            prop.name,
            prop.kind.name(),
            yaml_type_name(yaml)
        ))
    };

    if yaml.is_null() {
        return Ok(Value::Null);
    }

    match prop.kind {
        PropertyType::Bool => yaml.as_bool().map(Value::Bool).ok_or_else(mismatch),
        kind if kind.is_integer() => yaml.as_i64().map(Value::Int).ok_or_else(mismatch),
        PropertyType::Float => yaml
            .as_f64()
            .map(|f| Value::Float(f as f32))
            .ok_or_else(mismatch),
        PropertyType::Double => yaml.as_f64().map(Value::Double).ok_or_else(mismatch),
        PropertyType::String => match yaml {
            serde_yaml::Value::String(s) => Ok(Value::String(s.clone())),
            serde_yaml::Value::Number(n) => Ok(Value::String(n.to_string())),
            serde_yaml::Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        PropertyType::Date => match yaml {
            serde_yaml::Value::String(s) => parse_date(s).map(Value::Date),
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .map(Value::Date)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        _ => Err(LiveDbError::Validation(format!(
            "Property '{}' ({}) cannot take a literal value",
            prop.name,
            prop.kind.name()
        ))),
    }
}

/// Parse a command-line literal for a property.
pub fn value_from_str(prop: &Property, s: &str) -> Result<Value> {
    match prop.kind {
        PropertyType::String => Ok(Value::String(s.to_string())),
        PropertyType::Date => parse_date(s).map(Value::Date),
        _ => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(s)?;
            value_from_yaml(prop, &yaml)
        }
    }
}

/// RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| LiveDbError::Validation(format!("Invalid date '{s}'")))
}

fn yaml_type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "boolean",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "list",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema_str, Schema};
    use std::sync::Arc;

    fn snapshot() -> Snapshot {
        let def = parse_schema_str(
            r#"
classes:
  AllTypes:
    properties:
      boolCol: { type: bool }
      int8Col: { type: int8 }
      floatCol: { type: float }
      doubleCol: { type: double }
      stringCol: { type: string, default: "hello" }
      dateCol: { type: date, default: "2024-01-02" }
      optInt: { type: int, optional: true }
      linkCol: { type: link, target: AllTypes }
"#,
        )
        .unwrap();
        Snapshot::empty(Arc::new(Schema::from_definition(&def).unwrap())).working_copy()
    }

    #[test]
    fn test_defaults_applied() {
        let snap = snapshot();
        let class = snap.class_schema("AllTypes").unwrap().clone();
        let row = build_row(&snap, &class, &[]).unwrap();
        assert_eq!(row[0], Value::Bool(false));
        assert_eq!(row[1], Value::Int(0));
        assert_eq!(row[4], Value::from("hello"));
        assert_eq!(row[5], Value::Date(parse_date("2024-01-02").unwrap()));
        assert_eq!(row[6], Value::Null);
        assert_eq!(row[7], Value::Null);
    }

    #[test]
    fn test_integer_width_enforced() {
        let snap = snapshot();
        let class = snap.class_schema("AllTypes").unwrap().clone();
        assert!(build_row(&snap, &class, &[("int8Col", Value::Int(127))]).is_ok());
        assert!(matches!(
            build_row(&snap, &class, &[("int8Col", Value::Int(128))]),
            Err(LiveDbError::Validation(_))
        ));
    }

    #[test]
    fn test_numeric_widening_and_narrowing() {
        let snap = snapshot();
        let class = snap.class_schema("AllTypes").unwrap().clone();
        let row = build_row(
            &snap,
            &class,
            &[("floatCol", Value::Double(1.5)), ("doubleCol", Value::Int(2))],
        )
        .unwrap();
        assert_eq!(row[2], Value::Float(1.5));
        assert_eq!(row[3], Value::Double(2.0));
        assert!(build_row(&snap, &class, &[("floatCol", Value::Double(1e300))]).is_err());
    }

    #[test]
    fn test_rejects_mismatch_null_and_dangling_link() {
        let snap = snapshot();
        let class = snap.class_schema("AllTypes").unwrap().clone();
        assert!(build_row(&snap, &class, &[("boolCol", Value::from("yes"))]).is_err());
        assert!(build_row(&snap, &class, &[("stringCol", Value::Null)]).is_err());
        assert!(build_row(
            &snap,
            &class,
            &[("linkCol", Value::Link(crate::value::ObjectKey(9)))]
        )
        .is_err());
        assert!(matches!(
            build_row(&snap, &class, &[("missing", Value::Int(1))]),
            Err(LiveDbError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_value_from_str() {
        let snap = snapshot();
        let class = snap.class_schema("AllTypes").unwrap().clone();
        let (_, int_prop) = class.property("int8Col").unwrap();
        let (_, string_prop) = class.property("stringCol").unwrap();
        assert_eq!(value_from_str(int_prop, "12").unwrap(), Value::Int(12));
        assert_eq!(value_from_str(string_prop, "12").unwrap(), Value::from("12"));
        assert!(value_from_str(int_prop, "twelve").is_err());
    }
}
