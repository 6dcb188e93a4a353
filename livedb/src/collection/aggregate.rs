use super::{Collection, Elements};
use crate::error::{LiveDbError, Result};
use crate::schema::PropertyType;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

impl Collection {
    /// Non-null values of `property` across the collection, after checking
    /// the property kind with `accept`.
    fn aggregate_input(
        &self,
        property: &str,
        operation: &str,
        accept: fn(PropertyType) -> bool,
    ) -> Result<(PropertyType, Vec<Value>)> {
        if !self.capabilities().aggregatable {
            return Err(LiveDbError::Capability(format!(
                "{operation} is not supported on {}",
                self.variant_name()
            )));
        }
        let store = self.managed_store(operation)?;
        let object_schema = store.schema().class(&self.core.class)?;
        let (index, prop) = object_schema.property(property)?;
        if !accept(prop.kind) {
            return Err(LiveDbError::invalid_property(
                &self.core.class,
                property,
                format!("{operation} is not supported on {} properties", prop.kind.name()),
            ));
        }

        let (snapshot, keys) = match self.elements()? {
            Elements::Managed { snapshot, keys, .. } => (snapshot, keys),
            Elements::Unmanaged(_) => return Ok((prop.kind, Vec::new())),
        };
        let table = snapshot.table(&self.core.class)?;
        let values = keys
            .iter()
            .filter_map(|k| table.row(*k))
            .map(|row| row[index].clone())
            .filter(|v| !v.is_null())
            .collect();
        Ok((prop.kind, values))
    }

    fn extreme(&self, property: &str, operation: &str, wanted: Ordering) -> Result<Option<Value>> {
        let (_, values) = self.aggregate_input(property, operation, PropertyType::is_aggregatable)?;
        Ok(values.into_iter().reduce(|best, v| {
            if v.compare(&best) == wanted {
                v
            } else {
                best
            }
        }))
    }

    /// Smallest non-null value, or `None` when there is none.
    pub fn min(&self, property: &str) -> Result<Option<Value>> {
        self.extreme(property, "min", Ordering::Less)
    }

    /// Largest non-null value, or `None` when there is none.
    pub fn max(&self, property: &str) -> Result<Option<Value>> {
        self.extreme(property, "max", Ordering::Greater)
    }

    /// Sum of the non-null values. Integer sums stay `Int` unless they
    /// overflow, in which case the total is reported as `Double`. Float and
    /// double sums are `Double`. An empty collection sums to zero.
    pub fn sum(&self, property: &str) -> Result<Value> {
        let (kind, values) = self.aggregate_input(property, "sum", PropertyType::is_summable)?;
        if kind.is_integer() {
            let total: i128 = values.iter().filter_map(Value::as_i64).map(i128::from).sum();
            return Ok(i64::try_from(total)
                .map(Value::Int)
                .unwrap_or(Value::Double(total as f64)));
        }
        Ok(Value::Double(values.iter().filter_map(Value::as_f64).sum()))
    }

    /// Mean of the non-null values as a `Double`, or a `Date` for date
    /// properties. `None` when there are no values.
    pub fn average(&self, property: &str) -> Result<Option<Value>> {
        let (kind, values) =
            self.aggregate_input(property, "average", PropertyType::is_aggregatable)?;
        if values.is_empty() {
            return Ok(None);
        }
        let count = values.len() as f64;
        if kind == PropertyType::Date {
            let micros: i128 = values
                .iter()
                .filter_map(Value::as_date)
                .map(|d| i128::from(d.timestamp_micros()))
                .sum();
            let mean = (micros as f64 / count).round() as i64;
            return Ok(DateTime::<Utc>::from_timestamp_micros(mean).map(Value::Date));
        }
        if kind.is_integer() {
            let total: i128 = values.iter().filter_map(Value::as_i64).map(i128::from).sum();
            return Ok(Some(Value::Double(total as f64 / count)));
        }
        let total: f64 = values.iter().filter_map(Value::as_f64).sum();
        Ok(Some(Value::Double(total / count)))
    }
}
