//! Typed predicates and sort descriptors evaluated against a snapshot.

use crate::error::{LiveDbError, Result};
use crate::schema::{ObjectSchema, PropertyType};
use crate::snapshot::{Snapshot, Table};
use crate::value::{ObjectKey, Value};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

/// A filter condition over the properties of one class.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Always true
    True,
    /// Always false
    False,
    /// Compare a property to a value
    Compare {
        property: String,
        op: CompareOp,
        value: Value,
    },
    /// SQL LIKE match on a string property (`%` and `_` wildcards)
    Like { property: String, pattern: String },
    /// Property equals one of the values
    In { property: String, values: Vec<Value> },
    /// Link or list property references any of the given objects
    AnyIn {
        property: String,
        keys: Vec<ObjectKey>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    fn compare(property: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            property: property.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Equal, value)
    }

    pub fn ne(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::NotEqual, value)
    }

    pub fn lt(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::LessThan, value)
    }

    pub fn le(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::LessEqual, value)
    }

    pub fn gt(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::GreaterThan, value)
    }

    pub fn ge(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::GreaterEqual, value)
    }

    pub fn like(property: &str, pattern: &str) -> Self {
        Predicate::Like {
            property: property.to_string(),
            pattern: pattern.to_string(),
        }
    }

    pub fn is_in(property: &str, values: impl IntoIterator<Item = Value>) -> Self {
        Predicate::In {
            property: property.to_string(),
            values: values.into_iter().collect(),
        }
    }

    /// `ANY property IN keys`
    pub fn any_in(property: &str, keys: impl IntoIterator<Item = ObjectKey>) -> Self {
        Predicate::AnyIn {
            property: property.to_string(),
            keys: keys.into_iter().collect(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Resolve property names against a class.
    pub(crate) fn compile(&self, class: &ObjectSchema) -> Result<Matcher> {
        Ok(match self {
            Predicate::True => Matcher::True,
            Predicate::False => Matcher::False,
            Predicate::Compare {
                property,
                op,
                value,
            } => {
                let index = stored_scalar(class, property)?;
                Matcher::Compare {
                    index,
                    op: *op,
                    value: value.clone(),
                }
            }
            Predicate::Like { property, pattern } => {
                let (index, prop) = class.property(property)?;
                if prop.kind != PropertyType::String {
                    return Err(LiveDbError::invalid_property(
                        class.name(),
                        property,
                        "LIKE needs a string property",
                    ));
                }
                Matcher::Like {
                    index,
                    regex: like_regex(pattern)?,
                }
            }
            Predicate::In { property, values } => Matcher::In {
                index: stored_scalar(class, property)?,
                values: values.clone(),
            },
            Predicate::AnyIn { property, keys } => {
                let (index, prop) = class.property(property)?;
                if !prop.kind.is_relationship() {
                    return Err(LiveDbError::invalid_property(
                        class.name(),
                        property,
                        "ANY ... IN needs a link or list property",
                    ));
                }
                Matcher::AnyIn {
                    index,
                    keys: keys.iter().copied().collect(),
                }
            }
            Predicate::And(all) => Matcher::And(
                all.iter()
                    .map(|p| p.compile(class))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Predicate::Or(any) => Matcher::Or(
                any.iter()
                    .map(|p| p.compile(class))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Predicate::Not(inner) => Matcher::Not(Box::new(inner.compile(class)?)),
        })
    }
}

fn stored_scalar(class: &ObjectSchema, property: &str) -> Result<usize> {
    let (index, prop) = class.property(property)?;
    if prop.kind == PropertyType::List || prop.kind.is_computed() {
        return Err(LiveDbError::invalid_property(
            class.name(),
            property,
            format!("cannot compare a {} property", prop.kind.name()),
        ));
    }
    Ok(index)
}

/// Compile a SQL LIKE pattern into an anchored regex.
fn like_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            c => expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| LiveDbError::Validation(format!("Bad LIKE pattern '{pattern}': {e}")))
}

/// A predicate with property indices resolved, ready to run over rows.
#[derive(Debug, Clone)]
pub(crate) enum Matcher {
    True,
    False,
    Compare {
        index: usize,
        op: CompareOp,
        value: Value,
    },
    Like {
        index: usize,
        regex: Regex,
    },
    In {
        index: usize,
        values: Vec<Value>,
    },
    AnyIn {
        index: usize,
        keys: HashSet<ObjectKey>,
    },
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
}

impl Matcher {
    pub(crate) fn matches(&self, row: &[Value]) -> bool {
        match self {
            Matcher::True => true,
            Matcher::False => false,
            Matcher::Compare { index, op, value } => compare(&row[*index], *op, value),
            Matcher::Like { index, regex } => match &row[*index] {
                Value::String(s) => regex.is_match(s),
                _ => false,
            },
            Matcher::In { index, values } => values
                .iter()
                .any(|v| compare(&row[*index], CompareOp::Equal, v)),
            Matcher::AnyIn { index, keys } => match &row[*index] {
                Value::Link(k) => keys.contains(k),
                Value::List(list) => list.iter().any(|k| keys.contains(k)),
                _ => false,
            },
            Matcher::And(all) => all.iter().all(|m| m.matches(row)),
            Matcher::Or(any) => any.iter().any(|m| m.matches(row)),
            Matcher::Not(inner) => !inner.matches(row),
        }
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    if !left.comparable_with(right) {
        return op == CompareOp::NotEqual;
    }
    if (left.is_null() || right.is_null()) && !matches!(op, CompareOp::Equal | CompareOp::NotEqual) {
        return false;
    }
    let ord = left.compare(right);
    match op {
        CompareOp::Equal => ord == Ordering::Equal,
        CompareOp::NotEqual => ord != Ordering::Equal,
        CompareOp::LessThan => ord == Ordering::Less,
        CompareOp::LessEqual => ord != Ordering::Greater,
        CompareOp::GreaterThan => ord == Ordering::Greater,
        CompareOp::GreaterEqual => ord != Ordering::Less,
    }
}

/// One level of a multi-key sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub property: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn new(property: &str) -> Self {
        SortDescriptor {
            property: property.to_string(),
            ascending: true,
        }
    }

    pub fn descending(property: &str) -> Self {
        SortDescriptor {
            property: property.to_string(),
            ascending: false,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.ascending = !self.ascending;
        self
    }
}

/// Resolve sort descriptors to property indices, rejecting unsortable kinds.
pub(crate) fn sort_columns(class: &ObjectSchema, sort: &[SortDescriptor]) -> Result<Vec<(usize, bool)>> {
    sort.iter()
        .map(|d| {
            let (index, prop) = class.property(&d.property)?;
            if !prop.kind.is_sortable() {
                return Err(LiveDbError::invalid_property(
                    class.name(),
                    &d.property,
                    format!("cannot sort on a {} property", prop.kind.name()),
                ));
            }
            Ok((index, d.ascending))
        })
        .collect()
}

fn sort_keys(table: &Table, keys: &mut [ObjectKey], columns: &[(usize, bool)]) {
    if columns.is_empty() {
        return;
    }
    // Stable: ties keep their input order. Nulls sort first when ascending.
    keys.sort_by(|a, b| {
        let (ra, rb) = match (table.row(*a), table.row(*b)) {
            (Some(ra), Some(rb)) => (ra, rb),
            _ => return Ordering::Equal,
        };
        for &(index, ascending) in columns {
            let ord = ra[index].compare(&rb[index]);
            if ord != Ordering::Equal {
                return if ascending { ord } else { ord.reverse() };
            }
        }
        Ordering::Equal
    });
}

/// Filter then sort a key sequence of one class.
pub fn apply(
    snapshot: &Snapshot,
    class: &str,
    keys: Vec<ObjectKey>,
    predicate: Option<&Predicate>,
    sort: &[SortDescriptor],
) -> Result<Vec<ObjectKey>> {
    let object_schema = snapshot.class_schema(class)?;
    let table = snapshot.table(class)?;

    let mut keys = match predicate {
        Some(predicate) => {
            let matcher = predicate.compile(object_schema)?;
            keys.into_iter()
                .filter(|k| table.row(*k).map(|row| matcher.matches(row)).unwrap_or(false))
                .collect()
        }
        None => keys,
    };

    let columns = sort_columns(object_schema, sort)?;
    sort_keys(table, &mut keys, &columns);
    Ok(keys)
}
