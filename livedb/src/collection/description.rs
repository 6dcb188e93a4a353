use super::Collection;
use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::value::{ObjectKey, Value};
use std::fmt::Write;

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

/// Render one object at `depth`. Links are expanded inline until the depth
/// passes `max_nesting`.
fn write_object(
    out: &mut String,
    snapshot: &Snapshot,
    class: &str,
    key: ObjectKey,
    depth: usize,
    max_nesting: usize,
) -> Result<()> {
    if depth > max_nesting {
        let _ = write!(out, "{class} {{...}}");
        return Ok(());
    }
    let object_schema = snapshot.schema().class(class)?;
    let row = snapshot.row(class, key)?;
    let _ = writeln!(out, "{class} {{");
    for (index, prop) in object_schema.stored_properties() {
        indent(out, depth + 1);
        let _ = write!(out, "{} = ", prop.name);
        let target = prop.target.as_deref().unwrap_or_default();
        match &row[index] {
            Value::Link(k) => write_object(out, snapshot, target, *k, depth + 1, max_nesting)?,
            Value::List(keys) => {
                let _ = write!(out, "List<{target}> ({})", keys.len());
            }
            other => {
                let _ = write!(out, "{other}");
            }
        }
        out.push_str(";\n");
    }
    indent(out, depth);
    out.push('}');
    Ok(())
}

pub(crate) fn describe_object(
    snapshot: &Snapshot,
    class: &str,
    key: ObjectKey,
    max_nesting: usize,
) -> Result<String> {
    let mut out = String::new();
    write_object(&mut out, snapshot, class, key, 0, max_nesting)?;
    Ok(out)
}

impl Collection {
    /// Human-readable dump of every element.
    pub fn description(&self) -> Result<String> {
        let mut out = format!("{}<{}> (\n", self.core.kind.type_name(), self.core.class);
        let objects = self.elements()?.into_objects(&self.core.class);
        for (i, object) in objects.iter().enumerate() {
            if i > 0 {
                out.push_str(",\n");
            }
            let store = object.store();
            store.check()?;
            let _ = write!(out, "\t[{i}] ");
            write_object(
                &mut out,
                &store.current_view(),
                object.class_name(),
                object.key(),
                1,
                store.max_nesting(),
            )?;
        }
        if !objects.is_empty() {
            out.push('\n');
        }
        out.push(')');
        Ok(out)
    }
}
