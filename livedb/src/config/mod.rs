use crate::error::{LiveDbError, Result};
use crate::schema::{parse_schema, parse_schema_str, SchemaDefinition};
use std::path::{Path, PathBuf};

/// Depth at which `description()` stops printing nested objects.
pub const DEFAULT_MAX_NESTING: usize = 5;

/// How to open a database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Identifies the database. Stores opened on the same path share one
    /// database and see each other's commits.
    pub path: PathBuf,
    pub schema: SchemaDefinition,
    pub max_nesting: usize,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>, schema: SchemaDefinition) -> Self {
        StoreConfig {
            path: path.into(),
            schema,
            max_nesting: DEFAULT_MAX_NESTING,
        }
    }

    /// Read `<dir>/schema.yaml`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            return Err(LiveDbError::Other(format!(
                "Data directory does not exist: {}",
                dir.display()
            )));
        }

        let schema_path = dir.join("schema.yaml");
        if !schema_path.exists() {
            return Err(LiveDbError::Schema(format!(
                "schema.yaml not found in {}",
                dir.display()
            )));
        }

        Ok(Self::new(dir, parse_schema(&schema_path)?))
    }

    /// A config for a private database that no other path can reach.
    pub fn in_memory(schema: SchemaDefinition) -> Self {
        Self::new(format!("memory:{}", uuid::Uuid::new_v4()), schema)
    }

    /// Like `in_memory`, parsing the schema from YAML.
    pub fn in_memory_yaml(schema_yaml: &str) -> Result<Self> {
        Ok(Self::in_memory(parse_schema_str(schema_yaml)?))
    }

    pub fn with_max_nesting(mut self, max_nesting: usize) -> Self {
        self.max_nesting = max_nesting;
        self
    }
}
