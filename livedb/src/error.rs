use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveDbError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Index {index} is out of range (count is {count})")]
    OutOfRange { index: i64, count: usize },

    #[error("Invalid property '{property}' on '{class}': {reason}")]
    InvalidProperty {
        class: String,
        property: String,
        reason: String,
    },

    #[error("Operation not supported: {0}")]
    Capability(String),

    #[error("Invalidated: {0}")]
    Invalidated(String),

    #[error("Write transaction required: {0}")]
    WriteRequired(String),

    #[error("Accessed from the wrong context: {0}")]
    WrongContext(String),

    #[error("Object not found: {class}/{key}")]
    NotFound { class: String, key: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl LiveDbError {
    pub(crate) fn invalid_property(class: &str, property: &str, reason: impl Into<String>) -> Self {
        LiveDbError::InvalidProperty {
            class: class.to_string(),
            property: property.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LiveDbError>;
