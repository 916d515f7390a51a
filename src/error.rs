use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Failed to parse {path}: {message}")]
    ParseFailure { path: String, message: String },

    #[error("I/O error on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema mismatch on node {node_id}: field '{field}' expected {expected}, found {found}")]
    SchemaMismatch {
        node_id: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("Structural invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Unknown schema field: {0}")]
    UnknownField(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the failure is scoped to a single file and may be skipped
    /// under a best-effort collection policy.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::ParseFailure { .. } | Self::IoFailure { .. })
    }
}

impl From<config::ConfigError> for IndexerError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_file_classification() {
        let parse = IndexerError::parse("a.js", "unexpected token");
        assert!(parse.is_per_file());

        let io = IndexerError::io(
            "missing.js",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(io.is_per_file());

        let schema = IndexerError::SchemaMismatch {
            node_id: "n1".to_string(),
            field: "name".to_string(),
            expected: "string".to_string(),
            found: "number".to_string(),
        };
        assert!(!schema.is_per_file());
        assert!(!IndexerError::InvariantViolation("cycle".to_string()).is_per_file());
    }

    #[test]
    fn test_error_messages() {
        let err = IndexerError::parse("src/app.js", "encoding error");
        assert_eq!(err.to_string(), "Failed to parse src/app.js: encoding error");

        let err = IndexerError::UnknownField("colour".to_string());
        assert_eq!(err.to_string(), "Unknown schema field: colour");
    }
}
