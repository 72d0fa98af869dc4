//! Error types for the ETL library.

use thiserror::Error;

/// Main error type for ETL operations.
///
/// The variants follow the operational taxonomy: configuration errors are
/// never retried, transient runtime errors are eligible for [`crate::retry`],
/// data errors are fatal to the affected relation, and everything else
/// propagates to the caller.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Configuration error (invalid YAML, missing fields, unknown schema, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Arguments detected to be invalid by a command callback
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Evaluation order runs in circles
    #[error("Cyclic dependency involving relation '{0}'")]
    CyclicDependency(String),

    /// The query (SQL file) for a CTAS or view is missing
    #[error("Missing query (SQL file) for relation '{0}'")]
    MissingQuery(String),

    /// Extracting from an upstream source failed (transient)
    #[error("Data extract error: {0}")]
    DataExtract(String),

    /// No valid CSV files were found for a relation (transient)
    #[error("Missing CSV files for '{relation}': {message}")]
    MissingCsvFiles { relation: String, message: String },

    /// The manifest file for a relation is missing at load time
    #[error("Missing manifest file for '{0}'")]
    MissingManifest(String),

    /// Problem talking to the object store
    #[error("Object store error: {0}")]
    Store(String),

    /// A relation's target table violates one of its declared constraints
    #[error(
        "relation {identifier} violates {constraint} constraint on [{}].\nExample duplicate values:\n  {}",
        columns.join(", "),
        examples.join(",\n  ")
    )]
    FailedConstraint {
        identifier: String,
        constraint: String,
        columns: Vec<String>,
        examples: Vec<String>,
    },

    /// A required relation (or one of its required dependents) failed to load
    #[error(
        "required relation(s) with failure: {}, triggered by load failure of '{relation}'",
        required.join(", ")
    )]
    RequiredRelationLoad {
        relation: String,
        required: Vec<String>,
        #[source]
        cause: Box<EtlError>,
    },

    /// Warehouse-level error without an underlying driver error
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    /// Warehouse driver error
    #[error("Warehouse driver error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// All retry attempts have been exhausted; preserves the last transient cause
    #[error("Reached max number of retries ({attempts})")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        cause: Box<EtlError>,
    },

    /// A spawned task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtlError {
    /// Whether this error was caused by a temporary external condition and
    /// may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EtlError::DataExtract(_) | EtlError::MissingCsvFiles { .. }
        )
    }

    /// Create a Store error with context about the failing object.
    pub fn store(message: impl Into<String>) -> Self {
        EtlError::Store(message.into())
    }

    /// Format error with full details including the error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Exit code for the CLI: configuration problems exit with 2, everything
    /// else with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            EtlError::Config(_)
            | EtlError::InvalidArgument(_)
            | EtlError::CyclicDependency(_)
            | EtlError::MissingQuery(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias for ETL operations.
pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EtlError::DataExtract("boom".into()).is_transient());
        assert!(EtlError::MissingCsvFiles {
            relation: "www.orders".into(),
            message: "no files".into()
        }
        .is_transient());
        assert!(!EtlError::Config("bad".into()).is_transient());
        assert!(!EtlError::MissingManifest("www.orders".into()).is_transient());
        assert!(!EtlError::Store("503".into()).is_transient());
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let err = EtlError::RetriesExhausted {
            attempts: 3,
            cause: Box::new(EtlError::DataExtract("connection reset".into())),
        };
        let detailed = err.format_detailed();
        assert!(detailed.contains("max number of retries"));
        assert!(detailed.contains("Caused by"));
        assert!(detailed.contains("connection reset"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EtlError::Config("x".into()).exit_code(), 2);
        assert_eq!(EtlError::CyclicDependency("a.b".into()).exit_code(), 2);
        assert_eq!(EtlError::Warehouse("x".into()).exit_code(), 1);
    }
}
