//! Strata Core - Shared types, traits, and normalization for every engine
//!
//! This crate defines the abstractions the engine crates build on:
//! - The tabular result shape returned by every query
//! - Command splitting per dialect (SQL, JSON command objects, Cypher)
//! - Normalization of rows, nested documents and graph elements
//! - The `Connector` / `DatabaseConnector` trait hierarchy
//! - Common error types and configuration

pub mod config;
pub mod connector;
pub mod normalize;
pub mod sort;
pub mod splitter;
pub mod table;

pub use config::{ConfigError, EngineCredentials, LoggingConfig, StrataConfig};
pub use connector::{settle, temp_database, Connector, DatabaseConnector};
pub use table::TabularResult;

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Boxed error used to chain driver failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error types for Strata operations
#[derive(Error, Debug)]
pub enum StrataError {
    /// Bad address or credentials. Never retried.
    #[error("Connection to {target} failed: {message}")]
    ConnectionFailure {
        /// Connection string with the password masked
        target: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Query failed: {message}\n  command: {command}")]
    QueryExecutionFailure {
        command: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Requested table, collection or graph does not exist
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Validation error: {0}")]
    ValidationFailure(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to run file {path}: {source}")]
    FileFailure {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrataError {
    /// Wrap a driver error raised while connecting
    pub fn connection(
        target: impl Into<String>,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConnectionFailure {
            target: target.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Wrap a driver error raised while running `command`
    pub fn query(
        command: impl Into<String>,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::QueryExecutionFailure {
            command: command.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Backend rejection that carries no driver error of its own
    pub fn rejected(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryExecutionFailure {
            command: command.into(),
            message: message.into(),
            source: None,
        }
    }

    /// True for "resource not found" failures that read paths may treat as empty
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SchemaMismatch(_))
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;

// ============================================================================
// Dialects
// ============================================================================

/// Command language accepted by a connector
///
/// The dialect is implied by which connector receives a command and is
/// never detected from the command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// SQL for MySQL / PostgreSQL
    Sql,
    /// JSON command objects for MongoDB
    Document,
    /// Cypher for the property graph
    Graph,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql => write!(f, "sql"),
            Self::Document => write!(f, "document"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Reject resource names that cannot be safely interpolated into a command
///
/// Allows ASCII letters, digits, `_`, `-` and `$`, and the name must not
/// start with a digit.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$'));

    if valid_start && valid_rest {
        Ok(name)
    } else {
        Err(StrataError::ValidationFailure(format!(
            "invalid resource name: {name:?}"
        )))
    }
}

/// Render a cell as a lookup key: strings verbatim, everything else as JSON
pub fn value_key(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
