use thiserror::Error;

use crate::schema::SchemaKind;

pub type Result<T> = std::result::Result<T, FalkorError>;

#[derive(Debug, Error)]
pub enum FalkorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server rejected the statement. `message` is the server's text, untouched.
    #[error("Query error: {message}")]
    Query { message: String },

    #[error("Decode error at row {row}, column {column}: {source}")]
    Decode {
        row: usize,
        column: usize,
        #[source]
        source: DecodeError,
    },

    #[error("State error: {0}")]
    State(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid parameter {name}: {reason}")]
    Param { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Column index {index} out of range ({len} columns)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Missing property: {0}")]
    MissingProperty(String),
}

impl FalkorError {
    /// Errors after which the connection can no longer be trusted.
    pub(crate) fn is_fatal_to_connection(&self) -> bool {
        matches!(self, FalkorError::Transport(_) | FalkorError::Protocol(_))
    }
}

/// Failure to map one wire value onto a known [`crate::Value`] kind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unknown wire type tag {0}")]
    UnknownTypeTag(i64),

    #[error("unknown column type {0}")]
    UnknownColumnType(i64),

    #[error("malformed {kind}: {detail}")]
    Malformed { kind: &'static str, detail: String },

    #[error("{kind} id {id} is not in the schema dictionary")]
    UnresolvedSchemaId { kind: SchemaKind, id: i64 },
}

impl DecodeError {
    pub(crate) fn malformed(kind: &'static str, detail: impl Into<String>) -> Self {
        DecodeError::Malformed {
            kind,
            detail: detail.into(),
        }
    }
}
