//! Error types for the shelfdb engine.

use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in shelfdb engine operations.
///
/// Every variant maps to a machine-readable kind via [`CoreError::kind`]:
/// `validation`, `filesystem`, `encryption`, `query`, or `transaction`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input validation failed before any I/O or mutation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of what was rejected.
        message: String,
        /// The collection involved, when known.
        collection: Option<String>,
    },

    /// Store backend error.
    #[error("storage error: {0}")]
    FileSystem(#[from] shelfdb_store::StorageError),

    /// A collection file exists but does not hold a valid collection.
    #[error("malformed collection file for {collection}: {message}")]
    Malformed {
        /// The collection whose file is unreadable.
        collection: String,
        /// Description of the parse failure.
        message: String,
    },

    /// Encryption or decryption failed.
    #[error("encryption error: {message}")]
    Encryption {
        /// Description of the failure.
        message: String,
    },

    /// A query used an unsupported operator or invalid options.
    #[error("query error: {message}")]
    Query {
        /// Description of the failure.
        message: String,
    },

    /// A transaction handle is unknown or already finished.
    #[error("unknown transaction: {id}")]
    UnknownTransaction {
        /// The rejected handle.
        id: String,
    },

    /// The database has been closed.
    #[error("database is closed")]
    Closed,
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            collection: None,
        }
    }

    /// Creates a validation error scoped to a collection.
    pub fn validation_for(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            collection: Some(collection.into()),
        }
    }

    /// Creates a malformed collection file error.
    pub fn malformed(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Returns the machine-readable error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::Closed => "validation",
            Self::FileSystem(_) | Self::Malformed { .. } => "filesystem",
            Self::Encryption { .. } => "encryption",
            Self::Query { .. } => "query",
            Self::UnknownTransaction { .. } => "transaction",
        }
    }
}
