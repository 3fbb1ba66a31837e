//! Error types for haven.
//!
//! This module defines the crate-wide error type. Location acquisition has its
//! own narrower [`LocationError`] so that callers can degrade per reason; it is
//! wrapped here when it crosses into store or synchronizer code.

use std::path::PathBuf;
use thiserror::Error;

use crate::location::LocationError;

/// The main error type for haven operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Document Errors ===
    /// The requested document does not exist.
    #[error("document not found: {collection}/{id}")]
    DocumentNotFound {
        /// Collection that was queried.
        collection: String,
        /// Document identifier.
        id: String,
    },

    /// The family has been archived and no longer accepts changes.
    #[error("family {code} is archived")]
    FamilyArchived {
        /// Family code.
        code: String,
    },

    /// The user is not a member of the family.
    #[error("user {user} is not a member of family {family}")]
    MemberNotFound {
        /// Family code.
        family: String,
        /// User identifier.
        user: String,
    },

    /// A stored document could not be interpreted.
    #[error("invalid document {collection}/{id}: {message}")]
    InvalidDocument {
        /// Collection of the document.
        collection: String,
        /// Document identifier.
        id: String,
        /// Description of what is wrong with it.
        message: String,
    },

    /// A family code is not six ASCII digits.
    #[error("invalid family code '{0}': expected 6 digits")]
    InvalidFamilyCode(String),

    /// The synchronizer has no family attached.
    #[error("no family attached")]
    NotAttached,

    // === Location Errors ===
    /// Location acquisition failed.
    #[error("location error: {0}")]
    Location(#[from] LocationError),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for haven operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a document-not-found error.
    #[must_use]
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DocumentNotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create an invalid-document error.
    #[must_use]
    pub fn invalid_document(
        collection: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidDocument {
            collection: collection.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a member-not-found error.
    #[must_use]
    pub fn member_not_found(family: impl Into<String>, user: impl Into<String>) -> Self {
        Self::MemberNotFound {
            family: family.into(),
            user: user.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the target family or user is gone.
    ///
    /// Covers deleted documents, archived families and departed members, the
    /// cases where an operation aborts quietly instead of reporting a fault.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DocumentNotFound { .. } | Self::FamilyArchived { .. } | Self::MemberNotFound { .. }
        )
    }

    /// Check if this error is a permission issue.
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::Location(LocationError::PermissionDenied))
    }
}
