//! Error types for observation storage.

use thiserror::Error;

use crate::element::ElementKind;

/// Errors that can occur while accessing an observation store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open or create the store.
    #[error("failed to open store: {0}")]
    OpenFailed(String),

    /// Failed to read variable data.
    #[error("failed to read variable '{name}': {msg}")]
    ReadFailed { name: String, msg: String },

    /// Failed to write variable data.
    #[error("failed to write variable '{name}': {msg}")]
    WriteFailed { name: String, msg: String },

    /// The variable or dimension does not exist.
    #[error("variable not found: {0}")]
    NotFound(String),

    /// A variable or dimension with this name already exists.
    #[error("variable already exists: {0}")]
    AlreadyExists(String),

    /// The element kind of the data does not match the variable.
    #[error("element kind mismatch for '{name}': expected {expected}, got {actual}")]
    KindMismatch {
        name: String,
        expected: ElementKind,
        actual: ElementKind,
    },

    /// Memory and storage selections describe different element counts.
    #[error("selection mismatch for '{name}': memory selects {memory} elements, storage selects {storage}")]
    SelectionMismatch {
        name: String,
        memory: usize,
        storage: usize,
    },

    /// A selection reaches outside the variable's current shape.
    #[error("selection out of bounds for '{name}': {msg}")]
    OutOfBounds { name: String, msg: String },

    /// Invalid selection or schema definition.
    #[error("invalid definition: {0}")]
    Invalid(String),

    /// Invalid catalogue metadata in the store.
    #[error("invalid store metadata: {0}")]
    InvalidMetadata(String),

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    ZarrError(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    StorageError(String),
}

impl StoreError {
    /// Create a ReadFailed error.
    pub fn read_failed(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ReadFailed {
            name: name.into(),
            msg: msg.into(),
        }
    }

    /// Create a WriteFailed error.
    pub fn write_failed(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::WriteFailed {
            name: name.into(),
            msg: msg.into(),
        }
    }

    /// Create an OutOfBounds error.
    pub fn out_of_bounds(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::OutOfBounds {
            name: name.into(),
            msg: msg.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create an Invalid error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Create a ZarrError.
    pub fn zarr_error(msg: impl Into<String>) -> Self {
        Self::ZarrError(msg.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
