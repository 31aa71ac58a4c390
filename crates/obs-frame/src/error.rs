//! Error types for frame reading and the observation space.

use obs_common::TimeParseError;
use obs_distribution::{CommError, DistributionError};
use obs_store::{ElementKind, StoreError};
use thiserror::Error;

/// Errors raised while reading, distributing or writing observations.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Backend failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Communication or distribution failure.
    #[error(transparent)]
    Distribution(#[from] DistributionError),

    /// Unparseable date/time value or attribute.
    #[error("time error: {0}")]
    Time(#[from] TimeParseError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A variable the reader depends on is absent.
    #[error("required variable '{0}' not found")]
    MissingVariable(String),

    /// A variable has a kind the operation cannot handle.
    #[error("variable '{name}' has unsupported kind {kind}")]
    UnsupportedKind { name: String, kind: ElementKind },

    /// A value is missing, negative or otherwise unusable where a row or
    /// record number is expected.
    #[error("variable '{name}' has invalid value {value} at row {row}")]
    InvalidValue { name: String, row: usize, value: f64 },

    /// An index does not fit the element kind it is written as.
    #[error("variable '{name}' cannot hold {value} as {kind}")]
    Overflow {
        name: String,
        value: usize,
        kind: ElementKind,
    },

    /// Operation called in the wrong reader state.
    #[error("invalid reader state: {0}")]
    State(String),
}

impl From<CommError> for FrameError {
    fn from(err: CommError) -> Self {
        Self::Distribution(DistributionError::Comm(err))
    }
}

impl FrameError {
    /// Create a ConfigError.
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a State error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

/// Result type for frame operations.
pub type Result<T> = std::result::Result<T, FrameError>;
