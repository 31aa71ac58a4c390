//! Error types for communication and record distribution.

use thiserror::Error;

/// Errors raised by the communicator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    /// Another rank failed and the group was aborted.
    #[error("communication aborted by a failing rank")]
    Aborted,

    /// A received message carried a different type than expected.
    #[error("type mismatch on receive from rank {source_rank} (tag {tag}): expected {expected}")]
    TypeMismatch {
        source_rank: usize,
        tag: u32,
        expected: &'static str,
    },

    /// Rank outside the communicator.
    #[error("invalid rank {rank} for communicator of size {size}")]
    InvalidRank { rank: usize, size: usize },

    /// A peer's mailbox is gone.
    #[error("rank {0} disconnected")]
    Disconnected(usize),

    /// A rank thread panicked.
    #[error("rank {0} panicked")]
    RankPanicked(usize),

    /// Invalid arguments to a collective.
    #[error("invalid collective call: {0}")]
    InvalidArgument(String),
}

/// Errors raised by distributions and the I/O pool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistributionError {
    /// Communication failure.
    #[error(transparent)]
    Comm(#[from] CommError),

    /// Unknown distribution name.
    #[error("unknown distribution '{name}' (registered: {registered})")]
    UnknownDistribution { name: String, registered: String },

    /// I/O pool step called out of order.
    #[error("io pool state error: {operation} requires state {expected}, current state is {actual}")]
    PoolState {
        operation: &'static str,
        expected: String,
        actual: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl DistributionError {
    /// Create a ConfigError.
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Result type for communicator operations.
pub type CommResult<T> = std::result::Result<T, CommError>;

/// Result type for distribution operations.
pub type Result<T> = std::result::Result<T, DistributionError>;
