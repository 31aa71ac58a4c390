//! Error types for time handling.

use thiserror::Error;

/// Result type alias using TimeParseError.
pub type TimeResult<T> = Result<T, TimeParseError>;

/// Errors raised while decoding observation timestamps.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Invalid reference date time {0} (expected YYYYMMDDhh)")]
    InvalidReference(i64),

    #[error("Invalid epoch units '{0}' (expected 'seconds since <ISO 8601>')")]
    InvalidUnits(String),

    #[error("Invalid time window: begin {begin} is not before end {end}")]
    InvalidWindow { begin: String, end: String },
}
