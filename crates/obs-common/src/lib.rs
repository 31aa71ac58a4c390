//! Common types and utilities shared across the obs-io crates.

pub mod error;
pub mod geo;
pub mod time;

pub use error::{TimeParseError, TimeResult};
pub use geo::GeoPoint;
pub use time::{parse_datetime, parse_epoch_units, reference_datetime, TimeWindow};
