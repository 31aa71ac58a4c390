//! Shared test utilities for the obs-io workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Observation data generators (locations, times, channel values)
//! - Common test fixtures (time windows, reference points)
//! - Tolerance assertions for distances, points and numeric columns
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{create_channel_grid, fixtures};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Assert two scalars agree within `epsilon`.
///
/// ```ignore
/// assert_approx_eq!(london.distance_km(&paris), 343.5, 5.0);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if !(diff <= epsilon) {
            panic!(
                "values differ by {:?} (allowed {:?}): left {:?}, right {:?}",
                diff, epsilon, left, right
            );
        }
    }};
}

/// Assert a point-like value (anything with `lon` and `lat` fields) sits
/// at `(lon, lat)` within `epsilon` degrees.
#[macro_export]
macro_rules! assert_point_approx_eq {
    ($point:expr, ($lon:expr, $lat:expr), $epsilon:expr) => {{
        let point = $point;
        $crate::assert_approx_eq!(point.lon, $lon, $epsilon);
        $crate::assert_approx_eq!(point.lat, $lat, $epsilon);
    }};
}

/// Assert two numeric columns have equal length and agree element-wise
/// within `epsilon`.
#[macro_export]
macro_rules! assert_column_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left = &$left;
        let right = &$right;
        assert_eq!(left.len(), right.len(), "column lengths differ");
        for (row, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            let diff = (*l as f64 - *r as f64).abs();
            if !(diff <= $epsilon as f64) {
                panic!(
                    "row {} differs by {:?} (allowed {:?}): left {:?}, right {:?}",
                    row, diff, $epsilon as f64, *l as f64, *r as f64
                );
            }
        }
    }};
}
