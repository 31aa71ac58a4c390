//! Test data generators for synthetic observation tables.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite.

use chrono::{DateTime, Duration, Utc};

/// Creates a Location x Channel value grid with predictable values.
///
/// Each value is calculated as: `loc * 1000 + chan`
///
/// # Returns
///
/// A `Vec<f32>` in row-major order (location 0 first, then location 1, etc.)
///
/// # Example
///
/// ```
/// use test_utils::create_channel_grid;
///
/// let grid = create_channel_grid(4, 3);
/// assert_eq!(grid.len(), 12);
/// assert_eq!(grid[1], 1.0);    // loc=0, chan=1
/// assert_eq!(grid[3], 1000.0); // loc=1, chan=0
/// ```
pub fn create_channel_grid(nlocs: usize, nchans: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(nlocs * nchans);
    for loc in 0..nlocs {
        for chan in 0..nchans {
            data.push((loc * 1000 + chan) as f32);
        }
    }
    data
}

/// Creates `n` locations spread along a line from (-170, -80) to (170, 80).
///
/// # Returns
///
/// `(lats, lons)` in degrees.
pub fn create_location_series(n: usize) -> (Vec<f32>, Vec<f32>) {
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let step = if n > 1 { 1.0 / (n - 1) as f32 } else { 0.0 };
    let lats = (0..n).map(|i| -80.0 + 160.0 * step * i as f32).collect();
    let lons = (0..n).map(|i| -170.0 + 340.0 * step * i as f32).collect();
    (lats, lons)
}

/// Creates `n` date times starting at `start`, `step_secs` apart.
pub fn create_datetime_series(start: DateTime<Utc>, n: usize, step_secs: i64) -> Vec<DateTime<Utc>> {
    (0..n)
        .map(|i| start + Duration::seconds(step_secs * i as i64))
        .collect()
}

/// Creates station identifiers `STN0000`, `STN0001`, ...
pub fn create_station_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("STN{:04}", i)).collect()
}

/// Creates station identifiers where each station reports `per_station`
/// consecutive locations: `STN0000, STN0000, STN0001, STN0001, ...`.
pub fn create_repeated_station_ids(n: usize, per_station: usize) -> Vec<String> {
    let per_station = per_station.max(1);
    (0..n)
        .map(|i| format!("STN{:04}", i / per_station))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_channel_grid_values() {
        let grid = create_channel_grid(3, 2);
        assert_eq!(grid, vec![0.0, 1.0, 1000.0, 1001.0, 2000.0, 2001.0]);
    }

    #[test]
    fn test_location_series_bounds() {
        let (lats, lons) = create_location_series(5);
        assert_eq!(lats.len(), 5);
        assert_eq!(lats[0], -80.0);
        assert_eq!(lats[4], 80.0);
        assert_eq!(lons[0], -170.0);
        assert_eq!(lons[4], 170.0);

        let (lats, _) = create_location_series(1);
        assert_eq!(lats, vec![-80.0]);
    }

    #[test]
    fn test_datetime_series() {
        let start = Utc.with_ymd_and_hms(2018, 4, 15, 0, 0, 0).unwrap();
        let times = create_datetime_series(start, 3, 60);
        assert_eq!(times[2] - times[0], Duration::seconds(120));
    }

    #[test]
    fn test_station_ids() {
        assert_eq!(create_station_ids(2), vec!["STN0000", "STN0001"]);
        assert_eq!(
            create_repeated_station_ids(5, 2),
            vec!["STN0000", "STN0000", "STN0001", "STN0001", "STN0002"]
        );
    }
}
