//! Per-frame location quality checks.

use chrono::{DateTime, Utc};
use obs_common::TimeWindow;
use obs_store::{ElementValue, ElementValues};

/// A location that passed the checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Survivor {
    /// Position in the current frame.
    pub frame_index: usize,
    /// Row in the source: `frame_start + frame_index`.
    pub loc_index: u64,
}

/// Result of filtering one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    pub survivors: Vec<Survivor>,
    /// Locations rejected by the time window.
    pub outside_window: usize,
}

/// Geolocation columns of one frame with their fill values.
#[derive(Debug, Clone, Copy)]
pub struct Geolocation<'a> {
    pub lats: &'a ElementValues,
    pub lat_fill: &'a ElementValue,
    pub lons: &'a ElementValues,
    pub lon_fill: &'a ElementValue,
}

/// Every location of the frame survives.
pub fn all_locations(frame_start: u64, count: usize) -> FilterOutcome {
    FilterOutcome {
        survivors: (0..count)
            .map(|i| Survivor {
                frame_index: i,
                loc_index: frame_start + i as u64,
            })
            .collect(),
        outside_window: 0,
    }
}

/// Keep locations inside the window with non-missing latitude and longitude.
///
/// The time check runs first and only its rejections are counted in
/// `outside_window`; latitude is only checked for in-window locations and
/// longitude only when latitude passed.
pub fn filter_locations(
    frame_start: u64,
    times: &[DateTime<Utc>],
    geo: Geolocation<'_>,
    window: &TimeWindow,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for (i, time) in times.iter().enumerate() {
        if !window.contains(time) {
            outcome.outside_window += 1;
            continue;
        }
        if geo.lats.is_missing(i, geo.lat_fill) || geo.lons.is_missing(i, geo.lon_fill) {
            continue;
        }
        outcome.survivors.push(Survivor {
            frame_index: i,
            loc_index: frame_start + i as u64,
        });
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use obs_common::parse_datetime;
    use obs_store::ElementKind;
    use test_utils::window;

    fn t(s: &str) -> DateTime<Utc> {
        parse_datetime(s).unwrap()
    }

    fn test_window() -> TimeWindow {
        TimeWindow::parse(window::BEGIN, window::END).unwrap()
    }

    #[test]
    fn test_window_edges() {
        let times = vec![
            t(window::BEGIN),
            t(window::END),
            t(window::INSIDE),
            t("2018-04-15T03:00:01Z"),
        ];
        let lats: ElementValues = vec![1.0f32; 4].into();
        let lons: ElementValues = vec![2.0f32; 4].into();
        let fill = ElementKind::Float32.missing_value();
        let geo = Geolocation {
            lats: &lats,
            lat_fill: &fill,
            lons: &lons,
            lon_fill: &fill,
        };

        let outcome = filter_locations(100, &times, geo, &test_window());
        let kept: Vec<usize> = outcome.survivors.iter().map(|s| s.frame_index).collect();
        assert_eq!(kept, vec![1, 2]);
        assert_eq!(outcome.survivors[0].loc_index, 101);
        assert_eq!(outcome.outside_window, 2);
    }

    #[test]
    fn test_missing_geolocation_rejected_but_not_counted() {
        let times = vec![t(window::INSIDE); 3];
        let fill = ElementKind::Float32.missing_value();
        let missing = match fill {
            ElementValue::Float32(v) => v,
            _ => unreachable!(),
        };
        let lats: ElementValues = vec![missing, 1.0, 1.0].into();
        let lons: ElementValues = vec![1.0, f32::NAN, 1.0].into();
        let geo = Geolocation {
            lats: &lats,
            lat_fill: &fill,
            lons: &lons,
            lon_fill: &fill,
        };

        let outcome = filter_locations(0, &times, geo, &test_window());
        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.survivors[0].frame_index, 2);
        assert_eq!(outcome.outside_window, 0);
    }

    #[test]
    fn test_extended_lower_bound() {
        let window = test_window().with_extended_lower_bound(t("2018-04-14T18:00:00Z"));
        let times = vec![t("2018-04-14T20:00:00Z")];
        let lats: ElementValues = vec![0.0f32].into();
        let fill = ElementKind::Float32.missing_value();
        let geo = Geolocation {
            lats: &lats,
            lat_fill: &fill,
            lons: &lats,
            lon_fill: &fill,
        };
        assert_eq!(filter_locations(0, &times, geo, &window).survivors.len(), 1);
    }

    #[test]
    fn test_all_locations() {
        let outcome = all_locations(20, 3);
        let rows: Vec<u64> = outcome.survivors.iter().map(|s| s.loc_index).collect();
        assert_eq!(rows, vec![20, 21, 22]);
    }
}
