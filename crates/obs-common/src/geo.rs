//! Geographic points.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A geolocation in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Great-circle distance to `other` in kilometers (haversine formula).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();

        EARTH_RADIUS_KM * c
    }

    /// Longitude wrapped into `[-180, 180)`.
    pub fn normalized(&self) -> Self {
        let mut lon = (self.lon + 180.0) % 360.0;
        if lon < 0.0 {
            lon += 360.0;
        }
        Self {
            lon: lon - 180.0,
            lat: self.lat,
        }
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lon, self.lat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{assert_approx_eq, assert_point_approx_eq, points};

    fn point(p: (f64, f64)) -> GeoPoint {
        GeoPoint::new(p.0, p.1)
    }

    #[test]
    fn test_distance_london_paris() {
        let d = point(points::LONDON).distance_km(&point(points::PARIS));
        assert_approx_eq!(d, 343.5, 5.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let there = point(points::LONDON).distance_km(&point(points::BOULDER));
        let back = point(points::BOULDER).distance_km(&point(points::LONDON));
        assert_approx_eq!(there, back, 1e-6);
        assert_approx_eq!(there, 7533.3, 1.0);
    }

    #[test]
    fn test_distance_same_point() {
        let p = GeoPoint::new(-97.5, 35.2);
        assert_approx_eq!(p.distance_km(&p), 0.0, 1e-9);
    }

    #[test]
    fn test_normalized() {
        assert_point_approx_eq!(GeoPoint::new(190.0, 0.0).normalized(), (-170.0, 0.0), 1e-9);
        assert_point_approx_eq!(GeoPoint::new(-190.0, 0.0).normalized(), (170.0, 0.0), 1e-9);
        assert_point_approx_eq!(GeoPoint::new(45.0, 10.0).normalized(), (45.0, 10.0), 1e-9);
    }
}
