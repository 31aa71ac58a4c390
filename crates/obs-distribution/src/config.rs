//! Configuration for distributions and the I/O pool.

use obs_common::GeoPoint;
use serde::{Deserialize, Serialize};

/// Distribution selection and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Registered distribution name (`RoundRobin`, `Halo`, `Replicated`).
    pub name: String,

    /// Parameters for the Halo distribution.
    pub halo: HaloConfig,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            name: "RoundRobin".to_string(),
            halo: HaloConfig::default(),
        }
    }
}

impl DistributionConfig {
    /// A config selecting `name` with default parameters.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("distribution name must not be empty".to_string());
        }
        self.halo.validate()
    }
}

/// Halo distribution parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaloConfig {
    /// Halo radius around each rank's centre, in kilometers.
    pub radius_km: f64,

    /// Centre per rank. Defaults to points evenly spaced along the equator.
    pub centers: Option<Vec<GeoPoint>>,
}

impl Default for HaloConfig {
    fn default() -> Self {
        Self {
            radius_km: 2000.0,
            centers: None,
        }
    }
}

impl HaloConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.radius_km > 0.0) {
            return Err("halo radius_km must be > 0".to_string());
        }
        if let Some(centers) = &self.centers {
            if centers.is_empty() {
                return Err("halo centers must not be empty when given".to_string());
            }
            if centers.iter().any(|c| c.lat.abs() > 90.0) {
                return Err("halo center latitude must be within [-90, 90]".to_string());
            }
        }
        Ok(())
    }

    /// Centre of `rank` in a communicator of `size` ranks.
    pub fn center_for(&self, rank: usize, size: usize) -> Option<GeoPoint> {
        match &self.centers {
            Some(centers) => centers.get(rank).copied(),
            None => {
                let step = 360.0 / size.max(1) as f64;
                Some(GeoPoint::new(-180.0 + step * (rank as f64 + 0.5), 0.0))
            }
        }
    }
}

/// I/O pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoPoolConfig {
    /// Target number of pool ranks.
    pub max_pool_size: usize,

    /// How non-pool ranks are mapped onto pool ranks.
    pub grouping: RankGrouping,

    /// Each pool rank writes its own file instead of one shared file.
    pub write_multiple_files: bool,
}

impl Default for IoPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 4,
            grouping: RankGrouping::Contiguous,
            write_multiple_files: false,
        }
    }
}

impl IoPoolConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("OBS_IO_POOL_SIZE") {
            if let Ok(size) = val.parse() {
                config.max_pool_size = size;
            }
        }

        if let Ok(val) = std::env::var("OBS_IO_POOL_GROUPING") {
            config.grouping = RankGrouping::from_str(&val);
        }

        if let Ok(val) = std::env::var("OBS_WRITE_MULTIPLE_FILES") {
            config.write_multiple_files = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_pool_size == 0 {
            return Err("io pool max_pool_size must be > 0".to_string());
        }
        Ok(())
    }
}

/// Policy assigning non-pool ranks to pool ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RankGrouping {
    /// Consecutive ranks share a pool rank.
    #[default]
    Contiguous,
    /// Ranks are dealt out to pool ranks in turn.
    RoundRobin,
}

impl RankGrouping {
    /// Parse from string (case-insensitive), defaulting to contiguous.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().replace('_', "-").as_str() {
            "round-robin" | "roundrobin" => Self::RoundRobin,
            _ => Self::Contiguous,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contiguous => "contiguous",
            Self::RoundRobin => "round-robin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_defaults() {
        let config = DistributionConfig::default();
        assert_eq!(config.name, "RoundRobin");
        assert_eq!(config.halo.radius_km, 2000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_distribution_deserialize_partial() {
        let config: DistributionConfig =
            serde_json::from_str(r#"{"name": "Halo", "halo": {"radius_km": 500}}"#).unwrap();
        assert_eq!(config.name, "Halo");
        assert_eq!(config.halo.radius_km, 500.0);
        assert!(config.halo.centers.is_none());
    }

    #[test]
    fn test_halo_validate() {
        let mut halo = HaloConfig::default();
        halo.radius_km = 0.0;
        assert!(halo.validate().is_err());

        let halo = HaloConfig {
            radius_km: 100.0,
            centers: Some(vec![]),
        };
        assert!(halo.validate().is_err());
    }

    #[test]
    fn test_default_centers_spread_on_equator() {
        let halo = HaloConfig::default();
        let c0 = halo.center_for(0, 4).unwrap();
        let c3 = halo.center_for(3, 4).unwrap();
        assert_eq!(c0, GeoPoint::new(-135.0, 0.0));
        assert_eq!(c3, GeoPoint::new(135.0, 0.0));
    }

    #[test]
    fn test_explicit_centers() {
        let halo = HaloConfig {
            radius_km: 100.0,
            centers: Some(vec![GeoPoint::new(1.0, 2.0)]),
        };
        assert_eq!(halo.center_for(0, 2), Some(GeoPoint::new(1.0, 2.0)));
        assert_eq!(halo.center_for(1, 2), None);
    }

    #[test]
    fn test_rank_grouping_from_str() {
        assert_eq!(RankGrouping::from_str("round_robin"), RankGrouping::RoundRobin);
        assert_eq!(RankGrouping::from_str("Round-Robin"), RankGrouping::RoundRobin);
        assert_eq!(RankGrouping::from_str("contiguous"), RankGrouping::Contiguous);
        assert_eq!(RankGrouping::from_str("bogus"), RankGrouping::Contiguous);
    }

    #[test]
    fn test_io_pool_validate() {
        let config = IoPoolConfig {
            max_pool_size: 0,
            ..IoPoolConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(IoPoolConfig::default().validate().is_ok());
    }
}
