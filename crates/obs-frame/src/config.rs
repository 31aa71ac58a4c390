//! Observation space configuration.
//!
//! # Example
//!
//! ```yaml
//! name: AMSU-A
//! window:
//!   begin: "2018-04-14T21:00:00Z"
//!   end: "2018-04-15T03:00:00Z"
//! obsdatain:
//!   engine:
//!     type: zarr
//!     path: /data/amsua.zarr
//!   max_frame_size: 10000
//!   obsgrouping:
//!     group_variables: [stationIdentification]
//!     sort_variable: pressure
//!     sort_order: descending
//! distribution:
//!   name: RoundRobin
//! io_pool:
//!   max_pool_size: 4
//! ```

use std::path::PathBuf;

use obs_common::TimeWindow;
use obs_distribution::{DistributionConfig, IoPoolConfig};
use serde::{Deserialize, Serialize};

/// Default maximum number of rows per frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10000;

/// Complete configuration of one observation space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObsSpaceConfig {
    /// Name used in logs.
    pub name: String,

    /// Assimilation window.
    pub window: TimeWindow,

    /// Input source.
    pub obsdatain: ObsDataInConfig,

    /// Output settings.
    #[serde(default)]
    pub obsdataout: Option<ObsDataOutConfig>,

    /// Record ownership policy.
    #[serde(default)]
    pub distribution: DistributionConfig,

    /// I/O pool used for writing.
    #[serde(default)]
    pub io_pool: IoPoolConfig,
}

impl ObsSpaceConfig {
    /// A config with default input settings for `engine`.
    pub fn new(name: impl Into<String>, window: TimeWindow, engine: EngineConfig) -> Self {
        Self {
            name: name.into(),
            window,
            obsdatain: ObsDataInConfig::new(engine),
            obsdataout: None,
            distribution: DistributionConfig::default(),
            io_pool: IoPoolConfig::default(),
        }
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("OBS_MAX_FRAME_SIZE") {
            if let Ok(size) = val.parse() {
                self.obsdatain.max_frame_size = size;
            }
        }

        if let Ok(val) = std::env::var("OBS_DISTRIBUTION") {
            if !val.trim().is_empty() {
                self.distribution.name = val.trim().to_string();
            }
        }

        if let Ok(val) = std::env::var("OBS_IO_POOL_SIZE") {
            if let Ok(size) = val.parse() {
                self.io_pool.max_pool_size = size;
            }
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        self.window.validate().map_err(|e| e.to_string())?;
        self.obsdatain.validate()?;
        self.distribution.validate()?;
        self.io_pool.validate()?;
        Ok(())
    }
}

/// Input settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObsDataInConfig {
    pub engine: EngineConfig,

    /// Maximum number of rows per frame.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default)]
    pub obsgrouping: ObsGroupingConfig,

    /// Each rank reads its own file, named `<path>_<rank>`.
    #[serde(default)]
    pub read_obs_from_separate_file: bool,

    /// Reject locations outside the window or with missing geolocation.
    #[serde(default = "default_true")]
    pub apply_locations_check: bool,
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_true() -> bool {
    true
}

impl ObsDataInConfig {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            obsgrouping: ObsGroupingConfig::default(),
            read_obs_from_separate_file: false,
            apply_locations_check: true,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be > 0".to_string());
        }
        if self.read_obs_from_separate_file && !matches!(self.engine, EngineConfig::Zarr { .. }) {
            return Err("read_obs_from_separate_file requires a file engine".to_string());
        }
        self.engine.validate()?;
        self.obsgrouping.validate()
    }
}

/// Where observations come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineConfig {
    /// A Zarr store on the local filesystem.
    Zarr { path: PathBuf },
    /// Locations listed inline.
    List {
        lats: Vec<f32>,
        lons: Vec<f32>,
        datetimes: Vec<String>,
    },
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Zarr { path } => {
                if path.as_os_str().is_empty() {
                    return Err("zarr engine path must not be empty".to_string());
                }
            }
            Self::List {
                lats,
                lons,
                datetimes,
            } => {
                if lats.len() != lons.len() || lats.len() != datetimes.len() {
                    return Err(format!(
                        "list engine lengths differ: {} lats, {} lons, {} datetimes",
                        lats.len(),
                        lons.len(),
                        datetimes.len()
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zarr { .. } => "zarr",
            Self::List { .. } => "list",
        }
    }
}

/// Record grouping and in-record sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsGroupingConfig {
    /// `MetaData` variables whose values form the record key.
    pub group_variables: Vec<String>,

    /// Variable ordering locations inside each record.
    pub sort_variable: Option<String>,

    /// Group holding the sort variable.
    pub sort_group: String,

    pub sort_order: SortOrder,

    pub missing_sort_value_treatment: MissingSortTreatment,
}

impl Default for ObsGroupingConfig {
    fn default() -> Self {
        Self {
            group_variables: Vec::new(),
            sort_variable: None,
            sort_group: "MetaData".to_string(),
            sort_order: SortOrder::Ascending,
            missing_sort_value_treatment: MissingSortTreatment::Sort,
        }
    }
}

impl ObsGroupingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.group_variables.iter().any(|v| v.trim().is_empty()) {
            return Err("obsgrouping group_variables must not contain empty names".to_string());
        }
        if self.sort_variable.is_some() && self.group_variables.is_empty() {
            return Err("obsgrouping sort_variable requires group_variables".to_string());
        }
        Ok(())
    }

    /// Full path of the sort variable, if any.
    pub fn sort_path(&self) -> Option<String> {
        self.sort_variable
            .as_ref()
            .map(|v| format!("{}/{}", self.sort_group, v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// How locations with a missing sort value are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MissingSortTreatment {
    /// Missing values are sorted like any other value.
    #[default]
    #[serde(rename = "sort")]
    Sort,
    /// Records containing a missing value keep file order.
    #[serde(rename = "do not sort")]
    DoNotSort,
    /// Non-missing values are sorted and missing ones follow in file order.
    #[serde(rename = "ignore missing")]
    IgnoreMissing,
}

/// Output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObsDataOutConfig {
    pub path: PathBuf,

    /// Also write `MetaData/saved_index` and `MetaData/saved_record_number`
    /// so the output can be read back as separate per-rank files.
    #[serde(default)]
    pub save_obs_distribution: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::window;

    const YAML: &str = r#"
name: Radiosonde
window:
  begin: "2018-04-14T21:00:00Z"
  end: "2018-04-15T03:00:00Z"
obsdatain:
  engine:
    type: zarr
    path: /data/sondes.zarr
  obsgrouping:
    group_variables: [stationIdentification]
    sort_variable: pressure
    sort_order: descending
    missing_sort_value_treatment: ignore missing
distribution:
  name: Halo
  halo:
    radius_km: 1500
"#;

    #[test]
    fn test_deserialize_yaml() {
        let config: ObsSpaceConfig = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(config.name, "Radiosonde");
        assert_eq!(config.obsdatain.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.obsdatain.apply_locations_check);
        assert_eq!(
            config.obsdatain.engine,
            EngineConfig::Zarr {
                path: PathBuf::from("/data/sondes.zarr")
            }
        );
        let grouping = &config.obsdatain.obsgrouping;
        assert_eq!(grouping.sort_order, SortOrder::Descending);
        assert_eq!(grouping.missing_sort_value_treatment, MissingSortTreatment::IgnoreMissing);
        assert_eq!(grouping.sort_path().as_deref(), Some("MetaData/pressure"));
        assert_eq!(config.distribution.name, "Halo");
        assert_eq!(config.distribution.halo.radius_km, 1500.0);
        assert_eq!(config.io_pool, IoPoolConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_list_engine_lengths_validated() {
        let window = TimeWindow::parse(window::BEGIN, window::END).unwrap();
        let engine = EngineConfig::List {
            lats: vec![1.0, 2.0],
            lons: vec![1.0],
            datetimes: vec![window::INSIDE.to_string(); 2],
        };
        let config = ObsSpaceConfig::new("list", window, engine);
        assert!(config.validate().unwrap_err().contains("lengths differ"));
    }

    #[test]
    fn test_validate_rejects_zero_frame_size() {
        let window = TimeWindow::parse(window::BEGIN, window::END).unwrap();
        let mut config = ObsSpaceConfig::new(
            "zero",
            window,
            EngineConfig::Zarr {
                path: PathBuf::from("in.zarr"),
            },
        );
        config.obsdatain.max_frame_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sort_requires_grouping() {
        let grouping = ObsGroupingConfig {
            sort_variable: Some("pressure".to_string()),
            ..ObsGroupingConfig::default()
        };
        assert!(grouping.validate().is_err());
    }
}
