//! Observation sources: a backend store plus how to read it.

use std::path::{Path, PathBuf};

use obs_common::parse_datetime;
use obs_distribution::{uniquify_file_name, Comm};
use obs_store::{ElementKind, MemoryStore, ObsStore, VariableSpec, ZarrStore};
use tracing::info;

use crate::config::{EngineConfig, ObsDataInConfig};
use crate::error::{FrameError, Result};

/// Name of the primary dimension.
pub const LOCATION: &str = "Location";

/// Dimension never capped at the frame size.
pub const CHANNEL: &str = "Channel";

pub struct ObsSource {
    store: Box<dyn ObsStore>,
    path: Option<PathBuf>,
    separate_obs: bool,
    apply_locations_check: bool,
    group_variables: Vec<String>,
    max_frame_size: u64,
}

impl std::fmt::Debug for ObsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObsSource")
            .field("path", &self.path)
            .field("separate_obs", &self.separate_obs)
            .field("apply_locations_check", &self.apply_locations_check)
            .field("group_variables", &self.group_variables)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

impl ObsSource {
    /// Wrap an open store with default read settings.
    pub fn new(store: Box<dyn ObsStore>) -> Self {
        Self {
            store,
            path: None,
            separate_obs: false,
            apply_locations_check: true,
            group_variables: Vec::new(),
            max_frame_size: crate::config::DEFAULT_MAX_FRAME_SIZE as u64,
        }
    }

    /// Open the source described by `config` on this rank.
    pub fn from_config(config: &ObsDataInConfig, comm: &Comm) -> Result<Self> {
        let (store, path): (Box<dyn ObsStore>, Option<PathBuf>) = match &config.engine {
            EngineConfig::Zarr { path } => {
                let path = if config.read_obs_from_separate_file {
                    uniquify_file_name(path, comm.rank())
                } else {
                    path.clone()
                };
                (Box::new(ZarrStore::open(&path)?), Some(path))
            }
            EngineConfig::List {
                lats,
                lons,
                datetimes,
            } => (Box::new(generate_list(lats, lons, datetimes)?), None),
        };
        info!(
            engine = config.engine.as_str(),
            path = ?path,
            rank = comm.rank(),
            "opened observation source"
        );

        Ok(Self {
            store,
            path,
            separate_obs: config.read_obs_from_separate_file,
            apply_locations_check: config.apply_locations_check,
            group_variables: config.obsgrouping.group_variables.clone(),
            max_frame_size: config.max_frame_size as u64,
        })
    }

    pub fn with_separate_obs(mut self, separate: bool) -> Self {
        self.separate_obs = separate;
        self
    }

    pub fn with_locations_check(mut self, check: bool) -> Self {
        self.apply_locations_check = check;
        self
    }

    pub fn with_group_variables(mut self, vars: Vec<String>) -> Self {
        self.group_variables = vars;
        self
    }

    pub fn with_max_frame_size(mut self, size: u64) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn store(&self) -> &dyn ObsStore {
        self.store.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether each rank reads its own, distinct set of observations.
    pub fn each_process_generates_separate_obs(&self) -> bool {
        self.separate_obs
    }

    pub fn apply_locations_check(&self) -> bool {
        self.apply_locations_check
    }

    pub fn obs_grouping_vars(&self) -> &[String] {
        &self.group_variables
    }

    pub fn max_frame_size(&self) -> u64 {
        self.max_frame_size
    }

    /// Whether the first dimension of `name` is `Location`.
    pub fn is_location_indexed(&self, name: &str) -> bool {
        self.store
            .variable(name)
            .map(|info| info.is_indexed_by(LOCATION))
            .unwrap_or(false)
    }

    /// Largest first-dimension size among Location-indexed variables.
    pub fn max_var_size(&self) -> u64 {
        let scale = self
            .store
            .dimension(LOCATION)
            .map(|d| d.size)
            .unwrap_or(0);
        self.store
            .variables()
            .iter()
            .filter_map(|name| self.store.variable(name).ok())
            .filter(|info| info.is_indexed_by(LOCATION))
            .map(|info| info.dim0_size())
            .fold(scale, u64::max)
    }
}

/// Build an in-memory source from listed locations.
pub fn generate_list(lats: &[f32], lons: &[f32], datetimes: &[String]) -> Result<MemoryStore> {
    if lats.len() != lons.len() || lats.len() != datetimes.len() {
        return Err(FrameError::config_error(format!(
            "list engine lengths differ: {} lats, {} lons, {} datetimes",
            lats.len(),
            lons.len(),
            datetimes.len()
        )));
    }
    let times = datetimes
        .iter()
        .map(|s| parse_datetime(s))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let n = lats.len() as u64;
    let mut store = MemoryStore::new();
    store.create_dimension(LOCATION, ElementKind::Int32, n, None)?;
    store.write_all(LOCATION, &(1..=n as i32).collect::<Vec<_>>().into())?;

    for (name, kind) in [
        ("MetaData/latitude", ElementKind::Float32),
        ("MetaData/longitude", ElementKind::Float32),
        ("MetaData/dateTime", ElementKind::DateTime),
    ] {
        store.create_variable(VariableSpec::new(name, kind, &[LOCATION]))?;
    }
    store.write_all("MetaData/latitude", &lats.to_vec().into())?;
    store.write_all("MetaData/longitude", &lons.to_vec().into())?;
    store.write_all("MetaData/dateTime", &times.into())?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::window;

    #[test]
    fn test_generate_list() {
        let store = generate_list(
            &[10.0, 20.0],
            &[-5.0, 5.0],
            &[window::INSIDE.to_string(), window::END.to_string()],
        )
        .unwrap();
        assert_eq!(store.dimension(LOCATION).unwrap().size, 2);
        let lats = store.read_all("MetaData/latitude").unwrap();
        assert_eq!(lats.as_slice::<f32>().unwrap(), &[10.0, 20.0]);
        assert_eq!(store.variable("MetaData/dateTime").unwrap().kind, ElementKind::DateTime);
    }

    #[test]
    fn test_generate_list_bad_datetime() {
        let err = generate_list(&[0.0], &[0.0], &["yesterday".to_string()]).unwrap_err();
        assert!(matches!(err, FrameError::Time(_)));
    }

    #[test]
    fn test_max_var_size_and_location_index() {
        let store = generate_list(&[0.0; 3], &[0.0; 3], &vec![window::INSIDE.to_string(); 3]).unwrap();
        let source = ObsSource::new(Box::new(store));
        assert_eq!(source.max_var_size(), 3);
        assert!(source.is_location_indexed("MetaData/latitude"));
        assert!(!source.is_location_indexed("MetaData/nothing"));
    }

    #[test]
    fn test_from_config_list() {
        let config = ObsDataInConfig::new(EngineConfig::List {
            lats: vec![1.0],
            lons: vec![2.0],
            datetimes: vec![window::INSIDE.to_string()],
        });
        let source = ObsSource::from_config(&config, &Comm::solo()).unwrap();
        assert!(source.path().is_none());
        assert!(!source.each_process_generates_separate_obs());
        assert_eq!(source.max_frame_size(), 10000);
    }
}
