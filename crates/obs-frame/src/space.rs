//! The observation space: this rank's share of an observation source.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use obs_common::TimeWindow;
use obs_distribution::{Comm, Distribution};
use obs_store::{ElementKind, ElementValues, MemoryStore, ObsStore, VariableSpec};
use tracing::{debug, info};

use crate::config::{ObsGroupingConfig, ObsSpaceConfig};
use crate::error::{FrameError, Result};
use crate::frame::FrameReader;
use crate::select::{memory_selection, source_selection};
use crate::sort::{build_record_index, sort_record_locations};
use crate::source::{ObsSource, LOCATION};
use crate::writer::ObsWriter;

/// Observations kept by one rank, loaded frame by frame.
pub struct ObsSpace {
    name: String,
    window: TimeWindow,
    store: MemoryStore,
    dist: Box<dyn Distribution>,
    nlocs: usize,
    gnlocs: usize,
    gnlocs_outside_window: usize,
    index: Vec<usize>,
    recnums: Vec<usize>,
    record_index: BTreeMap<usize, Vec<usize>>,
}

impl std::fmt::Debug for ObsSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObsSpace")
            .field("name", &self.name)
            .field("distribution", &self.dist.name())
            .field("nlocs", &self.nlocs)
            .field("gnlocs", &self.gnlocs)
            .field("nrecs", &self.nrecs())
            .finish()
    }
}

impl ObsSpace {
    /// Open the configured source on this rank and load it.
    pub fn from_config(config: &ObsSpaceConfig, comm: Comm) -> Result<Self> {
        config.validate().map_err(FrameError::ConfigError)?;
        let source = ObsSource::from_config(&config.obsdatain, &comm)?;
        Self::load(source, config, comm)
    }

    /// Read `source` to the end, keeping this rank's locations.
    pub fn load(source: ObsSource, config: &ObsSpaceConfig, comm: Comm) -> Result<Self> {
        let mut reader = FrameReader::new(source, config.window, &config.distribution, comm)?;
        reader.frame_init()?;

        let mut store = create_local_store(&reader)?;
        let variables = reader.frame().variables();
        let mut nlocs_local = 0u64;

        while reader.frame_available()? {
            let kept = reader.state().adjusted_frame_count();
            if kept > 0 {
                store.resize_dimension(LOCATION, nlocs_local + kept)?;
            }
            for name in &variables {
                let info = store.variable(name)?;
                let (start, count) = if info.is_indexed_by(LOCATION) {
                    (nlocs_local, kept)
                } else {
                    (reader.frame_start(), reader.frame_count(name)?)
                };
                if count == 0 {
                    continue;
                }
                let values = reader.read_frame_var(name)?;
                store.write(
                    name,
                    &values,
                    &memory_selection(&info.shape, count),
                    &source_selection(&info.shape, start, count),
                )?;
            }
            nlocs_local += kept;
            reader.frame_next();
        }

        let state = reader.state().clone();
        let dist = reader.into_distribution();
        write_location_coordinates(&mut store, state.index())?;

        let record_index = sorted_record_index(&store, state.recnums(), &config.obsdatain.obsgrouping)?;

        let space = Self {
            name: config.name.clone(),
            window: config.window,
            store,
            dist,
            nlocs: state.nlocs(),
            gnlocs: state.gnlocs(),
            gnlocs_outside_window: state.gnlocs_outside_window(),
            index: state.index().to_vec(),
            recnums: state.recnums().to_vec(),
            record_index,
        };
        info!(
            obs_space = %space.name,
            distribution = space.dist.name(),
            rank = space.dist.comm().rank(),
            nlocs = space.nlocs,
            gnlocs = space.gnlocs,
            gnlocs_outside_window = space.gnlocs_outside_window,
            nrecs = space.nrecs(),
            "observation space loaded"
        );
        Ok(space)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Locations kept by this rank.
    pub fn nlocs(&self) -> usize {
        self.nlocs
    }

    /// Locations that passed the quality checks on all ranks.
    pub fn gnlocs(&self) -> usize {
        self.gnlocs
    }

    pub fn gnlocs_outside_window(&self) -> usize {
        self.gnlocs_outside_window
    }

    pub fn nrecs(&self) -> usize {
        self.record_index.len()
    }

    /// Global location index of each local location.
    pub fn index(&self) -> &[usize] {
        &self.index
    }

    /// Record number of each local location.
    pub fn recnums(&self) -> &[usize] {
        &self.recnums
    }

    /// Local locations of each record, sorted when a sort variable is set.
    pub fn record_index(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.record_index
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn distribution(&self) -> &dyn Distribution {
        self.dist.as_ref()
    }

    pub fn has(&self, name: &str) -> bool {
        self.store.exists(name)
    }

    /// Every local value of `name`, flattened row-major.
    pub fn values(&self, name: &str) -> Result<ElementValues> {
        if !self.store.exists(name) {
            return Err(FrameError::MissingVariable(name.to_string()));
        }
        Ok(self.store.read_all(name)?)
    }

    /// Write the space through an I/O pool; see [`ObsWriter::write`].
    pub fn save(
        &self,
        pool_config: &obs_distribution::IoPoolConfig,
        comm_time: Option<&Comm>,
        output: &Path,
        save_obs_distribution: bool,
    ) -> Result<Option<PathBuf>> {
        ObsWriter::new(pool_config.clone())
            .with_obs_distribution(save_obs_distribution)
            .write(self, comm_time, output)
    }
}

/// Local store with the frame schema: `Location` starts empty, other
/// dimensions keep their full size and coordinates.
fn create_local_store(reader: &FrameReader) -> Result<MemoryStore> {
    let src = reader.source().store();
    let frame = reader.frame();
    let mut store = MemoryStore::new();

    for dim in src.dimensions() {
        if dim.name == LOCATION {
            store.create_dimension(LOCATION, dim.kind, 0, None)?;
        } else {
            store.create_dimension(&dim.name, dim.kind, dim.size, None)?;
            if dim.size > 0 {
                store.write_all(&dim.name, &src.read_all(&dim.name)?)?;
            }
        }
        for (key, value) in src.attributes(Some(&dim.name))? {
            store.set_attribute(Some(&dim.name), &key, value)?;
        }
    }

    for name in frame.variables() {
        let info = frame.variable(&name)?;
        let attributes = frame.attributes(Some(&name))?;
        store.create_variable(VariableSpec::like(&info, attributes))?;
    }

    for (key, value) in src.attributes(None)? {
        store.set_attribute(None, &key, value)?;
    }
    Ok(store)
}

fn write_location_coordinates(store: &mut MemoryStore, index: &[usize]) -> Result<()> {
    if !store.exists(LOCATION) || index.is_empty() {
        return Ok(());
    }
    let values: ElementValues = match store.dimension(LOCATION)?.kind {
        ElementKind::Int32 => narrow_indices::<i32>(LOCATION, ElementKind::Int32, index)?.into(),
        ElementKind::Int64 => narrow_indices::<i64>(LOCATION, ElementKind::Int64, index)?.into(),
        _ => return Ok(()),
    };
    store.write_all(LOCATION, &values)?;
    Ok(())
}

/// Convert indices for storage as `kind`, failing on the first one that
/// does not fit.
pub(crate) fn narrow_indices<T: TryFrom<usize>>(
    name: &str,
    kind: ElementKind,
    values: &[usize],
) -> Result<Vec<T>> {
    values
        .iter()
        .map(|&value| {
            T::try_from(value).map_err(|_| FrameError::Overflow {
                name: name.to_string(),
                value,
                kind,
            })
        })
        .collect()
}

fn sorted_record_index(
    store: &MemoryStore,
    recnums: &[usize],
    grouping: &ObsGroupingConfig,
) -> Result<BTreeMap<usize, Vec<usize>>> {
    let mut record_index = build_record_index(recnums);
    let Some(path) = grouping.sort_path() else {
        return Ok(record_index);
    };
    if !store.exists(&path) {
        return Err(FrameError::config_error(format!(
            "sort variable '{}' does not exist",
            path
        )));
    }

    let values = store.read_all(&path)?;
    let fill = store.variable(&path)?.fill_value;
    for locs in record_index.values_mut() {
        sort_record_locations(
            locs,
            &values,
            &fill,
            grouping.sort_order,
            grouping.missing_sort_value_treatment,
        );
    }
    debug!(
        sort_variable = %path,
        records = record_index.len(),
        "sorted record locations"
    );
    Ok(record_index)
}
