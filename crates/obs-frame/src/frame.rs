//! Frame cursor: reads a source in bounded windows along `Location`.
//!
//! # Frame loop
//!
//! ```text
//! frame_init()
//!   │
//!   ▼
//! frame_available() ──false──► finalize: global counts, compute_patch_locs()
//!   │ true
//!   ├─► source ──SelectionTriple──► memory buffer ──► frame store
//!   ├─► quality filter   (time window, geolocation fill)
//!   ├─► record numbering (ungrouped stride or grouping keys)
//!   ├─► distribution     (assign_record / is_my_record)
//!   └─► clear selection caches
//!   │
//!   ▼
//! read_frame_var(..) for each variable, then frame_next()
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use obs_common::{parse_datetime, parse_epoch_units, reference_datetime, GeoPoint, TimeWindow};
use obs_distribution::{
    Distribution, DistributionConfig, DistributionFactory, Halo, ReduceOp, RoundRobin,
};
use obs_store::{
    ElementKind, ElementValues, MemoryStore, ObsStore, Selection, VariableInfo, VariableSpec,
};
use tracing::{debug, info, trace};

use crate::cache::{CacheStats, SelectionCache};
use crate::error::{FrameError, Result};
use crate::filter::{all_locations, filter_locations, Geolocation, Survivor};
use crate::records::{grouping_keys, RecordNumbering};
use crate::select::{frame_selection, indexed_selection, memory_selection, SelectionTriple};
use crate::source::{ObsSource, CHANNEL, LOCATION};

pub const LATITUDE: &str = "MetaData/latitude";
pub const LONGITUDE: &str = "MetaData/longitude";
/// Epoch date times; synthesized in the frame when the source only has
/// string or offset date times.
pub const DATETIME: &str = "MetaData/dateTime";
pub const DATETIME_STRINGS: &str = "MetaData/datetime";
pub const TIME_OFFSETS: &str = "MetaData/time";
pub const SAVED_INDEX: &str = "MetaData/saved_index";
pub const SAVED_RECORD_NUMBER: &str = "MetaData/saved_record_number";
/// Global attribute holding the `YYYYMMDDhh` reference for `MetaData/time`.
pub const DATE_TIME_ATTR: &str = "date_time";

/// How observation times are obtained from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeSource {
    /// `MetaData/dateTime` holding date times.
    Native,
    /// `MetaData/dateTime` holding integer seconds since an epoch.
    EpochOffsets(DateTime<Utc>),
    /// `MetaData/datetime` holding ISO 8601 strings.
    Strings,
    /// `MetaData/time` holding float hours since the `date_time` attribute.
    HourOffsets(DateTime<Utc>),
}

impl DateTimeSource {
    /// Find the preferred date time variable of `store`.
    pub fn detect(store: &dyn ObsStore) -> Result<Option<Self>> {
        if store.exists(DATETIME) {
            let info = store.variable(DATETIME)?;
            return match info.kind {
                ElementKind::DateTime => Ok(Some(Self::Native)),
                ElementKind::Int64 | ElementKind::Int32 => {
                    let units = store
                        .attribute(Some(DATETIME), "units")?
                        .and_then(|v| v.as_str().map(str::to_string))
                        .ok_or_else(|| {
                            FrameError::config_error(format!("{} has no 'units' attribute", DATETIME))
                        })?;
                    Ok(Some(Self::EpochOffsets(parse_epoch_units(&units)?)))
                }
                kind => Err(FrameError::UnsupportedKind {
                    name: DATETIME.to_string(),
                    kind,
                }),
            };
        }
        if store.exists(DATETIME_STRINGS) {
            let kind = store.variable(DATETIME_STRINGS)?.kind;
            if kind != ElementKind::String {
                return Err(FrameError::UnsupportedKind {
                    name: DATETIME_STRINGS.to_string(),
                    kind,
                });
            }
            return Ok(Some(Self::Strings));
        }
        if store.exists(TIME_OFFSETS) {
            let packed = store
                .attribute(None, DATE_TIME_ATTR)?
                .and_then(|v| v.as_i64())
                .ok_or_else(|| {
                    FrameError::config_error(format!(
                        "{} requires the global '{}' attribute",
                        TIME_OFFSETS, DATE_TIME_ATTR
                    ))
                })?;
            return Ok(Some(Self::HourOffsets(reference_datetime(packed)?)));
        }
        Ok(None)
    }

    /// Whether the frame needs a synthesized `MetaData/dateTime`.
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Strings | Self::HourOffsets(_))
    }
}

/// Run state of a [`FrameReader`].
#[derive(Debug, Clone)]
pub struct ReaderState {
    frame_start: u64,
    max_frame_size: u64,
    max_var_size: u64,
    numbering: RecordNumbering,
    gnlocs: usize,
    gnlocs_outside_window: usize,
    nlocs: usize,
    adjusted_frame_start: u64,
    adjusted_frame_count: u64,
    frame_loc_index: Vec<u64>,
    index: Vec<usize>,
    recnums: Vec<usize>,
    unique_recnums: BTreeSet<usize>,
    finalized: bool,
}

impl ReaderState {
    pub fn new(max_frame_size: u64) -> Self {
        Self {
            frame_start: 0,
            max_frame_size,
            max_var_size: 0,
            numbering: RecordNumbering::default(),
            gnlocs: 0,
            gnlocs_outside_window: 0,
            nlocs: 0,
            adjusted_frame_start: 0,
            adjusted_frame_count: 0,
            frame_loc_index: Vec::new(),
            index: Vec::new(),
            recnums: Vec::new(),
            unique_recnums: BTreeSet::new(),
            finalized: false,
        }
    }

    fn reset(&mut self, rec_start: usize, rec_increment: usize, max_var_size: u64) {
        *self = Self::new(self.max_frame_size);
        self.numbering.reset(rec_start, rec_increment);
        self.max_var_size = max_var_size;
    }

    /// Rows `[frame_start, frame_start + count)` of a first dimension of
    /// size `dim0`, clamped at zero.
    pub fn basic_count(&self, dim0: u64) -> u64 {
        if self.frame_start + self.max_frame_size > dim0 {
            dim0.saturating_sub(self.frame_start)
        } else {
            self.max_frame_size
        }
    }

    /// Rows of a variable moved in the current frame. `Channel` is never
    /// split, so Channel-first variables move whole with the first frame.
    pub fn var_count(&self, info: &VariableInfo) -> u64 {
        if info.is_indexed_by(CHANNEL) {
            if self.frame_start == 0 {
                info.dim0_size()
            } else {
                0
            }
        } else {
            self.basic_count(info.dim0_size())
        }
    }

    pub fn frame_start(&self) -> u64 {
        self.frame_start
    }

    pub fn max_frame_size(&self) -> u64 {
        self.max_frame_size
    }

    pub fn max_var_size(&self) -> u64 {
        self.max_var_size
    }

    pub fn numbering(&self) -> &RecordNumbering {
        &self.numbering
    }

    /// Locations that passed the quality checks on all ranks.
    pub fn gnlocs(&self) -> usize {
        self.gnlocs
    }

    pub fn gnlocs_outside_window(&self) -> usize {
        self.gnlocs_outside_window
    }

    /// Locations kept by this rank.
    pub fn nlocs(&self) -> usize {
        self.nlocs
    }

    pub fn adjusted_frame_start(&self) -> u64 {
        self.adjusted_frame_start
    }

    pub fn adjusted_frame_count(&self) -> u64 {
        self.adjusted_frame_count
    }

    /// Frame positions of the locations kept in the current frame.
    pub fn frame_loc_index(&self) -> &[u64] {
        &self.frame_loc_index
    }

    /// Global location index of every kept location.
    pub fn index(&self) -> &[usize] {
        &self.index
    }

    /// Record number of every kept location.
    pub fn recnums(&self) -> &[usize] {
        &self.recnums
    }

    pub fn unique_recnums(&self) -> &BTreeSet<usize> {
        &self.unique_recnums
    }

    pub fn nrecs(&self) -> usize {
        self.unique_recnums.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// Reads an [`ObsSource`] frame by frame and keeps this rank's locations.
pub struct FrameReader {
    source: ObsSource,
    window: TimeWindow,
    dist: Box<dyn Distribution>,
    state: ReaderState,
    frame: MemoryStore,
    datetime_source: Option<DateTimeSource>,
    frame_selections: SelectionCache,
    indexed_selections: SelectionCache,
    mem_selections: SelectionCache,
}

impl FrameReader {
    /// Create a reader with the distribution named in `dist_config`.
    ///
    /// When each rank reads separate observations only `Halo` is honoured;
    /// any other policy is replaced by `RoundRobin`, which keeps every
    /// record a rank numbers itself.
    pub fn new(
        source: ObsSource,
        window: TimeWindow,
        dist_config: &DistributionConfig,
        comm: obs_distribution::Comm,
    ) -> Result<Self> {
        let mut config = dist_config.clone();
        if source.each_process_generates_separate_obs() && config.name != Halo::NAME {
            if config.name != RoundRobin::NAME {
                info!(
                    requested = %config.name,
                    "separate observations per rank, using RoundRobin distribution"
                );
            }
            config.name = RoundRobin::NAME.to_string();
        }
        let dist = DistributionFactory::default().create(comm, &config)?;
        Ok(Self::with_distribution(source, window, dist))
    }

    pub fn with_distribution(source: ObsSource, window: TimeWindow, dist: Box<dyn Distribution>) -> Self {
        let max_frame_size = source.max_frame_size();
        Self {
            source,
            window,
            dist,
            state: ReaderState::new(max_frame_size),
            frame: MemoryStore::new(),
            datetime_source: None,
            frame_selections: SelectionCache::new(),
            indexed_selections: SelectionCache::new(),
            mem_selections: SelectionCache::new(),
        }
    }

    pub fn state(&self) -> &ReaderState {
        &self.state
    }

    pub fn source(&self) -> &ObsSource {
        &self.source
    }

    /// The in-memory store holding the current frame.
    pub fn frame(&self) -> &MemoryStore {
        &self.frame
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn distribution(&self) -> &dyn Distribution {
        self.dist.as_ref()
    }

    pub fn into_distribution(self) -> Box<dyn Distribution> {
        self.dist
    }

    pub fn datetime_source(&self) -> Option<DateTimeSource> {
        self.datetime_source
    }

    /// Combined statistics of the per-frame selection caches.
    pub fn cache_stats(&self) -> CacheStats {
        [&self.frame_selections, &self.indexed_selections, &self.mem_selections]
            .iter()
            .map(|c| c.stats())
            .fold(CacheStats::default(), |acc, s| CacheStats {
                hits: acc.hits + s.hits,
                misses: acc.misses + s.misses,
                entries: acc.entries + s.entries,
            })
    }

    fn clear_caches(&mut self) {
        self.frame_selections.clear();
        self.indexed_selections.clear();
        self.mem_selections.clear();
    }

    /// Reset counters and build an empty frame store with the source schema.
    pub fn frame_init(&mut self) -> Result<()> {
        let separate = self.source.each_process_generates_separate_obs();
        let comm = self.dist.comm();
        let (start, increment) = if separate {
            (comm.rank(), comm.size())
        } else {
            (0, 1)
        };
        self.state.reset(start, increment, self.source.max_var_size());
        self.datetime_source = DateTimeSource::detect(self.source.store())?;
        self.frame = self.build_frame_store()?;
        self.clear_caches();

        info!(
            max_var_size = self.state.max_var_size,
            max_frame_size = self.state.max_frame_size,
            distribution = self.dist.name(),
            separate_obs = separate,
            datetime = ?self.datetime_source,
            "frame reader initialized"
        );
        Ok(())
    }

    fn build_frame_store(&self) -> Result<MemoryStore> {
        let src = self.source.store();
        let max = self.state.max_frame_size;
        let mut frame = MemoryStore::new();

        for dim in src.dimensions() {
            let size = if dim.name == CHANNEL {
                dim.size
            } else {
                dim.size.min(max)
            };
            frame.create_dimension(&dim.name, dim.kind, size, None)?;
            if size > 0 {
                let t = SelectionTriple::for_window(&[dim.size], 0, size);
                let coords = src.read(&dim.name, &t.memory, &t.source)?;
                frame.write(&dim.name, &coords, &t.memory, &t.frame)?;
            }
            for (key, value) in src.attributes(Some(&dim.name))? {
                frame.set_attribute(Some(&dim.name), &key, value)?;
            }
        }

        for name in src.variables() {
            let info = src.variable(&name)?;
            let attributes = src.attributes(Some(&name))?;
            frame.create_variable(VariableSpec::like(&info, attributes))?;
        }

        for (key, value) in src.attributes(None)? {
            frame.set_attribute(None, &key, value)?;
        }

        if self.datetime_source.is_some_and(|s| s.is_derived()) && !frame.exists(DATETIME) {
            frame.create_variable(VariableSpec::new(DATETIME, ElementKind::DateTime, &[LOCATION]))?;
        }
        Ok(frame)
    }

    pub fn frame_start(&self) -> u64 {
        self.state.frame_start
    }

    pub fn adjusted_frame_start(&self) -> u64 {
        self.state.adjusted_frame_start
    }

    /// Load the next frame if there is one. At the end of the data, run the
    /// end-of-data collectives and return false.
    pub fn frame_available(&mut self) -> Result<bool> {
        if self.state.frame_start >= self.state.max_var_size {
            self.finalize()?;
            return Ok(false);
        }

        let frame_start = self.state.frame_start;
        let loc_count = self.state.basic_count(self.state.max_var_size);
        for dim in self.source.store().dimensions() {
            if dim.name == CHANNEL {
                continue;
            }
            let size = if dim.name == LOCATION {
                loc_count
            } else {
                self.state.basic_count(dim.size)
            };
            self.frame.resize_dimension(&dim.name, size)?;
        }

        for name in self.source.store().variables() {
            let info = self.source.store().variable(&name)?;
            let count = self.state.var_count(&info);
            if count == 0 {
                continue;
            }
            let t = SelectionTriple::for_window(&info.shape, frame_start, count);
            let values = self.source.store().read(&name, &t.memory, &t.source)?;
            self.frame.write(&name, &values, &t.memory, &t.frame)?;
            trace!(variable = %name, frame_start, count, "transferred frame variable");
        }

        let derived = self.datetime_source.is_some_and(|s| s.is_derived());
        let times = if derived || self.source.apply_locations_check() {
            self.frame_times()?
        } else {
            None
        };
        if derived {
            if let Some(times) = &times {
                self.frame.write_all(DATETIME, &times.clone().into())?;
            }
        }

        self.gen_frame_index_recnums(loc_count, times)?;
        self.clear_caches();

        debug!(
            frame_start,
            frame_count = loc_count,
            kept = self.state.adjusted_frame_count,
            nlocs = self.state.nlocs,
            "frame loaded"
        );
        Ok(true)
    }

    /// Advance to the next frame.
    pub fn frame_next(&mut self) {
        self.state.frame_start += self.state.max_frame_size;
        self.state.adjusted_frame_start += self.state.adjusted_frame_count;
    }

    fn finalize(&mut self) -> Result<()> {
        if self.state.finalized {
            return Ok(());
        }
        if self.source.each_process_generates_separate_obs() {
            let comm = self.dist.comm();
            let gnlocs = comm.all_reduce(self.state.gnlocs, ReduceOp::Sum)?;
            let outside = comm.all_reduce(self.state.gnlocs_outside_window, ReduceOp::Sum)?;
            self.state.gnlocs = gnlocs;
            self.state.gnlocs_outside_window = outside;
        }
        self.dist.compute_patch_locs()?;
        self.state.finalized = true;
        info!(
            nlocs = self.state.nlocs,
            gnlocs = self.state.gnlocs,
            gnlocs_outside_window = self.state.gnlocs_outside_window,
            nrecs = self.state.nrecs(),
            "frame reading complete"
        );
        Ok(())
    }

    /// Rows of `name` in the current frame. Location-indexed variables
    /// report the number of rows this rank kept.
    pub fn frame_count(&self, name: &str) -> Result<u64> {
        let info = self.frame.variable(name)?;
        if !info.is_dimension_scale && info.is_indexed_by(LOCATION) {
            return Ok(self.state.adjusted_frame_count);
        }
        let source_info = self.source.store().variable(name).unwrap_or(info);
        Ok(self.state.var_count(&source_info))
    }

    /// Values of `name` in the current frame. Location-indexed variables
    /// return only the rows this rank kept, in frame order.
    pub fn read_frame_var(&mut self, name: &str) -> Result<ElementValues> {
        let info = self.frame.variable(name)?;
        if !info.is_dimension_scale && info.is_indexed_by(LOCATION) {
            let shape = info.shape;
            let rows = self.state.frame_loc_index.len() as u64;
            let selection = {
                let index = &self.state.frame_loc_index;
                self.indexed_selections
                    .get_or_insert_with(&shape, || indexed_selection(&shape, index))
                    .clone()
            };
            let memory = self.memory_selection(&shape, rows);
            return Ok(self.frame.read(name, &memory, &selection)?);
        }

        let count = self.frame_count(name)?;
        if count == 0 {
            return Ok(ElementValues::empty(info.kind));
        }
        self.read_rows(name, &info.shape, count)
    }

    fn memory_selection(&mut self, shape: &[u64], rows: u64) -> Selection {
        let n = rows * shape.iter().skip(1).product::<u64>();
        self.mem_selections
            .get_or_insert_with(&[n], || memory_selection(shape, rows))
            .clone()
    }

    fn read_rows(&mut self, name: &str, shape: &[u64], count: u64) -> Result<ElementValues> {
        let mut key = shape.to_vec();
        key.push(count);
        let selection = self
            .frame_selections
            .get_or_insert_with(&key, || frame_selection(shape, count))
            .clone();
        let memory = self.memory_selection(shape, count);
        Ok(self.frame.read(name, &memory, &selection)?)
    }

    /// Every row of a frame variable.
    fn read_entire(&mut self, name: &str) -> Result<ElementValues> {
        if !self.frame.exists(name) {
            return Err(FrameError::MissingVariable(name.to_string()));
        }
        let info = self.frame.variable(name)?;
        self.read_rows(name, &info.shape, info.dim0_size())
    }

    fn frame_times(&mut self) -> Result<Option<Vec<DateTime<Utc>>>> {
        let Some(source) = self.datetime_source else {
            return Ok(None);
        };
        let missing = missing_datetime();
        let times = match source {
            DateTimeSource::Native => self
                .read_entire(DATETIME)?
                .into_vec::<DateTime<Utc>>()
                .ok_or_else(|| FrameError::UnsupportedKind {
                    name: DATETIME.to_string(),
                    kind: ElementKind::DateTime,
                })?,
            DateTimeSource::EpochOffsets(epoch) => match self.read_entire(DATETIME)? {
                ElementValues::Int64(v) => v.iter().map(|&s| epoch + Duration::seconds(s)).collect(),
                ElementValues::Int32(v) => v
                    .iter()
                    .map(|&s| epoch + Duration::seconds(s as i64))
                    .collect(),
                other => {
                    return Err(FrameError::UnsupportedKind {
                        name: DATETIME.to_string(),
                        kind: other.kind(),
                    })
                }
            },
            DateTimeSource::Strings => {
                let fill = self.frame.variable(DATETIME_STRINGS)?.fill_value;
                let values = self.read_entire(DATETIME_STRINGS)?;
                let strings = values.as_slice::<String>().unwrap_or_default();
                let mut times = Vec::with_capacity(strings.len());
                for (i, s) in strings.iter().enumerate() {
                    if values.is_missing(i, &fill) {
                        times.push(missing);
                    } else {
                        times.push(parse_datetime(s)?);
                    }
                }
                times
            }
            DateTimeSource::HourOffsets(reference) => {
                let values = self.read_entire(TIME_OFFSETS)?;
                let hours = values.to_f64_vec().ok_or_else(|| FrameError::UnsupportedKind {
                    name: TIME_OFFSETS.to_string(),
                    kind: values.kind(),
                })?;
                hours
                    .iter()
                    .map(|&h| {
                        if h.is_finite() {
                            reference + Duration::milliseconds((h * 3_600_000.0).round() as i64)
                        } else {
                            missing
                        }
                    })
                    .collect()
            }
        };
        Ok(Some(times))
    }

    fn gen_frame_index_recnums(
        &mut self,
        loc_count: u64,
        times: Option<Vec<DateTime<Utc>>>,
    ) -> Result<()> {
        let frame_start = self.state.frame_start;
        let outcome = if self.source.apply_locations_check() {
            let times = times.ok_or_else(|| {
                FrameError::config_error(
                    "date time information does not exist, cannot perform time window filtering",
                )
            })?;
            let lats = self.read_entire(LATITUDE)?;
            let lons = self.read_entire(LONGITUDE)?;
            let lat_fill = self.frame.variable(LATITUDE)?.fill_value;
            let lon_fill = self.frame.variable(LONGITUDE)?.fill_value;
            let geo = Geolocation {
                lats: &lats,
                lat_fill: &lat_fill,
                lons: &lons,
                lon_fill: &lon_fill,
            };
            filter_locations(frame_start, &times, geo, &self.window)
        } else {
            all_locations(frame_start, loc_count as usize)
        };
        self.state.gnlocs += outcome.survivors.len();
        self.state.gnlocs_outside_window += outcome.outside_window;

        let records = self.gen_record_numbers(&outcome.survivors)?;
        self.apply_distribution(&outcome.survivors, &records)?;
        self.state.adjusted_frame_count = self.state.frame_loc_index.len() as u64;
        Ok(())
    }

    fn gen_record_numbers(&mut self, survivors: &[Survivor]) -> Result<Vec<usize>> {
        let group_vars = self.source.obs_grouping_vars().to_vec();
        if group_vars.is_empty() {
            return Ok(self.state.numbering.ungrouped(survivors.len()));
        }

        let mut columns = Vec::with_capacity(group_vars.len());
        for var in &group_vars {
            let name = format!("MetaData/{}", var);
            if !self.frame.exists(&name) {
                return Err(FrameError::MissingVariable(name));
            }
            let info = self.frame.variable(&name)?;
            if !info.is_indexed_by(LOCATION) || info.shape.len() != 1 {
                return Err(FrameError::config_error(format!(
                    "obs grouping variable ({}) must be one-dimensional along '{}'",
                    var, LOCATION
                )));
            }
            columns.push(self.read_entire(&name)?);
        }

        let frame_index: Vec<usize> = survivors.iter().map(|s| s.frame_index).collect();
        let keys = grouping_keys(&columns, &frame_index);
        Ok(self.state.numbering.grouped(&keys))
    }

    fn read_geolocation(&mut self, name: &str) -> Result<Vec<f64>> {
        let values = self.read_entire(name)?;
        values.to_f64_vec().ok_or_else(|| FrameError::UnsupportedKind {
            name: name.to_string(),
            kind: values.kind(),
        })
    }

    /// Saved row or record numbers. Missing and negative entries are errors.
    fn read_saved_column(&mut self, name: &str) -> Result<Vec<usize>> {
        let values = self.read_entire(name)?;
        let fill = self.frame.variable(name)?.fill_value;
        let numbers = values.to_f64_vec().ok_or_else(|| FrameError::UnsupportedKind {
            name: name.to_string(),
            kind: values.kind(),
        })?;
        numbers
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                if values.is_missing(row, &fill) || !(v >= 0.0) {
                    Err(FrameError::InvalidValue {
                        name: name.to_string(),
                        row,
                        value: v,
                    })
                } else {
                    Ok(v as usize)
                }
            })
            .collect()
    }

    fn apply_distribution(&mut self, survivors: &[Survivor], records: &[usize]) -> Result<()> {
        let lons = self.read_geolocation(LONGITUDE)?;
        let lats = self.read_geolocation(LATITUDE)?;

        let separate = self.source.each_process_generates_separate_obs();
        let halo = self.dist.name() == Halo::NAME;
        let saved = if separate && halo {
            Some((
                self.read_saved_column(SAVED_INDEX)?,
                self.read_saved_column(SAVED_RECORD_NUMBER)?,
            ))
        } else {
            None
        };

        let rank = self.dist.comm().rank();
        let size = self.dist.comm().size();
        self.state.frame_loc_index.clear();
        for (survivor, &generated) in survivors.iter().zip(records) {
            let fi = survivor.frame_index;
            let (row, rec) = match &saved {
                Some((index, recnums)) => (index[fi], recnums[fi]),
                None => (survivor.loc_index as usize, generated),
            };
            let global = if separate && !halo {
                row * size + rank
            } else {
                row
            };

            let point = GeoPoint::new(lons[fi], lats[fi]);
            self.dist.assign_record(rec, global, &point);
            if self.dist.is_my_record(rec) {
                self.state.index.push(global);
                self.state.recnums.push(rec);
                self.state.unique_recnums.insert(rec);
                self.state.frame_loc_index.push(fi as u64);
                self.state.nlocs += 1;
            }
        }
        Ok(())
    }
}

fn missing_datetime() -> DateTime<Utc> {
    match ElementKind::DateTime.missing_value() {
        obs_store::ElementValue::DateTime(dt) => dt,
        _ => DateTime::<Utc>::MIN_UTC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obs_distribution::Comm;
    use test_utils::{assert_column_approx_eq, create_location_series, create_repeated_station_ids, window};

    fn test_window() -> TimeWindow {
        TimeWindow::parse(window::BEGIN, window::END).unwrap()
    }

    /// `n` in-window locations with station ids shared by pairs.
    fn sample_store(n: usize) -> MemoryStore {
        let (lats, lons) = create_location_series(n);
        let inside = parse_datetime(window::INSIDE).unwrap();
        let mut store = MemoryStore::new();
        store.create_dimension(LOCATION, ElementKind::Int32, n as u64, None).unwrap();
        for (name, kind) in [
            (LATITUDE, ElementKind::Float32),
            (LONGITUDE, ElementKind::Float32),
            (DATETIME, ElementKind::DateTime),
            ("MetaData/stationIdentification", ElementKind::String),
        ] {
            store.create_variable(VariableSpec::new(name, kind, &[LOCATION])).unwrap();
        }
        store.write_all(LATITUDE, &lats.into()).unwrap();
        store.write_all(LONGITUDE, &lons.into()).unwrap();
        store.write_all(DATETIME, &vec![inside; n].into()).unwrap();
        store
            .write_all(
                "MetaData/stationIdentification",
                &create_repeated_station_ids(n, 2).into(),
            )
            .unwrap();
        store
    }

    fn reader(store: MemoryStore, max_frame_size: u64) -> FrameReader {
        let source = ObsSource::new(Box::new(store)).with_max_frame_size(max_frame_size);
        FrameReader::new(source, test_window(), &DistributionConfig::default(), Comm::solo()).unwrap()
    }

    #[test]
    fn test_frame_coverage() {
        let mut reader = reader(sample_store(25), 10);
        reader.frame_init().unwrap();

        let mut frames = Vec::new();
        while reader.frame_available().unwrap() {
            frames.push((reader.frame_start(), reader.frame_count(LOCATION).unwrap()));
            assert_eq!(
                reader.frame_count(LATITUDE).unwrap(),
                reader.frame_count(LOCATION).unwrap()
            );
            reader.frame_next();
        }
        assert_eq!(frames, vec![(0, 10), (10, 10), (20, 5)]);
        assert_eq!(reader.adjusted_frame_start(), 25);
        assert!(reader.state().is_finalized());
        assert_eq!(reader.state().gnlocs(), 25);
        assert_eq!(reader.state().index(), (0..25).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_empty_source() {
        let mut reader = reader(sample_store(0), 10);
        reader.frame_init().unwrap();
        assert!(!reader.frame_available().unwrap());
        assert_eq!(reader.state().nlocs(), 0);
        assert!(reader.state().is_finalized());
    }

    #[test]
    fn test_filter_counts() {
        let mut store = sample_store(5);
        let mut times = vec![parse_datetime(window::INSIDE).unwrap(); 5];
        times[0] = parse_datetime(window::BEGIN).unwrap();
        times[3] = parse_datetime("2018-04-16T00:00:00Z").unwrap();
        store.write_all(DATETIME, &times.into()).unwrap();
        let mut lats = store.read_all(LATITUDE).unwrap().into_vec::<f32>().unwrap();
        lats[2] = f32::NAN;
        store.write_all(LATITUDE, &lats.into()).unwrap();

        let mut reader = reader(store, 3);
        reader.frame_init().unwrap();
        while reader.frame_available().unwrap() {
            reader.frame_next();
        }
        assert_eq!(reader.state().gnlocs(), 2);
        assert_eq!(reader.state().gnlocs_outside_window(), 2);
        assert_eq!(reader.state().index(), &[1, 4]);
        assert_eq!(reader.state().recnums(), &[0, 1]);
    }

    #[test]
    fn test_grouping_assigns_shared_records() {
        let source = ObsSource::new(Box::new(sample_store(6)))
            .with_max_frame_size(4)
            .with_group_variables(vec!["stationIdentification".to_string()]);
        let mut reader =
            FrameReader::new(source, test_window(), &DistributionConfig::default(), Comm::solo()).unwrap();
        reader.frame_init().unwrap();
        while reader.frame_available().unwrap() {
            reader.frame_next();
        }
        assert_eq!(reader.state().recnums(), &[0, 0, 1, 1, 2, 2]);
        assert_eq!(reader.state().nrecs(), 3);
    }

    #[test]
    fn test_grouping_variable_must_be_location_indexed() {
        let mut store = sample_store(3);
        store.create_dimension("Level", ElementKind::Int32, 2, None).unwrap();
        store
            .create_variable(VariableSpec::new("MetaData/level", ElementKind::Int32, &["Level"]))
            .unwrap();
        let source = ObsSource::new(Box::new(store)).with_group_variables(vec!["level".to_string()]);
        let mut reader =
            FrameReader::new(source, test_window(), &DistributionConfig::default(), Comm::solo()).unwrap();
        reader.frame_init().unwrap();
        assert!(matches!(reader.frame_available(), Err(FrameError::ConfigError(_))));
    }

    #[test]
    fn test_missing_datetime_is_config_error() {
        let mut store = MemoryStore::new();
        store.create_dimension(LOCATION, ElementKind::Int32, 2, None).unwrap();
        store
            .create_variable(VariableSpec::new(LATITUDE, ElementKind::Float32, &[LOCATION]))
            .unwrap();
        let mut reader = reader(store, 10);
        reader.frame_init().unwrap();
        assert!(matches!(reader.frame_available(), Err(FrameError::ConfigError(_))));
    }

    #[test]
    fn test_string_datetimes_are_converted() {
        let mut store = sample_store(3);
        let mut renamed = MemoryStore::new();
        renamed.create_dimension(LOCATION, ElementKind::Int32, 3, None).unwrap();
        for name in [LATITUDE, LONGITUDE] {
            renamed
                .create_variable(VariableSpec::new(name, ElementKind::Float32, &[LOCATION]))
                .unwrap();
            renamed.write_all(name, &store.read_all(name).unwrap()).unwrap();
        }
        renamed
            .create_variable(VariableSpec::new(DATETIME_STRINGS, ElementKind::String, &[LOCATION]))
            .unwrap();
        let strings = vec![
            "2018-04-15T00:00:00Z".to_string(),
            "2018-04-20T00:00:00Z".to_string(),
            "2018-04-15T01:30:00Z".to_string(),
        ];
        renamed.write_all(DATETIME_STRINGS, &strings.into()).unwrap();
        store = renamed;

        let mut reader = reader(store, 10);
        reader.frame_init().unwrap();
        assert_eq!(reader.datetime_source(), Some(DateTimeSource::Strings));
        assert!(reader.frame_available().unwrap());
        assert_eq!(reader.state().index(), &[0, 2]);

        let times = reader.read_frame_var(DATETIME).unwrap().into_vec::<DateTime<Utc>>().unwrap();
        assert_eq!(times[1], parse_datetime("2018-04-15T01:30:00Z").unwrap());
    }

    #[test]
    fn test_hour_offsets_with_reference() {
        let mut store = MemoryStore::new();
        store.create_dimension(LOCATION, ElementKind::Int32, 3, None).unwrap();
        for (name, kind) in [
            (LATITUDE, ElementKind::Float32),
            (LONGITUDE, ElementKind::Float32),
            (TIME_OFFSETS, ElementKind::Float32),
        ] {
            store.create_variable(VariableSpec::new(name, kind, &[LOCATION])).unwrap();
        }
        store.write_all(LATITUDE, &vec![1.0f32; 3].into()).unwrap();
        store.write_all(LONGITUDE, &vec![1.0f32; 3].into()).unwrap();
        store.write_all(TIME_OFFSETS, &vec![-3.0f32, 0.5, 3.0].into()).unwrap();
        store
            .set_attribute(None, DATE_TIME_ATTR, serde_json::json!(window::REFERENCE))
            .unwrap();

        let mut reader = reader(store, 10);
        reader.frame_init().unwrap();
        assert!(reader.frame_available().unwrap());
        // -3h is the window start, which is outside.
        assert_eq!(reader.state().index(), &[1, 2]);
        assert_eq!(reader.state().gnlocs_outside_window(), 1);

        let reference = reference_datetime(window::REFERENCE).unwrap();
        let hours: Vec<f64> = reader
            .read_frame_var(DATETIME)
            .unwrap()
            .into_vec::<DateTime<Utc>>()
            .unwrap()
            .iter()
            .map(|t| (*t - reference).num_seconds() as f64 / 3600.0)
            .collect();
        assert_column_approx_eq!(hours, [0.5, 3.0], 1e-9);
    }

    #[test]
    fn test_epoch_offsets_need_units() {
        let mut store = MemoryStore::new();
        store.create_dimension(LOCATION, ElementKind::Int32, 1, None).unwrap();
        store
            .create_variable(VariableSpec::new(DATETIME, ElementKind::Int64, &[LOCATION]))
            .unwrap();
        assert!(matches!(
            DateTimeSource::detect(&store),
            Err(FrameError::ConfigError(_))
        ));
        store
            .set_attribute(Some(DATETIME), "units", serde_json::json!("seconds since 1970-01-01T00:00:00Z"))
            .unwrap();
        assert!(matches!(
            DateTimeSource::detect(&store).unwrap(),
            Some(DateTimeSource::EpochOffsets(_))
        ));
    }

    #[test]
    fn test_read_frame_var_uses_cache() {
        let mut reader = reader(sample_store(8), 8);
        reader.frame_init().unwrap();
        assert!(reader.frame_available().unwrap());
        let first = reader.read_frame_var(LATITUDE).unwrap();
        let second = reader.read_frame_var(LONGITUDE).unwrap();
        assert_eq!(first.len(), 8);
        assert_eq!(second.len(), 8);
        assert!(reader.cache_stats().hits >= 2);
    }

    #[test]
    fn test_without_location_check_all_survive() {
        let mut store = sample_store(4);
        store
            .write_all(DATETIME, &vec![parse_datetime("2000-01-01T00:00:00Z").unwrap(); 4].into())
            .unwrap();
        let source = ObsSource::new(Box::new(store)).with_locations_check(false);
        let mut reader =
            FrameReader::new(source, test_window(), &DistributionConfig::default(), Comm::solo()).unwrap();
        reader.frame_init().unwrap();
        assert!(reader.frame_available().unwrap());
        assert_eq!(reader.state().nlocs(), 4);
        assert_eq!(reader.state().gnlocs_outside_window(), 0);
    }

    #[test]
    fn test_saved_columns_reject_missing_and_negative() {
        for (bad, row) in [(-5, 1usize), (-2_147_483_647, 2)] {
            let mut store = sample_store(3);
            for name in [SAVED_INDEX, SAVED_RECORD_NUMBER] {
                store
                    .create_variable(VariableSpec::new(name, ElementKind::Int32, &[LOCATION]))
                    .unwrap();
            }
            let mut index = vec![0i32, 1, 2];
            index[row] = bad;
            store.write_all(SAVED_INDEX, &index.into()).unwrap();
            store.write_all(SAVED_RECORD_NUMBER, &vec![0i32, 1, 2].into()).unwrap();

            let source = ObsSource::new(Box::new(store)).with_separate_obs(true);
            let mut reader =
                FrameReader::new(source, test_window(), &DistributionConfig::named("Halo"), Comm::solo())
                    .unwrap();
            reader.frame_init().unwrap();
            let err = reader.frame_available().unwrap_err();
            assert!(
                matches!(&err, FrameError::InvalidValue { name, row: r, .. } if name == SAVED_INDEX && *r == row),
                "unexpected error {err:?}"
            );
        }
    }
}
