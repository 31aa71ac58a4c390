//! Zarr V3 observation store on the local filesystem.
//!
//! Layout:
//!
//! ```text
//! <root>/zarr.json                    group; attributes hold the global
//!                                     attributes and the obs catalogue
//! <root>/Location/zarr.json           dimension scale array
//! <root>/MetaData/zarr.json           intermediate group
//! <root>/MetaData/latitude/zarr.json  variable array, chunked along dim 0
//! ```
//!
//! Strings are stored as `uint8` arrays with a trailing fixed-width byte
//! dimension; date times are stored as `int64` seconds since the Unix epoch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

use crate::element::{ElementKind, ElementValue, ElementValues};
use crate::error::{Result, StoreError};
use crate::selection::{check_transfer, ResolvedSelection, Selection};
use crate::store::{Attributes, DimensionInfo, ObsStore, VariableInfo, VariableSpec};

/// Root attribute holding the dimension and variable catalogue.
const CATALOGUE_KEY: &str = "obs_catalogue";

/// Settings applied to newly created arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZarrStoreConfig {
    /// Chunk length along the first dimension.
    pub chunk_size: u64,
    /// Byte width of string elements.
    pub string_width: u64,
}

impl Default for ZarrStoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            string_width: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArrayEntry {
    kind: ElementKind,
    dims: Vec<String>,
    fill_value: ElementValue,
    chunk_shape: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_width: Option<u64>,
    #[serde(default)]
    is_dimension_scale: bool,
    #[serde(skip)]
    attributes: Attributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Catalogue {
    dimensions: BTreeMap<String, DimensionInfo>,
    arrays: BTreeMap<String, ArrayEntry>,
}

/// Observation store backed by a Zarr V3 hierarchy.
pub struct ZarrStore {
    root: PathBuf,
    store: Arc<FilesystemStore>,
    catalogue: Catalogue,
    attrs: Attributes,
    config: ZarrStoreConfig,
}

impl std::fmt::Debug for ZarrStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrStore")
            .field("root", &self.root)
            .field("dimensions", &self.catalogue.dimensions.len())
            .field("arrays", &self.catalogue.arrays.len())
            .finish()
    }
}

fn array_path(name: &str) -> String {
    format!("/{}", name.trim_start_matches('/'))
}

fn datetime_from_epoch(name: &str, secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| StoreError::read_failed(name, format!("invalid epoch seconds {}", secs)))
}

impl ZarrStore {
    /// Create a new, empty store at `path`, replacing any previous store there.
    pub fn create(path: impl AsRef<Path>, config: ZarrStoreConfig) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if root.join("zarr.json").exists() {
            std::fs::remove_dir_all(&root)?;
        }
        std::fs::create_dir_all(&root)?;
        let store = Arc::new(
            FilesystemStore::new(&root).map_err(|e| StoreError::OpenFailed(e.to_string()))?,
        );

        let zarr = Self {
            root,
            store,
            catalogue: Catalogue::default(),
            attrs: Attributes::new(),
            config,
        };
        zarr.save_catalogue()?;
        debug!(path = %zarr.root.display(), "created zarr store");
        Ok(zarr)
    }

    /// Open an existing store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let store = Arc::new(
            FilesystemStore::new(&root).map_err(|e| StoreError::OpenFailed(e.to_string()))?,
        );
        let group = Group::open(store.clone(), "/")
            .map_err(|e| StoreError::OpenFailed(format!("{}: {}", root.display(), e)))?;
        let mut attrs = group.attributes().clone();
        let catalogue: Catalogue = match attrs.remove(CATALOGUE_KEY) {
            Some(value) => serde_json::from_value(value)?,
            None => {
                return Err(StoreError::InvalidMetadata(format!(
                    "{} has no '{}' attribute",
                    root.display(),
                    CATALOGUE_KEY
                )))
            }
        };

        let mut zarr = Self {
            root,
            store,
            catalogue,
            attrs,
            config: ZarrStoreConfig::default(),
        };

        let names: Vec<String> = zarr.catalogue.arrays.keys().cloned().collect();
        for name in names {
            let array = zarr.open_array(&name)?;
            let attributes = array.attributes().clone();
            if let Some(entry) = zarr.catalogue.arrays.get_mut(&name) {
                entry.attributes = attributes;
            }
        }
        debug!(
            path = %zarr.root.display(),
            variables = zarr.catalogue.arrays.len(),
            "opened zarr store"
        );
        Ok(zarr)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn save_catalogue(&self) -> Result<()> {
        let mut attrs = self.attrs.clone();
        attrs.insert(
            CATALOGUE_KEY.to_string(),
            serde_json::to_value(&self.catalogue)?,
        );
        self.store_group("/", attrs)
    }

    fn store_group(&self, path: &str, attrs: Attributes) -> Result<()> {
        let group = GroupBuilder::new()
            .attributes(attrs)
            .build(self.store.clone(), path)
            .map_err(|e| StoreError::zarr_error(format!("group {}: {}", path, e)))?;
        group
            .store_metadata()
            .map_err(|e| StoreError::StorageError(format!("group {}: {}", path, e)))
    }

    /// Store group metadata for every intermediate path component.
    fn ensure_groups(&self, name: &str) -> Result<()> {
        let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
        let mut path = String::new();
        for part in parts.iter().take(parts.len().saturating_sub(1)) {
            path.push('/');
            path.push_str(part);
            if Group::open(self.store.clone(), &path).is_err() {
                self.store_group(&path, Attributes::new())?;
            }
        }
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<&ArrayEntry> {
        self.catalogue
            .arrays
            .get(name)
            .ok_or_else(|| StoreError::not_found(name))
    }

    fn shape_of(&self, entry: &ArrayEntry) -> Result<Vec<u64>> {
        entry
            .dims
            .iter()
            .map(|d| {
                self.catalogue
                    .dimensions
                    .get(d)
                    .map(|dim| dim.size)
                    .ok_or_else(|| StoreError::not_found(d.as_str()))
            })
            .collect()
    }

    fn open_array(&self, name: &str) -> Result<Array<FilesystemStore>> {
        Array::open(self.store.clone(), &array_path(name))
            .map_err(|e| StoreError::OpenFailed(format!("{}: {}", name, e)))
    }

    /// Build and store the array metadata for `entry` at `shape`.
    fn store_array_metadata(&self, name: &str, entry: &ArrayEntry, shape: &[u64]) -> Result<()> {
        let (data_type, fill_value) = match &entry.fill_value {
            ElementValue::Int32(v) => (DataType::Int32, FillValue::from(*v)),
            ElementValue::Int64(v) => (DataType::Int64, FillValue::from(*v)),
            ElementValue::Float32(v) => (DataType::Float32, FillValue::from(*v)),
            ElementValue::Float64(v) => (DataType::Float64, FillValue::from(*v)),
            ElementValue::Char(v) => (DataType::UInt8, FillValue::from(*v)),
            ElementValue::String(_) => (DataType::UInt8, FillValue::from(0u8)),
            ElementValue::DateTime(v) => (DataType::Int64, FillValue::from(v.timestamp())),
        };

        let mut array_shape = shape.to_vec();
        if let Some(width) = entry.string_width {
            array_shape.push(width);
        }

        let chunk_grid: zarrs::array::ChunkGrid = entry
            .chunk_shape
            .clone()
            .try_into()
            .map_err(|e| StoreError::zarr_error(format!("{:?}", e)))?;

        let array = ArrayBuilder::new(array_shape, data_type, chunk_grid, fill_value)
            .attributes(entry.attributes.clone())
            .build(self.store.clone(), &array_path(name))
            .map_err(|e| StoreError::zarr_error(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| StoreError::zarr_error(e.to_string()))
    }

    fn add_array(&mut self, name: &str, entry: ArrayEntry) -> Result<()> {
        let shape = self.shape_of(&entry)?;
        self.ensure_groups(name)?;
        self.store_array_metadata(name, &entry, &shape)?;
        self.catalogue.arrays.insert(name.to_string(), entry);
        self.save_catalogue()
    }

    fn chunk_shape(&self, kind: ElementKind, shape: &[u64]) -> Vec<u64> {
        let mut chunks: Vec<u64> = shape
            .iter()
            .enumerate()
            .map(|(d, &n)| if d == 0 { self.config.chunk_size } else { n }.max(1))
            .collect();
        if kind == ElementKind::String {
            chunks.push(self.config.string_width.max(1));
        }
        chunks
    }

    /// Read the block `start..start+shape` as a flat column.
    fn retrieve_block(
        &self,
        name: &str,
        entry: &ArrayEntry,
        start: &[u64],
        shape: &[u64],
    ) -> Result<ElementValues> {
        let len = shape.iter().product::<u64>() as usize;
        if len == 0 {
            return Ok(ElementValues::empty(entry.kind));
        }
        let array = self.open_array(name)?;

        let mut start = start.to_vec();
        let mut shape = shape.to_vec();
        if let Some(width) = entry.string_width {
            start.push(0);
            shape.push(width);
        }
        let subset = ArraySubset::new_with_start_shape(start, shape)
            .map_err(|e| StoreError::read_failed(name, e.to_string()))?;
        let fail = |e: zarrs::array::ArrayError| StoreError::read_failed(name, e.to_string());

        Ok(match entry.kind {
            ElementKind::Int32 => {
                ElementValues::Int32(array.retrieve_array_subset_elements::<i32>(&subset).map_err(fail)?)
            }
            ElementKind::Int64 => {
                ElementValues::Int64(array.retrieve_array_subset_elements::<i64>(&subset).map_err(fail)?)
            }
            ElementKind::Float32 => {
                ElementValues::Float32(array.retrieve_array_subset_elements::<f32>(&subset).map_err(fail)?)
            }
            ElementKind::Float64 => {
                ElementValues::Float64(array.retrieve_array_subset_elements::<f64>(&subset).map_err(fail)?)
            }
            ElementKind::Char => {
                ElementValues::Char(array.retrieve_array_subset_elements::<u8>(&subset).map_err(fail)?)
            }
            ElementKind::DateTime => {
                let secs = array
                    .retrieve_array_subset_elements::<i64>(&subset)
                    .map_err(fail)?;
                ElementValues::DateTime(
                    secs.into_iter()
                        .map(|s| datetime_from_epoch(name, s))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            ElementKind::String => {
                let width = entry.string_width.unwrap_or(1) as usize;
                let bytes = array
                    .retrieve_array_subset_elements::<u8>(&subset)
                    .map_err(fail)?;
                let fill = match &entry.fill_value {
                    ElementValue::String(s) => s.clone(),
                    _ => String::new(),
                };
                ElementValues::String(
                    bytes
                        .chunks(width)
                        .map(|row| decode_string(row, &fill))
                        .collect(),
                )
            }
        })
    }

    /// Write a flat column to the block `start..start+shape`.
    fn store_block(
        &self,
        name: &str,
        entry: &ArrayEntry,
        start: &[u64],
        shape: &[u64],
        values: &ElementValues,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let array = self.open_array(name)?;

        let mut start = start.to_vec();
        let mut shape = shape.to_vec();
        if let Some(width) = entry.string_width {
            start.push(0);
            shape.push(width);
        }
        let subset = ArraySubset::new_with_start_shape(start, shape)
            .map_err(|e| StoreError::write_failed(name, e.to_string()))?;
        let fail = |e: zarrs::array::ArrayError| StoreError::write_failed(name, e.to_string());

        match values {
            ElementValues::Int32(v) => array.store_array_subset_elements(&subset, v).map_err(fail),
            ElementValues::Int64(v) => array.store_array_subset_elements(&subset, v).map_err(fail),
            ElementValues::Float32(v) => array.store_array_subset_elements(&subset, v).map_err(fail),
            ElementValues::Float64(v) => array.store_array_subset_elements(&subset, v).map_err(fail),
            ElementValues::Char(v) => array.store_array_subset_elements(&subset, v).map_err(fail),
            ElementValues::DateTime(v) => {
                let secs: Vec<i64> = v.iter().map(|dt| dt.timestamp()).collect();
                array.store_array_subset_elements(&subset, &secs).map_err(fail)
            }
            ElementValues::String(v) => {
                let width = entry.string_width.unwrap_or(1) as usize;
                let mut bytes = Vec::with_capacity(v.len() * width);
                for s in v {
                    if s.len() > width {
                        return Err(StoreError::write_failed(
                            name,
                            format!("string '{}' longer than width {}", s, width),
                        ));
                    }
                    bytes.extend_from_slice(s.as_bytes());
                    bytes.resize(bytes.len() + width - s.len(), 0);
                }
                array.store_array_subset_elements(&subset, &bytes).map_err(fail)
            }
        }
    }
}

fn decode_string(row: &[u8], fill: &str) -> String {
    let end = row.iter().position(|&b| b == 0).unwrap_or(row.len());
    if end == 0 {
        return fill.to_string();
    }
    String::from_utf8_lossy(&row[..end]).into_owned()
}

impl ObsStore for ZarrStore {
    fn dimensions(&self) -> Vec<DimensionInfo> {
        self.catalogue.dimensions.values().cloned().collect()
    }

    fn dimension(&self, name: &str) -> Result<DimensionInfo> {
        self.catalogue
            .dimensions
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(name))
    }

    fn variables(&self) -> Vec<String> {
        self.catalogue
            .arrays
            .iter()
            .filter(|(_, e)| !e.is_dimension_scale)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn variable(&self, name: &str) -> Result<VariableInfo> {
        let entry = self.entry(name)?;
        Ok(VariableInfo {
            name: name.to_string(),
            kind: entry.kind,
            dims: entry.dims.clone(),
            shape: self.shape_of(entry)?,
            fill_value: entry.fill_value.clone(),
            is_dimension_scale: entry.is_dimension_scale,
        })
    }

    fn exists(&self, name: &str) -> bool {
        self.catalogue.arrays.contains_key(name)
    }

    fn create_dimension(
        &mut self,
        name: &str,
        kind: ElementKind,
        size: u64,
        max_size: Option<u64>,
    ) -> Result<()> {
        if self.exists(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        self.catalogue.dimensions.insert(
            name.to_string(),
            DimensionInfo {
                name: name.to_string(),
                kind,
                size,
                max_size,
            },
        );
        let entry = ArrayEntry {
            kind,
            dims: vec![name.to_string()],
            fill_value: kind.missing_value(),
            chunk_shape: self.chunk_shape(kind, &[size]),
            string_width: (kind == ElementKind::String).then_some(self.config.string_width),
            is_dimension_scale: true,
            attributes: Attributes::new(),
        };
        self.add_array(name, entry)
    }

    fn create_variable(&mut self, spec: VariableSpec) -> Result<()> {
        if self.exists(&spec.name) {
            return Err(StoreError::AlreadyExists(spec.name));
        }
        let fill = spec.effective_fill();
        if fill.kind() != spec.kind {
            return Err(StoreError::KindMismatch {
                name: spec.name,
                expected: spec.kind,
                actual: fill.kind(),
            });
        }
        let mut shape = Vec::with_capacity(spec.dims.len());
        for d in &spec.dims {
            shape.push(self.dimension(d)?.size);
        }
        let entry = ArrayEntry {
            kind: spec.kind,
            dims: spec.dims,
            fill_value: fill,
            chunk_shape: self.chunk_shape(spec.kind, &shape),
            string_width: (spec.kind == ElementKind::String).then_some(self.config.string_width),
            is_dimension_scale: false,
            attributes: spec.attributes,
        };
        self.add_array(&spec.name, entry)
    }

    fn read(&self, name: &str, memory: &Selection, storage: &Selection) -> Result<ElementValues> {
        let entry = self.entry(name)?;
        let shape = self.shape_of(entry)?;
        let mem = memory.resolve()?;
        let sto = storage.resolve()?;
        check_transfer(name, &mem, &sto)?;
        sto.offsets(name, &shape)?;

        let (start, block_shape) = sto.bounding_box();
        let block = self.retrieve_block(name, entry, &start, &block_shape)?;
        let src = sto.offsets_within(name, &start, &block_shape)?;
        let dst = mem.offsets(name, memory.extent())?;

        let mut out = ElementValues::filled(&entry.fill_value, memory.extent_len());
        out.scatter(&dst, &block.gather(&src))?;
        trace!(variable = name, count = src.len(), "zarr read");
        Ok(out)
    }

    fn write(
        &mut self,
        name: &str,
        values: &ElementValues,
        memory: &Selection,
        storage: &Selection,
    ) -> Result<()> {
        let entry = self.entry(name)?;
        if values.kind() != entry.kind {
            return Err(StoreError::KindMismatch {
                name: name.to_string(),
                expected: entry.kind,
                actual: values.kind(),
            });
        }
        if values.len() != memory.extent_len() {
            return Err(StoreError::write_failed(
                name,
                format!(
                    "buffer holds {} elements, memory extent {:?}",
                    values.len(),
                    memory.extent()
                ),
            ));
        }
        let shape = self.shape_of(entry)?;
        let mem = memory.resolve()?;
        let sto = storage.resolve()?;
        check_transfer(name, &mem, &sto)?;
        sto.offsets(name, &shape)?;

        let picked = values.gather(&mem.offsets(name, memory.extent())?);
        let (start, block_shape) = sto.bounding_box();

        if sto.is_block() {
            self.store_block(name, entry, &start, &block_shape, &picked)?;
        } else {
            let mut block = self.retrieve_block(name, entry, &start, &block_shape)?;
            let dst = sto.offsets_within(name, &start, &block_shape)?;
            block.scatter(&dst, &picked)?;
            self.store_block(name, entry, &start, &block_shape, &block)?;
        }
        trace!(variable = name, count = picked.len(), "zarr write");
        Ok(())
    }

    fn resize_dimension(&mut self, name: &str, size: u64) -> Result<()> {
        let dim = self.dimension(name)?;
        if let Some(max) = dim.max_size {
            if size > max {
                return Err(StoreError::invalid(format!(
                    "dimension '{}' size {} exceeds maximum {}",
                    name, size, max
                )));
            }
        }
        if let Some(dim) = self.catalogue.dimensions.get_mut(name) {
            dim.size = size;
        }

        for (var, entry) in &self.catalogue.arrays {
            if entry.dims.iter().any(|d| d == name) {
                let shape = self.shape_of(entry)?;
                self.store_array_metadata(var, entry, &shape)?;
            }
        }
        debug!(dimension = name, size, "resized zarr dimension");
        self.save_catalogue()
    }

    fn attributes(&self, var: Option<&str>) -> Result<Attributes> {
        match var {
            None => Ok(self.attrs.clone()),
            Some(name) => Ok(self.entry(name)?.attributes.clone()),
        }
    }

    fn set_attribute(
        &mut self,
        var: Option<&str>,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        match var {
            None => {
                self.attrs.insert(name.to_string(), value);
                self.save_catalogue()
            }
            Some(v) => {
                let entry = self
                    .catalogue
                    .arrays
                    .get_mut(v)
                    .ok_or_else(|| StoreError::not_found(v))?;
                entry.attributes.insert(name.to_string(), value);
                let entry = self.entry(v)?;
                let shape = self.shape_of(entry)?;
                self.store_array_metadata(v, entry, &shape)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_string() {
        assert_eq!(decode_string(b"KBOU\0\0\0\0", "missing"), "KBOU");
        assert_eq!(decode_string(b"\0\0\0\0", "missing"), "missing");
        assert_eq!(decode_string(b"ABCD", "missing"), "ABCD");
    }

    #[test]
    fn test_array_path() {
        assert_eq!(array_path("MetaData/latitude"), "/MetaData/latitude");
        assert_eq!(array_path("/Location"), "/Location");
    }

    #[test]
    fn test_create_then_open_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.zarr");
        {
            let mut store = ZarrStore::create(&path, ZarrStoreConfig::default()).unwrap();
            store
                .create_dimension("Location", ElementKind::Int32, 3, None)
                .unwrap();
            store
                .create_variable(VariableSpec::new(
                    "MetaData/latitude",
                    ElementKind::Float32,
                    &["Location"],
                ))
                .unwrap();
            store
                .set_attribute(None, "date_time", serde_json::json!(2018041500))
                .unwrap();
        }

        let store = ZarrStore::open(&path).unwrap();
        assert_eq!(store.variables(), vec!["MetaData/latitude"]);
        assert_eq!(store.dimension("Location").unwrap().size, 3);
        assert_eq!(
            store.attribute(None, "date_time").unwrap(),
            Some(serde_json::json!(2018041500))
        );
        assert!(path.join("MetaData").join("zarr.json").exists());
    }
}
