//! Writing an observation space through an I/O pool.
//!
//! ```text
//!   every rank ── patch rows ──► home pool rank (gather_to_pool)
//!
//!   single file:     pool rank 0 creates <out> sized to the global total,
//!                    pool ranks write in turn at their nlocs_start
//!   multiple files:  pool rank r writes <out>_<r> sized to its own total
//! ```

use std::path::{Path, PathBuf};

use obs_distribution::{Comm, IoPool, IoPoolConfig};
use obs_store::{ElementKind, ElementValues, ObsStore, VariableSpec, ZarrStore, ZarrStoreConfig};
use tracing::{debug, info};

use crate::config::ObsSpaceConfig;
use crate::error::{FrameError, Result};
use crate::frame::{SAVED_INDEX, SAVED_RECORD_NUMBER};
use crate::select::{memory_selection, source_selection};
use crate::source::LOCATION;
use crate::space::{narrow_indices, ObsSpace};

/// One Location-indexed column, already gathered onto a pool rank.
struct Column {
    name: String,
    values: ElementValues,
}

#[derive(Debug, Clone)]
pub struct ObsWriter {
    pool_config: IoPoolConfig,
    save_obs_distribution: bool,
    store_config: ZarrStoreConfig,
}

impl ObsWriter {
    pub fn new(pool_config: IoPoolConfig) -> Self {
        Self {
            pool_config,
            save_obs_distribution: false,
            store_config: ZarrStoreConfig::default(),
        }
    }

    pub fn from_config(config: &ObsSpaceConfig) -> Self {
        let save = config
            .obsdataout
            .as_ref()
            .map(|out| out.save_obs_distribution)
            .unwrap_or(false);
        Self::new(config.io_pool.clone()).with_obs_distribution(save)
    }

    /// Also write `MetaData/saved_index` and `MetaData/saved_record_number`,
    /// so the output can be read back with separate-file Halo distribution.
    pub fn with_obs_distribution(mut self, save: bool) -> Self {
        self.save_obs_distribution = save;
        self
    }

    pub fn with_store_config(mut self, config: ZarrStoreConfig) -> Self {
        self.store_config = config;
        self
    }

    /// Write `space` to `output`. Collective over the space's communicator.
    ///
    /// Returns the path written by this rank, or `None` on ranks outside
    /// the pool.
    pub fn write(&self, space: &ObsSpace, comm_time: Option<&Comm>, output: &Path) -> Result<Option<PathBuf>> {
        let comm = space.distribution().comm().clone();
        let rows = owned_rows(space);
        let pool = IoPool::new(
            comm,
            comm_time.cloned(),
            self.pool_config.clone(),
            *space.window(),
            rows.len(),
        )?;

        let columns = self.gather_columns(space, &pool, &rows)?;
        let Some(pool_rank) = pool.pool_rank() else {
            debug!(home = pool.home_pool_rank(), rows = rows.len(), "sent rows to io pool");
            return Ok(None);
        };

        let path = pool.output_file_name(output);
        if self.pool_config.write_multiple_files {
            let mut out = self.create_output(&path, space, pool.total_nlocs() as u64)?;
            write_rows(&mut out, &columns, 0)?;
        } else {
            let comm_pool = pool
                .comm_pool()
                .ok_or_else(|| FrameError::state("pool member without a pool communicator"))?;
            if pool_rank == 0 {
                self.create_output(&path, space, pool.global_nlocs() as u64)?;
            }
            comm_pool.barrier()?;
            for turn in 0..comm_pool.size() {
                if turn == pool_rank {
                    let mut out = ZarrStore::open(&path)?;
                    write_rows(&mut out, &columns, pool.nlocs_start() as u64)?;
                }
                comm_pool.barrier()?;
            }
        }

        info!(
            path = %path.display(),
            pool_rank,
            rows = pool.total_nlocs(),
            nlocs_start = pool.nlocs_start(),
            "wrote observations"
        );
        Ok(Some(path))
    }

    fn gather_columns(&self, space: &ObsSpace, pool: &IoPool, rows: &[usize]) -> Result<Vec<Column>> {
        let store = space.store();
        let mut names = Vec::new();
        if store.exists(LOCATION) {
            names.push(LOCATION.to_string());
        }
        names.extend(
            store
                .variables()
                .into_iter()
                .filter(|name| store.variable(name).is_ok_and(|info| info.is_indexed_by(LOCATION))),
        );

        let mut own = Vec::with_capacity(names.len() + 2);
        for name in names {
            let info = store.variable(&name)?;
            let values = store.read_all(&name)?;
            own.push(Column {
                values: values.gather(&expand_rows(rows, info.row_len() as usize)),
                name,
            });
        }
        if self.save_obs_distribution {
            let index: Vec<usize> = rows.iter().map(|&r| space.index()[r]).collect();
            let recnums: Vec<usize> = rows.iter().map(|&r| space.recnums()[r]).collect();
            let index = narrow_indices::<i32>(SAVED_INDEX, ElementKind::Int32, &index)?;
            let recnums = narrow_indices::<i32>(SAVED_RECORD_NUMBER, ElementKind::Int32, &recnums)?;
            own.push(Column {
                name: SAVED_INDEX.to_string(),
                values: index.into(),
            });
            own.push(Column {
                name: SAVED_RECORD_NUMBER.to_string(),
                values: recnums.into(),
            });
        }

        let mut gathered = Vec::with_capacity(own.len());
        for column in own {
            if let Some(blocks) = pool.gather_to_pool(vec![column.values])? {
                gathered.push(Column {
                    name: column.name,
                    values: concat(blocks)?,
                });
            }
        }
        Ok(gathered)
    }

    /// Create the output with the space's schema, `Location` sized to
    /// `nlocs`, and every non-Location variable already written.
    fn create_output(&self, path: &Path, space: &ObsSpace, nlocs: u64) -> Result<ZarrStore> {
        let schema = space.store();
        let mut out = ZarrStore::create(path, self.store_config)?;

        for dim in schema.dimensions() {
            let size = if dim.name == LOCATION { nlocs } else { dim.size };
            out.create_dimension(&dim.name, dim.kind, size, None)?;
            if dim.name != LOCATION && size > 0 {
                out.write_all(&dim.name, &schema.read_all(&dim.name)?)?;
            }
            for (key, value) in schema.attributes(Some(&dim.name))? {
                out.set_attribute(Some(&dim.name), &key, value)?;
            }
        }

        for name in schema.variables() {
            let info = schema.variable(&name)?;
            out.create_variable(VariableSpec::like(&info, schema.attributes(Some(&name))?))?;
            if !info.is_indexed_by(LOCATION) && info.shape.iter().product::<u64>() > 0 {
                out.write_all(&name, &schema.read_all(&name)?)?;
            }
        }

        if self.save_obs_distribution {
            for name in [SAVED_INDEX, SAVED_RECORD_NUMBER] {
                if !out.exists(name) {
                    out.create_variable(VariableSpec::new(name, ElementKind::Int32, &[LOCATION]))?;
                }
            }
        }

        for (key, value) in schema.attributes(None)? {
            out.set_attribute(None, &key, value)?;
        }
        debug!(path = %path.display(), nlocs, "created output store");
        Ok(out)
    }
}

/// Local rows this rank contributes: its patch rows, or every row on rank
/// 0 only when the distribution is not distributed.
fn owned_rows(space: &ObsSpace) -> Vec<usize> {
    let dist = space.distribution();
    if !dist.is_distributed() {
        return if dist.comm().rank() == 0 {
            (0..space.nlocs()).collect()
        } else {
            Vec::new()
        };
    }
    let mut patch = vec![false; space.nlocs()];
    dist.patch_obs(&mut patch);
    patch
        .iter()
        .enumerate()
        .filter_map(|(i, &p)| p.then_some(i))
        .collect()
}

fn expand_rows(rows: &[usize], row_len: usize) -> Vec<usize> {
    rows.iter()
        .flat_map(|&r| (r * row_len)..((r + 1) * row_len))
        .collect()
}

fn concat(blocks: Vec<ElementValues>) -> Result<ElementValues> {
    let mut blocks = blocks.into_iter();
    let Some(mut out) = blocks.next() else {
        return Err(FrameError::state("no blocks gathered"));
    };
    for block in blocks {
        out.append(&block)?;
    }
    Ok(out)
}

fn write_rows(out: &mut ZarrStore, columns: &[Column], start: u64) -> Result<()> {
    for column in columns {
        let info = out.variable(&column.name)?;
        let row_len = info.row_len().max(1);
        let count = column.values.len() as u64 / row_len;
        if count == 0 {
            continue;
        }
        out.write(
            &column.name,
            &column.values,
            &memory_selection(&info.shape, count),
            &source_selection(&info.shape, start, count),
        )?;
    }
    Ok(())
}
